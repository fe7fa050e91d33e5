//! 错误标志位
//!
//! 状态寄存器中的错误位图。位序与上位机 `S` 指令回复中的 `error_flags` 一致。

use bilge::prelude::*;

/// 错误标志位图（8 位）
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorFlags {
    pub comm_timeout: bool,        // Bit 0: 传感器通信超时
    pub buffer_overflow: bool,     // Bit 1: 帧队列溢出（丢帧）
    pub init_failed: bool,         // Bit 2: 初始化失败 / 恢复预算耗尽
    pub buffer_warning: bool,      // Bit 3: 队列达到警告水位
    pub buffer_critical: bool,     // Bit 4: 队列达到临界水位
    pub frame_corruption: bool,    // Bit 5: 帧校验或量程错误
    pub velocity_calc_error: bool, // Bit 6: 速度估计连续失败
    pub config_error: bool,        // Bit 7: 配置无效
}

/// 单个错误标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorFlag {
    CommTimeout = 0,
    BufferOverflow = 1,
    InitFailed = 2,
    BufferWarning = 3,
    BufferCritical = 4,
    FrameCorruption = 5,
    VelocityCalcError = 6,
    ConfigError = 7,
}

impl ErrorFlag {
    /// 全部标志，按位序排列
    pub const ALL: [ErrorFlag; 8] = [
        ErrorFlag::CommTimeout,
        ErrorFlag::BufferOverflow,
        ErrorFlag::InitFailed,
        ErrorFlag::BufferWarning,
        ErrorFlag::BufferCritical,
        ErrorFlag::FrameCorruption,
        ErrorFlag::VelocityCalcError,
        ErrorFlag::ConfigError,
    ];

    /// 位序号（0..8）
    pub fn bit(self) -> usize {
        self as usize
    }

    /// 位掩码
    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }

    /// 日志中使用的名称
    pub fn name(self) -> &'static str {
        match self {
            ErrorFlag::CommTimeout => "comm_timeout",
            ErrorFlag::BufferOverflow => "buffer_overflow",
            ErrorFlag::InitFailed => "init_failed",
            ErrorFlag::BufferWarning => "buffer_warning",
            ErrorFlag::BufferCritical => "buffer_critical",
            ErrorFlag::FrameCorruption => "frame_corruption",
            ErrorFlag::VelocityCalcError => "velocity_calc_error",
            ErrorFlag::ConfigError => "config_error",
        }
    }
}

impl ErrorFlags {
    /// 原始位图
    pub fn bits(self) -> u8 {
        u8::from(self).value()
    }

    /// 从原始位图构造
    pub fn from_bits(bits: u8) -> Self {
        ErrorFlags::from(u8::new(bits))
    }

    pub fn contains(self, flag: ErrorFlag) -> bool {
        self.bits() & flag.mask() != 0
    }

    /// 设置或清除单个标志，返回新位图
    pub fn with(self, flag: ErrorFlag, active: bool) -> Self {
        let bits = if active {
            self.bits() | flag.mask()
        } else {
            self.bits() & !flag.mask()
        };
        Self::from_bits(bits)
    }

    /// 当前置位的标志
    pub fn active(self) -> impl Iterator<Item = ErrorFlag> {
        ErrorFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    pub fn is_clear(self) -> bool {
        self.bits() == 0
    }
}
