//! 共享状态寄存器
//!
//! 两个循环之间唯一的状态交换点。所有读写都在同一把锁内完成，
//! 读取方拿到的是完整快照，不会出现字段之间不一致的情况。
//!
//! 锁内不调用任何可能获取其他锁的代码：标志 0→1 的计数由调用方在释放锁之后
//! 记录到性能计数器（见 `LidarContext::set_flag`）。

use lidar_protocol::{ErrorFlag, ErrorFlags};
use parking_lot::Mutex;

/// 状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusSnapshot {
    /// 传感器初始化完成
    pub sensor_initialized: bool,
    /// 消费者循环已就绪
    pub consumer_ready: bool,
    pub debug_enabled: bool,
    /// 触发输出（逻辑有效）
    pub trigger_active: bool,
    /// 上位机配置模式
    pub config_mode_active: bool,
    /// 当前选择行
    pub selector: u8,
    pub error_flags: ErrorFlags,
    pub frames_received: u32,
    pub frames_processed: u32,
    pub frames_dropped: u32,
    /// 最近一次成功入队的时刻（毫秒）
    pub last_frame_ms: u64,
    pub recovery_attempts: u32,
    /// 最近一次速度估计（cm/s，正值表示接近）
    pub latest_velocity: f32,
    pub latest_distance: u16,
    pub latest_strength: u16,
}

impl StatusSnapshot {
    pub fn has_flag(&self, flag: ErrorFlag) -> bool {
        self.error_flags.contains(flag)
    }
}

/// 锁保护的状态寄存器
#[derive(Debug, Default)]
pub struct SharedStatusRegister {
    inner: Mutex<StatusSnapshot>,
}

impl SharedStatusRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// 完整快照
    pub fn snapshot(&self) -> StatusSnapshot {
        *self.inner.lock()
    }

    /// 在一次临界区内修改寄存器
    ///
    /// 闭包内不得再获取其他锁。
    pub fn update<R>(&self, f: impl FnOnce(&mut StatusSnapshot) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// 设置或清除错误标志
    ///
    /// 返回是否发生了 0→1 变化。
    pub fn set_flag(&self, flag: ErrorFlag, active: bool) -> bool {
        let mut guard = self.inner.lock();
        let was_set = guard.error_flags.contains(flag);
        guard.error_flags = guard.error_flags.with(flag, active);
        active && !was_set
    }

    pub fn flag(&self, flag: ErrorFlag) -> bool {
        self.inner.lock().error_flags.contains(flag)
    }

    pub fn error_flags(&self) -> ErrorFlags {
        self.inner.lock().error_flags
    }

    pub fn is_config_mode(&self) -> bool {
        self.inner.lock().config_mode_active
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.inner.lock().debug_enabled
    }
}

/// 状态灯闪烁间隔（毫秒）
///
/// 配置模式最快，其次按缓冲危急、缓冲告警、通信超时的优先级，正常时 1 秒。
pub fn blink_interval_ms(config_mode: bool, flags: ErrorFlags) -> u64 {
    if config_mode {
        100
    } else if flags.contains(ErrorFlag::BufferCritical) {
        10
    } else if flags.contains(ErrorFlag::BufferWarning) {
        200
    } else if flags.contains(ErrorFlag::CommTimeout) {
        300
    } else {
        1_000
    }
}

/// 状态灯
#[derive(Debug, Clone, Default)]
pub struct StatusIndicator {
    lit: bool,
    last_toggle_ms: u64,
}

impl StatusIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    /// 间隔已过（严格大于）时翻转，返回新的亮灭状态
    pub fn update(&mut self, snapshot: &StatusSnapshot, now_ms: u64) -> Option<bool> {
        let interval = blink_interval_ms(snapshot.config_mode_active, snapshot.error_flags);
        if now_ms.saturating_sub(self.last_toggle_ms) > interval {
            self.lit = !self.lit;
            self.last_toggle_ms = now_ms;
            return Some(self.lit);
        }
        None
    }
}
