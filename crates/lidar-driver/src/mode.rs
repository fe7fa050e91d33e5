//! 系统运行模式
//!
//! 消费者循环在启动检查结束后进入 Running 或 Config 模式。
//! Config 模式只处理上位机指令并丢弃队列中的帧，直到重启。

use std::sync::atomic::{AtomicU8, Ordering};

/// 系统模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SystemMode {
    /// 启动中（默认）
    #[default]
    Init = 0,
    /// 正常运行：测距、速度估计、触发输出
    Running = 1,
    /// 配置模式：只响应上位机
    Config = 2,
}

impl SystemMode {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Init。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Config,
            _ => Self::Init,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 系统模式（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicSystemMode {
    inner: AtomicU8,
}

impl AtomicSystemMode {
    pub fn new(mode: SystemMode) -> Self {
        Self {
            inner: AtomicU8::new(mode.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> SystemMode {
        SystemMode::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, mode: SystemMode, ordering: Ordering) {
        self.inner.store(mode.as_u8(), ordering);
    }
}
