//! # LiDAR HAL
//!
//! 硬件抽象层：串口字节流、触发输出引脚、选择开关。
//!
//! 上层循环只依赖这里的 trait，实际设备与内存模拟（`mock` feature）可以互换。

use thiserror::Error;

pub mod gpio;
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use gpio::{OutputPin, SelectorInput, selector_code};
pub use serial::SerialPort;

/// 硬件层统一错误类型
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Port not open")]
    NotOpen,
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("Device Error: {0}")]
    Device(String),
    #[error("Write timeout")]
    Timeout,
}

impl HalError {
    /// 是否为无法通过重开端口恢复的错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, HalError::UnsupportedBaud(_))
    }
}
