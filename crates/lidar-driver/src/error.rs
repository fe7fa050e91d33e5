//! 驱动层错误类型定义

use lidar_hal::HalError;
use lidar_protocol::ProtocolError;
use lidar_tools::ConfigError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口 / GPIO 错误
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 工作线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
