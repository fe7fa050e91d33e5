//! LiDAR SDK - 激光测距触发器 Rust SDK
//!
//! 把一个 9 字节帧格式的激光测距传感器变成带去抖的触发输出。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 传感器帧、传感器指令、上位机包格式
//! - **硬件抽象层** (`hal`): 串口、输出引脚、选择开关
//! - **工具层** (`tools`): 配置、运行参数、持久化
//! - **驱动层** (`driver`): 生产者/消费者循环、恢复、触发判定
//!
//! # 快速开始
//!
//! ```rust
//! use lidar_sdk::prelude::*;
//! ```

pub use lidar_driver as driver;
pub use lidar_hal as hal;
pub use lidar_protocol as protocol;
pub use lidar_tools as tools;

pub mod prelude;

// --- 用户以此为界 ---

pub use lidar_driver::{
    DriverError, LidarContext, LidarTrigger, LidarTriggerBuilder, StatusSnapshot, SystemMode,
    TriggerCallback, TriggerEvent,
};
pub use lidar_hal::{HalError, OutputPin, SelectorInput, SerialPort};
pub use lidar_protocol::{ErrorFlag, ErrorFlags, ProtocolError};
pub use lidar_tools::{ConfigError, ConfigStore, DeviceConfig, RuntimeSettings, SampleRateMode};

use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 未设置 `RUST_LOG` 时使用 `default_directive`（例如 `"info"`）。
/// `log` 宏的输出也会转发到 tracing。重复调用是安全的，只有第一次生效。
pub fn init_logger(default_directive: &str) {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
