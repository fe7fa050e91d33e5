//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use lidar_sdk::prelude::*;
//! ```

// 运行时
pub use lidar_driver::{Clock, LidarTrigger, LidarTriggerBuilder, MonotonicClock};
pub use lidar_driver::{StatusSnapshot, SystemMode, TriggerCallback, TriggerEvent};

// 硬件抽象（常用 Trait）
pub use lidar_hal::{OutputPin, SelectorInput, SerialPort};

// 配置
pub use lidar_tools::{
    ConfigStore, DeviceConfig, FileConfigStore, MemoryConfigStore, RuntimeSettings,
    SampleRateMode,
};

// 错误类型
pub use lidar_driver::DriverError;
pub use lidar_hal::HalError;
pub use lidar_protocol::ProtocolError;
pub use lidar_tools::ConfigError;
