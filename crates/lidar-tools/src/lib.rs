//! # LiDAR Tools - 配置与共享算法
//!
//! **依赖原则**: 只依赖 `lidar-protocol`，不依赖驱动层
//!
//! ## 包含模块
//!
//! - `config` - 选择行触发表、运行参数、校验与二进制记录
//! - `settings` - 运行参数（可调时序与阈值）
//! - `store` - 配置持久化（TOML 文件 / 内存）
//! - `statistics` - 中值等纯函数

pub mod config;
pub mod settings;
pub mod statistics;
pub mod store;

pub use config::{
    ConfigError, DeviceConfig, RECORD_LEN, SELECTOR_ROWS, SampleRateMode, SelectorRow,
    TriggerTable,
};
pub use settings::{RuntimeSettings, SETTINGS_WIRE_LEN};
pub use statistics::median_in_place;
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};
