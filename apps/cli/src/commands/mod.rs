//! 命令定义和实现

pub mod config;
pub mod frame;
pub mod replay;

pub use config::ConfigCommand;
pub use frame::FrameCommand;
pub use replay::ReplayCommand;
