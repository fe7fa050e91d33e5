//! # LiDAR CLI
//!
//! LiDAR 触发器的离线工具。
//!
//! ```bash
//! # 生成默认配置
//! lidar-cli config init trigger.toml
//!
//! # 用抓包数据回放完整的采集 → 触发流程（模拟时间，不需要硬件）
//! lidar-cli replay --input capture.bin --config trigger.toml --selector 2
//!
//! # 编码 / 解码单帧
//! lidar-cli frame encode 150 700
//! lidar-cli frame decode "59 59 96 00 BC 02 00 00 06"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCommand, FrameCommand, ReplayCommand};

/// LiDAR CLI - 激光测距触发器命令行工具
#[derive(Parser, Debug)]
#[command(name = "lidar-cli")]
#[command(about = "Command-line tools for the LiDAR distance trigger", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置文件管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 回放传感器抓包数据
    Replay {
        #[command(flatten)]
        args: ReplayCommand,
    },

    /// 传感器帧编解码
    #[command(subcommand)]
    Frame(FrameCommand),
}

fn main() -> Result<()> {
    // 初始化日志
    lidar_sdk::init_logger("warn,lidar_cli=info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Replay { args } => args.execute(),
        Commands::Frame(cmd) => cmd.execute(),
    }
}
