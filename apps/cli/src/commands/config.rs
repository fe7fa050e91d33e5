//! 配置管理命令
//!
//! 读写触发器配置文件。扩展名为 `.bin` 时使用 84 字节二进制记录，否则使用 TOML。

use anyhow::{Context, Result};
use clap::Subcommand;
use lidar_sdk::tools::{ConfigStore, DeviceConfig, FileConfigStore, SampleRateMode};
use std::path::{Path, PathBuf};

/// 解析采样率参数（`1000` / `800`）
pub fn parse_sample_rate(value: &str) -> Result<SampleRateMode, String> {
    match value.trim_end_matches("hz").trim_end_matches("Hz") {
        "1000" => Ok(SampleRateMode::Hz1000),
        "800" => Ok(SampleRateMode::Hz800),
        other => Err(format!("unsupported sample rate '{}', expected 1000 or 800", other)),
    }
}

/// 读取配置文件，文件不存在时返回错误
pub fn load_config(path: &Path) -> Result<DeviceConfig> {
    FileConfigStore::new(path)
        .load()
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?
        .ok_or_else(|| anyhow::anyhow!("❌ 配置文件不存在: {}", path.display()))
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 写入默认配置
    Init {
        /// 配置文件路径
        path: PathBuf,

        /// 采样率（1000 或 800）
        #[arg(long, default_value = "1000", value_parser = parse_sample_rate)]
        sample_rate: SampleRateMode,

        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },

    /// 显示配置
    Show {
        path: PathBuf,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 检查配置是否有效
    Check { path: PathBuf },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Init {
                path,
                sample_rate,
                force,
            } => Self::init_(&path, sample_rate, force),
            ConfigCommand::Show { path, json } => Self::show_(&path, json),
            ConfigCommand::Check { path } => Self::check_(&path),
        }
    }

    fn init_(path: &Path, sample_rate: SampleRateMode, force: bool) -> Result<()> {
        if path.exists() && !force {
            anyhow::bail!(
                "❌ 文件已存在: {}（使用 --force 覆盖）",
                path.display()
            );
        }
        let config = DeviceConfig {
            sample_rate,
            ..Default::default()
        };
        FileConfigStore::new(path)
            .save(&config)
            .context("写入配置文件失败")?;
        println!("✅ 已写入默认配置: {}", path.display());
        Ok(())
    }

    fn show_(path: &Path, json: bool) -> Result<()> {
        let config = load_config(path)?;
        if json {
            println!("{}", config.to_json_pretty());
        } else {
            print!("{}", config.to_toml_string()?);
        }
        Ok(())
    }

    fn check_(path: &Path) -> Result<()> {
        let config = load_config(path)?;
        config
            .validate()
            .with_context(|| format!("❌ 配置无效: {}", path.display()))?;
        println!("✅ 配置有效: {}", path.display());
        println!(
            "   采样率: {} Hz, 速度门限: {}",
            config.sample_rate.rate_hz(),
            if config.table.use_velocity_trigger {
                "启用"
            } else {
                "关闭"
            }
        );
        for (i, row) in config.table.rows.iter().enumerate() {
            println!(
                "   [{}] 距离 ≤ {:4} cm, 速度 {:5} ~ {:5} cm/s",
                i, row.distance_threshold_cm, row.velocity_min_cm_s, row.velocity_max_cm_s
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_rate() {
        assert_eq!(parse_sample_rate("1000").unwrap(), SampleRateMode::Hz1000);
        assert_eq!(parse_sample_rate("800hz").unwrap(), SampleRateMode::Hz800);
        assert!(parse_sample_rate("500").is_err());
    }

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trigger.toml");
        ConfigCommand::Init {
            path: path.clone(),
            sample_rate: SampleRateMode::Hz800,
            force: false,
        }
        .execute()
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.sample_rate, SampleRateMode::Hz800);

        // 已存在且未指定 --force
        let err = ConfigCommand::Init {
            path: path.clone(),
            sample_rate: SampleRateMode::Hz1000,
            force: false,
        }
        .execute();
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.toml")).is_err());
    }
}
