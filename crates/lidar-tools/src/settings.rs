//! # 运行参数
//!
//! 可在现场调整的时序与阈值。每个字段都有允许范围，越界的整组参数不会被采用。
//!
//! 上位机 `L`/`l` 指令使用 56 字节小端布局：13 个 `u32` 后接一个 `f32`，
//! 顺序与结构体字段顺序一致。

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// 线路布局长度
pub const SETTINGS_WIRE_LEN: usize = 56;

/// 运行参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// 上电后等待上位机进入配置模式的时间
    pub config_mode_timeout_ms: u32,
    /// 有效帧的最低信号强度
    pub min_strength_threshold: u32,
    /// 完全重新初始化前允许的恢复次数
    pub max_recovery_attempts: u32,
    /// 同一恢复级别两次执行之间的冷却时间
    pub recovery_attempt_delay_ms: u32,
    pub startup_delay_ms: u32,
    pub lidar_init_step_delay_ms: u32,
    pub lidar_final_delay_ms: u32,
    pub command_response_delay_ms: u32,
    pub debug_output_interval_ms: u32,
    pub status_check_interval_ms: u32,
    pub performance_report_interval_ms: u32,
    /// 重复告警日志的最小间隔
    pub critical_error_report_interval_ms: u32,
    pub distance_deadband_threshold_cm: u32,
    pub velocity_deadband_threshold_cm_s: f32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            config_mode_timeout_ms: 15_000,
            min_strength_threshold: 200,
            max_recovery_attempts: 3,
            recovery_attempt_delay_ms: 5_000,
            startup_delay_ms: 1_000,
            lidar_init_step_delay_ms: 500,
            lidar_final_delay_ms: 100,
            command_response_delay_ms: 50,
            debug_output_interval_ms: 150,
            status_check_interval_ms: 5_000,
            performance_report_interval_ms: 10_000,
            critical_error_report_interval_ms: 2_000,
            distance_deadband_threshold_cm: 1,
            velocity_deadband_threshold_cm_s: 1.0,
        }
    }
}

fn check_u32(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::SettingOutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

impl RuntimeSettings {
    /// 检查全部字段的允许范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_u32("config_mode_timeout_ms", self.config_mode_timeout_ms, 1_000, 60_000)?;
        check_u32("min_strength_threshold", self.min_strength_threshold, 50, 1_000)?;
        check_u32("max_recovery_attempts", self.max_recovery_attempts, 1, 10)?;
        check_u32("recovery_attempt_delay_ms", self.recovery_attempt_delay_ms, 1_000, 30_000)?;
        check_u32("startup_delay_ms", self.startup_delay_ms, 100, 5_000)?;
        check_u32("lidar_init_step_delay_ms", self.lidar_init_step_delay_ms, 100, 2_000)?;
        check_u32("lidar_final_delay_ms", self.lidar_final_delay_ms, 50, 1_000)?;
        check_u32("command_response_delay_ms", self.command_response_delay_ms, 10, 500)?;
        check_u32("debug_output_interval_ms", self.debug_output_interval_ms, 50, 5_000)?;
        check_u32("status_check_interval_ms", self.status_check_interval_ms, 1_000, 30_000)?;
        check_u32(
            "performance_report_interval_ms",
            self.performance_report_interval_ms,
            5_000,
            60_000,
        )?;
        check_u32(
            "critical_error_report_interval_ms",
            self.critical_error_report_interval_ms,
            500,
            10_000,
        )?;
        check_u32(
            "distance_deadband_threshold_cm",
            self.distance_deadband_threshold_cm,
            1,
            10,
        )?;

        let v = self.velocity_deadband_threshold_cm_s;
        if !(0.1..=5.0).contains(&v) {
            return Err(ConfigError::SettingOutOfRange {
                field: "velocity_deadband_threshold_cm_s",
                value: v as f64,
                min: 0.1,
                max: 5.0,
            });
        }
        Ok(())
    }

    fn integer_fields(&self) -> [u32; 13] {
        [
            self.config_mode_timeout_ms,
            self.min_strength_threshold,
            self.max_recovery_attempts,
            self.recovery_attempt_delay_ms,
            self.startup_delay_ms,
            self.lidar_init_step_delay_ms,
            self.lidar_final_delay_ms,
            self.command_response_delay_ms,
            self.debug_output_interval_ms,
            self.status_check_interval_ms,
            self.performance_report_interval_ms,
            self.critical_error_report_interval_ms,
            self.distance_deadband_threshold_cm,
        ]
    }

    /// 编码为 56 字节线路布局
    pub fn to_wire_bytes(&self) -> [u8; SETTINGS_WIRE_LEN] {
        let mut out = [0u8; SETTINGS_WIRE_LEN];
        for (i, value) in self.integer_fields().iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        out[52..56].copy_from_slice(&self.velocity_deadband_threshold_cm_s.to_le_bytes());
        out
    }

    /// 从线路布局解码（不校验范围）
    ///
    /// 负载不足 56 字节时返回 `None`，多余字节忽略。
    pub fn from_wire_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SETTINGS_WIRE_LEN {
            return None;
        }
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(Self {
            config_mode_timeout_ms: word(0),
            min_strength_threshold: word(1),
            max_recovery_attempts: word(2),
            recovery_attempt_delay_ms: word(3),
            startup_delay_ms: word(4),
            lidar_init_step_delay_ms: word(5),
            lidar_final_delay_ms: word(6),
            command_response_delay_ms: word(7),
            debug_output_interval_ms: word(8),
            status_check_interval_ms: word(9),
            performance_report_interval_ms: word(10),
            critical_error_report_interval_ms: word(11),
            distance_deadband_threshold_cm: word(12),
            velocity_deadband_threshold_cm_s: f32::from_le_bytes([
                bytes[52], bytes[53], bytes[54], bytes[55],
            ]),
        })
    }
}
