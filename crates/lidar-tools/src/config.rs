//! # 设备配置
//!
//! 八个选择行的触发参数、模式标志以及运行参数。
//!
//! 触发表有两种持久化形式：
//! - TOML（[`DeviceConfig`] 整体，便于人工编辑）
//! - 84 字节小端二进制记录（[`TriggerTable::to_record`]），末尾带 16 位累加和

use crate::settings::RuntimeSettings;
use lidar_protocol::{MAX_DISTANCE_CM, MIN_DISTANCE_CM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 选择行数量（3 位选择开关）
pub const SELECTOR_ROWS: usize = 8;

/// 二进制记录长度（含 2 字节校验和）
pub const RECORD_LEN: usize = 84;

const RECORD_BODY_LEN: usize = RECORD_LEN - 2;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Distance threshold out of range at row {row}: {value} cm")]
    DistanceOutOfRange { row: usize, value: u16 },

    #[error("Velocity range inverted at row {row}: min {min} > max {max}")]
    VelocityRange { row: usize, min: i16, max: i16 },

    #[error("Setting {field} out of range: {value} (allowed {min}..={max})")]
    SettingOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid record length: expected {expected}, got {actual}")]
    RecordLength { expected: usize, actual: usize },

    #[error("Record checksum mismatch: stored {stored}, computed {computed}")]
    RecordChecksum { stored: u16, computed: u16 },

    #[error("Selector row out of range: {0}")]
    InvalidRow(usize),
}

/// 传感器采样率模式
///
/// 决定帧队列容量、水位线与默认帧超时。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleRateMode {
    #[default]
    #[serde(rename = "1000hz")]
    Hz1000,
    #[serde(rename = "800hz")]
    Hz800,
}

impl SampleRateMode {
    pub fn rate_hz(self) -> u16 {
        match self {
            SampleRateMode::Hz1000 => 1000,
            SampleRateMode::Hz800 => 800,
        }
    }

    /// 帧队列容量
    pub fn queue_capacity(self) -> usize {
        match self {
            SampleRateMode::Hz1000 => 32,
            SampleRateMode::Hz800 => 24,
        }
    }

    /// 警告水位
    pub fn warning_level(self) -> usize {
        match self {
            SampleRateMode::Hz1000 => 24,
            SampleRateMode::Hz800 => 18,
        }
    }

    /// 临界水位
    pub fn critical_level(self) -> usize {
        match self {
            SampleRateMode::Hz1000 => 28,
            SampleRateMode::Hz800 => 21,
        }
    }

    /// 尚无帧率观测时使用的帧超时（微秒）
    pub fn default_frame_timeout_us(self) -> u64 {
        match self {
            SampleRateMode::Hz1000 => 3_000,
            SampleRateMode::Hz800 => 2_000,
        }
    }
}

/// 单个选择行的触发参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRow {
    /// 距离阈值（cm），目标不远于此值时满足距离条件
    pub distance_threshold_cm: u16,
    /// 速度下限（cm/s，正值表示接近）
    pub velocity_min_cm_s: i16,
    /// 速度上限（cm/s）
    pub velocity_max_cm_s: i16,
    /// 触发规则字节（上位机读写，触发判定不使用）
    pub trigger_rule: [u8; 4],
}

impl SelectorRow {
    /// 速度是否落在 `[min, max]` 内
    pub fn velocity_in_window(&self, velocity_cm_s: f32) -> bool {
        velocity_cm_s >= self.velocity_min_cm_s as f32
            && velocity_cm_s <= self.velocity_max_cm_s as f32
    }
}

/// 触发表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTable {
    pub rows: [SelectorRow; SELECTOR_ROWS],
    /// 是否启用速度门限（false 时仅按距离触发）
    pub use_velocity_trigger: bool,
    pub enable_debug: bool,
}

const DEFAULT_DISTANCES: [u16; SELECTOR_ROWS] = [50, 100, 200, 300, 400, 500, 600, 700];

const DEFAULT_RULES: [[u8; 4]; SELECTOR_ROWS] = [
    [0, 0, 0, 1],
    [0, 0, 1, 1],
    [0, 1, 0, 1],
    [0, 1, 1, 1],
    [1, 0, 0, 1],
    [1, 0, 1, 0],
    [1, 1, 0, 0],
    [1, 1, 1, 0],
];

impl Default for TriggerTable {
    fn default() -> Self {
        let rows = std::array::from_fn(|i| SelectorRow {
            distance_threshold_cm: DEFAULT_DISTANCES[i],
            velocity_min_cm_s: 250,
            velocity_max_cm_s: 2200,
            trigger_rule: DEFAULT_RULES[i],
        });
        Self {
            rows,
            use_velocity_trigger: true,
            enable_debug: false,
        }
    }
}

impl TriggerTable {
    /// 取选择行（行号按低 3 位截断）
    pub fn row(&self, selector: u8) -> &SelectorRow {
        &self.rows[(selector as usize) % SELECTOR_ROWS]
    }

    pub fn row_mut(&mut self, index: usize) -> Result<&mut SelectorRow, ConfigError> {
        self.rows.get_mut(index).ok_or(ConfigError::InvalidRow(index))
    }

    /// 检查所有行
    ///
    /// 距离阈值必须在传感器量程内，速度下限不得大于上限。
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (row, r) in self.rows.iter().enumerate() {
            if !(MIN_DISTANCE_CM..=MAX_DISTANCE_CM).contains(&r.distance_threshold_cm) {
                return Err(ConfigError::DistanceOutOfRange {
                    row,
                    value: r.distance_threshold_cm,
                });
            }
            if r.velocity_min_cm_s > r.velocity_max_cm_s {
                return Err(ConfigError::VelocityRange {
                    row,
                    min: r.velocity_min_cm_s,
                    max: r.velocity_max_cm_s,
                });
            }
        }
        Ok(())
    }

    /// 编码为 84 字节记录
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        for (i, r) in self.rows.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&r.distance_threshold_cm.to_le_bytes());
            out[16 + i * 2..16 + i * 2 + 2].copy_from_slice(&r.velocity_min_cm_s.to_le_bytes());
            out[32 + i * 2..32 + i * 2 + 2].copy_from_slice(&r.velocity_max_cm_s.to_le_bytes());
            out[48 + i * 4..48 + i * 4 + 4].copy_from_slice(&r.trigger_rule);
        }
        out[80] = self.use_velocity_trigger as u8;
        out[81] = self.enable_debug as u8;
        let checksum = record_checksum(&out[..RECORD_BODY_LEN]);
        out[RECORD_BODY_LEN..].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// 解码 84 字节记录并校验
    ///
    /// 长度、校验和或取值任一不合法都返回错误，调用方应回退到默认配置。
    pub fn from_record(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() != RECORD_LEN {
            return Err(ConfigError::RecordLength {
                expected: RECORD_LEN,
                actual: bytes.len(),
            });
        }
        let stored = u16::from_le_bytes([bytes[82], bytes[83]]);
        let computed = record_checksum(&bytes[..RECORD_BODY_LEN]);
        if stored != computed {
            return Err(ConfigError::RecordChecksum { stored, computed });
        }

        let rows = std::array::from_fn(|i| {
            let mut rule = [0u8; 4];
            rule.copy_from_slice(&bytes[48 + i * 4..48 + i * 4 + 4]);
            SelectorRow {
                distance_threshold_cm: u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]),
                velocity_min_cm_s: i16::from_le_bytes([bytes[16 + i * 2], bytes[17 + i * 2]]),
                velocity_max_cm_s: i16::from_le_bytes([bytes[32 + i * 2], bytes[33 + i * 2]]),
                trigger_rule: rule,
            }
        });
        let table = Self {
            rows,
            use_velocity_trigger: bytes[80] != 0,
            enable_debug: bytes[81] != 0,
        };
        table.validate()?;
        Ok(table)
    }
}

/// 记录校验和：逐字节累加，16 位回绕
pub fn record_checksum(body: &[u8]) -> u16 {
    body.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}

/// 完整设备配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub sample_rate: SampleRateMode,
    pub table: TriggerTable,
    pub settings: RuntimeSettings,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.table.validate()?;
        self.settings.validate()
    }

    /// 从 TOML 文本解析（不校验）
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// JSON 形式（用于状态输出）
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
