//! # 配置持久化
//!
//! [`ConfigStore`] 由消费者循环在启动时加载、在上位机 `W`/`F` 指令时写入或清除。

use crate::config::{ConfigError, DeviceConfig, TriggerTable};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 配置存储
pub trait ConfigStore: Send {
    /// 读取已保存的配置；从未保存过时返回 `Ok(None)`
    fn load(&mut self) -> Result<Option<DeviceConfig>, ConfigError>;

    /// 保存配置
    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError>;

    /// 删除已保存的配置（恢复出厂）
    fn reset(&mut self) -> Result<(), ConfigError>;
}

/// 文件存储
///
/// 扩展名为 `.bin` 时使用 84 字节二进制记录（仅触发表，其余字段取默认值），
/// 否则使用 TOML。
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_record(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "bin")
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&mut self) -> Result<Option<DeviceConfig>, ConfigError> {
        if !self.path.exists() {
            debug!("Config file {} not found", self.path.display());
            return Ok(None);
        }
        let config = if self.is_record() {
            let bytes = fs::read(&self.path)?;
            DeviceConfig {
                table: TriggerTable::from_record(&bytes)?,
                ..Default::default()
            }
        } else {
            let content = fs::read_to_string(&self.path)?;
            DeviceConfig::from_toml_str(&content)?
        };
        Ok(Some(config))
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        if self.is_record() {
            fs::write(&self.path, config.table.to_record())?;
        } else {
            fs::write(&self.path, config.to_toml_string()?)?;
        }
        debug!("Config saved to {}", self.path.display());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ConfigError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存存储
///
/// 克隆出的句柄共享同一份数据，测试中可以在循环外检查写入结果。
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    slot: Arc<Mutex<Option<DeviceConfig>>>,
    fail_save: Arc<Mutex<bool>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DeviceConfig) -> Self {
        let store = Self::default();
        *store.slot.lock() = Some(config);
        store
    }

    /// 当前保存的配置
    pub fn stored(&self) -> Option<DeviceConfig> {
        self.slot.lock().clone()
    }

    /// 让后续保存失败
    pub fn set_fail_save(&self, fail: bool) {
        *self.fail_save.lock() = fail;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&mut self) -> Result<Option<DeviceConfig>, ConfigError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        if *self.fail_save.lock() {
            return Err(ConfigError::Io(std::io::Error::other("storage unavailable")));
        }
        config.validate()?;
        *self.slot.lock() = Some(config.clone());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ConfigError> {
        *self.slot.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleRateMode;

    #[test]
    fn test_file_store_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileConfigStore::new(dir.path().join("nested").join("lidar.toml"));
        assert!(store.load().unwrap().is_none());

        let mut config = DeviceConfig::default();
        config.sample_rate = SampleRateMode::Hz800;
        config.settings.min_strength_threshold = 300;
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));

        store.reset().unwrap();
        assert!(store.load().unwrap().is_none());
        // 重复删除不报错
        store.reset().unwrap();
    }

    #[test]
    fn test_file_store_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        let mut store = FileConfigStore::new(&path);

        let mut config = DeviceConfig::default();
        config.table.rows[6].distance_threshold_cm = 900;
        store.save(&config).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 84);

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.table, config.table);
    }

    #[test]
    fn test_file_store_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileConfigStore::new(dir.path().join("lidar.toml"));
        let mut config = DeviceConfig::default();
        config.table.rows[0].distance_threshold_cm = 0;
        assert!(store.save(&config).is_err());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lidar.toml");
        std::fs::write(&path, "sample_rate = [").unwrap();
        let mut store = FileConfigStore::new(&path);
        assert!(matches!(store.load(), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_memory_store_shared_handle() {
        let handle = MemoryConfigStore::new();
        let mut store = handle.clone();
        store.save(&DeviceConfig::default()).unwrap();
        assert!(handle.stored().is_some());

        handle.set_fail_save(true);
        assert!(store.save(&DeviceConfig::default()).is_err());

        store.reset().unwrap();
        assert!(handle.stored().is_none());
    }
}
