//! Application configuration module / 应用配置模块
//!
//! Manages configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// I/O thread configuration / I/O线程配置
    #[serde(default)]
    pub io: IoConfig,
    /// Mounted filesystems / 文件系统挂载列表
    #[serde(default)]
    pub filesystems: Vec<FileSystemEntry>,
}

/// I/O thread configuration / I/O线程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Worker threads for S3 calls issued from async tasks / S3工作线程数
    #[serde(default = "default_s3_pool_size")]
    pub s3_pool_size: usize,
    /// Threads of the runtime driving backend requests / 后端请求运行时线程数
    #[serde(default = "default_s3_runtime_threads")]
    pub s3_runtime_threads: usize,
    /// Parts in flight per multipart transfer / 每个传输并发分片数
    #[serde(default = "default_transfer_pool_size")]
    pub s3_transfer_executor_pool_size: usize,
}

/// One mounted filesystem / 文件系统挂载项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemEntry {
    pub id: String,
    /// Driver type, e.g. "s3" / 驱动类型
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Driver specific config / 驱动配置
    pub config: serde_json::Value,
}

fn default_s3_pool_size() -> usize {
    16
}

fn default_s3_runtime_threads() -> usize {
    4
}

fn default_transfer_pool_size() -> usize {
    2
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            s3_pool_size: default_s3_pool_size(),
            s3_runtime_threads: default_s3_runtime_threads(),
            s3_transfer_executor_pool_size: default_transfer_pool_size(),
        }
    }
}

impl AppConfig {
    /// Find a filesystem entry by id / 按ID查找文件系统
    pub fn filesystem(&self, id: &str) -> Option<&FileSystemEntry> {
        self.filesystems.iter().find(|fs| fs.id == id)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from a file, or create default if not exists / 加载配置文件
pub fn load_config_from(config_path: &Path) -> anyhow::Result<AppConfig> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config_to(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Load config.json from the working directory / 从工作目录加载配置
pub fn load_config() -> anyhow::Result<AppConfig> {
    load_config_from(&get_config_path())
}

/// Save configuration to file / 保存配置到文件
pub fn save_config_to(config: &AppConfig, config_path: &Path) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| anyhow::anyhow!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config(config: AppConfig) -> anyhow::Result<Arc<RwLock<AppConfig>>> {
    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| anyhow::anyhow!("Config already initialized"))?;

    Ok(config_arc)
}

/// I/O settings from the global config, defaults when uninitialized.
///
/// Library code never loads config.json on its own.
pub fn io_config() -> IoConfig {
    CONFIG
        .get()
        .map(|config| config.read().io.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "io": { "s3_pool_size": 8 },
                "filesystems": [
                    { "id": "cold", "type": "s3", "config": { "bucket": "b" } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.io.s3_pool_size, 8);
        assert_eq!(config.io.s3_runtime_threads, 4);
        assert_eq!(config.io.s3_transfer_executor_pool_size, 2);
        assert_eq!(config.filesystem("cold").unwrap().fs_type, "s3");
        assert!(config.filesystem("hot").is_none());
    }

    #[test]
    fn test_load_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert!(config.filesystems.is_empty());

        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.io.s3_pool_size, config.io.s3_pool_size);
    }
}
