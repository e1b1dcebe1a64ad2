use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde_json::Value;

use super::{FileSystem, RemoteFileSystem};

pub type FsBox = Arc<dyn RemoteFileSystem>;

/// Filesystem factory trait / 文件系统工厂 trait
pub trait FileSystemFactory: Send + Sync {
    /// Driver type name / 驱动类型名称
    fn fs_type(&self) -> &'static str;

    /// Create an instance (not yet connected) / 创建文件系统实例
    fn create(&self, id: &str, config: Value) -> Result<FsBox>;
}

/// Filesystem manager (manages all filesystem instances) / 文件系统管理器
#[derive(Clone, Default)]
pub struct FileSystemManager {
    filesystems: Arc<RwLock<HashMap<String, FsBox>>>,
    factories: Arc<RwLock<HashMap<String, Arc<Box<dyn FileSystemFactory>>>>>,
    /// Connect error status (id -> error message) / 连接错误状态
    errors: Arc<RwLock<HashMap<String, String>>>,
}

impl FileSystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register factory / 注册工厂
    pub fn register_factory(&self, factory: Box<dyn FileSystemFactory>) {
        let fs_type = factory.fs_type().to_string();
        self.factories.write().insert(fs_type.clone(), Arc::new(factory));
        tracing::info!("Filesystem factory registered: {}", fs_type);
    }

    /// Create and connect an instance / 创建并连接实例
    ///
    /// A connect failure keeps the instance registered and records the
    /// error, so a later `connect()` can recover it.
    pub fn create_filesystem(&self, id: &str, fs_type: &str, config: Value) -> Result<FsBox> {
        let factory = self
            .factories
            .read()
            .get(fs_type)
            .cloned()
            .ok_or_else(|| anyhow!("Filesystem type not found: {}", fs_type))?;

        let fs = match factory.create(id, config) {
            Ok(fs) => fs,
            Err(e) => {
                let error_msg = e.to_string();
                self.errors.write().insert(id.to_string(), error_msg.clone());
                tracing::error!("Filesystem creation failed: {} ({}) - {}", id, fs_type, error_msg);
                return Err(e);
            }
        };

        self.filesystems.write().insert(id.to_string(), fs.clone());

        match fs.connect() {
            Ok(()) => {
                self.errors.write().remove(id);
                tracing::info!("Filesystem created and connected: {} ({})", id, fs_type);
            }
            Err(e) => {
                let error_msg = e.to_string();
                self.errors.write().insert(id.to_string(), error_msg.clone());
                tracing::warn!("Filesystem created but connect failed: {} ({}) - {}", id, fs_type, error_msg);
            }
        }

        Ok(fs)
    }

    /// Get instance / 获取实例
    pub fn get(&self, id: &str) -> Option<FsBox> {
        self.filesystems.read().get(id).cloned()
    }

    /// Remove instance / 移除实例
    pub fn remove(&self, id: &str) -> Result<()> {
        self.filesystems
            .write()
            .remove(id)
            .ok_or_else(|| anyhow!("Filesystem not found: {}", id))?;
        self.errors.write().remove(id);

        tracing::info!("Filesystem removed: {}", id);
        Ok(())
    }

    /// List instance ids / 列出所有实例
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.filesystems.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// List registered types / 列出所有类型
    pub fn fs_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Last creation or connect error / 获取错误状态
    pub fn last_error(&self, id: &str) -> Option<String> {
        self.errors.read().get(id).cloned()
    }
}
