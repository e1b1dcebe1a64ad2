//! S3驱动工厂

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::storage::{FileSystemFactory, FsBox};
use super::config::S3Conf;
use super::file_system::S3FileSystem;

/// S3驱动工厂
pub struct S3FileSystemFactory;

impl FileSystemFactory for S3FileSystemFactory {
    fn fs_type(&self) -> &'static str {
        "s3"
    }

    fn create(&self, id: &str, config: Value) -> Result<FsBox> {
        let conf: S3Conf = serde_json::from_value(config)
            .map_err(|e| anyhow!("配置解析失败: {}", e))?;
        let fs = S3FileSystem::create(conf, id)?;
        Ok(Arc::new(fs))
    }
}
