// Driver package / 驱动包
pub mod s3;

use crate::storage::FileSystemManager;

/// Register all drivers to FileSystemManager / 注册所有驱动
pub fn register_all(manager: &FileSystemManager) {
    // Register S3 driver / 注册S3对象存储驱动
    manager.register_factory(Box::new(s3::S3FileSystemFactory));
}
