pub mod config;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

// Register all filesystem drivers / 注册所有文件系统驱动
pub fn register_filesystems(manager: &storage::FileSystemManager) {
    drivers::register_all(manager)
}
