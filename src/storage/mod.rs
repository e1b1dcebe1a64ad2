use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod dispatch;
pub mod error;
pub mod manager;
pub mod path;

pub use dispatch::{Dispatcher, ExecutionPolicy, Inline, Offload};
pub use error::{BackendError, FsError, Result};
pub use manager::{FileSystemFactory, FileSystemManager, FsBox};
pub use path::KeyTranslator;

/// Read handle bound to one remote object / 远程对象读取句柄
///
/// Readers are shared (`Arc`) so a caching layer can wrap them.
pub trait FileReader: Send + Sync {
    /// Full path `endpoint/bucket/key` / 完整路径
    fn path(&self) -> &str;

    /// Object size probed when the reader was opened
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes at `offset`, returns bytes read.
    /// Returns 0 at or past end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Write handle bound to one remote object / 远程对象写入句柄
pub trait FileWriter: Send {
    fn path(&self) -> &str;

    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn bytes_appended(&self) -> u64;

    /// Flush buffered data and make the object visible.
    fn close(&mut self) -> Result<()>;
}

/// Filesystem interface exposed to callers / 文件系统接口
pub trait FileSystem: Send + Sync {
    /// Caller supplied instance id / 实例ID
    fn id(&self) -> &str;

    /// Driver type / 驱动类型
    fn fs_type(&self) -> &'static str;

    /// Root that absolute paths are resolved against / 根路径
    fn root_path(&self) -> &str;

    /// (Re)build the backend client / 建立连接
    fn connect(&self) -> Result<()>;

    fn create_file(&self, path: &str) -> Result<Box<dyn FileWriter>>;

    fn open_file(&self, path: &str) -> Result<Arc<dyn FileReader>>;

    /// Delete a file, missing files count as deleted / 删除文件
    fn delete_file(&self, path: &str) -> Result<()>;

    fn create_directory(&self, path: &str) -> Result<()>;

    /// Delete everything under a directory / 递归删除目录
    fn delete_directory(&self, path: &str) -> Result<()>;

    fn link_file(&self, src: &str, dest: &str) -> Result<()>;

    fn exists(&self, path: &str) -> Result<bool>;

    fn file_size(&self, path: &str) -> Result<u64>;

    /// Paths of every file under a directory, relative to it / 列出目录
    fn list(&self, path: &str) -> Result<Vec<String>>;
}

/// Filesystems backed by a remote store / 远程文件系统
pub trait RemoteFileSystem: FileSystem {
    /// Upload a local file / 上传本地文件
    fn upload(&self, local_path: &Path, dest_path: &str) -> Result<()>;

    /// Upload files concurrently, pairing `local_paths[i]` with `dest_paths[i]`
    fn batch_upload(&self, local_paths: &[PathBuf], dest_paths: &[String]) -> Result<()>;

    /// Delete many files, no atomicity across requests / 批量删除
    fn batch_delete(&self, paths: &[String]) -> Result<()>;
}
