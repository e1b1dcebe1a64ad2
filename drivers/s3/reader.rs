//! S3随机读取

use crate::storage::{FileReader, Result};
use super::file_system::S3FileSystem;

/// Positional reader over one object / 对象随机读取器
///
/// The size is probed once at open; reads past it return 0 without a
/// request.
pub struct S3FileReader {
    fs: S3FileSystem,
    path: String,
    key: String,
    size: u64,
}

impl S3FileReader {
    pub(crate) fn new(fs: S3FileSystem, key: String, size: u64) -> Self {
        let path = fs.full_path(&key);
        Self { fs, path, key, size }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        self.fs.bucket()
    }
}

impl FileReader for S3FileReader {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = self.size.min(offset + buf.len() as u64);
        let data = self.fs.read_range(&self.key, offset..end)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}
