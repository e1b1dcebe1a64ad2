//! S3顺序写入
//!
//! Appended bytes are buffered into parts. The object stays invisible until
//! `close`: small objects go up in one PUT, anything that filled a part is
//! written as a multipart upload.

use bytes::BytesMut;

use crate::storage::{FileWriter, FsError, Result};
use super::client::CompletedPart;
use super::file_system::S3FileSystem;

/// Sequential writer for one object / 对象写入器
pub struct S3FileWriter {
    fs: S3FileSystem,
    path: String,
    key: String,
    /// 当前分片缓冲区
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    bytes_appended: u64,
    closed: bool,
    /// First failure; the writer stays failed once set
    error: Option<FsError>,
}

impl S3FileWriter {
    pub(crate) fn new(fs: S3FileSystem, key: String) -> Self {
        let path = fs.full_path(&key);
        Self {
            fs,
            path,
            key,
            buffer: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
            bytes_appended: 0,
            closed: false,
            error: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        self.fs.bucket()
    }

    fn abort_upload(&mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self.fs.abort_multipart_upload(&self.key, &upload_id) {
                tracing::warn!("S3分片上传取消失败: key={}, error={}", self.key, e);
            }
        }
    }

    /// Abort a started multipart upload and remember `err` for later calls.
    fn fail(&mut self, err: FsError) -> FsError {
        self.abort_upload();
        self.error = Some(err.clone());
        err
    }

    fn check_usable(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn flush_part(&mut self, part_size: usize) -> Result<()> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => match self.fs.create_multipart_upload(&self.key) {
                Ok(id) => {
                    tracing::debug!("S3分片上传开始: key={}, upload_id={}", self.key, id);
                    self.upload_id = Some(id.clone());
                    id
                }
                Err(e) => return Err(self.fail(e)),
            },
        };

        let data = self.buffer.split_to(part_size).freeze();
        let part_number = self.parts.len() as u32 + 1;
        match self.fs.upload_part(&self.key, &upload_id, part_number, data) {
            Ok(part) => {
                self.parts.push(part);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl FileWriter for S3FileWriter {
    fn path(&self) -> &str {
        &self.path
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.check_usable()?;
        if self.closed {
            return Err(FsError::internal(format!("append to closed file: {}", self.path)));
        }
        self.fs.ensure_client()?;

        self.buffer.extend_from_slice(data);
        self.bytes_appended += data.len() as u64;

        let part_size = self.fs.part_size();
        while self.buffer.len() >= part_size {
            self.flush_part(part_size)?;
        }
        Ok(())
    }

    fn bytes_appended(&self) -> u64 {
        self.bytes_appended
    }

    fn close(&mut self) -> Result<()> {
        self.check_usable()?;
        if self.closed {
            return Ok(());
        }
        self.fs.ensure_client()?;

        let upload_id = match self.upload_id.clone() {
            Some(id) => id,
            None => {
                let data = self.buffer.split().freeze();
                return match self.fs.put_object(&self.key, data) {
                    Ok(()) => {
                        self.closed = true;
                        Ok(())
                    }
                    Err(e) => Err(self.fail(e)),
                };
            }
        };

        if !self.buffer.is_empty() {
            let tail = self.buffer.len();
            self.flush_part(tail)?;
        }
        let parts = std::mem::take(&mut self.parts);
        if let Err(e) = self.fs.complete_multipart_upload(&self.key, &upload_id, parts) {
            return Err(self.fail(e));
        }
        self.upload_id = None;
        self.closed = true;
        tracing::debug!("S3分片上传完成: key={}, size={}", self.key, self.bytes_appended);
        Ok(())
    }
}

impl Drop for S3FileWriter {
    fn drop(&mut self) {
        if !self.closed && self.upload_id.is_some() {
            tracing::warn!("S3 writer dropped before close, aborting upload: key={}", self.key);
            self.abort_upload();
        }
    }
}
