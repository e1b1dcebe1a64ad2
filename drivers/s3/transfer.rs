//! 文件上传传输
//!
//! Small files go up in one PUT, larger ones as a multipart upload with a
//! bounded number of parts in flight. Every transfer runs as its own task
//! and is observed through a `TransferHandle`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::storage::BackendError;
use super::client::{BackendResult, CompletedPart, ObjectClient};

/// 8MB per part (S3最小5MB)
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Terminal or in-flight state of a transfer / 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Handle to one running upload / 上传句柄
pub struct TransferHandle {
    key: String,
    task: Option<JoinHandle<BackendResult<()>>>,
    status: TransferStatus,
    last_error: Option<BackendError>,
}

impl TransferHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }

    /// Stop an in-flight transfer; parts already sent are left to the
    /// bucket's lifecycle rules.
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Wait for a terminal state. Repeated calls return the same state.
    pub async fn wait_until_finished(&mut self) -> TransferStatus {
        let task = match self.task.take() {
            Some(task) => task,
            None => return self.status,
        };

        match task.await {
            Ok(Ok(())) => {
                self.status = TransferStatus::Completed;
            }
            Ok(Err(e)) => {
                self.status = TransferStatus::Failed;
                self.last_error = Some(e);
            }
            Err(e) if e.is_cancelled() => {
                self.status = TransferStatus::Cancelled;
                self.last_error = Some(BackendError::new(None, "transfer cancelled"));
            }
            Err(e) => {
                self.status = TransferStatus::Failed;
                self.last_error = Some(BackendError::new(None, format!("transfer task failed: {}", e)));
            }
        }
        self.status
    }
}

/// Starts uploads against one client / 传输管理器
pub struct TransferManager {
    client: Arc<dyn ObjectClient>,
    parallelism: usize,
    part_size: usize,
}

impl TransferManager {
    pub fn new(client: Arc<dyn ObjectClient>, parallelism: usize) -> Self {
        Self {
            client,
            parallelism: parallelism.max(1),
            part_size: PART_SIZE,
        }
    }

    /// Override the part size (tests use tiny parts)
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Start uploading `local_path` to `key`.
    ///
    /// Must be called inside a tokio runtime; the transfer is spawned on it.
    pub fn upload_file(&self, local_path: &Path, key: &str) -> TransferHandle {
        let client = self.client.clone();
        let local_path = local_path.to_path_buf();
        let task_key = key.to_string();
        let parallelism = self.parallelism;
        let part_size = self.part_size;

        let task = tokio::spawn(async move {
            upload(client, local_path, task_key, parallelism, part_size).await
        });

        TransferHandle {
            key: key.to_string(),
            task: Some(task),
            status: TransferStatus::InProgress,
            last_error: None,
        }
    }
}

fn local_error(path: &Path, e: std::io::Error) -> BackendError {
    BackendError::new(None, format!("failed to read {}: {}", path.display(), e))
}

/// Fill `buf` up to `limit` bytes; short only at end of file.
async fn read_part(file: &mut tokio::fs::File, limit: usize) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(limit);
    while buf.len() < limit {
        let mut chunk = (&mut *file).take((limit - buf.len()) as u64);
        let n = chunk.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}

async fn upload(
    client: Arc<dyn ObjectClient>,
    local_path: PathBuf,
    key: String,
    parallelism: usize,
    part_size: usize,
) -> BackendResult<()> {
    let mut file = tokio::fs::File::open(&local_path)
        .await
        .map_err(|e| local_error(&local_path, e))?;
    let file_size = file
        .metadata()
        .await
        .map_err(|e| local_error(&local_path, e))?
        .len();

    if file_size <= part_size as u64 {
        let data = read_part(&mut file, part_size)
            .await
            .map_err(|e| local_error(&local_path, e))?;
        return client.put_object(&key, data).await;
    }

    let upload_id = client.create_multipart_upload(&key).await?;
    tracing::debug!("S3分片上传开始: key={}, upload_id={}, size={}", key, upload_id, file_size);

    match upload_parts(&client, &mut file, &local_path, &key, &upload_id, parallelism, part_size).await {
        Ok(parts) => {
            client.complete_multipart_upload(&key, &upload_id, parts).await?;
            tracing::debug!("S3分片上传完成: key={}", key);
            Ok(())
        }
        Err(e) => {
            if let Err(abort_err) = client.abort_multipart_upload(&key, &upload_id).await {
                tracing::warn!("S3分片上传取消失败: key={}, error={}", key, abort_err.message);
            }
            Err(e)
        }
    }
}

/// Upload every part with at most `parallelism` in flight.
async fn upload_parts(
    client: &Arc<dyn ObjectClient>,
    file: &mut tokio::fs::File,
    local_path: &Path,
    key: &str,
    upload_id: &str,
    parallelism: usize,
    part_size: usize,
) -> BackendResult<Vec<CompletedPart>> {
    let mut completed: Vec<CompletedPart> = Vec::new();
    let mut pending = FuturesUnordered::new();
    let mut part_number = 1u32;

    loop {
        if pending.len() >= parallelism {
            if let Some(result) = pending.next().await {
                completed.push(result?);
            }
            continue;
        }

        let data = read_part(file, part_size)
            .await
            .map_err(|e| local_error(local_path, e))?;
        if data.is_empty() {
            break;
        }

        let number = part_number;
        part_number += 1;
        pending.push(async move { client.upload_part(key, upload_id, number, data).await });
    }

    while let Some(result) = pending.next().await {
        completed.push(result?);
    }

    completed.sort_by_key(|p| p.part_number);
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::s3::mock::MemoryClient;
    use std::io::Write;
    use std::time::Duration;

    fn local_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_small_file_single_put() {
        let client = Arc::new(MemoryClient::new());
        let manager = TransferManager::new(client.clone(), 2);
        let file = local_file(b"hello");

        let mut handle = manager.upload_file(file.path(), "p/a.txt");
        assert_eq!(handle.status(), TransferStatus::InProgress);
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Completed);
        assert_eq!(client.object("p/a.txt").unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(client.calls().put_object, 1);
        assert_eq!(client.calls().upload_part, 0);
    }

    #[tokio::test]
    async fn test_large_file_multipart() {
        let client = Arc::new(MemoryClient::new());
        let manager = TransferManager::new(client.clone(), 2).with_part_size(4);
        let data = b"0123456789abcdefghij-";
        let file = local_file(data);

        let mut handle = manager.upload_file(file.path(), "p/big");
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Completed);
        assert_eq!(client.object("p/big").unwrap(), Bytes::copy_from_slice(data));
        assert_eq!(client.calls().upload_part, 6);
        assert_eq!(client.calls().put_object, 0);
    }

    #[tokio::test]
    async fn test_failed_put_reports_error() {
        let client = Arc::new(MemoryClient::new());
        client.fail_put("p/a.txt", BackendError::with_code(503, "SlowDown"));
        let manager = TransferManager::new(client.clone(), 2);
        let file = local_file(b"hello");

        let mut handle = manager.upload_file(file.path(), "p/a.txt");
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Failed);
        assert_eq!(handle.last_error().unwrap().message, "SlowDown");
        // waiting again keeps the terminal state
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let client = Arc::new(MemoryClient::new());
        client.fail_put("p/big", BackendError::with_code(500, "InternalError"));
        let manager = TransferManager::new(client.clone(), 1).with_part_size(4);
        let file = local_file(b"0123456789");

        let mut handle = manager.upload_file(file.path(), "p/big");
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Failed);
        assert_eq!(client.calls().abort_multipart, 1);
        assert!(client.object("p/big").is_none());
    }

    #[tokio::test]
    async fn test_failed_abort_keeps_part_error() {
        let client = Arc::new(MemoryClient::new());
        client.fail_put("p/big", BackendError::with_code(500, "InternalError"));
        client.fail_abort("p/big", BackendError::with_code(404, "NoSuchUpload"));
        let manager = TransferManager::new(client.clone(), 1).with_part_size(4);
        let file = local_file(b"0123456789");

        let mut handle = manager.upload_file(file.path(), "p/big");
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Failed);
        assert_eq!(handle.last_error().unwrap().message, "InternalError");
        assert_eq!(client.calls().abort_multipart, 1);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_upload() {
        let client = Arc::new(MemoryClient::new().with_part_delay(Duration::from_secs(30)));
        let manager = TransferManager::new(client.clone(), 1).with_part_size(4);
        let file = local_file(b"0123456789");

        let mut handle = manager.upload_file(file.path(), "p/big");
        // wait until the first part is in flight
        for _ in 0..200 {
            if client.calls().upload_part > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.calls().upload_part, 1);
        assert_eq!(handle.status(), TransferStatus::InProgress);

        handle.cancel();
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Cancelled);
        assert_eq!(handle.last_error().unwrap().message, "transfer cancelled");
        assert_eq!(client.calls().complete_multipart, 0);
        assert!(client.object("p/big").is_none());
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let client = Arc::new(MemoryClient::new());
        let manager = TransferManager::new(client.clone(), 1);

        let mut handle = manager.upload_file(Path::new("/nonexistent/file.dat"), "p/x");
        assert_eq!(handle.wait_until_finished().await, TransferStatus::Failed);
        assert!(handle.last_error().unwrap().message.contains("/nonexistent/file.dat"));
    }
}
