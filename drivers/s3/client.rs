//! S3客户端
//!
//! `ObjectClient` is the seam between the filesystem and the backend SDK.
//! `RustS3Client` implements it over rust-s3; tests plug in an in-memory
//! client through `ClientFactory`.

use std::ops::Range;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::Part;
use s3::Region;

use crate::storage::BackendError;
use super::config::S3Conf;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

const CONTENT_TYPE: &str = "application/octet-stream";

/// HEAD result / 对象元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a prefix listing / 列表分页结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// Per-object failure inside a bulk delete / 批量删除中的单个失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteObjectsOutput {
    /// Always empty in quiet mode
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object storage primitives used by the filesystem / 对象存储原语
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn head_object(&self, key: &str) -> BackendResult<ObjectMeta>;

    async fn delete_object(&self, key: &str) -> BackendResult<()>;

    /// One listing page under `prefix`, resuming at `continuation_token`
    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> BackendResult<ListPage>;

    /// Bulk delete; callers keep `keys` within the per-request limit
    async fn delete_objects(&self, keys: Vec<String>, quiet: bool) -> BackendResult<DeleteObjectsOutput>;

    /// Bytes of `range` (end exclusive)
    async fn get_object_range(&self, key: &str, range: Range<u64>) -> BackendResult<Bytes>;

    async fn put_object(&self, key: &str, data: Bytes) -> BackendResult<()>;

    /// Returns the upload id
    async fn create_multipart_upload(&self, key: &str) -> BackendResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BackendResult<CompletedPart>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BackendResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BackendResult<()>;
}

/// Builds backend clients from a connection profile / 客户端工厂
pub trait ClientFactory: Send + Sync {
    fn create(&self, conf: &S3Conf) -> anyhow::Result<Arc<dyn ObjectClient>>;
}

enum ClientState {
    Uninitialized,
    Ready(Arc<dyn ObjectClient>),
}

/// Lazily built, shared client / 延迟创建的共享客户端
///
/// `connect` is the only writer. A failed connect leaves the previous state
/// untouched; calls already holding the old client keep using it.
pub struct ClientSlot {
    state: Mutex<ClientState>,
}

impl ClientSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClientState::Uninitialized),
        }
    }

    pub fn connect<F>(&self, build: F) -> anyhow::Result<()>
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn ObjectClient>>,
    {
        let mut state = self.state.lock();
        let client = build()?;
        *state = ClientState::Ready(client);
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn ObjectClient>> {
        match &*self.state.lock() {
            ClientState::Ready(client) => Some(client.clone()),
            ClientState::Uninitialized => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock(), ClientState::Ready(_))
    }
}

impl Default for ClientSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// rust-s3 backed client / 基于rust-s3的客户端
pub struct RustS3Client {
    bucket: Box<Bucket>,
    /// Concurrent single deletes used to emulate a bulk delete
    delete_parallelism: usize,
}

impl RustS3Client {
    pub fn new(conf: &S3Conf, delete_parallelism: usize) -> anyhow::Result<Self> {
        let bucket = Self::create_bucket(conf)?;
        Ok(Self {
            bucket,
            delete_parallelism: delete_parallelism.max(1),
        })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(conf: &S3Conf) -> anyhow::Result<Box<Bucket>> {
        if conf.bucket.is_empty() {
            return Err(anyhow!("bucket name is empty"));
        }

        let credentials = Credentials::new(
            Some(&conf.access_key),
            Some(&conf.secret_key),
            if conf.session_token.is_empty() { None } else { Some(&conf.session_token) },
            None,
            None,
        )
        .map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let endpoint = if conf.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", conf.region)
        } else {
            conf.endpoint.clone()
        };
        let region = Region::Custom {
            region: conf.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&conf.bucket, region, credentials)
            .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;

        let bucket = if conf.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(bucket)
    }
}

fn backend_error(e: S3Error) -> BackendError {
    match e {
        S3Error::HttpFailWithBody(code, body) => BackendError::with_code(code, body),
        other => BackendError::new(None, other.to_string()),
    }
}

/// Non-2xx responses become errors; rust-s3 is built without fail-on-err.
fn check_status(code: u16, body: &[u8]) -> BackendResult<()> {
    if (200..300).contains(&code) {
        return Ok(());
    }
    let message = if body.is_empty() {
        format!("response code {}", code)
    } else {
        String::from_utf8_lossy(body).into_owned()
    };
    Err(BackendError::with_code(code, message))
}

#[async_trait]
impl ObjectClient for RustS3Client {
    async fn head_object(&self, key: &str) -> BackendResult<ObjectMeta> {
        let (head, code) = self.bucket.head_object(key).await.map_err(backend_error)?;
        check_status(code, &[])?;
        Ok(ObjectMeta {
            content_length: head.content_length.unwrap_or(0).max(0) as u64,
        })
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        let resp = self.bucket.delete_object(key).await.map_err(backend_error)?;
        check_status(resp.status_code(), &resp.bytes()[..])
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> BackendResult<ListPage> {
        let (result, code) = self
            .bucket
            .list_page(prefix.to_string(), None, continuation_token, None, None)
            .await
            .map_err(backend_error)?;
        check_status(code, &[])?;

        Ok(ListPage {
            objects: result
                .contents
                .into_iter()
                .map(|obj| ObjectSummary {
                    key: obj.key,
                    size: obj.size as u64,
                })
                .collect(),
            is_truncated: result.is_truncated,
            next_continuation_token: result.next_continuation_token,
        })
    }

    async fn delete_objects(&self, keys: Vec<String>, quiet: bool) -> BackendResult<DeleteObjectsOutput> {
        // rust-s3没有DeleteObjects，按顺序并发删除单个对象
        let results: Vec<(String, BackendResult<()>)> = stream::iter(keys)
            .map(|key| async move {
                let res = self.delete_object(&key).await;
                (key, res)
            })
            .buffered(self.delete_parallelism)
            .collect()
            .await;

        let mut output = DeleteObjectsOutput::default();
        for (key, res) in results {
            match res {
                Ok(()) => {
                    if !quiet {
                        output.deleted.push(key);
                    }
                }
                Err(e) if e.is_not_found() => {
                    if !quiet {
                        output.deleted.push(key);
                    }
                }
                Err(e) => output.errors.push(DeleteFailure {
                    key,
                    message: e.message,
                }),
            }
        }
        Ok(output)
    }

    async fn get_object_range(&self, key: &str, range: Range<u64>) -> BackendResult<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }
        // rust-s3的range结束位置是闭区间
        let resp = self
            .bucket
            .get_object_range(key, range.start, Some(range.end - 1))
            .await
            .map_err(backend_error)?;
        check_status(resp.status_code(), &resp.bytes()[..])?;
        Ok(resp.bytes().clone())
    }

    async fn put_object(&self, key: &str, data: Bytes) -> BackendResult<()> {
        let resp = self.bucket.put_object(key, &data).await.map_err(backend_error)?;
        check_status(resp.status_code(), &resp.bytes()[..])
    }

    async fn create_multipart_upload(&self, key: &str) -> BackendResult<String> {
        let init = self
            .bucket
            .initiate_multipart_upload(key, CONTENT_TYPE)
            .await
            .map_err(backend_error)?;
        Ok(init.upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BackendResult<CompletedPart> {
        let part = self
            .bucket
            .put_multipart_chunk(data.to_vec(), key, part_number, upload_id, CONTENT_TYPE)
            .await
            .map_err(backend_error)?;
        Ok(CompletedPart {
            part_number: part.part_number,
            etag: part.etag,
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BackendResult<()> {
        let parts = parts
            .into_iter()
            .map(|p| Part {
                part_number: p.part_number,
                etag: p.etag,
            })
            .collect();
        let resp = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await
            .map_err(backend_error)?;
        check_status(resp.status_code(), &resp.bytes()[..])
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BackendResult<()> {
        self.bucket.abort_upload(key, upload_id).await.map_err(backend_error)
    }
}

/// Default factory producing `RustS3Client`s / 默认客户端工厂
pub struct RustS3ClientFactory {
    pub delete_parallelism: usize,
}

impl ClientFactory for RustS3ClientFactory {
    fn create(&self, conf: &S3Conf) -> anyhow::Result<Arc<dyn ObjectClient>> {
        Ok(Arc::new(RustS3Client::new(conf, self.delete_parallelism)?))
    }
}
