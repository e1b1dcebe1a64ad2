//! In-memory object store for tests / 测试用内存对象存储

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::storage::BackendError;
use super::client::{
    BackendResult, ClientFactory, CompletedPart, DeleteFailure, DeleteObjectsOutput, ListPage, ObjectClient,
    ObjectMeta, ObjectSummary,
};
use super::config::S3Conf;

/// Call counters / 调用计数
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub head: usize,
    pub delete_object: usize,
    pub list: usize,
    pub delete_objects: usize,
    /// Key count of every bulk delete, in call order
    pub delete_batches: Vec<usize>,
    pub get_range: usize,
    pub put_object: usize,
    pub create_multipart: usize,
    pub upload_part: usize,
    pub complete_multipart: usize,
    pub abort_multipart: usize,
}

#[derive(Default)]
struct Failures {
    head: HashMap<String, BackendError>,
    put: HashMap<String, BackendError>,
    create_multipart: HashMap<String, BackendError>,
    abort: HashMap<String, BackendError>,
    delete: HashMap<String, BackendError>,
    bulk_object: HashMap<String, String>,
    /// 1-based call number of a failing bulk delete
    bulk_call: Option<(usize, BackendError)>,
    list_call: Option<(usize, BackendError)>,
}

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

pub struct MemoryClient {
    objects: Mutex<BTreeMap<String, Bytes>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    failures: Mutex<Failures>,
    calls: Mutex<Calls>,
    page_size: usize,
    /// Slows every part upload down
    part_delay: Option<Duration>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            failures: Mutex::new(Failures::default()),
            calls: Mutex::new(Calls::default()),
            page_size: page_size.max(1),
            part_delay: None,
        }
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().insert(key.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().clone()
    }

    pub fn fail_head(&self, key: &str, err: BackendError) {
        self.failures.lock().head.insert(key.to_string(), err);
    }

    /// Fails PUT and part uploads for `key`
    pub fn fail_put(&self, key: &str, err: BackendError) {
        self.failures.lock().put.insert(key.to_string(), err);
    }

    pub fn fail_create_multipart(&self, key: &str, err: BackendError) {
        self.failures.lock().create_multipart.insert(key.to_string(), err);
    }

    pub fn fail_abort(&self, key: &str, err: BackendError) {
        self.failures.lock().abort.insert(key.to_string(), err);
    }

    pub fn fail_delete(&self, key: &str, err: BackendError) {
        self.failures.lock().delete.insert(key.to_string(), err);
    }

    /// Report `key` as a per-object failure inside bulk deletes
    pub fn fail_in_bulk(&self, key: &str, message: &str) {
        self.failures.lock().bulk_object.insert(key.to_string(), message.to_string());
    }

    pub fn fail_bulk_call(&self, call: usize, err: BackendError) {
        self.failures.lock().bulk_call = Some((call, err));
    }

    pub fn fail_list_call(&self, call: usize, err: BackendError) {
        self.failures.lock().list_call = Some((call, err));
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn head_object(&self, key: &str) -> BackendResult<ObjectMeta> {
        self.calls.lock().head += 1;
        if let Some(err) = self.failures.lock().head.get(key) {
            return Err(err.clone());
        }
        self.objects
            .lock()
            .get(key)
            .map(|data| ObjectMeta {
                content_length: data.len() as u64,
            })
            .ok_or_else(|| BackendError::not_found("response code 404"))
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        self.calls.lock().delete_object += 1;
        if let Some(err) = self.failures.lock().delete.get(key) {
            return Err(err.clone());
        }
        match self.objects.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(BackendError::not_found("NoSuchKey")),
        }
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> BackendResult<ListPage> {
        let call = {
            let mut calls = self.calls.lock();
            calls.list += 1;
            calls.list
        };
        if let Some((n, err)) = &self.failures.lock().list_call {
            if *n == call {
                return Err(err.clone());
            }
        }

        let objects = self.objects.lock();
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.as_deref().map_or(true, |token| key.as_str() > token));

        let page: Vec<ObjectSummary> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, data)| ObjectSummary {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect();
        let is_truncated = matching.next().is_some();
        let next_continuation_token = if is_truncated {
            page.last().map(|obj| obj.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn delete_objects(&self, keys: Vec<String>, quiet: bool) -> BackendResult<DeleteObjectsOutput> {
        let call = {
            let mut calls = self.calls.lock();
            calls.delete_objects += 1;
            calls.delete_batches.push(keys.len());
            calls.delete_objects
        };
        let failures = self.failures.lock();
        if let Some((n, err)) = &failures.bulk_call {
            if *n == call {
                return Err(err.clone());
            }
        }

        let mut output = DeleteObjectsOutput::default();
        let mut objects = self.objects.lock();
        for key in keys {
            if let Some(message) = failures.bulk_object.get(&key) {
                output.errors.push(DeleteFailure {
                    key,
                    message: message.clone(),
                });
                continue;
            }
            objects.remove(&key);
            if !quiet {
                output.deleted.push(key);
            }
        }
        Ok(output)
    }

    async fn get_object_range(&self, key: &str, range: Range<u64>) -> BackendResult<Bytes> {
        self.calls.lock().get_range += 1;
        let objects = self.objects.lock();
        let data = objects
            .get(key)
            .ok_or_else(|| BackendError::not_found("NoSuchKey"))?;
        let end = (range.end as usize).min(data.len());
        let start = (range.start as usize).min(end);
        Ok(data.slice(start..end))
    }

    async fn put_object(&self, key: &str, data: Bytes) -> BackendResult<()> {
        self.calls.lock().put_object += 1;
        if let Some(err) = self.failures.lock().put.get(key) {
            return Err(err.clone());
        }
        self.objects.lock().insert(key.to_string(), data);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> BackendResult<String> {
        let upload_id = {
            let mut calls = self.calls.lock();
            calls.create_multipart += 1;
            format!("upload-{}", calls.create_multipart)
        };
        if let Some(err) = self.failures.lock().create_multipart.get(key) {
            return Err(err.clone());
        }
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BackendResult<CompletedPart> {
        self.calls.lock().upload_part += 1;
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().put.get(key) {
            return Err(err.clone());
        }
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| BackendError::not_found("NoSuchUpload"))?;
        upload.parts.insert(part_number, data);
        Ok(CompletedPart {
            part_number,
            etag: format!("etag-{}", part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BackendResult<()> {
        self.calls.lock().complete_multipart += 1;
        let upload = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| BackendError::not_found("NoSuchUpload"))?;
        if upload.key != key {
            return Err(BackendError::with_code(400, "key mismatch"));
        }

        let mut data = BytesMut::new();
        for part in parts {
            let bytes = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| BackendError::with_code(400, "InvalidPart"))?;
            data.extend_from_slice(bytes);
        }
        self.objects.lock().insert(key.to_string(), data.freeze());
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BackendResult<()> {
        self.calls.lock().abort_multipart += 1;
        if let Some(err) = self.failures.lock().abort.get(key) {
            return Err(err.clone());
        }
        self.uploads.lock().remove(upload_id);
        Ok(())
    }
}

/// Hands out one shared `MemoryClient`
pub struct MemoryClientFactory {
    pub client: Arc<MemoryClient>,
}

impl ClientFactory for MemoryClientFactory {
    fn create(&self, _conf: &S3Conf) -> anyhow::Result<Arc<dyn ObjectClient>> {
        Ok(self.client.clone())
    }
}

/// Always fails to build a client
pub struct FailingClientFactory;

impl ClientFactory for FailingClientFactory {
    fn create(&self, _conf: &S3Conf) -> anyhow::Result<Arc<dyn ObjectClient>> {
        Err(anyhow::anyhow!("malformed profile"))
    }
}
