//! S3文件系统核心实现
//!
//! Every public operation is a blocking call routed through the
//! [`Dispatcher`]; the `*_impl` bodies are plain async code that only deals
//! with requests and outcomes. Bulk operations are best effort: a failure
//! stops the operation but earlier pages or batches stay deleted.

use std::future::Future;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::config;
use crate::storage::{
    Dispatcher, FileReader, FileSystem, FileWriter, FsError, KeyTranslator, RemoteFileSystem,
    Result,
};
use super::client::{ClientFactory, ClientSlot, CompletedPart, ListPage, ObjectClient, RustS3ClientFactory};
use super::config::S3Conf;
use super::reader::S3FileReader;
use super::transfer::{TransferManager, TransferStatus, PART_SIZE};
use super::writer::S3FileWriter;

/// DeleteObjects accepts at most 1000 keys per request
pub const MAX_DELETE_BATCH: usize = 1000;

struct Inner {
    id: String,
    conf: S3Conf,
    translator: KeyTranslator,
    client: ClientSlot,
    factory: Box<dyn ClientFactory>,
    dispatcher: Dispatcher,
    transfer_parallelism: usize,
    part_size: usize,
}

/// S3 backed filesystem / S3文件系统
///
/// Cheap to clone; readers and writers keep a clone to issue their own
/// requests.
#[derive(Clone)]
pub struct S3FileSystem {
    inner: Arc<Inner>,
}

/// Builder for [`S3FileSystem`]
pub struct S3FileSystemBuilder {
    conf: S3Conf,
    id: String,
    factory: Option<Box<dyn ClientFactory>>,
    dispatcher: Option<Dispatcher>,
    transfer_parallelism: Option<usize>,
    part_size: usize,
}

impl S3FileSystemBuilder {
    pub fn client_factory(mut self, factory: Box<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn transfer_parallelism(mut self, parallelism: usize) -> Self {
        self.transfer_parallelism = Some(parallelism);
        self
    }

    /// Part size of multipart uploads and writers
    pub fn part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn build(self) -> Result<S3FileSystem> {
        let io = config::io_config();
        let transfer_parallelism = self
            .transfer_parallelism
            .unwrap_or(io.s3_transfer_executor_pool_size)
            .max(1);
        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Dispatcher::for_s3()?,
        };
        let factory = self.factory.unwrap_or_else(|| {
            Box::new(RustS3ClientFactory {
                delete_parallelism: transfer_parallelism,
            })
        });

        let mut conf = self.conf;
        let translator = KeyTranslator::new(&conf.endpoint, &conf.bucket, &conf.prefix);
        conf.prefix = translator.prefix().to_string();

        Ok(S3FileSystem {
            inner: Arc::new(Inner {
                id: self.id,
                conf,
                translator,
                client: ClientSlot::new(),
                factory,
                dispatcher,
                transfer_parallelism,
                part_size: self.part_size,
            }),
        })
    }
}

impl S3FileSystem {
    /// Create with the shared worker pool and the rust-s3 client / 创建实例
    pub fn create(conf: S3Conf, id: impl Into<String>) -> Result<Self> {
        Self::builder(conf, id).build()
    }

    pub fn builder(conf: S3Conf, id: impl Into<String>) -> S3FileSystemBuilder {
        S3FileSystemBuilder {
            conf,
            id: id.into(),
            factory: None,
            dispatcher: None,
            transfer_parallelism: None,
            part_size: PART_SIZE,
        }
    }

    pub fn conf(&self) -> &S3Conf {
        &self.inner.conf
    }

    pub fn bucket(&self) -> &str {
        &self.inner.conf.bucket
    }

    pub fn is_connected(&self) -> bool {
        self.inner.client.is_ready()
    }

    pub(crate) fn part_size(&self) -> usize {
        self.inner.part_size
    }

    /// Resolve a path to its object key / 获取对象键
    pub fn get_key(&self, path: &str) -> String {
        self.inner.translator.get_key(path)
    }

    /// `endpoint/bucket/key` / 完整路径
    pub fn full_path(&self, key: &str) -> String {
        self.inner
            .translator
            .full_path(&self.inner.conf.endpoint, &self.inner.conf.bucket, key)
    }

    fn client(&self) -> Result<Arc<dyn ObjectClient>> {
        self.inner
            .client
            .get()
            .ok_or_else(|| FsError::internal("init s3 client error"))
    }

    /// Fails with the not-connected error unless a client is ready
    pub(crate) fn ensure_client(&self) -> Result<()> {
        self.client().map(|_| ())
    }

    fn io_error(&self, action: &str, key: &str, message: impl Into<String>) -> FsError {
        FsError::Io {
            action: action.to_string(),
            endpoint: self.inner.conf.endpoint.clone(),
            bucket: self.inner.conf.bucket.clone(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.inner.dispatcher.block_on(fut)
    }

    fn transfer_manager(&self, client: Arc<dyn ObjectClient>) -> TransferManager {
        TransferManager::new(client, self.inner.transfer_parallelism).with_part_size(self.inner.part_size)
    }

    fn connect_impl(&self) -> Result<()> {
        let conf = &self.inner.conf;
        self.inner
            .client
            .connect(|| self.inner.factory.create(conf))
            .map_err(|e| FsError::internal(format!("failed to init s3 client with {}: {}", conf, e)))?;
        tracing::debug!("S3 client ready: id={}, {}", self.inner.id, conf);
        Ok(())
    }

    async fn exists_impl(&self, path: &str) -> Result<bool> {
        let client = self.client()?;
        let key = self.get_key(path);
        match client.head_object(&key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(self.io_error("get object head", &key, e.message)),
        }
    }

    async fn file_size_impl(&self, path: &str) -> Result<u64> {
        let client = self.client()?;
        let key = self.get_key(path);
        client
            .head_object(&key)
            .await
            .map(|meta| meta.content_length)
            .map_err(|e| self.io_error("get object size", &key, e.message))
    }

    async fn delete_file_impl(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let key = self.get_key(path);
        match client.delete_object(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.io_error("delete object", &key, e.message)),
        }
    }

    async fn list_page(
        &self,
        client: &Arc<dyn ObjectClient>,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        client
            .list_objects(prefix, continuation_token)
            .await
            .map_err(|e| self.io_error("list objects", prefix, e.message))
    }

    /// Quiet bulk delete of one batch; the first per-object failure wins.
    async fn delete_batch(&self, client: &Arc<dyn ObjectClient>, keys: Vec<String>, context_key: &str) -> Result<()> {
        let output = client
            .delete_objects(keys, true)
            .await
            .map_err(|e| self.io_error("delete objects", context_key, e.message))?;
        match output.errors.into_iter().next() {
            Some(failure) => Err(self.io_error("delete object", &failure.key, failure.message)),
            None => Ok(()),
        }
    }

    async fn delete_directory_impl(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let prefix = self.inner.translator.get_dir_prefix(path);

        let mut continuation_token = None;
        loop {
            let page = self.list_page(&client, &prefix, continuation_token).await?;
            let bytes: u64 = page.objects.iter().map(|obj| obj.size).sum();
            let keys: Vec<String> = page.objects.into_iter().map(|obj| obj.key).collect();
            if !keys.is_empty() {
                let count = keys.len();
                self.delete_batch(&client, keys, &prefix).await?;
                tracing::debug!(
                    "delete {} s3 objects ({} bytes), endpoint: {}, bucket: {}, prefix: {}",
                    count,
                    bytes,
                    self.inner.conf.endpoint,
                    self.inner.conf.bucket,
                    prefix
                );
            }
            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }
        Ok(())
    }

    async fn list_impl(&self, path: &str) -> Result<Vec<String>> {
        let client = self.client()?;
        let prefix = self.inner.translator.get_dir_prefix(path);

        let mut files = Vec::new();
        let mut continuation_token = None;
        loop {
            let page = self.list_page(&client, &prefix, continuation_token).await?;
            files.extend(page.objects.iter().map(|obj| {
                obj.key
                    .strip_prefix(prefix.as_str())
                    .unwrap_or(&obj.key)
                    .to_string()
            }));
            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn batch_delete_impl(&self, paths: &[String]) -> Result<()> {
        let client = self.client()?;
        let keys: Vec<String> = paths.iter().map(|path| self.get_key(path)).collect();

        for batch in keys.chunks(MAX_DELETE_BATCH) {
            tracing::debug!("batch delete {} s3 objects, first key: {}", batch.len(), batch[0]);
            self.delete_batch(&client, batch.to_vec(), &batch[0]).await?;
        }
        Ok(())
    }

    async fn upload_impl(&self, local_path: &Path, dest_path: &str) -> Result<()> {
        let client = self.client()?;
        let key = self.get_key(dest_path);
        let manager = self.transfer_manager(client);

        let start = Instant::now();
        let mut handle = manager.upload_file(local_path, &key);
        let status = handle.wait_until_finished().await;
        let duration = start.elapsed().as_secs_f64();

        if status != TransferStatus::Completed {
            let message = handle
                .last_error()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("transfer ended as {:?}", status));
            return Err(self.io_error("upload", &key, message));
        }

        let file_size = tokio::fs::metadata(local_path).await.map(|m| m.len()).unwrap_or(0);
        let throughput = if duration > 0.0 { file_size as f64 / duration } else { file_size as f64 };
        tracing::info!(
            "Upload {} to s3, endpoint={}, bucket={}, key={}, duration={:.3}s, capacity={}, tp={:.0}B/s",
            local_path.display(),
            self.inner.conf.endpoint,
            self.inner.conf.bucket,
            key,
            duration,
            file_size,
            throughput
        );
        Ok(())
    }

    async fn batch_upload_impl(&self, local_paths: &[PathBuf], dest_paths: &[String]) -> Result<()> {
        let client = self.client()?;
        if local_paths.len() != dest_paths.len() {
            return Err(FsError::invalid_argument(format!(
                "local_paths.len() != dest_paths.len(): {} != {}",
                local_paths.len(),
                dest_paths.len()
            )));
        }

        let manager = self.transfer_manager(client);
        let mut handles = Vec::with_capacity(local_paths.len());
        for (local_path, dest_path) in local_paths.iter().zip(dest_paths) {
            let key = self.get_key(dest_path);
            tracing::info!(
                "Start to upload {} to s3, endpoint={}, bucket={}, key={}",
                local_path.display(),
                self.inner.conf.endpoint,
                self.inner.conf.bucket,
                key
            );
            handles.push(manager.upload_file(local_path, &key));
        }

        // 剩余的传输不会被取消，只是不再等待
        for handle in handles.iter_mut() {
            if handle.wait_until_finished().await != TransferStatus::Completed {
                let message = handle
                    .last_error()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| format!("transfer ended as {:?}", handle.status()));
                return Err(self.io_error("upload", handle.key(), message));
            }
        }
        Ok(())
    }

    async fn open_file_impl(&self, path: &str) -> Result<S3FileReader> {
        let size = self.file_size_impl(path).await?;
        let key = self.get_key(path);
        Ok(S3FileReader::new(self.clone(), key, size))
    }

    /// Ranged GET for readers / 范围读取
    pub(crate) fn read_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        self.run(async {
            let client = self.client()?;
            client
                .get_object_range(key, range)
                .await
                .map_err(|e| self.io_error("read object", key, e.message))
        })
    }

    pub(crate) fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        self.run(async {
            let client = self.client()?;
            client
                .put_object(key, data)
                .await
                .map_err(|e| self.io_error("put object", key, e.message))
        })
    }

    pub(crate) fn create_multipart_upload(&self, key: &str) -> Result<String> {
        self.run(async {
            let client = self.client()?;
            client
                .create_multipart_upload(key)
                .await
                .map_err(|e| self.io_error("create multipart upload", key, e.message))
        })
    }

    pub(crate) fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> Result<CompletedPart> {
        self.run(async {
            let client = self.client()?;
            client
                .upload_part(key, upload_id, part_number, data)
                .await
                .map_err(|e| self.io_error("upload part", key, e.message))
        })
    }

    pub(crate) fn complete_multipart_upload(&self, key: &str, upload_id: &str, parts: Vec<CompletedPart>) -> Result<()> {
        self.run(async {
            let client = self.client()?;
            client
                .complete_multipart_upload(key, upload_id, parts)
                .await
                .map_err(|e| self.io_error("complete multipart upload", key, e.message))
        })
    }

    pub(crate) fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.run(async {
            let client = self.client()?;
            client
                .abort_multipart_upload(key, upload_id)
                .await
                .map_err(|e| self.io_error("abort multipart upload", key, e.message))
        })
    }
}

impl FileSystem for S3FileSystem {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn fs_type(&self) -> &'static str {
        "s3"
    }

    fn root_path(&self) -> &str {
        self.inner.translator.root_path()
    }

    fn connect(&self) -> Result<()> {
        self.inner.dispatcher.execute(|| self.connect_impl())
    }

    fn create_file(&self, path: &str) -> Result<Box<dyn FileWriter>> {
        self.inner.dispatcher.execute(|| {
            let key = self.get_key(path);
            Ok(Box::new(S3FileWriter::new(self.clone(), key)) as Box<dyn FileWriter>)
        })
    }

    fn open_file(&self, path: &str) -> Result<Arc<dyn FileReader>> {
        let reader = self.run(self.open_file_impl(path))?;
        Ok(Arc::new(reader))
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.run(self.delete_file_impl(path))
    }

    /// Directories are implicit key prefixes, nothing to create.
    fn create_directory(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    fn delete_directory(&self, path: &str) -> Result<()> {
        self.run(self.delete_directory_impl(path))
    }

    fn link_file(&self, _src: &str, _dest: &str) -> Result<()> {
        Err(FsError::not_supported("object storage has no hard links"))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.run(self.exists_impl(path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.run(self.file_size_impl(path))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        self.run(self.list_impl(path))
    }
}

impl RemoteFileSystem for S3FileSystem {
    fn upload(&self, local_path: &Path, dest_path: &str) -> Result<()> {
        self.run(self.upload_impl(local_path, dest_path))
    }

    fn batch_upload(&self, local_paths: &[PathBuf], dest_paths: &[String]) -> Result<()> {
        self.run(self.batch_upload_impl(local_paths, dest_paths))
    }

    fn batch_delete(&self, paths: &[String]) -> Result<()> {
        self.run(self.batch_delete_impl(paths))
    }
}
