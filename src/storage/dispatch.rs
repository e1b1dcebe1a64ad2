//! Execution dispatcher / 执行调度
//!
//! Filesystem operations expose a blocking API. Called from a plain OS
//! thread they run in place; called from inside a tokio runtime the work is
//! moved to a dedicated worker pool so a slow backend call never parks an
//! async worker. Either way the caller gets the result synchronously.

use std::future::Future;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use super::error::{FsError, Result};
use crate::config;

static S3_POLICY: OnceCell<Arc<Offload>> = OnceCell::new();
static IO_RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Strategy deciding where a blocking task runs / 阻塞任务的调度策略
pub trait ExecutionPolicy: Send + Sync {
    /// Run `task` to completion before returning.
    fn run(&self, task: &mut (dyn FnMut() + Send));
}

/// Always run on the calling thread.
///
/// Only valid outside a tokio runtime: backend futures are driven with
/// `Handle::block_on`, which refuses to nest.
pub struct Inline;

impl ExecutionPolicy for Inline {
    fn run(&self, task: &mut (dyn FnMut() + Send)) {
        task()
    }
}

/// Run in place on plain threads, on a worker pool from async contexts.
pub struct Offload {
    pool: rayon::ThreadPool,
}

impl Offload {
    pub fn new(threads: usize, name: &str) -> Result<Self> {
        let name = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{}-{}", name, i))
            .build()
            .map_err(|e| FsError::internal(format!("failed to build worker pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ExecutionPolicy for Offload {
    fn run(&self, task: &mut (dyn FnMut() + Send)) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return task(),
        };

        let pool = &self.pool;
        let offload = move || pool.install(move || task());
        match handle.runtime_flavor() {
            // a current-thread runtime has nobody to hand its tasks to
            RuntimeFlavor::CurrentThread => offload(),
            _ => tokio::task::block_in_place(offload),
        }
    }
}

/// Run `op` under `policy` and hand back its result.
pub fn execute<T, F>(policy: &dyn ExecutionPolicy, op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    let mut op = Some(op);
    let mut out: Option<Result<T>> = None;
    policy.run(&mut || {
        if let Some(op) = op.take() {
            out = Some(op());
        }
    });
    out.unwrap_or_else(|| Err(FsError::internal("dispatched task did not run")))
}

/// Shared pool for S3 calls, sized by `io.s3_pool_size` / 全局S3线程池
pub fn s3_policy() -> Result<Arc<dyn ExecutionPolicy>> {
    let policy = S3_POLICY.get_or_try_init(|| {
        let threads = config::io_config().s3_pool_size;
        tracing::debug!("Starting S3 worker pool: threads={}", threads);
        Offload::new(threads, "s3-io").map(Arc::new)
    })?;
    Ok(policy.clone())
}

/// Runtime driving backend futures, sized by `io.s3_runtime_threads`.
pub fn io_runtime() -> Result<Handle> {
    let runtime = IO_RUNTIME.get_or_try_init(|| {
        let threads = config::io_config().s3_runtime_threads.max(1);
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("s3-runtime")
            .enable_all()
            .build()
            .map_err(|e| FsError::internal(format!("failed to build io runtime: {}", e)))
    })?;
    Ok(runtime.handle().clone())
}

/// Policy plus the runtime that drives backend futures / 调度器
#[derive(Clone)]
pub struct Dispatcher {
    policy: Arc<dyn ExecutionPolicy>,
    runtime: Handle,
}

impl Dispatcher {
    pub fn new(policy: Arc<dyn ExecutionPolicy>, runtime: Handle) -> Self {
        Self { policy, runtime }
    }

    /// Dispatcher backed by the shared S3 pool and runtime.
    pub fn for_s3() -> Result<Self> {
        Ok(Self::new(s3_policy()?, io_runtime()?))
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn execute<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send,
        T: Send,
    {
        execute(self.policy.as_ref(), op)
    }

    /// Drive `fut` to completion on the I/O runtime, synchronously.
    pub fn block_on<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let runtime = &self.runtime;
        self.execute(move || runtime.block_on(fut))
    }
}
