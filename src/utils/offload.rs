// src/utils/offload.rs

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, Result};
use crate::utils::lock_unpoisoned;

/// Bounded pool for blocking work submitted from async code.
///
/// The handle is cheap to clone; every clone talks to the same threads. Whoever created
/// the pool decides when to call `shutdown`, borrowers never should.
#[derive(Clone)]
pub struct OffloadPool {
    pool: Arc<Mutex<Option<Arc<ThreadPool>>>>,
}

type PanicPayload = Box<dyn Any + Send + 'static>;

impl OffloadPool {
    /// `num_threads == 0` lets rayon pick (one per logical CPU).
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("offload-{}", i))
            .build()
            .map_err(|e| PipelineError::Offload(format!("Failed to build offload pool: {}", e)))?;
        debug!(threads = pool.current_num_threads(), "Offload pool started");
        Ok(OffloadPool {
            pool: Arc::new(Mutex::new(Some(Arc::new(pool)))),
        })
    }

    fn handle(&self) -> Result<Arc<ThreadPool>> {
        lock_unpoisoned(&self.pool)
            .as_ref()
            .cloned()
            .ok_or(PipelineError::PoolClosed)
    }

    pub fn ensure_open(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    pub fn is_shutdown(&self) -> bool {
        lock_unpoisoned(&self.pool).is_none()
    }

    /// Run `job` on the pool and await its result. A panic inside `job` is resumed in the
    /// awaiting task.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.handle()?;
        Self::spawn_on(&pool, job).await
    }

    /// Like `run`, but once the pool is shut down `job` runs on the calling task instead of
    /// being dropped.
    pub async fn run_or_inline<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self.handle() {
            Ok(pool) => Self::spawn_on(&pool, job).await,
            Err(_) => {
                warn!("Offload pool is shut down, running job on the calling task");
                Ok(job())
            }
        }
    }

    async fn spawn_on<F, T>(pool: &ThreadPool, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<std::result::Result<T, PanicPayload>>();
        pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(outcome);
        });
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(PipelineError::Offload(
                "offloaded task was dropped before completing".to_string(),
            )),
        }
    }

    /// Stop accepting work. Jobs already queued still run to completion.
    pub fn shutdown(&self) {
        if lock_unpoisoned(&self.pool).take().is_some() {
            debug!("Offload pool shut down");
        }
    }
}

impl fmt::Debug for OffloadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadPool")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Turn a blocking iterator into a stream by pulling `chunk_size` items at a time on the
/// offload pool, so slow sources never stall the async runtime.
///
/// If the pool is shut down mid-stream the remaining chunks are pulled on the polling task.
/// A pull that is lost on the pool yields one `Err` item and ends the stream.
pub fn stream_from_iter<I>(
    iter: I,
    chunk_size: usize,
    pool: OffloadPool,
) -> BoxStream<'static, Result<I::Item>>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let state = (Some(iter), VecDeque::new(), pool);
    stream::unfold(state, move |(mut source, mut ready, pool)| async move {
        loop {
            if let Some(item) = ready.pop_front() {
                return Some((Ok(item), (source, ready, pool)));
            }
            let iter = source.take()?;
            let pulled = pool
                .run_or_inline(move || {
                    let mut iter = iter;
                    let chunk: Vec<I::Item> = iter.by_ref().take(chunk_size).collect();
                    (iter, chunk)
                })
                .await;
            match pulled {
                Ok((_, chunk)) if chunk.is_empty() => return None,
                Ok((iter, chunk)) => {
                    source = Some(iter);
                    ready.extend(chunk);
                }
                Err(e) => {
                    error!(error = %e, "Failed to pull from synchronous source");
                    return Some((Err(e), (None, ready, pool)));
                }
            }
        }
    })
    .boxed()
}
