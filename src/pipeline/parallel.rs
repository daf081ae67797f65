// src/pipeline/parallel.rs

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::ParallelOptions;
use crate::data_model::Document;
use crate::error::{PipelineError, Result};
use crate::pipeline::compose::Compose;
use crate::statistics::Statistics;
use crate::utils::lock_unpoisoned;

/// What a worker sends back for every document it handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub document: Document,
    pub worker_id: usize,
    /// The worker's cumulative statistics after this document.
    pub statistics: Vec<Statistics>,
    /// Set when the document failed and `ignore_errors` replaced it.
    pub error: Option<String>,
}

enum WorkerMessage {
    Report(WorkerReport),
    Failed {
        worker_id: usize,
        statistics: Vec<Statistics>,
        error: PipelineError,
    },
    Panicked(Box<dyn Any + Send + 'static>),
    /// The job was dequeued after teardown started and did not run.
    Cancelled,
}

/// Per-worker state, built once when the pool starts and reused for every job the
/// worker picks up.
struct WorkerContext {
    worker_id: usize,
    compose: Compose,
    ignore_errors: bool,
}

impl WorkerContext {
    fn process(&mut self, document: Document) -> WorkerMessage {
        match self.compose.apply(document) {
            Ok(document) => WorkerMessage::Report(WorkerReport {
                document,
                worker_id: self.worker_id,
                statistics: self.compose.get_total_statistics(),
                error: None,
            }),
            Err(e) if self.ignore_errors => WorkerMessage::Report(WorkerReport {
                document: Document::rejected_empty(),
                worker_id: self.worker_id,
                statistics: self.compose.get_total_statistics(),
                error: Some(e.to_string()),
            }),
            Err(e) => WorkerMessage::Failed {
                worker_id: self.worker_id,
                statistics: self.compose.get_total_statistics(),
                error: e,
            },
        }
    }
}

/// Runs a `Compose` over a document stream on a pool of worker threads.
///
/// Each worker owns an independent fork of the pipeline, so in-memory stage state is
/// per worker. When the session ends (`finish` or drop) the workers' statistics are
/// added into the borrowed `Compose`.
pub struct Parallel<'c> {
    compose: &'c mut Compose,
    num_jobs: usize,
    pool: Option<ThreadPool>,
    contexts: Arc<Vec<Mutex<WorkerContext>>>,
    terminated: Arc<AtomicBool>,
    sender: Sender<WorkerMessage>,
    receiver: Receiver<WorkerMessage>,
    in_flight: usize,
    snapshots: HashMap<usize, Vec<Statistics>>,
    closed: bool,
}

impl<'c> Parallel<'c> {
    pub fn new(compose: &'c mut Compose, options: ParallelOptions) -> Result<Self> {
        options.validate()?;
        let num_jobs = options.num_jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        let pool = ThreadPoolBuilder::new()
            .num_threads(num_jobs)
            .thread_name(|i| format!("parallel-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Offload(format!("Failed to start worker pool: {}", e)))?;

        let contexts = (0..num_jobs)
            .map(|worker_id| {
                Mutex::new(WorkerContext {
                    worker_id,
                    compose: compose.fork(),
                    ignore_errors: options.ignore_errors,
                })
            })
            .collect();

        let (sender, receiver) = mpsc::channel();
        info!(num_jobs, ignore_errors = options.ignore_errors, "Started worker pool");

        Ok(Parallel {
            compose,
            num_jobs,
            pool: Some(pool),
            contexts: Arc::new(contexts),
            terminated: Arc::new(AtomicBool::new(false)),
            sender,
            receiver,
            in_flight: 0,
            snapshots: HashMap::new(),
            closed: false,
        })
    }

    pub fn num_jobs(&self) -> usize {
        self.num_jobs
    }

    /// Apply the pipeline to `documents`, yielding results in completion order.
    ///
    /// At most `2 * num_jobs` documents are in flight. With `ignore_errors` off, the
    /// first failure is yielded as `Err` after the pool has been torn down.
    pub fn imap_apply<I>(&mut self, documents: I) -> ParallelIter<'_, 'c, I::IntoIter>
    where
        I: IntoIterator<Item = Document>,
    {
        ParallelIter {
            parallel: self,
            source: documents.into_iter(),
            done: false,
        }
    }

    /// Sum of the latest statistics snapshot of every worker.
    pub fn get_total_statistics(&self) -> Result<Vec<Statistics>> {
        let mut total = zeroed(&self.compose.get_total_statistics());
        for snapshot in self.snapshots.values() {
            total = Statistics::add_list(&total, snapshot)?;
        }
        Ok(total)
    }

    pub fn get_total_statistics_map(&self) -> Result<Vec<Map<String, Value>>> {
        Ok(self
            .get_total_statistics()?
            .iter()
            .map(Statistics::to_map)
            .collect())
    }

    /// Stop the pool and fold the session's statistics into the pipeline.
    pub fn finish(mut self) -> Result<()> {
        self.close()
    }

    fn submit(&mut self, document: Document) -> Result<()> {
        let pool = self.pool.as_ref().ok_or(PipelineError::PoolClosed)?;
        let contexts = Arc::clone(&self.contexts);
        let terminated = Arc::clone(&self.terminated);
        let sender = self.sender.clone();
        pool.spawn(move || {
            if terminated.load(Ordering::SeqCst) {
                let _ = sender.send(WorkerMessage::Cancelled);
                return;
            }
            let worker_id = rayon::current_thread_index().unwrap_or(0);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                lock_unpoisoned(&contexts[worker_id]).process(document)
            }));
            let message = outcome.unwrap_or_else(WorkerMessage::Panicked);
            let _ = sender.send(message);
        });
        self.in_flight += 1;
        Ok(())
    }

    fn receive(&mut self) -> Option<WorkerMessage> {
        if self.in_flight == 0 {
            return None;
        }
        let message = self.receiver.recv().ok()?;
        self.in_flight -= 1;
        Some(message)
    }

    /// Stop new jobs from starting and wait for the in-flight ones.
    fn teardown(&mut self) {
        if self.pool.is_none() {
            return;
        }
        self.terminated.store(true, Ordering::SeqCst);
        while let Some(message) = self.receive() {
            match message {
                WorkerMessage::Report(report) => {
                    self.snapshots.insert(report.worker_id, report.statistics);
                }
                WorkerMessage::Failed {
                    worker_id,
                    statistics,
                    error,
                } => {
                    warn!(worker_id, error = %error, "Worker failed during teardown");
                    self.snapshots.insert(worker_id, statistics);
                }
                WorkerMessage::Panicked(_) => {
                    warn!("Worker panicked during teardown");
                }
                WorkerMessage::Cancelled => {}
            }
        }
        self.pool = None;
        debug!("Worker pool torn down");
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.teardown();
        if self.snapshots.is_empty() {
            return Ok(());
        }
        let total = self.get_total_statistics()?;
        self.compose.merge_statistics(&total)?;
        info!(
            workers = self.snapshots.len(),
            input_num = total.first().map(|s| s.input_num).unwrap_or(0),
            "Merged worker statistics"
        );
        Ok(())
    }
}

impl Drop for Parallel<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "Failed to merge worker statistics");
        }
    }
}

fn zeroed(shape: &[Statistics]) -> Vec<Statistics> {
    shape.iter().map(|s| Statistics::new(s.name.clone())).collect()
}

/// Iterator returned by `Parallel::imap_apply`.
pub struct ParallelIter<'p, 'c, I> {
    parallel: &'p mut Parallel<'c>,
    source: I,
    done: bool,
}

impl<I: Iterator<Item = Document>> ParallelIter<'_, '_, I> {
    fn fill(&mut self) -> Result<()> {
        let limit = 2 * self.parallel.num_jobs;
        while self.parallel.in_flight < limit {
            match self.source.next() {
                Some(document) => self.parallel.submit(document)?,
                None => break,
            }
        }
        Ok(())
    }
}

impl<I: Iterator<Item = Document>> Iterator for ParallelIter<'_, '_, I> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
            let Some(message) = self.parallel.receive() else {
                self.done = true;
                return None;
            };
            match message {
                WorkerMessage::Report(report) => {
                    if let Some(err) = &report.error {
                        error!(worker_id = report.worker_id, error = %err, "Document failed in worker, emitting empty rejected document");
                    }
                    self.parallel
                        .snapshots
                        .insert(report.worker_id, report.statistics);
                    return Some(Ok(report.document));
                }
                WorkerMessage::Failed {
                    worker_id,
                    statistics,
                    error,
                } => {
                    error!(worker_id, error = %error, "Worker failed, tearing down pool");
                    self.parallel.snapshots.insert(worker_id, statistics);
                    self.parallel.teardown();
                    self.done = true;
                    return Some(Err(PipelineError::WorkerFailed {
                        worker_id,
                        source: Box::new(error),
                    }));
                }
                WorkerMessage::Panicked(payload) => {
                    error!("Worker panicked, tearing down pool");
                    self.parallel.teardown();
                    self.done = true;
                    panic::resume_unwind(payload);
                }
                WorkerMessage::Cancelled => continue,
            }
        }
    }
}

impl<I> Drop for ParallelIter<'_, '_, I> {
    /// Results still in flight when the iterator is dropped are drained and discarded so
    /// they cannot surface in a later `imap_apply`.
    fn drop(&mut self) {
        while let Some(message) = self.parallel.receive() {
            match message {
                WorkerMessage::Report(report) => {
                    self.parallel
                        .snapshots
                        .insert(report.worker_id, report.statistics);
                }
                WorkerMessage::Failed {
                    worker_id,
                    statistics,
                    ..
                } => {
                    self.parallel.snapshots.insert(worker_id, statistics);
                }
                WorkerMessage::Panicked(_) | WorkerMessage::Cancelled => {}
            }
        }
    }
}
