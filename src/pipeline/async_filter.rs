// src/pipeline/async_filter.rs

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::FilterOptions;
use crate::data_model::{DocInfo, Document};
use crate::error::{PipelineError, Result};
use crate::pipeline::filter::{short_type_name, Filter, FilterStage};
use crate::pipeline::stage_core::{put_back, take_eligible, StageCore};
use crate::statistics::Statistics;
use crate::utils::{lock_unpoisoned, OffloadPool, SharedRng};

/// An asynchronous pipeline stage. Same contract as `Filter`, but `apply` is awaited.
#[async_trait]
pub trait AsyncFilter: Send + Sync {
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    async fn apply(&self, document: &mut Document) -> Result<()>;

    /// Concurrently awaits `apply` over the whole batch. Output order matches input order.
    async fn apply_batch(&self, documents: &mut [Document]) -> Result<()> {
        let outcomes = join_all(documents.iter_mut().map(|doc| self.apply(doc))).await;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        Map::new()
    }

    async fn shutdown(&self) {}
}

/// Runs a synchronous `Filter` on an offload pool so it can sit in an async pipeline.
pub struct AsyncFilterAdapter {
    name: &'static str,
    params: Map<String, Value>,
    inner: Arc<Mutex<Box<dyn Filter>>>,
    pool: OffloadPool,
    owns_pool: bool,
}

impl AsyncFilterAdapter {
    /// Adapter with its own single-thread pool, shut down together with the adapter.
    pub fn new<F: Filter + 'static>(filter: F) -> Result<Self> {
        Self::from_boxed(Box::new(filter), None)
    }

    /// Adapter borrowing `pool`. The pool outlives the adapter.
    pub fn with_pool<F: Filter + 'static>(filter: F, pool: OffloadPool) -> Self {
        Self::wrap(Box::new(filter), pool, false)
    }

    pub(crate) fn from_boxed(filter: Box<dyn Filter>, pool: Option<OffloadPool>) -> Result<Self> {
        Ok(match pool {
            Some(pool) => Self::wrap(filter, pool, false),
            None => Self::wrap(filter, OffloadPool::new(1)?, true),
        })
    }

    fn wrap(filter: Box<dyn Filter>, pool: OffloadPool, owns_pool: bool) -> Self {
        AsyncFilterAdapter {
            name: filter.name(),
            params: filter.params(),
            inner: Arc::new(Mutex::new(filter)),
            pool,
            owns_pool,
        }
    }

    pub fn pool(&self) -> &OffloadPool {
        &self.pool
    }

    pub fn owns_pool(&self) -> bool {
        self.owns_pool
    }
}

#[async_trait]
impl AsyncFilter for AsyncFilterAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn apply(&self, document: &mut Document) -> Result<()> {
        // Checked before the document is moved into the job.
        self.pool.ensure_open()?;
        let inner = Arc::clone(&self.inner);
        let mut owned = mem::take(document);
        let (owned, outcome) = self
            .pool
            .run(move || {
                let outcome = lock_unpoisoned(&inner).apply(&mut owned);
                (owned, outcome)
            })
            .await?;
        *document = owned;
        outcome
    }

    async fn apply_batch(&self, documents: &mut [Document]) -> Result<()> {
        self.pool.ensure_open()?;
        let inner = Arc::clone(&self.inner);
        let mut owned: Vec<Document> = documents.iter_mut().map(mem::take).collect();
        let (owned, outcome) = self
            .pool
            .run(move || {
                let outcome = lock_unpoisoned(&inner).apply_batch(&mut owned);
                (owned, outcome)
            })
            .await?;
        for (slot, doc) in documents.iter_mut().zip(owned) {
            *slot = doc;
        }
        outcome
    }

    fn params(&self) -> Map<String, Value> {
        self.params.clone()
    }

    async fn shutdown(&self) {
        lock_unpoisoned(&self.inner).shutdown();
        if self.owns_pool {
            self.pool.shutdown();
        }
    }
}

/// An `AsyncFilter` together with its options, random stream and statistics.
pub struct AsyncFilterStage {
    filter: Box<dyn AsyncFilter>,
    pub(crate) core: StageCore,
    statistics: Mutex<Statistics>,
}

impl AsyncFilterStage {
    pub fn new<F: AsyncFilter + 'static>(filter: F) -> Self {
        let core = StageCore::with_defaults(filter.name());
        let statistics = Mutex::new(Statistics::new(core.name.clone()));
        AsyncFilterStage {
            filter: Box::new(filter),
            core,
            statistics,
        }
    }

    pub fn with_options<F: AsyncFilter + 'static>(filter: F, options: FilterOptions) -> Result<Self> {
        let core = StageCore::new(filter.name(), options)?;
        debug!(stage = %core.name, p = core.options.p, "Built async filter stage");
        let statistics = Mutex::new(Statistics::new(core.name.clone()));
        Ok(AsyncFilterStage {
            filter: Box::new(filter),
            core,
            statistics,
        })
    }

    /// Move a synchronous stage onto `pool`. Options, random stream and statistics carry
    /// over, so an unbatched stage still isolates failures per document.
    pub fn from_sync(stage: FilterStage, pool: OffloadPool) -> Result<Self> {
        let (filter, core, statistics) = stage.into_parts();
        let adapter = AsyncFilterAdapter::from_boxed(filter, Some(pool))?;
        Ok(AsyncFilterStage {
            filter: Box::new(adapter),
            core,
            statistics: Mutex::new(statistics),
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn options(&self) -> &FilterOptions {
        &self.core.options
    }

    pub fn get_statistics(&self) -> Statistics {
        lock_unpoisoned(&self.statistics).clone()
    }

    pub fn reset_statistics(&self) {
        lock_unpoisoned(&self.statistics).reset();
    }

    pub(crate) fn rename(&mut self, index: usize) {
        let name = self.core.rename(index).to_string();
        lock_unpoisoned(&self.statistics).name = name;
    }

    pub(crate) fn inherit_rng(&mut self, rng: &SharedRng) {
        self.core.inherit_rng(rng);
    }

    pub async fn shutdown(&self) {
        self.filter.shutdown().await;
    }

    pub async fn apply_tracked(&self, document: &mut Document) -> Result<()> {
        let before = DocInfo::capture(document);
        if !self.core.check_skip(document) {
            self.filter.apply(document).await?;
        }
        self.finish_document(document, &before);
        Ok(())
    }

    pub async fn apply_batch_tracked(&self, documents: &mut [Document]) -> Result<()> {
        let befores: Vec<DocInfo> = documents.iter().map(DocInfo::capture).collect();
        if !self.core.draw_skip() {
            let (positions, mut taken) = take_eligible(&self.core, documents);
            if !taken.is_empty() {
                let outcome = self.filter.apply_batch(&mut taken).await;
                put_back(documents, &positions, taken);
                outcome?;
            }
        }
        for (document, before) in documents.iter_mut().zip(&befores) {
            self.finish_document(document, before);
        }
        Ok(())
    }

    pub async fn apply_isolated(&self, document: &mut Document) {
        let before = DocInfo::capture(document);
        if !self.core.check_skip(document) {
            if let Err(e) = self.filter.apply(document).await {
                self.record_failure(std::slice::from_mut(document), &e);
                self.record_diff(document, &before);
                return;
            }
        }
        self.finish_document(document, &before);
    }

    pub async fn apply(&self, mut document: Document) -> Result<Document> {
        self.apply_tracked(&mut document).await?;
        Ok(document)
    }

    /// Lazy stream application with the same windowing and failure isolation as
    /// `FilterStage::apply_stream`.
    pub fn apply_stream<'a>(&'a self, stream: BoxStream<'a, Document>) -> BoxStream<'a, Document> {
        if !self.core.options.use_batch {
            return stream
                .then(move |mut document| async move {
                    self.apply_isolated(&mut document).await;
                    document
                })
                .boxed();
        }

        let state = WindowState {
            source: stream,
            window: Vec::new(),
            eligible: 0,
            ready: VecDeque::new(),
            exhausted: false,
        };
        stream::unfold(state, move |mut state| async move {
            loop {
                if let Some(document) = state.ready.pop_front() {
                    return Some((document, state));
                }
                if state.exhausted {
                    return None;
                }
                match state.source.next().await {
                    Some(mut document) => {
                        let skip = self.core.check_skip(&document);
                        if skip && state.window.is_empty() {
                            let before = DocInfo::capture(&document);
                            self.finish_document(&mut document, &before);
                            return Some((document, state));
                        }
                        state.window.push((document, skip));
                        if !skip {
                            state.eligible += 1;
                            if state.eligible >= self.core.options.batch_size {
                                self.flush(&mut state).await;
                            }
                        }
                    }
                    None => {
                        state.exhausted = true;
                        self.flush(&mut state).await;
                    }
                }
            }
        })
        .boxed()
    }

    async fn flush(&self, state: &mut WindowState<'_>) {
        if state.window.is_empty() {
            return;
        }
        let (mut window, skipped): (Vec<Document>, Vec<bool>) = state.window.drain(..).unzip();
        state.eligible = 0;

        let befores: Vec<DocInfo> = window.iter().map(DocInfo::capture).collect();
        let positions: Vec<usize> = (0..window.len()).filter(|&i| !skipped[i]).collect();
        let mut taken: Vec<Document> = positions
            .iter()
            .map(|&i| mem::take(&mut window[i]))
            .collect();
        let mut failed = false;
        if !taken.is_empty() {
            debug!(stage = %self.core.name, size = taken.len(), "Flushing batch window");
            if let Err(e) = self.filter.apply_batch(&mut taken).await {
                self.record_failure(&mut taken, &e);
                failed = true;
            }
        }
        put_back(&mut window, &positions, taken);
        for (i, (document, before)) in window.iter_mut().zip(&befores).enumerate() {
            if failed && !skipped[i] {
                self.record_diff(document, before);
            } else {
                self.finish_document(document, before);
            }
        }
        state.ready.extend(window);
    }

    fn finish_document(&self, document: &mut Document, before: &DocInfo) {
        self.core
            .stamp_rejection(document, before, || self.filter.params());
        self.record_diff(document, before);
    }

    fn record_diff(&self, document: &Document, before: &DocInfo) {
        let after = DocInfo::capture(document);
        lock_unpoisoned(&self.statistics).update_by_diff(before, &after);
    }

    fn record_failure(&self, documents: &mut [Document], error: &PipelineError) {
        let params = self.filter.params();
        for document in documents.iter_mut() {
            self.core.reject_with_error(document, error, params.clone());
        }
        lock_unpoisoned(&self.statistics).errors += documents.len() as u64;
        warn!(
            stage = %self.core.name,
            documents = documents.len(),
            error = %error,
            "Async stage failed, rejecting affected documents"
        );
    }
}

struct WindowState<'a> {
    source: BoxStream<'a, Document>,
    window: Vec<(Document, bool)>,
    eligible: usize,
    ready: VecDeque<Document>,
    exhausted: bool,
}
