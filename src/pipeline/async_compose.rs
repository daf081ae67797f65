// src/pipeline/async_compose.rs

use std::sync::Mutex;

use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::AsyncComposeOptions;
use crate::data_model::{DocInfo, Document};
use crate::error::{PipelineError, Result};
use crate::pipeline::async_filter::AsyncFilterStage;
use crate::pipeline::compose::{Compose, INIT_STATS_KEY};
use crate::pipeline::filter::FilterStage;
use crate::statistics::Statistics;
use crate::utils::{lock_unpoisoned, resolve_rng, stream_from_iter, OffloadPool};

/// Documents pulled per offload job by `apply_iter`.
const ITER_CHUNK_SIZE: usize = 1000;

/// Input to `AsyncCompose`. Synchronous stages are moved onto the offload pool.
pub enum AsyncStage {
    Async(AsyncFilterStage),
    Sync(FilterStage),
    Group(Vec<AsyncStage>),
}

impl From<AsyncFilterStage> for AsyncStage {
    fn from(stage: AsyncFilterStage) -> Self {
        AsyncStage::Async(stage)
    }
}

impl From<FilterStage> for AsyncStage {
    fn from(stage: FilterStage) -> Self {
        AsyncStage::Sync(stage)
    }
}

impl From<Compose> for AsyncStage {
    fn from(compose: Compose) -> Self {
        AsyncStage::Group(compose.into_stages().into_iter().map(AsyncStage::Sync).collect())
    }
}

impl From<AsyncCompose> for AsyncStage {
    fn from(compose: AsyncCompose) -> Self {
        AsyncStage::Group(compose.stages.into_iter().map(AsyncStage::Async).collect())
    }
}

fn flatten(stages: Vec<AsyncStage>, pool: &OffloadPool, out: &mut Vec<AsyncFilterStage>) -> Result<()> {
    for stage in stages {
        match stage {
            AsyncStage::Async(stage) => out.push(stage),
            AsyncStage::Sync(stage) => out.push(AsyncFilterStage::from_sync(stage, pool.clone())?),
            AsyncStage::Group(group) => flatten(group, pool, out)?,
        }
    }
    Ok(())
}

/// Asynchronous twin of `Compose`. Per document, stages run strictly in order.
pub struct AsyncCompose {
    stages: Vec<AsyncFilterStage>,
    statistics: Mutex<Statistics>,
    pool: OffloadPool,
    owns_pool: bool,
}

impl AsyncCompose {
    pub fn new(stages: Vec<AsyncStage>) -> Result<Self> {
        Self::with_options(stages, AsyncComposeOptions::default())
    }

    pub fn with_options(stages: Vec<AsyncStage>, options: AsyncComposeOptions) -> Result<Self> {
        let (rng, _) = resolve_rng(options.seed, options.rng.as_ref())?;
        let (pool, owns_pool) = match options.pool {
            Some(pool) => (pool, false),
            None => (OffloadPool::new(options.offload_threads.unwrap_or(0))?, true),
        };

        let mut flat = Vec::new();
        flatten(stages, &pool, &mut flat)?;
        for (i, stage) in flat.iter_mut().enumerate() {
            stage.rename(i);
            stage.inherit_rng(&rng);
        }
        debug!(stages = flat.len(), owns_pool, "Composed async pipeline");

        Ok(AsyncCompose {
            stages: flat,
            statistics: Mutex::new(Statistics::new("Total")),
            pool,
            owns_pool,
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn pool(&self) -> &OffloadPool {
        &self.pool
    }

    pub async fn apply(&self, mut document: Document) -> Result<Document> {
        let before = DocInfo::capture(&document);
        for stage in &self.stages {
            stage
                .apply_tracked(&mut document)
                .await
                .map_err(|e| PipelineError::step(stage.name(), e))?;
        }
        let after = DocInfo::capture(&document);
        lock_unpoisoned(&self.statistics).update_by_diff(&before, &after);
        Ok(document)
    }

    pub async fn apply_batch(&self, mut documents: Vec<Document>) -> Result<Vec<Document>> {
        let befores: Vec<DocInfo> = documents.iter().map(DocInfo::capture).collect();
        for stage in &self.stages {
            stage
                .apply_batch_tracked(&mut documents)
                .await
                .map_err(|e| PipelineError::step(stage.name(), e))?;
        }
        let mut total = lock_unpoisoned(&self.statistics);
        for (document, before) in documents.iter().zip(&befores) {
            total.update_by_diff(before, &DocInfo::capture(document));
        }
        Ok(documents)
    }

    pub fn apply_stream<'a>(&'a self, documents: BoxStream<'a, Document>) -> BoxStream<'a, Document> {
        let mut stream = documents
            .map(|mut document| {
                let info = DocInfo::capture(&document);
                if let Ok(value) = serde_json::to_value(info) {
                    document.extras.insert(INIT_STATS_KEY.to_string(), value);
                }
                document
            })
            .boxed();
        for stage in &self.stages {
            stream = stage.apply_stream(stream);
        }
        stream
            .map(move |mut document| {
                if let Some(value) = document.extras.remove(INIT_STATS_KEY) {
                    if let Ok(before) = serde_json::from_value::<DocInfo>(value) {
                        let after = DocInfo::capture(&document);
                        lock_unpoisoned(&self.statistics).update_by_diff(&before, &after);
                    }
                }
                document
            })
            .boxed()
    }

    /// Stream a blocking source, pulling it in chunks on the offload pool.
    pub fn apply_iter<'a, I>(&'a self, documents: I) -> BoxStream<'a, Document>
    where
        I: IntoIterator<Item = Document>,
        I::IntoIter: Send + 'static,
    {
        self.apply_chunked(documents, ITER_CHUNK_SIZE)
    }

    pub fn apply_chunked<'a, I>(&'a self, documents: I, chunk_size: usize) -> BoxStream<'a, Document>
    where
        I: IntoIterator<Item = Document>,
        I::IntoIter: Send + 'static,
    {
        let source = stream_from_iter(documents.into_iter(), chunk_size, self.pool.clone())
            .map(|pulled| match pulled {
                Ok(document) => document,
                Err(e) => {
                    // The lost chunk surfaces as one rejected, empty document.
                    let mut document = Document::rejected_empty();
                    document
                        .reject_reason
                        .insert("error".to_string(), Value::from(e.to_string()));
                    document
                }
            })
            .boxed();
        self.apply_stream(source)
    }

    pub fn statistics(&self) -> Statistics {
        lock_unpoisoned(&self.statistics).clone()
    }

    pub fn get_total_statistics(&self) -> Vec<Statistics> {
        std::iter::once(self.statistics())
            .chain(self.stages.iter().map(|s| s.get_statistics()))
            .collect()
    }

    pub fn get_total_statistics_map(&self) -> Vec<Map<String, Value>> {
        self.get_total_statistics()
            .iter()
            .map(Statistics::to_map)
            .collect()
    }

    pub fn reset_statistics(&self) {
        lock_unpoisoned(&self.statistics).reset();
        for stage in &self.stages {
            stage.reset_statistics();
        }
    }

    /// Shut every stage down, then the offload pool unless it was injected.
    pub async fn shutdown(&self) {
        for stage in &self.stages {
            stage.shutdown().await;
        }
        if self.owns_pool {
            self.pool.shutdown();
        }
        info!(stages = self.stages.len(), "Async pipeline shut down");
    }
}

