// src/executor.rs

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, info, info_span, instrument, warn};

use crate::config::{
    AsyncComposeOptions, ExecutionMode, FilterOptions, ParallelOptions, PipelineConfig, RunConfig,
    StepConfig,
};
use crate::data_model::Document;
use crate::error::{PipelineError, Result};
use crate::pipeline::filters::{
    AppendSuffix, DiscardAll, DiscardContainingKeyword, DocumentLengthFilter, ExactDeduplicator,
    Identity, JsonDumper, JsonLoader,
};
use crate::pipeline::{AsyncCompose, Compose, Filter, FilterStage, Parallel, Stage};

/// Builds a `Compose` from a parsed pipeline configuration.
#[instrument(skip(config), fields(steps = config.pipeline.len()))]
pub fn build_compose_from_config(config: &PipelineConfig) -> Result<Compose> {
    let mut stages: Vec<Stage> = Vec::new();
    info!("Building pipeline from configuration...");

    for (i, step_config) in config.pipeline.iter().enumerate() {
        let step_span = info_span!("pipeline_step", index = i, type = step_config.name());
        let _enter = step_span.enter();

        let filter: Box<dyn Filter> = match step_config {
            StepConfig::Identity(_) => Box::new(Identity),
            StepConfig::DiscardAll(_) => Box::new(DiscardAll),
            StepConfig::AppendSuffix(params) => {
                debug!(params = ?params, "Adding AppendSuffix");
                Box::new(AppendSuffix::new(params.suffix.clone()))
            }
            StepConfig::DiscardContainingKeyword(params) => {
                debug!(params = ?params, "Adding DiscardContainingKeyword");
                Box::new(DiscardContainingKeyword::new(params.keyword.clone()))
            }
            StepConfig::DocumentLengthFilter(params) => {
                debug!(params = ?params, "Adding DocumentLengthFilter");
                Box::new(DocumentLengthFilter::new(
                    params.min_doc_len,
                    params.max_doc_len,
                ))
            }
            StepConfig::JsonLoader(params) => {
                debug!(params = ?params, "Adding JsonLoader");
                Box::new(JsonLoader::new(params.key.clone(), params.ignore))
            }
            StepConfig::JsonDumper(params) => {
                debug!(params = ?params, "Adding JsonDumper");
                Box::new(JsonDumper::new(params.dump_reason))
            }
            StepConfig::ExactDeduplicator(_) => Box::new(ExactDeduplicator::new()),
        };
        let options: FilterOptions = step_config.options().clone();
        stages.push(FilterStage::boxed_with_options(filter, options)?.into());
    }

    if stages.is_empty() {
        warn!("Pipeline created with no steps.");
    }

    Ok(match config.seed {
        Some(seed) => Compose::seeded(stages, seed),
        None => Compose::new(stages),
    })
}

/// Runs a `Compose` over an in-memory corpus in the configured execution mode.
///
/// Whatever the mode, the corpus-wide statistics end up in the caller's `Compose`.
pub struct PipelineExecutor {
    config: RunConfig,
}

impl PipelineExecutor {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(PipelineExecutor { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[instrument(skip_all, fields(mode = ?self.config.mode, documents = documents.len()))]
    pub fn run(&self, compose: &mut Compose, documents: Vec<Document>) -> Result<Vec<Document>> {
        let output = match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(compose, documents),
            ExecutionMode::Batch => self.run_batch(compose, documents),
            ExecutionMode::Stream => Ok(compose.apply_stream(documents).collect()),
            ExecutionMode::Async => self.run_async(compose, documents),
            ExecutionMode::Parallel => self.run_parallel(compose, documents),
        }?;
        let stats = compose.statistics();
        info!(
            input_num = stats.input_num,
            output_num = stats.output_num,
            discard_num = stats.discard_num,
            "Run finished"
        );
        Ok(output)
    }

    fn run_sequential(&self, compose: &mut Compose, documents: Vec<Document>) -> Result<Vec<Document>> {
        let mut output = Vec::with_capacity(documents.len());
        for mut document in documents {
            if let Err(e) = compose.apply_in_place(&mut document) {
                if self.config.exit_on_error {
                    return Err(e);
                }
                reject_failed(std::slice::from_mut(&mut document), &e);
            }
            output.push(document);
        }
        Ok(output)
    }

    fn run_batch(&self, compose: &mut Compose, documents: Vec<Document>) -> Result<Vec<Document>> {
        let mut output = Vec::with_capacity(documents.len());
        let mut documents = documents.into_iter().peekable();
        while documents.peek().is_some() {
            let mut chunk: Vec<Document> = documents.by_ref().take(self.config.batch_size).collect();
            if let Err(e) = compose.apply_batch_in_place(&mut chunk) {
                if self.config.exit_on_error {
                    return Err(e);
                }
                reject_failed(&mut chunk, &e);
            }
            output.extend(chunk);
        }
        Ok(output)
    }

    fn run_async(&self, compose: &mut Compose, documents: Vec<Document>) -> Result<Vec<Document>> {
        let fork = compose.fork();
        let options = AsyncComposeOptions {
            rng: Some(fork.rng().clone()),
            offload_threads: self.config.offload_threads,
            ..Default::default()
        };
        let async_compose = AsyncCompose::with_options(vec![fork.into()], options)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let chunk_size = self.config.stream_chunk_size;
        let output = runtime.block_on(async {
            let output: Vec<Document> = async_compose
                .apply_chunked(documents, chunk_size)
                .collect()
                .await;
            async_compose.shutdown().await;
            output
        });
        compose.merge_statistics(&async_compose.get_total_statistics())?;
        Ok(output)
    }

    fn run_parallel(&self, compose: &mut Compose, documents: Vec<Document>) -> Result<Vec<Document>> {
        let options = ParallelOptions {
            num_jobs: self.config.num_jobs,
            ignore_errors: !self.config.exit_on_error,
        };
        let mut parallel = Parallel::new(compose, options)?;
        let mut output = Vec::with_capacity(documents.len());
        for result in parallel.imap_apply(documents) {
            output.push(result?);
        }
        parallel.finish()?;
        Ok(output)
    }
}

/// Reject documents a failed run left behind, recording the error as the reason.
fn reject_failed(documents: &mut [Document], error: &PipelineError) {
    for document in documents.iter_mut().filter(|d| !d.is_rejected) {
        document.is_rejected = true;
        document
            .reject_reason
            .insert("error".to_string(), Value::from(error.to_string()));
    }
    error!(error = %error, documents = documents.len(), "Pipeline failed, rejecting documents");
}
