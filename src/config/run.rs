use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// How the executor drives a pipeline over a corpus.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Batch,
    Stream,
    Async,
    Parallel,
}

fn default_batch_size() -> usize {
    128
}

fn default_stream_chunk_size() -> usize {
    1000
}

#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Abort on the first failing document instead of rejecting it and moving on.
    #[serde(default)]
    pub exit_on_error: bool,
    /// Documents per `apply_batch` call in batch mode.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub num_jobs: Option<usize>,
    #[serde(default)]
    pub offload_threads: Option<usize>,
    /// Documents pulled per offload job when async mode feeds a synchronous source.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: ExecutionMode::default(),
            exit_on_error: false,
            batch_size: default_batch_size(),
            num_jobs: None,
            offload_threads: None,
            stream_chunk_size: default_stream_chunk_size(),
        }
    }
}

impl RunConfig {
    pub fn with_mode(mode: ExecutionMode) -> Self {
        RunConfig {
            mode,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::ConfigValidationError(
                "RunConfig: batch_size must be greater than 0".to_string(),
            ));
        }
        if self.num_jobs == Some(0) {
            return Err(PipelineError::ConfigValidationError(
                "RunConfig: num_jobs must be greater than 0".to_string(),
            ));
        }
        if self.offload_threads == Some(0) {
            return Err(PipelineError::ConfigValidationError(
                "RunConfig: offload_threads must be greater than 0".to_string(),
            ));
        }
        if self.stream_chunk_size == 0 {
            return Err(PipelineError::ConfigValidationError(
                "RunConfig: stream_chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
