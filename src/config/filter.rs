use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::utils::{OffloadPool, SharedRng};

fn default_p() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    128
}

/// Per-stage options shared by synchronous and asynchronous filters.
#[derive(Deserialize, Debug, Clone)]
pub struct FilterOptions {
    /// Probability of applying the stage to an eligible document.
    #[serde(default = "default_p")]
    pub p: f64,
    /// Pass already rejected documents through without calling the filter.
    #[serde(default = "default_true")]
    pub skip_rejected: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Explicit random stream. Cannot be given from YAML.
    #[serde(skip)]
    pub rng: Option<SharedRng>,
    #[serde(default)]
    pub use_batch: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for FilterOptions {
    fn default() -> Self {
        FilterOptions {
            p: default_p(),
            skip_rejected: true,
            seed: None,
            rng: None,
            use_batch: false,
            batch_size: default_batch_size(),
        }
    }
}

impl FilterOptions {
    pub fn with_p(mut self, p: f64) -> Self {
        self.p = p;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_rng(mut self, rng: SharedRng) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn with_skip_rejected(mut self, skip_rejected: bool) -> Self {
        self.skip_rejected = skip_rejected;
        self
    }

    pub fn batched(mut self, batch_size: usize) -> Self {
        self.use_batch = true;
        self.batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.p) {
            return Err(PipelineError::ConfigValidationError(format!(
                "FilterOptions: p must be between 0.0 and 1.0, got {}",
                self.p
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::ConfigValidationError(
                "FilterOptions: batch_size must be greater than 0".to_string(),
            ));
        }
        if self.seed.is_some() && self.rng.is_some() {
            return Err(PipelineError::ConfigValidationError(
                "FilterOptions: only one of seed and rng may be given".to_string(),
            ));
        }
        Ok(())
    }
}

/// Random source options for a whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub seed: Option<u64>,
    pub rng: Option<SharedRng>,
}

#[derive(Debug, Clone, Default)]
pub struct AsyncComposeOptions {
    pub seed: Option<u64>,
    pub rng: Option<SharedRng>,
    /// Injected offload pool. The pipeline never shuts an injected pool down.
    pub pool: Option<OffloadPool>,
    /// Size of the pool created when none is injected. `None` uses one thread per CPU.
    pub offload_threads: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ParallelOptions {
    #[serde(default)]
    pub num_jobs: Option<usize>,
    /// Replace failing documents with empty rejected ones instead of aborting.
    #[serde(default)]
    pub ignore_errors: bool,
}

impl ParallelOptions {
    pub fn validate(&self) -> Result<()> {
        if self.num_jobs == Some(0) {
            return Err(PipelineError::ConfigValidationError(
                "ParallelOptions: num_jobs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
