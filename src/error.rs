// src/error.rs

use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The Error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidationError(String),

    /// Raised by a concrete filter when it cannot process a document.
    #[error("Filter '{filter}' failed: {message}")]
    FilterError { filter: String, message: String },

    #[error("Error in processing step '{step_name}': {source}")]
    StepError {
        step_name: String,
        source: Box<PipelineError>,
    },

    /// Two statistics records (or lists of them) that do not describe the same stages.
    #[error("Statistics mismatch: cannot combine '{left}' with '{right}'")]
    StatisticsMismatch { left: String, right: String },

    #[error("Offload pool has been shut down")]
    PoolClosed,

    #[error("Offloaded task failed: {0}")]
    Offload(String),

    #[error("Worker {worker_id} failed: {source}")]
    WorkerFailed {
        worker_id: usize,
        source: Box<PipelineError>,
    },

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization/Deserialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("YAML error: {source}")]
    YamlError {
        #[from]
        source: serde_yaml::Error,
    },
}

impl PipelineError {
    /// Shorthand for the error a concrete filter raises.
    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::FilterError {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Attach the name of the stage an error came out of.
    pub fn step(step_name: impl Into<String>, source: PipelineError) -> Self {
        PipelineError::StepError {
            step_name: step_name.into(),
            source: Box::new(source),
        }
    }
}
