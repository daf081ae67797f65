// src/config.rs
use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub mod filter;
pub mod pipeline;
pub mod run;

pub use filter::{AsyncComposeOptions, ComposeOptions, FilterOptions, ParallelOptions};
pub use pipeline::{PipelineConfig, StepConfig};
pub use run::{ExecutionMode, RunConfig};

fn load_yaml<T: DeserializeOwned, P: AsRef<Path>>(config_path: P, kind: &str) -> Result<T> {
    let path_ref = config_path.as_ref();
    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        PipelineError::ConfigError(format!(
            "Failed to read {} config file '{}': {}",
            kind,
            path_ref.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&config_content).map_err(|e| {
        PipelineError::ConfigError(format!(
            "Failed to parse {} config YAML from '{}': {}",
            kind,
            path_ref.display(),
            e
        ))
    })
}

/// Loads, parses and validates a pipeline configuration YAML file.
pub fn load_pipeline_config<P: AsRef<Path>>(config_path: P) -> Result<PipelineConfig> {
    let config: PipelineConfig = load_yaml(config_path, "pipeline")?;
    config.validate()?;
    Ok(config)
}

/// Loads, parses and validates a run configuration YAML file.
pub fn load_run_config<P: AsRef<Path>>(config_path: P) -> Result<RunConfig> {
    let config: RunConfig = load_yaml(config_path, "run")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper macro for asserting ConfigValidationError
    macro_rules! assert_config_validation_error {
        ($result:expr, $expected_msg_part:expr) => {
            match $result {
                Err(PipelineError::ConfigValidationError(msg)) => {
                    assert!(
                        msg.contains($expected_msg_part),
                        "Error message '{}' did not contain '{}'",
                        msg,
                        $expected_msg_part
                    );
                }
                Err(other_err) => {
                    panic!(
                        "Expected ConfigValidationError, but got different error: {:?}",
                        other_err
                    );
                }
                Ok(_) => {
                    panic!("Expected error, but got Ok");
                }
            }
        };
    }

    #[test]
    fn test_filter_options_invalid_p() {
        let opts = FilterOptions::default().with_p(-0.1);
        assert_config_validation_error!(opts.validate(), "p must be between");
    }

    #[test]
    fn test_filter_options_zero_batch_size() {
        let opts = FilterOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert_config_validation_error!(opts.validate(), "batch_size");
    }

    #[test]
    fn test_parallel_options_zero_jobs() {
        let opts = ParallelOptions {
            num_jobs: Some(0),
            ignore_errors: false,
        };
        assert_config_validation_error!(opts.validate(), "num_jobs");
    }

    #[test]
    fn test_run_config_zero_chunk() {
        let config = RunConfig {
            stream_chunk_size: 0,
            ..Default::default()
        };
        assert_config_validation_error!(config.validate(), "stream_chunk_size");
    }

    #[test]
    fn test_step_validation_names_the_step() {
        let step: StepConfig =
            serde_yaml::from_str("type: AppendSuffix\nsuffix: x\noptions:\n  p: 2.0\n").unwrap();
        assert_config_validation_error!(step.validate(), "AppendSuffix");
    }

    #[test]
    fn test_document_length_bounds() {
        let step: StepConfig =
            serde_yaml::from_str("type: DocumentLengthFilter\nmin_doc_len: 10\nmax_doc_len: 5\n")
                .unwrap();
        assert_config_validation_error!(step.validate(), "min_doc_len");
    }

    #[test]
    fn test_dumper_defaults_to_seeing_rejected() {
        let step: StepConfig = serde_yaml::from_str("type: JsonDumper\n").unwrap();
        assert!(!step.options().skip_rejected);
    }
}
