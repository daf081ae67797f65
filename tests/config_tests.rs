#[cfg(test)]
mod tests {
    use std::io::Write;
    use tempfile::NamedTempFile;
    use TextSieve::config::{
        load_pipeline_config, load_run_config, ExecutionMode, PipelineConfig, StepConfig,
    };
    use TextSieve::error::PipelineError;
    use TextSieve::{build_compose_from_config, Document};

    // Helper to create a temporary config file with given content
    fn create_temp_config_file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(temp_file, "{}", content).expect("Failed to write to temp file");
        temp_file
    }

    #[test]
    fn test_load_valid_pipeline_config() {
        let yaml_content = r#"
seed: 42
pipeline:
  - type: JsonLoader
    key: body
  - type: DiscardContainingKeyword
    keyword: lorem
    options:
      p: 0.5
  - type: DocumentLengthFilter
    min_doc_len: 3
  - type: AppendSuffix
    suffix: "_done"
    options:
      use_batch: true
      batch_size: 16
  - type: JsonDumper
    dump_reason: true
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        let config_result = load_pipeline_config(temp_file.path());

        assert!(
            config_result.is_ok(),
            "Should load valid config: {:?}",
            config_result.err()
        );
        let config = config_result.unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.pipeline.len(), 5);
        match &config.pipeline[0] {
            StepConfig::JsonLoader(params) => {
                assert_eq!(params.key, "body");
                assert!(!params.ignore);
            }
            _ => panic!("Expected JsonLoader"),
        }
        match &config.pipeline[1] {
            StepConfig::DiscardContainingKeyword(params) => {
                assert_eq!(params.keyword, "lorem");
                assert_eq!(params.options.p, 0.5);
                assert!(params.options.skip_rejected);
            }
            _ => panic!("Expected DiscardContainingKeyword"),
        }
        match &config.pipeline[2] {
            StepConfig::DocumentLengthFilter(params) => {
                assert_eq!(params.min_doc_len, Some(3));
                assert_eq!(params.max_doc_len, None);
            }
            _ => panic!("Expected DocumentLengthFilter"),
        }
        assert!(config.pipeline[3].options().use_batch);
        assert_eq!(config.pipeline[3].options().batch_size, 16);
        assert!(!config.pipeline[4].options().skip_rejected);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_pipeline_config("non_existent_config.yaml");
        assert!(result.is_err());
        match result.err().unwrap() {
            PipelineError::ConfigError(msg) => {
                assert!(msg.contains("Failed to read pipeline config file"));
                assert!(msg.contains("non_existent_config.yaml"));
            }
            _ => panic!("Expected ConfigError for non-existent file"),
        }
    }

    #[test]
    fn test_load_invalid_yaml_syntax() {
        let yaml_content = r#"
pipeline:
  - type: AppendSuffix
    suffix: [unclosed
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        match load_pipeline_config(temp_file.path()) {
            Err(PipelineError::ConfigError(msg)) => {
                assert!(msg.contains("Failed to parse pipeline config YAML"));
            }
            other => panic!("Expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_load_unknown_step_type() {
        let yaml_content = r#"
pipeline:
  - type: DoesNotExist
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        assert!(matches!(
            load_pipeline_config(temp_file.path()),
            Err(PipelineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_validation_runs_on_load() {
        let yaml_content = r#"
pipeline:
  - type: Identity
  - type: DiscardAll
    options:
      p: 1.5
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        match load_pipeline_config(temp_file.path()) {
            Err(PipelineError::ConfigValidationError(msg)) => {
                assert!(msg.contains("DiscardAll"));
                assert!(msg.contains("p must be between"));
            }
            other => panic!("Expected ConfigValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_keyword_validation() {
        let yaml_content = r#"
pipeline:
  - type: DiscardContainingKeyword
    keyword: ""
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        assert!(matches!(
            load_pipeline_config(temp_file.path()),
            Err(PipelineError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_load_run_config() {
        let yaml_content = r#"
mode: parallel
exit_on_error: true
num_jobs: 3
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        let config = load_run_config(temp_file.path()).unwrap();
        assert_eq!(config.mode, ExecutionMode::Parallel);
        assert!(config.exit_on_error);
        assert_eq!(config.num_jobs, Some(3));
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.stream_chunk_size, 1000);
    }

    #[test]
    fn test_load_run_config_invalid() {
        let yaml_content = "mode: batch\nbatch_size: 0\n";
        let temp_file = create_temp_config_file(yaml_content);
        match load_run_config(temp_file.path()) {
            Err(PipelineError::ConfigValidationError(msg)) => {
                assert!(msg.contains("batch_size"));
            }
            other => panic!("Expected ConfigValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_build_compose_from_config() {
        let yaml_content = r#"
seed: 7
pipeline:
  - type: JsonLoader
  - type: AppendSuffix
    suffix: "!"
  - type: DiscardContainingKeyword
    keyword: spam
  - type: JsonDumper
    dump_reason: true
        "#;
        let temp_file = create_temp_config_file(yaml_content);
        let config = load_pipeline_config(temp_file.path()).unwrap();
        let mut compose = build_compose_from_config(&config).unwrap();

        assert_eq!(
            compose.stage_names(),
            vec![
                "0-JsonLoader",
                "1-AppendSuffix",
                "2-DiscardContainingKeyword",
                "3-JsonDumper"
            ]
        );
        let kept = compose
            .apply(Document::new(r#"{"text":"hello"}"#))
            .unwrap();
        assert_eq!(kept.text, r#"{"text":"hello!"}"#);

        let dropped = compose
            .apply(Document::new(r#"{"text":"spam"}"#))
            .unwrap();
        assert!(dropped.is_rejected);
        let line: serde_json::Value = serde_json::from_str(&dropped.text).unwrap();
        assert_eq!(line["reason"]["keyword"], "spam");
    }

    #[test]
    fn test_build_empty_pipeline() {
        let config: PipelineConfig = serde_yaml::from_str("pipeline: []").unwrap();
        let mut compose = build_compose_from_config(&config).unwrap();
        assert!(compose.is_empty());
        assert_eq!(compose.call("as is").unwrap(), "as is");
    }
}
