use serde::Deserialize;

use crate::config::filter::FilterOptions;
use crate::error::{PipelineError, Result};

/// A pipeline described in YAML: an optional seed for the shared random stream and the
/// ordered list of stages.
#[derive(Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub seed: Option<u64>,
    pub pipeline: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        for step_config in &self.pipeline {
            step_config.validate()?;
        }
        Ok(())
    }
}

/// One stage of the pipeline. The `type` field selects the filter.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum StepConfig {
    Identity(OptionsOnly),
    DiscardAll(OptionsOnly),
    AppendSuffix(AppendSuffixParams),
    DiscardContainingKeyword(KeywordParams),
    DocumentLengthFilter(DocumentLengthParams),
    JsonLoader(JsonLoaderParams),
    JsonDumper(JsonDumperParams),
    ExactDeduplicator(OptionsOnly),
}

impl StepConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StepConfig::Identity(_) => "Identity",
            StepConfig::DiscardAll(_) => "DiscardAll",
            StepConfig::AppendSuffix(_) => "AppendSuffix",
            StepConfig::DiscardContainingKeyword(_) => "DiscardContainingKeyword",
            StepConfig::DocumentLengthFilter(_) => "DocumentLengthFilter",
            StepConfig::JsonLoader(_) => "JsonLoader",
            StepConfig::JsonDumper(_) => "JsonDumper",
            StepConfig::ExactDeduplicator(_) => "ExactDeduplicator",
        }
    }

    pub fn options(&self) -> &FilterOptions {
        match self {
            StepConfig::Identity(params)
            | StepConfig::DiscardAll(params)
            | StepConfig::ExactDeduplicator(params) => &params.options,
            StepConfig::AppendSuffix(params) => &params.options,
            StepConfig::DiscardContainingKeyword(params) => &params.options,
            StepConfig::DocumentLengthFilter(params) => &params.options,
            StepConfig::JsonLoader(params) => &params.options,
            StepConfig::JsonDumper(params) => &params.options,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.options().validate().map_err(|e| match e {
            PipelineError::ConfigValidationError(msg) => {
                PipelineError::ConfigValidationError(format!("{}: {}", self.name(), msg))
            }
            other => other,
        })?;
        match self {
            StepConfig::DiscardContainingKeyword(params) => params.validate(),
            StepConfig::DocumentLengthFilter(params) => params.validate(),
            StepConfig::JsonLoader(params) => params.validate(),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct OptionsOnly {
    #[serde(default)]
    pub options: FilterOptions,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppendSuffixParams {
    pub suffix: String,
    #[serde(default)]
    pub options: FilterOptions,
}

#[derive(Deserialize, Debug, Clone)]
pub struct KeywordParams {
    pub keyword: String,
    #[serde(default)]
    pub options: FilterOptions,
}

impl KeywordParams {
    pub fn validate(&self) -> Result<()> {
        if self.keyword.is_empty() {
            return Err(PipelineError::ConfigValidationError(
                "KeywordParams: keyword must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DocumentLengthParams {
    #[serde(default)]
    pub min_doc_len: Option<usize>,
    #[serde(default)]
    pub max_doc_len: Option<usize>,
    #[serde(default)]
    pub options: FilterOptions,
}

impl DocumentLengthParams {
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_doc_len, self.max_doc_len) {
            if min > max {
                return Err(PipelineError::ConfigValidationError(format!(
                    "DocumentLengthParams: min_doc_len ({}) must not exceed max_doc_len ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

fn default_text_key() -> String {
    "text".to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct JsonLoaderParams {
    #[serde(default = "default_text_key")]
    pub key: String,
    /// Reject unparsable lines instead of failing.
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub options: FilterOptions,
}

impl JsonLoaderParams {
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(PipelineError::ConfigValidationError(
                "JsonLoaderParams: key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn dumper_options() -> FilterOptions {
    FilterOptions::default().with_skip_rejected(false)
}

/// The dumper sees rejected documents too unless told otherwise.
#[derive(Deserialize, Debug, Clone)]
pub struct JsonDumperParams {
    #[serde(default)]
    pub dump_reason: bool,
    #[serde(default = "dumper_options")]
    pub options: FilterOptions,
}
