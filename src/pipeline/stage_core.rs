// src/pipeline/stage_core.rs

use std::mem;

use serde_json::{Map, Value};

use crate::config::FilterOptions;
use crate::data_model::{DocInfo, Document};
use crate::error::{PipelineError, Result};
use crate::utils::{resolve_rng, SharedRng};

/// State every stage carries regardless of whether its filter is sync or async:
/// display name, options, random stream and whether that stream was supplied locally.
#[derive(Debug, Clone)]
pub(crate) struct StageCore {
    class_name: &'static str,
    pub(crate) name: String,
    pub(crate) options: FilterOptions,
    pub(crate) rng: SharedRng,
    pub(crate) owns_rng: bool,
}

impl StageCore {
    pub(crate) fn new(class_name: &'static str, options: FilterOptions) -> Result<Self> {
        options.validate()?;
        let (rng, owns_rng) = resolve_rng(options.seed, options.rng.as_ref())?;
        Ok(StageCore {
            class_name,
            name: class_name.to_string(),
            options,
            rng,
            owns_rng,
        })
    }

    /// Default options: always valid, inherited entropy stream.
    pub(crate) fn with_defaults(class_name: &'static str) -> Self {
        StageCore {
            class_name,
            name: class_name.to_string(),
            options: FilterOptions::default(),
            rng: SharedRng::from_entropy(),
            owns_rng: false,
        }
    }

    pub(crate) fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// Name the stage after its position in a flattened pipeline.
    pub(crate) fn rename(&mut self, index: usize) -> &str {
        self.name = format!("{}-{}", index, self.class_name);
        &self.name
    }

    /// Replace the random stream unless the stage was given its own.
    pub(crate) fn inherit_rng(&mut self, rng: &SharedRng) {
        if !self.owns_rng {
            self.rng = rng.clone();
        }
    }

    /// Copy for a worker context. Inherited streams are replaced by `inherited`; owned
    /// streams are copied so the worker draws the same sequence independently.
    pub(crate) fn fork(&self, inherited: &SharedRng) -> Self {
        let rng = if self.owns_rng {
            self.rng.fork()
        } else {
            inherited.clone()
        };
        StageCore {
            rng,
            ..self.clone()
        }
    }

    /// One probability draw. Never consumes randomness when `p == 1`.
    pub(crate) fn draw_skip(&self) -> bool {
        self.options.p < 1.0 && self.rng.random() > self.options.p
    }

    pub(crate) fn excluded(&self, document: &Document) -> bool {
        self.options.skip_rejected && document.is_rejected
    }

    pub(crate) fn check_skip(&self, document: &Document) -> bool {
        self.excluded(document) || self.draw_skip()
    }

    /// Public description of the stage, used as the rejection provenance.
    pub(crate) fn describe(&self, params: Map<String, Value>) -> Map<String, Value> {
        let mut description = Map::new();
        description.insert("name".to_string(), Value::from(self.name.clone()));
        description.insert("p".to_string(), Value::from(self.options.p));
        description.insert(
            "skip_rejected".to_string(),
            Value::from(self.options.skip_rejected),
        );
        description.insert("use_batch".to_string(), Value::from(self.options.use_batch));
        description.insert(
            "batch_size".to_string(),
            Value::from(self.options.batch_size),
        );
        for (key, value) in params {
            if is_jsonable(&value) && !description.contains_key(&key) {
                description.insert(key, value);
            }
        }
        description
    }

    /// Stamp `reject_reason` when this stage is the one that rejected the document.
    pub(crate) fn stamp_rejection<F>(&self, document: &mut Document, before: &DocInfo, params: F)
    where
        F: FnOnce() -> Map<String, Value>,
    {
        if !before.is_rejected && document.is_rejected {
            document.reject_reason = self.describe(params());
        }
    }

    pub(crate) fn reject_with_error(
        &self,
        document: &mut Document,
        error: &PipelineError,
        params: Map<String, Value>,
    ) {
        let mut reason = self.describe(params);
        reason.insert("error".to_string(), Value::from(error.to_string()));
        document.is_rejected = true;
        document.reject_reason = reason;
    }
}

fn is_jsonable(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Move the documents a stage should see out of `documents`, leaving placeholders.
pub(crate) fn take_eligible(
    core: &StageCore,
    documents: &mut [Document],
) -> (Vec<usize>, Vec<Document>) {
    let mut positions = Vec::new();
    let mut taken = Vec::new();
    for (i, doc) in documents.iter_mut().enumerate() {
        if !core.excluded(doc) {
            positions.push(i);
            taken.push(mem::take(doc));
        }
    }
    (positions, taken)
}

pub(crate) fn put_back(documents: &mut [Document], positions: &[usize], taken: Vec<Document>) {
    for (&i, doc) in positions.iter().zip(taken) {
        documents[i] = doc;
    }
}
