use serde_json::{json, Map, Value};

use crate::data_model::Document;
use crate::error::{PipelineError, Result};
use crate::pipeline::filter::Filter;

/// Parses the text as a JSON object and replaces it with the value under `key`.
///
/// Unparsable input or a missing key is an error, unless `ignore` is set, in which case
/// the document is rejected instead.
#[derive(Clone, Debug)]
pub struct JsonLoader {
    key: String,
    ignore: bool,
}

impl JsonLoader {
    pub fn new(key: impl Into<String>, ignore: bool) -> Self {
        JsonLoader {
            key: key.into(),
            ignore,
        }
    }

    fn extract(&self, text: &str) -> Result<String> {
        let data: Value = serde_json::from_str(text)?;
        match data.get(&self.key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(PipelineError::filter(
                "JsonLoader",
                format!("key '{}' not found", self.key),
            )),
        }
    }
}

impl Default for JsonLoader {
    fn default() -> Self {
        JsonLoader::new("text", false)
    }
}

impl Filter for JsonLoader {
    fn name(&self) -> &'static str {
        "JsonLoader"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        match self.extract(&document.text) {
            Ok(text) => document.text = text,
            Err(_) if self.ignore => document.is_rejected = true,
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("key".to_string(), Value::from(self.key.clone()));
        params.insert("ignore".to_string(), Value::from(self.ignore));
        params
    }
}

/// Serializes the text back into a one-line JSON object `{"text": ...}`.
///
/// With `dump_reason`, rejected documents also carry `is_rejected` and `reason`.
#[derive(Clone, Debug, Default)]
pub struct JsonDumper {
    dump_reason: bool,
}

impl JsonDumper {
    pub fn new(dump_reason: bool) -> Self {
        JsonDumper { dump_reason }
    }
}

impl Filter for JsonDumper {
    fn name(&self) -> &'static str {
        "JsonDumper"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        let line = if self.dump_reason && document.is_rejected {
            json!({
                "text": document.text,
                "is_rejected": true,
                "reason": document.reject_reason,
            })
        } else {
            json!({ "text": document.text })
        };
        document.text = serde_json::to_string(&line)?;
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("dump_reason".to_string(), Value::from(self.dump_reason));
        params
    }
}
