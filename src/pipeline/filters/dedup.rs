use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::data_model::Document;
use crate::error::Result;
use crate::pipeline::filter::Filter;

/// Extras key holding the hex digest used for exact deduplication.
pub const DEDUP_KEY: &str = "dedup_key";

/// Rejects documents whose text was already seen by this instance.
///
/// The seen-set lives in memory. Each parallel worker gets its own copy, so duplicates
/// that land on different workers are not detected.
#[derive(Clone, Debug, Default)]
pub struct ExactDeduplicator {
    seen: HashSet<u64>,
}

impl ExactDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    fn digest(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

impl Filter for ExactDeduplicator {
    fn name(&self) -> &'static str {
        "ExactDeduplicator"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        let digest = Self::digest(&document.text);
        document
            .extras
            .insert(DEDUP_KEY.to_string(), Value::from(format!("{:016x}", digest)));
        if !self.seen.insert(digest) {
            document.is_rejected = true;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.seen.clear();
    }
}
