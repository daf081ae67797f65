// src/pipeline/filters/mod.rs

mod async_filters;
mod basic;
mod dedup;
mod json;

// Re-export the concrete stages
pub use async_filters::AsyncUppercase;
pub use basic::{AppendSuffix, DiscardAll, DiscardContainingKeyword, DocumentLengthFilter, Identity};
pub use dedup::{ExactDeduplicator, DEDUP_KEY};
pub use json::{JsonDumper, JsonLoader};
