use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Process-wide origin for `DocInfo::time_ns`.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Legacy token type produced by tokenization stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    original: String,
    pub is_rejected: bool,
}

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Token {
            original: text.clone(),
            text,
            is_rejected: false,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The unit of work flowing through a pipeline.
///
/// `original` is captured once at construction and never changes afterwards.
/// `extras` carries side-channel metadata written by stages (dedup keys and the like),
/// `reject_reason` records which stage discarded the document and with which parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    original: String,
    pub is_rejected: bool,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub extras: HashMap<String, Value>,
    #[serde(default)]
    pub reject_reason: Map<String, Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Document {
            original: text.clone(),
            text,
            ..Default::default()
        }
    }

    pub fn with_extras(text: impl Into<String>, extras: HashMap<String, Value>) -> Self {
        Document {
            extras,
            ..Document::new(text)
        }
    }

    /// An empty, already rejected document. Parallel workers hand this back in place of a
    /// document whose processing failed.
    pub fn rejected_empty() -> Self {
        Document {
            is_rejected: true,
            ..Document::new("")
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn set_tokens<S: Into<String>>(&mut self, tokens: impl IntoIterator<Item = S>) {
        self.tokens = tokens.into_iter().map(Token::new).collect();
    }

    pub fn get_tokens(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Document {
    fn from(text: &str) -> Self {
        Document::new(text)
    }
}

impl From<String> for Document {
    fn from(text: String) -> Self {
        Document::new(text)
    }
}

/// Snapshot of a document at one instant, used to compute statistics deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocInfo {
    pub is_rejected: bool,
    pub bytes: u64,
    pub chars: u64,
    pub time_ns: u64,
}

impl DocInfo {
    pub fn capture(document: &Document) -> Self {
        DocInfo {
            is_rejected: document.is_rejected,
            bytes: document.text.len() as u64,
            chars: document.text.chars().count() as u64,
            time_ns: now_ns(),
        }
    }
}

pub(crate) fn now_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}
