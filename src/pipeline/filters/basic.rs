use serde_json::{Map, Value};

use crate::data_model::Document;
use crate::error::Result;
use crate::pipeline::filter::Filter;

/// Leaves every document untouched.
#[derive(Clone, Debug, Default)]
pub struct Identity;

impl Filter for Identity {
    fn name(&self) -> &'static str {
        "Identity"
    }

    fn apply(&mut self, _document: &mut Document) -> Result<()> {
        Ok(())
    }
}

/// Rejects every document.
#[derive(Clone, Debug, Default)]
pub struct DiscardAll;

impl Filter for DiscardAll {
    fn name(&self) -> &'static str {
        "DiscardAll"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        document.is_rejected = true;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AppendSuffix {
    suffix: String,
}

impl AppendSuffix {
    pub fn new(suffix: impl Into<String>) -> Self {
        AppendSuffix {
            suffix: suffix.into(),
        }
    }
}

impl Filter for AppendSuffix {
    fn name(&self) -> &'static str {
        "AppendSuffix"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        document.text.push_str(&self.suffix);
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("suffix".to_string(), Value::from(self.suffix.clone()));
        params
    }
}

/// Rejects documents whose text contains `keyword`.
#[derive(Clone, Debug)]
pub struct DiscardContainingKeyword {
    keyword: String,
}

impl DiscardContainingKeyword {
    pub fn new(keyword: impl Into<String>) -> Self {
        DiscardContainingKeyword {
            keyword: keyword.into(),
        }
    }
}

impl Filter for DiscardContainingKeyword {
    fn name(&self) -> &'static str {
        "DiscardContainingKeyword"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        if document.text.contains(&self.keyword) {
            document.is_rejected = true;
        }
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("keyword".to_string(), Value::from(self.keyword.clone()));
        params
    }
}

/// Rejects documents whose length in characters falls outside the configured bounds.
#[derive(Clone, Debug, Default)]
pub struct DocumentLengthFilter {
    min_doc_len: Option<usize>,
    max_doc_len: Option<usize>,
}

impl DocumentLengthFilter {
    pub fn new(min_doc_len: Option<usize>, max_doc_len: Option<usize>) -> Self {
        DocumentLengthFilter {
            min_doc_len,
            max_doc_len,
        }
    }
}

impl Filter for DocumentLengthFilter {
    fn name(&self) -> &'static str {
        "DocumentLengthFilter"
    }

    fn apply(&mut self, document: &mut Document) -> Result<()> {
        let doc_len = document.text.chars().count();
        if self.min_doc_len.is_some_and(|min| doc_len < min)
            || self.max_doc_len.is_some_and(|max| max < doc_len)
        {
            document.is_rejected = true;
        }
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("min_doc_len".to_string(), Value::from(self.min_doc_len));
        params.insert("max_doc_len".to_string(), Value::from(self.max_doc_len));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filter::FilterStage;

    #[test]
    fn keyword_rejection_is_stamped() {
        let mut stage = FilterStage::new(DiscardContainingKeyword::new("spam"));
        let doc = stage.apply(Document::new("buy spam now")).unwrap();
        assert!(doc.is_rejected);
        assert_eq!(doc.reject_reason["name"], "DiscardContainingKeyword");
        assert_eq!(doc.reject_reason["keyword"], "spam");
    }

    #[test]
    fn length_bounds_count_characters() {
        let mut filter = DocumentLengthFilter::new(Some(3), Some(4));
        let mut short = Document::new("日本");
        let mut ok = Document::new("日本語");
        let mut long = Document::new("hello");
        filter.apply(&mut short).unwrap();
        filter.apply(&mut ok).unwrap();
        filter.apply(&mut long).unwrap();
        assert!(short.is_rejected);
        assert!(!ok.is_rejected);
        assert!(long.is_rejected);
    }

    #[test]
    fn length_params_keep_unset_bounds_as_null() {
        let params = DocumentLengthFilter::new(None, Some(10)).params();
        assert_eq!(params["min_doc_len"], Value::Null);
        assert_eq!(params["max_doc_len"], 10);
    }
}
