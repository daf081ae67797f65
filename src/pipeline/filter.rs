// src/pipeline/filter.rs

use std::collections::VecDeque;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::FilterOptions;
use crate::data_model::{DocInfo, Document};
use crate::error::{PipelineError, Result};
use crate::pipeline::stage_core::{put_back, take_eligible, StageCore};
use crate::statistics::Statistics;
use crate::utils::SharedRng;

/// A lazily evaluated, pull-based sequence of documents.
pub type DocStream<'a> = Box<dyn Iterator<Item = Document> + 'a>;

/// Object-safe cloning for boxed filters. Implemented for every `Filter + Clone`.
pub trait FilterClone {
    fn clone_box(&self) -> Box<dyn Filter>;
}

impl<T> FilterClone for T
where
    T: Filter + Clone + 'static,
{
    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

/// A synchronous pipeline stage.
///
/// Implementors only provide `apply`. A stage rejects a document by setting
/// `is_rejected`; the surrounding `FilterStage` takes care of probability gating,
/// statistics and rejection provenance.
pub trait Filter: FilterClone + Send {
    /// Class name used to build the stage's display name.
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn apply(&mut self, document: &mut Document) -> Result<()>;

    /// Override when the stage can do better than one document at a time.
    fn apply_batch(&mut self, documents: &mut [Document]) -> Result<()> {
        for document in documents.iter_mut() {
            self.apply(document)?;
        }
        Ok(())
    }

    /// Public parameters recorded in `reject_reason`. Non-primitive values are dropped.
    fn params(&self) -> Map<String, Value> {
        Map::new()
    }

    fn shutdown(&mut self) {}
}

pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A `Filter` together with its options, random stream and statistics.
pub struct FilterStage {
    filter: Box<dyn Filter>,
    pub(crate) core: StageCore,
    pub(crate) statistics: Statistics,
}

impl FilterStage {
    /// Wrap a filter with default options (`p = 1`, `skip_rejected = true`).
    pub fn new<F: Filter + 'static>(filter: F) -> Self {
        Self::from_boxed(Box::new(filter))
    }

    pub fn from_boxed(filter: Box<dyn Filter>) -> Self {
        let core = StageCore::with_defaults(filter.name());
        let statistics = Statistics::new(core.name.clone());
        FilterStage {
            filter,
            core,
            statistics,
        }
    }

    pub fn with_options<F: Filter + 'static>(filter: F, options: FilterOptions) -> Result<Self> {
        Self::boxed_with_options(Box::new(filter), options)
    }

    pub fn boxed_with_options(filter: Box<dyn Filter>, options: FilterOptions) -> Result<Self> {
        let core = StageCore::new(filter.name(), options)?;
        debug!(stage = %core.name, p = core.options.p, use_batch = core.options.use_batch, "Built filter stage");
        let statistics = Statistics::new(core.name.clone());
        Ok(FilterStage {
            filter,
            core,
            statistics,
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn options(&self) -> &FilterOptions {
        &self.core.options
    }

    pub fn params(&self) -> Map<String, Value> {
        self.filter.params()
    }

    pub fn get_statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }

    pub(crate) fn rename(&mut self, index: usize) {
        let name = self.core.rename(index).to_string();
        self.statistics.name = name;
    }

    pub(crate) fn inherit_rng(&mut self, rng: &SharedRng) {
        self.core.inherit_rng(rng);
    }

    pub(crate) fn owns_rng(&self) -> bool {
        self.core.owns_rng
    }

    /// Independent copy with zeroed statistics, for a worker context.
    pub(crate) fn fork(&self, inherited: &SharedRng) -> FilterStage {
        let mut statistics = self.statistics.clone();
        statistics.reset();
        FilterStage {
            filter: self.filter.clone_box(),
            core: self.core.fork(inherited),
            statistics,
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Filter>, StageCore, Statistics) {
        (self.filter, self.core, self.statistics)
    }

    pub fn shutdown(&mut self) {
        self.filter.shutdown();
    }

    /// Apply to one document, updating statistics. Errors propagate.
    pub fn apply_tracked(&mut self, document: &mut Document) -> Result<()> {
        let before = DocInfo::capture(document);
        if !self.core.check_skip(document) {
            self.filter.apply(document)?;
        }
        self.finish_document(document, &before);
        Ok(())
    }

    /// Apply to a batch with one shared probability draw. Errors propagate, leaving the
    /// batch in place.
    pub fn apply_batch_tracked(&mut self, documents: &mut [Document]) -> Result<()> {
        let befores: Vec<DocInfo> = documents.iter().map(DocInfo::capture).collect();
        if !self.core.draw_skip() {
            self.run_batch(documents)?;
        }
        for (document, before) in documents.iter_mut().zip(&befores) {
            self.finish_document(document, before);
        }
        Ok(())
    }

    /// Like `apply_tracked`, but a failure rejects the document instead of propagating.
    pub fn apply_isolated(&mut self, document: &mut Document) {
        let before = DocInfo::capture(document);
        if !self.core.check_skip(document) {
            if let Err(e) = self.filter.apply(document) {
                self.record_failure(std::slice::from_mut(document), &e);
                self.record_diff(document, &before);
                return;
            }
        }
        self.finish_document(document, &before);
    }

    /// Lazy stream application with per-document (or per-window) failure isolation.
    pub fn apply_stream<'a>(&'a mut self, stream: DocStream<'a>) -> FilterStream<'a> {
        FilterStream {
            stage: self,
            source: stream,
            window: Vec::new(),
            eligible: 0,
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// By-value convenience around `apply_tracked`.
    pub fn apply(&mut self, mut document: Document) -> Result<Document> {
        self.apply_tracked(&mut document)?;
        Ok(document)
    }

    pub fn call(&mut self, text: &str) -> Result<String> {
        Ok(self.apply(Document::new(text))?.text)
    }

    fn run_batch(&mut self, documents: &mut [Document]) -> Result<()> {
        let (positions, mut taken) = take_eligible(&self.core, documents);
        if taken.is_empty() {
            return Ok(());
        }
        let outcome = self.filter.apply_batch(&mut taken);
        put_back(documents, &positions, taken);
        outcome
    }

    fn finish_document(&mut self, document: &mut Document, before: &DocInfo) {
        let filter = &self.filter;
        self.core
            .stamp_rejection(document, before, || filter.params());
        self.record_diff(document, before);
    }

    fn record_diff(&mut self, document: &Document, before: &DocInfo) {
        let after = DocInfo::capture(document);
        self.statistics.update_by_diff(before, &after);
    }

    fn record_failure(&mut self, documents: &mut [Document], error: &PipelineError) {
        let params = self.filter.params();
        for document in documents.iter_mut() {
            self.core.reject_with_error(document, error, params.clone());
            self.statistics.errors += 1;
        }
        warn!(
            stage = %self.core.name,
            documents = documents.len(),
            error = %error,
            "Stage failed, rejecting affected documents"
        );
    }

    /// Process a window: eligible documents go through `apply_batch` together, the rest
    /// pass through. Every document is diffed against its pre-window snapshot.
    fn flush_window(&mut self, window: &mut [Document], skipped: &[bool]) {
        let befores: Vec<DocInfo> = window.iter().map(DocInfo::capture).collect();
        let positions: Vec<usize> = (0..window.len()).filter(|&i| !skipped[i]).collect();
        let mut taken: Vec<Document> = positions
            .iter()
            .map(|&i| std::mem::take(&mut window[i]))
            .collect();
        let mut failed = false;
        if !taken.is_empty() {
            debug!(stage = %self.core.name, size = taken.len(), "Flushing batch window");
            if let Err(e) = self.filter.apply_batch(&mut taken) {
                self.record_failure(&mut taken, &e);
                failed = true;
            }
        }
        put_back(window, &positions, taken);
        for (i, (document, before)) in window.iter_mut().zip(&befores).enumerate() {
            if failed && !skipped[i] {
                // Already carries the error as its reject reason.
                self.record_diff(document, before);
            } else {
                self.finish_document(document, before);
            }
        }
    }
}

/// Iterator returned by `FilterStage::apply_stream`.
pub struct FilterStream<'a> {
    stage: &'a mut FilterStage,
    source: DocStream<'a>,
    /// Documents waiting for the window to fill, with their skip decision.
    window: Vec<(Document, bool)>,
    eligible: usize,
    ready: VecDeque<Document>,
    /// Set once the source has returned `None`; it is never pulled again.
    exhausted: bool,
}

impl<'a> FilterStream<'a> {
    fn flush(&mut self) {
        if self.window.is_empty() {
            return;
        }
        let (mut documents, skipped): (Vec<Document>, Vec<bool>) =
            self.window.drain(..).unzip();
        self.eligible = 0;
        self.stage.flush_window(&mut documents, &skipped);
        self.ready.extend(documents);
    }
}

impl<'a> Iterator for FilterStream<'a> {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        if !self.stage.core.options.use_batch {
            if self.exhausted {
                return None;
            }
            let Some(mut document) = self.source.next() else {
                self.exhausted = true;
                return None;
            };
            self.stage.apply_isolated(&mut document);
            return Some(document);
        }

        loop {
            if let Some(document) = self.ready.pop_front() {
                return Some(document);
            }
            if self.exhausted {
                return None;
            }
            match self.source.next() {
                Some(document) => {
                    let skip = self.stage.core.check_skip(&document);
                    if skip && self.window.is_empty() {
                        let mut document = document;
                        let before = DocInfo::capture(&document);
                        self.stage.finish_document(&mut document, &before);
                        return Some(document);
                    }
                    self.window.push((document, skip));
                    if !skip {
                        self.eligible += 1;
                        if self.eligible >= self.stage.core.options.batch_size {
                            self.flush();
                        }
                    }
                }
                None => {
                    self.exhausted = true;
                    self.flush();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Shout;

    impl Filter for Shout {
        fn apply(&mut self, document: &mut Document) -> Result<()> {
            document.text = document.text.to_uppercase();
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FailOn(&'static str);

    impl Filter for FailOn {
        fn apply(&mut self, document: &mut Document) -> Result<()> {
            if document.text == self.0 {
                return Err(PipelineError::filter("FailOn", "bad input"));
            }
            Ok(())
        }
    }

    #[test]
    fn default_name_is_the_type_name() {
        assert_eq!(Shout.name(), "Shout");
        assert_eq!(short_type_name("a::b::Wrapper<c::D>"), "Wrapper");
    }

    #[test]
    fn call_applies_to_text() {
        let mut stage = FilterStage::new(Shout);
        assert_eq!(stage.call("abc").unwrap(), "ABC");
        assert_eq!(stage.get_statistics().output_num, 1);
    }

    #[test]
    fn apply_propagates_errors() {
        let mut stage = FilterStage::new(FailOn("x"));
        assert!(matches!(
            stage.apply(Document::new("x")),
            Err(PipelineError::FilterError { .. })
        ));
    }

    #[test]
    fn stream_isolates_failures() {
        let mut stage = FilterStage::new(FailOn("x"));
        let docs = vec![Document::new("a"), Document::new("x"), Document::new("b")];
        let out: Vec<Document> = stage.apply_stream(Box::new(docs.into_iter())).collect();
        assert_eq!(out.len(), 3);
        assert!(!out[0].is_rejected);
        assert!(out[1].is_rejected);
        assert!(out[1].reject_reason["error"]
            .as_str()
            .unwrap()
            .contains("bad input"));
        assert!(!out[2].is_rejected);
        let stats = stage.get_statistics();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.discard_num, 1);
        assert_eq!(stats.input_num, 3);
    }

    #[test]
    fn stream_window_error_rejects_whole_window() {
        let options = FilterOptions::default().batched(2);
        let mut stage = FilterStage::with_options(FailOn("x"), options).unwrap();
        let docs = vec![
            Document::new("a"),
            Document::new("x"),
            Document::new("b"),
        ];
        let out: Vec<Document> = stage.apply_stream(Box::new(docs.into_iter())).collect();
        assert!(out[0].is_rejected && out[1].is_rejected);
        assert!(!out[2].is_rejected);
        assert_eq!(stage.get_statistics().errors, 2);
    }

    /// Yields a document, then `None`, then documents again.
    struct Resuming {
        pulls: usize,
    }

    impl Iterator for Resuming {
        type Item = Document;

        fn next(&mut self) -> Option<Document> {
            self.pulls += 1;
            if self.pulls == 2 {
                None
            } else {
                Some(Document::new(format!("doc {}", self.pulls)))
            }
        }
    }

    #[test]
    fn stream_stops_at_first_end_of_source() {
        for options in [FilterOptions::default(), FilterOptions::default().batched(4)] {
            let mut stage = FilterStage::with_options(Shout, options).unwrap();
            let mut stream = stage.apply_stream(Box::new(Resuming { pulls: 0 }));
            assert_eq!(stream.next().map(|d| d.text), Some("DOC 1".to_string()));
            assert!(stream.next().is_none());
            assert!(stream.next().is_none());
            drop(stream);
            assert_eq!(stage.get_statistics().input_num, 1);
        }
    }
}
