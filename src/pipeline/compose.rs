// src/pipeline/compose.rs

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{ComposeOptions, FilterOptions};
use crate::data_model::{DocInfo, Document};
use crate::error::{PipelineError, Result};
use crate::pipeline::filter::{DocStream, Filter, FilterStage};
use crate::statistics::Statistics;
use crate::utils::{resolve_rng, SharedRng};

/// Private extras key carrying a document's pre-pipeline snapshot during streaming.
pub(crate) const INIT_STATS_KEY: &str = "__init_stats";

/// Input to `Compose`: a single stage or an ordered group that gets flattened.
pub enum Stage {
    Leaf(FilterStage),
    Group(Vec<Stage>),
}

impl Stage {
    pub fn leaf<F: Filter + 'static>(filter: F) -> Self {
        Stage::Leaf(FilterStage::new(filter))
    }

    pub fn with_options<F: Filter + 'static>(filter: F, options: FilterOptions) -> Result<Self> {
        Ok(Stage::Leaf(FilterStage::with_options(filter, options)?))
    }
}

impl From<FilterStage> for Stage {
    fn from(stage: FilterStage) -> Self {
        Stage::Leaf(stage)
    }
}

impl From<Compose> for Stage {
    fn from(compose: Compose) -> Self {
        Stage::Group(compose.stages.into_iter().map(Stage::Leaf).collect())
    }
}

fn flatten(stages: Vec<Stage>, out: &mut Vec<FilterStage>) {
    for stage in stages {
        match stage {
            Stage::Leaf(leaf) => out.push(leaf),
            Stage::Group(group) => flatten(group, out),
        }
    }
}

/// One line of `Compose::summary`.
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub layer: usize,
    pub name: String,
    pub params: Map<String, Value>,
}

/// An ordered, flattened pipeline of synchronous stages sharing one random stream.
///
/// Stage `i` is displayed (and its statistics named) as `"{i}-{ClassName}"`; the
/// pipeline-wide record is named `"Total"`.
pub struct Compose {
    stages: Vec<FilterStage>,
    rng: SharedRng,
    statistics: Statistics,
}

impl Compose {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self::assemble(stages, SharedRng::from_entropy())
    }

    pub fn seeded(stages: Vec<Stage>, seed: u64) -> Self {
        Self::assemble(stages, SharedRng::from_seed(seed))
    }

    pub fn with_options(stages: Vec<Stage>, options: ComposeOptions) -> Result<Self> {
        let (rng, _) = resolve_rng(options.seed, options.rng.as_ref())?;
        Ok(Self::assemble(stages, rng))
    }

    fn assemble(stages: Vec<Stage>, rng: SharedRng) -> Self {
        let mut flat = Vec::new();
        flatten(stages, &mut flat);
        for (i, stage) in flat.iter_mut().enumerate() {
            stage.rename(i);
            stage.inherit_rng(&rng);
        }
        debug!(stages = flat.len(), "Composed pipeline");
        Compose {
            stages: flat,
            rng,
            statistics: Statistics::new("Total"),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn rng(&self) -> &SharedRng {
        &self.rng
    }

    pub(crate) fn into_stages(self) -> Vec<FilterStage> {
        self.stages
    }

    /// Run every stage over one document. A stage error aborts the document.
    pub fn apply(&mut self, mut document: Document) -> Result<Document> {
        self.apply_in_place(&mut document)?;
        Ok(document)
    }

    /// As `apply`, leaving the (possibly partially processed) document with the caller
    /// when a stage fails.
    pub fn apply_in_place(&mut self, document: &mut Document) -> Result<()> {
        let before = DocInfo::capture(document);
        for stage in self.stages.iter_mut() {
            stage
                .apply_tracked(document)
                .map_err(|e| PipelineError::step(stage.name(), e))?;
        }
        let after = DocInfo::capture(document);
        self.statistics.update_by_diff(&before, &after);
        Ok(())
    }

    /// Run every stage over the whole batch in turn.
    pub fn apply_batch(&mut self, mut documents: Vec<Document>) -> Result<Vec<Document>> {
        self.apply_batch_in_place(&mut documents)?;
        Ok(documents)
    }

    pub fn apply_batch_in_place(&mut self, documents: &mut [Document]) -> Result<()> {
        let befores: Vec<DocInfo> = documents.iter().map(DocInfo::capture).collect();
        for stage in self.stages.iter_mut() {
            stage
                .apply_batch_tracked(documents)
                .map_err(|e| PipelineError::step(stage.name(), e))?;
        }
        for (document, before) in documents.iter().zip(&befores) {
            let after = DocInfo::capture(document);
            self.statistics.update_by_diff(before, &after);
        }
        Ok(())
    }

    /// Chain every stage lazily over `documents`. Stage failures become rejected
    /// documents; nothing is pulled until the returned iterator is.
    pub fn apply_stream<'a, I>(&'a mut self, documents: I) -> DocStream<'a>
    where
        I: IntoIterator<Item = Document>,
        I::IntoIter: 'a,
    {
        let Compose {
            stages, statistics, ..
        } = self;

        let mut stream: DocStream<'a> = Box::new(documents.into_iter().map(|mut document| {
            let info = DocInfo::capture(&document);
            if let Ok(value) = serde_json::to_value(info) {
                document.extras.insert(INIT_STATS_KEY.to_string(), value);
            }
            document
        }));
        for stage in stages.iter_mut() {
            stream = Box::new(stage.apply_stream(stream));
        }

        Box::new(stream.map(move |mut document| {
            if let Some(value) = document.extras.remove(INIT_STATS_KEY) {
                if let Ok(before) = serde_json::from_value::<DocInfo>(value) {
                    let after = DocInfo::capture(&document);
                    statistics.update_by_diff(&before, &after);
                }
            }
            document
        }))
    }

    pub fn call(&mut self, text: &str) -> Result<String> {
        Ok(self.apply(Document::new(text))?.text)
    }

    /// `[Total, stage 0, stage 1, ...]`
    pub fn get_total_statistics(&self) -> Vec<Statistics> {
        std::iter::once(self.statistics.clone())
            .chain(self.stages.iter().map(|s| s.get_statistics().clone()))
            .collect()
    }

    pub fn get_total_statistics_map(&self) -> Vec<Map<String, Value>> {
        self.get_total_statistics()
            .iter()
            .map(Statistics::to_map)
            .collect()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
        for stage in self.stages.iter_mut() {
            stage.reset_statistics();
        }
    }

    /// Add `other` (shaped like `get_total_statistics`) into this pipeline's records.
    pub fn merge_statistics(&mut self, other: &[Statistics]) -> Result<()> {
        let mut merged = Statistics::add_list(&self.get_total_statistics(), other)?.into_iter();
        if let Some(total) = merged.next() {
            self.statistics = total;
        }
        for (stage, stats) in self.stages.iter_mut().zip(merged) {
            stage.statistics = stats;
        }
        Ok(())
    }

    pub fn summary(&self) -> Vec<StageSummary> {
        self.stages
            .iter()
            .enumerate()
            .map(|(layer, stage)| StageSummary {
                layer,
                name: stage.name().to_string(),
                params: stage.params(),
            })
            .collect()
    }

    /// Independent copy with zeroed statistics and a copy of the random state.
    ///
    /// Stages that inherited the pipeline stream share the copy, so the fork draws the
    /// same sequence the original would.
    pub fn fork(&self) -> Compose {
        let rng = self.rng.fork();
        let stages = self.stages.iter().map(|s| s.fork(&rng)).collect();
        Compose {
            stages,
            rng,
            statistics: Statistics::new("Total"),
        }
    }

    pub fn shutdown(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.shutdown();
        }
        info!(stages = self.stages.len(), "Pipeline shut down");
    }
}
