use TextSieve::config::FilterOptions;
use TextSieve::pipeline::filters::{
    AppendSuffix, DiscardAll, DocumentLengthFilter, ExactDeduplicator, JsonDumper, JsonLoader,
    DEDUP_KEY,
};
use TextSieve::utils::SharedRng;
use TextSieve::{Compose, Document, Filter, FilterStage, PipelineError, Result, Stage};

/// Records the size of every batch it is handed.
#[derive(Clone, Default)]
struct BatchRecorder {
    sizes: Vec<usize>,
}

impl Filter for BatchRecorder {
    fn apply(&mut self, document: &mut Document) -> Result<()> {
        document.text.push('.');
        Ok(())
    }

    fn apply_batch(&mut self, documents: &mut [Document]) -> Result<()> {
        self.sizes.push(documents.len());
        if documents.iter().any(|d| d.text.contains("poison")) {
            return Err(PipelineError::filter("BatchRecorder", "poisoned batch"));
        }
        for document in documents.iter_mut() {
            self.apply(document)?;
        }
        Ok(())
    }
}

fn create_test_document(text: &str) -> Document {
    Document::new(text)
}

#[test]
fn test_probability_zero_never_applies() {
    let options = FilterOptions::default().with_p(0.0).with_seed(3);
    let mut stage = FilterStage::with_options(DiscardAll, options).unwrap();
    for _ in 0..100 {
        assert!(!stage.apply(create_test_document("x")).unwrap().is_rejected);
    }
    assert_eq!(stage.get_statistics().discard_num, 0);
    assert_eq!(stage.get_statistics().input_num, 100);
}

#[test]
fn test_probability_one_always_applies() {
    let mut stage = FilterStage::with_options(DiscardAll, FilterOptions::default()).unwrap();
    for _ in 0..100 {
        assert!(stage.apply(create_test_document("x")).unwrap().is_rejected);
    }
    assert_eq!(stage.get_statistics().discard_num, 100);
}

#[test]
fn test_probability_one_draws_nothing_from_the_stream() {
    let rng = SharedRng::from_seed(11);
    let witness = rng.fork();
    let options = FilterOptions::default().with_rng(rng.clone());
    let mut stage = FilterStage::with_options(AppendSuffix::new("!"), options).unwrap();
    for _ in 0..10 {
        stage.apply(create_test_document("x")).unwrap();
    }
    assert_eq!(rng.random(), witness.random());
}

#[test]
fn test_seed_and_rng_conflict() {
    let options = FilterOptions::default()
        .with_seed(1)
        .with_rng(SharedRng::from_seed(2));
    match FilterStage::with_options(DiscardAll, options) {
        Err(PipelineError::ConfigValidationError(msg)) => assert!(msg.contains("seed")),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("expected a configuration error"),
    }
}

#[test]
fn test_invalid_probability_is_rejected() {
    let options = FilterOptions::default().with_p(f64::NAN);
    assert!(matches!(
        FilterStage::with_options(DiscardAll, options),
        Err(PipelineError::ConfigValidationError(_))
    ));
}

#[test]
fn test_rejected_documents_skip_by_default() {
    let mut stage = FilterStage::new(AppendSuffix::new("!"));
    let mut doc = create_test_document("x");
    doc.is_rejected = true;
    let doc = stage.apply(doc).unwrap();
    assert_eq!(doc.text, "x");

    let options = FilterOptions::default().with_skip_rejected(false);
    let mut eager = FilterStage::with_options(AppendSuffix::new("!"), options).unwrap();
    let doc = eager.apply(doc).unwrap();
    assert_eq!(doc.text, "x!");
    // Already rejected on the way in, so this stage is not credited with the discard.
    assert!(doc.reject_reason.is_empty());
    assert_eq!(eager.get_statistics().discard_num, 0);
}

#[test]
fn test_stream_batches_in_windows_and_keeps_order() {
    let options = FilterOptions::default().batched(2);
    let mut stage = FilterStage::with_options(BatchRecorder::default(), options).unwrap();
    let mut docs: Vec<Document> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|t| create_test_document(t))
        .collect();
    docs[2].is_rejected = true;

    let out: Vec<Document> = stage.apply_stream(Box::new(docs.into_iter())).collect();
    let texts: Vec<&str> = out.iter().map(|d| d.text.as_str()).collect();
    assert_eq!(texts, vec!["a.", "b.", "c", "d.", "e."]);
    assert_eq!(stage.get_statistics().input_num, 5);
}

#[test]
fn test_stream_window_failure_rejects_window_only() {
    let options = FilterOptions::default().batched(2);
    let mut stage = FilterStage::with_options(BatchRecorder::default(), options).unwrap();
    let docs = vec![
        create_test_document("a"),
        create_test_document("poison"),
        create_test_document("c"),
        create_test_document("d"),
    ];
    let out: Vec<Document> = stage.apply_stream(Box::new(docs.into_iter())).collect();

    assert_eq!(out.len(), 4);
    assert!(out[0].is_rejected && out[1].is_rejected);
    assert!(out[0].reject_reason["error"]
        .as_str()
        .unwrap()
        .contains("poisoned batch"));
    assert_eq!(out[2].text, "c.");
    assert_eq!(out[3].text, "d.");

    let stats = stage.get_statistics();
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.discard_num, 2);
    assert_eq!(stats.output_num, 2);
}

#[test]
fn test_batch_apply_propagates_errors() {
    let mut stage = FilterStage::new(BatchRecorder::default());
    let mut docs = vec![create_test_document("poison")];
    assert!(stage.apply_batch_tracked(&mut docs).is_err());
}

#[test]
fn test_length_filter_bounds() {
    let mut compose = Compose::new(vec![Stage::leaf(DocumentLengthFilter::new(Some(3), Some(5)))]);
    assert!(compose.apply(create_test_document("ab")).unwrap().is_rejected);
    assert!(!compose.apply(create_test_document("日本語")).unwrap().is_rejected);
    assert!(!compose.apply(create_test_document("abcde")).unwrap().is_rejected);
    assert!(compose.apply(create_test_document("abcdef")).unwrap().is_rejected);
    let doc = compose.apply(create_test_document("a")).unwrap();
    assert_eq!(doc.reject_reason["min_doc_len"], 3);
}

#[test]
fn test_exact_deduplicator_rejects_repeats() {
    let mut compose = Compose::new(vec![Stage::leaf(ExactDeduplicator::new())]);
    let first = compose.apply(create_test_document("same")).unwrap();
    let second = compose.apply(create_test_document("same")).unwrap();
    let other = compose.apply(create_test_document("different")).unwrap();

    assert!(!first.is_rejected);
    assert!(second.is_rejected);
    assert!(!other.is_rejected);
    assert_eq!(first.extras[DEDUP_KEY], second.extras[DEDUP_KEY]);
    assert_ne!(first.extras[DEDUP_KEY], other.extras[DEDUP_KEY]);
}

#[test]
fn test_loader_ignore_rejects_instead_of_failing() {
    let mut strict = Compose::new(vec![Stage::leaf(JsonLoader::default())]);
    assert!(strict.apply(create_test_document("not json")).is_err());

    let mut lenient = Compose::new(vec![Stage::leaf(JsonLoader::new("text", true))]);
    let doc = lenient.apply(create_test_document("not json")).unwrap();
    assert!(doc.is_rejected);
    assert_eq!(doc.reject_reason["name"], "0-JsonLoader");
}

#[test]
fn test_dumper_reports_reason_for_rejected_documents() {
    let dumper_options = FilterOptions::default().with_skip_rejected(false);
    let mut compose = Compose::new(vec![
        Stage::leaf(DiscardAll),
        Stage::with_options(JsonDumper::new(true), dumper_options).unwrap(),
    ]);
    let doc = compose.apply(create_test_document("gone")).unwrap();
    let line: serde_json::Value = serde_json::from_str(&doc.text).unwrap();
    assert_eq!(line["text"], "gone");
    assert_eq!(line["is_rejected"], true);
    assert_eq!(line["reason"]["name"], "0-DiscardAll");
}

#[test]
fn test_loader_dumper_round_trip() {
    let mut compose = Compose::new(vec![
        Stage::leaf(JsonLoader::default()),
        Stage::leaf(JsonDumper::default()),
    ]);
    let input = r#"{"text":"hello"}"#;
    assert_eq!(compose.call(input).unwrap(), input);
}
