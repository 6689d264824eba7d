//! Integration tests for the notes pipeline.
//!
//! Parsing, rasterisation and the language model are replaced by in-process
//! fakes, so these tests need neither network access nor pdfium. Every fake
//! model counts its calls; the cache contract is checked through those
//! counts and through the files left in the cache directory.

use deck2notes::cache::merge::PartialResultSet;
use deck2notes::pipeline::parse::DocumentParser;
use deck2notes::pipeline::rasterize::{RasterPage, RasterTarget, Rasterizer};
use deck2notes::{
    prompts, AnalysisMode, CacheFilter, CacheStore, LanguageModel, ModelError, ModelReply,
    ModelRequest, NotesConfig, NotesError, NotesPipeline, ProcessOptions, StageKey, Unit,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

// ── Fakes ────────────────────────────────────────────────────────────────────

struct MockModel {
    calls: AtomicUsize,
    /// Fail any request whose prompt contains this text.
    fail_when: Option<&'static str>,
    notes: String,
}

impl MockModel {
    fn new() -> Arc<Self> {
        Self::with_notes("# Notes\n\nGenerated notes.\n")
    }

    fn with_notes(notes: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_when: None,
            notes: notes.to_string(),
        })
    }

    fn failing_on(needle: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_when: Some(needle),
            notes: "# Notes\n".to_string(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for MockModel {
    fn model_name(&self) -> &str {
        "mock"
    }

    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = self.fail_when {
            if request.prompt.contains(needle) {
                return Err(ModelError::Transport {
                    model: "mock".into(),
                    retries: 0,
                    detail: "simulated outage".into(),
                });
            }
        }
        let text = if request.prompt.contains("Relevance:") {
            "Relevance: 0.9\nCaption: Chart".to_string()
        } else if request.system.as_deref() == Some(prompts::NOTES_SYSTEM_PROMPT) {
            self.notes.clone()
        } else {
            "Key points of the unit.".to_string()
        };
        Ok(ModelReply::Text(text))
    }
}

struct FixedParser(usize);

impl DocumentParser for FixedParser {
    fn parse(&self, _path: &Path) -> Result<Vec<Unit>, NotesError> {
        Ok((0..self.0)
            .map(|i| {
                let mut unit = Unit::new(i, format!("Topic {}", i + 1));
                unit.content = vec![format!("Body text of topic {}", i + 1)];
                unit
            })
            .collect())
    }
}

struct FakeRasterizer {
    pages: usize,
    images_per_page: usize,
}

fn save_png(path: &Path) {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255])))
        .save(path)
        .unwrap();
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, _path: &Path, target: &RasterTarget) -> Result<Vec<RasterPage>, NotesError> {
        std::fs::create_dir_all(&target.pages_dir).unwrap();
        if let Some(sink) = &target.images {
            std::fs::create_dir_all(&sink.dir).unwrap();
        }
        Ok((0..self.pages)
            .map(|i| {
                let image_path = target.pages_dir.join(format!("page_{}.png", i + 1));
                save_png(&image_path);
                let images = match &target.images {
                    Some(sink) => (0..self.images_per_page)
                        .map(|k| {
                            let d = sink.descriptor(&format!("page{}_img{}.png", i + 1, k + 1), i);
                            save_png(&d.path);
                            d
                        })
                        .collect(),
                    None => Vec::new(),
                };
                RasterPage {
                    index: i,
                    title: format!("Topic {}", i + 1),
                    text_hint: String::new(),
                    image_path,
                    images,
                }
            })
            .collect())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    input: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let input = root.join("deck.pptx");
    std::fs::write(&input, b"PK fake deck").unwrap();
    Workspace {
        _dir: dir,
        root,
        input,
    }
}

fn config(ws: &Workspace) -> NotesConfig {
    NotesConfig::builder()
        .output_dir(ws.root.join("out"))
        .build()
        .unwrap()
}

fn pipeline(ws: &Workspace, model: &Arc<MockModel>, units: usize) -> NotesPipeline {
    NotesPipeline::new(config(ws), model.clone(), model.clone())
        .with_parser(FixedParser(units))
        .with_rasterizer(FakeRasterizer {
            pages: units,
            images_per_page: 1,
        })
}

fn store(ws: &Workspace) -> CacheStore {
    CacheStore::open(config(ws).cache_dir()).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn five_units_then_cached_rerun_makes_no_calls() {
    let ws = workspace();
    let options = ProcessOptions::new(&ws.input);

    let model = MockModel::new();
    let outcome = pipeline(&ws, &model, 5).try_process(&options).unwrap();
    assert_eq!(outcome.analysed_units, 5);
    assert!(outcome.is_complete());
    // Five analyses and one notes call.
    assert_eq!(model.calls(), 6);

    let notes = std::fs::read_to_string(&outcome.output_path).unwrap();
    for n in 1..=5 {
        assert!(notes.contains(&format!("Topic {n}")), "missing Topic {n}");
    }
    assert_eq!(outcome.output_path, ws.root.join("out/deck_notes.md"));

    let store = store(&ws);
    assert!(store.has(&ws.input, &StageKey::TEXT_ANALYZE, "mock"));
    let records = PartialResultSet::load(&store, &ws.input, &StageKey::TEXT_ANALYZE, "mock");
    assert_eq!(records.indices().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

    let again = MockModel::new();
    let outcome = pipeline(&ws, &again, 5).try_process(&options).unwrap();
    assert_eq!(again.calls(), 0);
    assert_eq!(outcome.cached_units, 5);
    assert!(outcome.notes_cached);
    assert_eq!(std::fs::read_to_string(&outcome.output_path).unwrap(), notes);
}

#[test]
fn failed_unit_is_retried_alone_on_next_run() {
    let ws = workspace();
    let options = ProcessOptions::new(&ws.input);

    let flaky = MockModel::failing_on("Slide number: 3\n");
    let outcome = pipeline(&ws, &flaky, 5).try_process(&options).unwrap();
    assert_eq!(outcome.failed_units, vec![2]);
    assert!(!outcome.notes_cached);
    let notes = std::fs::read_to_string(&outcome.output_path).unwrap();
    assert!(notes.contains("analysis failed"));

    let store = store(&ws);
    let stored = PartialResultSet::load(&store, &ws.input, &StageKey::TEXT_ANALYZE, "mock");
    assert_eq!(stored.len(), 4);
    assert!(!store.has(
        &ws.input,
        &StageKey::notes(AnalysisMode::Text, Default::default()),
        "mock"
    ));

    let healthy = MockModel::new();
    let outcome = pipeline(&ws, &healthy, 5).try_process(&options).unwrap();
    // Unit 3 and the notes.
    assert_eq!(healthy.calls(), 2);
    assert_eq!(outcome.cached_units, 4);
    assert!(outcome.is_complete());
}

#[test]
fn touching_the_source_invalidates_the_cache() {
    let ws = workspace();
    let options = ProcessOptions::new(&ws.input);
    let model = MockModel::new();
    pipeline(&ws, &model, 3).try_process(&options).unwrap();
    assert_eq!(model.calls(), 4);

    let file = std::fs::File::options().write(true).open(&ws.input).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
    drop(file);

    let after = MockModel::new();
    pipeline(&ws, &after, 3).try_process(&options).unwrap();
    assert_eq!(after.calls(), 4);
}

#[test]
fn clearing_one_stage_recomputes_only_that_stage() {
    let ws = workspace();
    let options = ProcessOptions::new(&ws.input);
    pipeline(&ws, &MockModel::new(), 3).try_process(&options).unwrap();

    let notes_stage = StageKey::notes(AnalysisMode::Text, Default::default());
    let removed = store(&ws).invalidate(&CacheFilter::for_file(&ws.input).stage(notes_stage.as_str()));
    assert_eq!(removed, 1);

    let model = MockModel::new();
    pipeline(&ws, &model, 3).try_process(&options).unwrap();
    assert_eq!(model.calls(), 1);
}

#[test]
fn visual_mode_batches_pages_and_resumes() {
    let ws = workspace();
    let mut options = ProcessOptions::new(&ws.input);
    options.mode = AnalysisMode::Visual;
    options.batch_size = 2;

    let model = MockModel::new();
    let outcome = pipeline(&ws, &model, 5).try_process(&options).unwrap();
    // Batches [1,2] [3,4] [5], then summary and notes.
    assert_eq!(model.calls(), 5);
    assert_eq!(outcome.analysed_units, 5);

    let store = store(&ws);
    let stored = PartialResultSet::load(&store, &ws.input, &StageKey::VISUAL_ANALYZE, "mock");
    assert_eq!(stored.len(), 5);
    assert!(store.has(&ws.input, &StageKey::VISUAL_SUMMARY, "mock"));

    let again = MockModel::new();
    pipeline(&ws, &again, 5).try_process(&options).unwrap();
    assert_eq!(again.calls(), 0);
}

#[test]
fn relevant_images_are_embedded_and_verdicts_cached() {
    let ws = workspace();
    let mut options = ProcessOptions::new(&ws.input);
    options.include_images = true;

    let model = MockModel::new();
    let outcome = pipeline(&ws, &model, 2).try_process(&options).unwrap();
    // Two analyses, notes, two relevance verdicts.
    assert_eq!(model.calls(), 5);
    assert_eq!(outcome.images_embedded, 2);

    let notes = std::fs::read_to_string(&outcome.output_path).unwrap();
    let image = notes.find("![Chart](images/deck/page1_img1.png)").unwrap();
    let next_section = notes.find("### 2. Topic 2").unwrap();
    assert!(image < next_section);
    assert!(ws.root.join("out/images/deck/page1_img1.png").is_file());

    let again = MockModel::new();
    pipeline(&ws, &again, 2).try_process(&options).unwrap();
    assert_eq!(again.calls(), 0);
}

#[test]
fn full_pages_expand_placeholders_and_fill_the_rest() {
    let ws = workspace();
    let mut options = ProcessOptions::new(&ws.input);
    options.include_full_pages = true;

    let model = MockModel::with_notes("# Notes\n\n{{{fullpage: page_2 Overview}}}\n");
    let outcome = pipeline(&ws, &model, 2).try_process(&options).unwrap();
    let notes = std::fs::read_to_string(&outcome.output_path).unwrap();

    assert!(notes.contains("![Overview](images/deck_fullpages/fullpage_2.png)"));
    assert!(notes.contains("![Full page 1](images/deck_fullpages/fullpage_1.png)"));
    assert_eq!(notes.matches("fullpage_2.png").count(), 1);
    assert!(ws.root.join("out/images/deck_fullpages/fullpage_1.png").is_file());
}

#[test]
fn zero_units_is_fatal() {
    let ws = workspace();
    let model = MockModel::new();
    let pipeline = pipeline(&ws, &model, 0);
    let options = ProcessOptions::new(&ws.input);

    let err = pipeline.try_process(&options).unwrap_err();
    assert!(matches!(err, NotesError::NoUnits { .. }));
    assert!(!pipeline.process(&options));
    assert!(!ws.root.join("out/deck_notes.md").exists());
    assert_eq!(model.calls(), 0);
}

#[test]
fn missing_and_unsupported_inputs_are_rejected() {
    let ws = workspace();
    let model = MockModel::new();
    let pipeline = pipeline(&ws, &model, 3);

    let missing = ProcessOptions::new(ws.root.join("nope.pptx"));
    assert!(matches!(
        pipeline.try_process(&missing).unwrap_err(),
        NotesError::FileNotFound { .. }
    ));

    let keynote = ws.root.join("talk.key");
    std::fs::write(&keynote, b"x").unwrap();
    assert!(matches!(
        pipeline.try_process(&ProcessOptions::new(keynote)).unwrap_err(),
        NotesError::UnsupportedFormat { .. }
    ));
}

#[test]
fn explicit_output_path_is_honoured() {
    let ws = workspace();
    let mut options = ProcessOptions::new(&ws.input);
    let target = ws.root.join("elsewhere/lecture.md");
    options.output = Some(target.clone());

    let outcome = pipeline(&ws, &MockModel::new(), 1).try_process(&options).unwrap();
    assert_eq!(outcome.output_path, target);
    let notes = std::fs::read_to_string(&target).unwrap();
    assert!(notes.starts_with("# Notes"));
    assert!(notes.ends_with('\n'));
}

#[test]
fn notes_written_without_summary_are_not_cached() {
    let ws = workspace();
    let mut options = ProcessOptions::new(&ws.input);
    options.mode = AnalysisMode::Visual;

    let flaky = MockModel::failing_on("Write a concise overview");
    let outcome = pipeline(&ws, &flaky, 2).try_process(&options).unwrap();
    // One batch, the failed summary, notes.
    assert_eq!(flaky.calls(), 3);
    assert!(outcome.is_complete());
    let notes_stage = StageKey::notes(AnalysisMode::Visual, Default::default());
    assert!(!store(&ws).has(&ws.input, &notes_stage, "mock"));

    let healthy = MockModel::new();
    let outcome = pipeline(&ws, &healthy, 2).try_process(&options).unwrap();
    // Summary and notes; pages come from the cache.
    assert_eq!(healthy.calls(), 2);
    assert_eq!(outcome.cached_units, 2);
    assert!(!outcome.notes_cached);

    let again = MockModel::new();
    let outcome = pipeline(&ws, &again, 2).try_process(&options).unwrap();
    assert_eq!(again.calls(), 0);
    assert!(outcome.notes_cached);
}

#[test]
fn cached_notes_skip_the_summary_call() {
    let ws = workspace();
    let mut options = ProcessOptions::new(&ws.input);
    options.mode = AnalysisMode::Visual;
    pipeline(&ws, &MockModel::new(), 2).try_process(&options).unwrap();

    let filter = CacheFilter::for_file(&ws.input).stage(StageKey::VISUAL_SUMMARY.as_str());
    assert_eq!(store(&ws).invalidate(&filter), 1);

    let model = MockModel::new();
    let outcome = pipeline(&ws, &model, 2).try_process(&options).unwrap();
    assert_eq!(model.calls(), 0);
    assert!(outcome.notes_cached);
}

#[test]
fn model_option_must_match_the_analysis_model() {
    let ws = workspace();
    let model = MockModel::new();
    let pipeline = pipeline(&ws, &model, 2);

    let mut options = ProcessOptions::new(&ws.input);
    options.mode = AnalysisMode::Visual;
    options.model = Some("other-model".into());
    let err = pipeline.try_process(&options).unwrap_err();
    assert!(matches!(err, NotesError::InvalidConfig(_)), "got: {err}");
    assert!(err.to_string().contains("other-model"));
    assert_eq!(model.calls(), 0);
    assert!(!store(&ws).has(&ws.input, &StageKey::VISUAL_ANALYZE, "other-model"));

    options.model = Some("mock".into());
    let outcome = pipeline.try_process(&options).unwrap();
    assert!(outcome.is_complete());
    assert!(store(&ws).has(&ws.input, &StageKey::VISUAL_ANALYZE, "mock"));
}
