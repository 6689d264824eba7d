//! End-to-end processing of one deck or PDF into a notes file.
//!
//! ## Stage order
//!
//! ```text
//! rasterize → parse → analyze → summarize (vl) → notes → images → write
//! ```
//!
//! Each stage consumes the complete output of the one before it, computed or
//! restored from the cache. Failures inside a stage (one unit, one image)
//! become sentinels and the run continues; failures that leave nothing to
//! work with (no units, output not writable) end the run with a
//! [`NotesError`].

use crate::cache::{CacheStore, StageKey};
use crate::config::{AnalysisMode, NotesConfig, ProcessOptions};
use crate::error::NotesError;
use crate::model::{EdgequakeModel, LanguageModel};
use crate::pipeline::analyze::{self, AnalysisContext, AnalysisReport};
use crate::pipeline::parse::{DeckParser, DocumentKind, DocumentParser};
use crate::pipeline::placement::{self, ScoringContext};
use crate::pipeline::postprocess::{self, FullPageLinks};
use crate::pipeline::rasterize::{PdfiumRasterizer, RasterPage, RasterTarget, Rasterizer};
use crate::pipeline::summarize::{self, NotesRequest, StageContext};
use crate::pipeline::{ImageDescriptor, ImageSink, PipelineStage, Unit};
use crate::progress::ProgressCallback;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct NotesOutcome {
    pub output_path: PathBuf,
    pub title: String,
    pub total_units: usize,
    /// Units restored from the cache.
    pub cached_units: usize,
    /// Units analysed in this run.
    pub analysed_units: usize,
    /// Indices of units left with the failure sentinel.
    pub failed_units: Vec<usize>,
    /// Whether the notes text itself came from the cache.
    pub notes_cached: bool,
    pub images_embedded: usize,
    pub duration_ms: u64,
}

impl NotesOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_units.is_empty()
    }
}

/// The configured pipeline: models, parser, rasteriser and cache settings.
pub struct NotesPipeline {
    config: NotesConfig,
    text_model: Arc<dyn LanguageModel>,
    vision_model: Arc<dyn LanguageModel>,
    parser: Box<dyn DocumentParser>,
    rasterizer: Box<dyn Rasterizer>,
}

impl NotesPipeline {
    /// Pipeline over the given models with the default parser and rasteriser.
    pub fn new(
        config: NotesConfig,
        text_model: Arc<dyn LanguageModel>,
        vision_model: Arc<dyn LanguageModel>,
    ) -> Self {
        let rasterizer = PdfiumRasterizer::from_config(&config);
        Self {
            config,
            text_model,
            vision_model,
            parser: Box::new(DeckParser),
            rasterizer: Box::new(rasterizer),
        }
    }

    /// Pipeline with `edgequake-llm` models resolved from `config` and the
    /// environment. Apply a per-run model with
    /// [`ProcessOptions::apply_model_override`] first.
    pub fn from_config(config: NotesConfig) -> Result<Self, NotesError> {
        let runtime = EdgequakeModel::runtime()?;
        let text = EdgequakeModel::text_from_config(&config, Arc::clone(&runtime))?;
        let vision = EdgequakeModel::vision_from_config(&config, runtime)?;
        info!(
            "Models: text={}, vision={}",
            text.model_name(),
            vision.model_name()
        );
        Ok(Self::new(config, Arc::new(text), Arc::new(vision)))
    }

    pub fn with_parser(mut self, parser: impl DocumentParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: impl Rasterizer + 'static) -> Self {
        self.rasterizer = Box::new(rasterizer);
        self
    }

    pub fn config(&self) -> &NotesConfig {
        &self.config
    }

    /// Boolean form of [`try_process`](Self::try_process); errors are logged.
    pub fn process(&self, options: &ProcessOptions) -> bool {
        match self.try_process(options) {
            Ok(outcome) => {
                if !outcome.is_complete() {
                    warn!(
                        "{} unit(s) could not be analysed; re-run to retry them",
                        outcome.failed_units.len()
                    );
                }
                true
            }
            Err(e) => {
                error!("{}: {e}", options.input.display());
                false
            }
        }
    }

    /// Run every stage for one input and write the notes file.
    pub fn try_process(&self, options: &ProcessOptions) -> Result<NotesOutcome, NotesError> {
        let start = Instant::now();
        let input = options.input.as_path();
        if !input.is_file() {
            return Err(NotesError::FileNotFound {
                path: input.to_path_buf(),
            });
        }
        DocumentKind::from_path(input)?;
        self.check_model_override(options)?;

        let output_path = options
            .output
            .clone()
            .unwrap_or_else(|| self.config.default_output_for(input));
        let output_root = parent_or_cwd(&output_path).to_path_buf();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        info!(
            "Processing {} (mode={}, style={})",
            input.display(),
            options.mode,
            options.style
        );

        let cache_dir = self.config.cache_dir();
        let store = CacheStore::open(&cache_dir).map_err(|e| NotesError::CacheUnavailable {
            path: cache_dir.clone(),
            detail: e.to_string(),
        })?;
        let progress = self.config.progress_callback.as_ref();

        // ── Rasterize ────────────────────────────────────────────────────
        let scratch = tempfile::tempdir()
            .map_err(|e| NotesError::Internal(format!("Failed to create temp dir: {e}")))?;
        let pages = if options.mode == AnalysisMode::Visual || options.wants_images() {
            stage_start(progress, PipelineStage::Rasterized, 0);
            let target = RasterTarget {
                pages_dir: scratch.path().join("pages"),
                images: options.include_images.then(|| {
                    ImageSink::new(output_root.join("images").join(&stem), format!("images/{stem}"))
                }),
            };
            let pages = self.rasterizer.rasterize(input, &target)?;
            if pages.is_empty() {
                return Err(NotesError::NoUnits {
                    path: input.to_path_buf(),
                });
            }
            stage_complete(progress, PipelineStage::Rasterized);
            pages
        } else {
            Vec::new()
        };

        // ── Units ────────────────────────────────────────────────────────
        let mut units = match options.mode {
            AnalysisMode::Text => {
                let mut units = self.parser.parse(input)?;
                attach_pages(&mut units, pages);
                units
            }
            AnalysisMode::Visual => units_from_pages(pages),
        };
        if units.is_empty() {
            return Err(NotesError::NoUnits {
                path: input.to_path_buf(),
            });
        }
        if options.include_full_pages {
            let sink = ImageSink::new(
                output_root.join("images").join(format!("{stem}_fullpages")),
                format!("images/{stem}_fullpages"),
            );
            copy_full_pages(&mut units, &sink);
        }
        let total = units.len();

        // ── Analyze ──────────────────────────────────────────────────────
        stage_start(progress, PipelineStage::UnitsAnalyzed, total);
        let report = self.analyze(&store, input, options, &mut units);
        stage_complete(progress, PipelineStage::UnitsAnalyzed);
        info!(
            "Analysis: {} cached, {} analysed, {} failed",
            report.cached,
            report.analysed,
            report.failed.len()
        );

        let mut stage_ctx = StageContext {
            store: &store,
            source: input,
            model: self.text_model.as_ref(),
            cacheable: report.is_complete(),
        };
        let notes_stage = StageKey::notes(options.mode, options.style);
        let notes_ready = store
            .load_as::<String>(input, &notes_stage, stage_ctx.model.model_name())
            .is_some();

        // ── Summarize ────────────────────────────────────────────────────
        // Cached notes already carry the summary they were written with.
        let summary = if options.mode == AnalysisMode::Visual && !notes_ready {
            stage_start(progress, PipelineStage::Summarized, total);
            let summary = summarize::summarize(&stage_ctx, &units);
            stage_complete(progress, PipelineStage::Summarized);
            if summary.is_none() {
                stage_ctx.cacheable = false;
            }
            summary
        } else {
            None
        };

        // ── Assemble ─────────────────────────────────────────────────────
        stage_start(progress, PipelineStage::Assembled, total);
        let request = NotesRequest {
            mode: options.mode,
            style: options.style,
            language: &self.config.language,
            summary: summary.as_deref(),
            full_pages: options.include_full_pages,
        };
        let (raw, notes_cached) = summarize::generate_notes(&stage_ctx, &units, &request)
            .map_err(|source| NotesError::NotesGenerationFailed { source })?;
        let mut markdown = postprocess::clean_notes(&raw, &full_page_links(&units));
        if self.config.unit_sections {
            markdown.push('\n');
            markdown.push_str(&summarize::unit_sections(&units));
        }
        stage_complete(progress, PipelineStage::Assembled);

        // ── Images ───────────────────────────────────────────────────────
        let mut images_embedded = 0;
        if options.wants_images() {
            stage_start(progress, PipelineStage::ImagesEmbedded, total);
            let mut placed = if options.include_images {
                let ctx = ScoringContext {
                    store: &store,
                    source: input,
                    model: self.vision_model.as_ref(),
                    progress,
                    image_edge: self.config.relevance_image_edge,
                    max_tokens: self.config.relevance_max_tokens,
                };
                placement::score_images(&ctx, &mut units)
            } else {
                Vec::new()
            };
            placed.extend(placement::full_page_placements(&units, &markdown));
            images_embedded = placed.len();
            markdown = placement::embed_images(&markdown, &units, &placed);
            stage_complete(progress, PipelineStage::ImagesEmbedded);
        }

        write_atomic(&output_path, &markdown)?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Notes written to {} in {}ms",
            output_path.display(),
            duration_ms
        );

        Ok(NotesOutcome {
            output_path,
            title: summarize::document_title(&units),
            total_units: total,
            cached_units: report.cached,
            analysed_units: report.analysed,
            failed_units: report.failed,
            notes_cached,
            images_embedded,
            duration_ms,
        })
    }

    /// The model that reads units in `mode`: the one `options.model` names.
    fn analysis_model(&self, mode: AnalysisMode) -> &dyn LanguageModel {
        match mode {
            AnalysisMode::Text => self.text_model.as_ref(),
            AnalysisMode::Visual => self.vision_model.as_ref(),
        }
    }

    /// A pipeline's models are fixed at construction, so a per-run model
    /// must already be the one analysing units in this mode.
    fn check_model_override(&self, options: &ProcessOptions) -> Result<(), NotesError> {
        let Some(requested) = options.model.as_deref().filter(|m| !m.trim().is_empty()) else {
            return Ok(());
        };
        let active = self.analysis_model(options.mode).model_name();
        if requested == active {
            return Ok(());
        }
        Err(NotesError::InvalidConfig(format!(
            "model '{requested}' was requested for {} mode, but this pipeline uses '{active}'; \
             build it from ProcessOptions::apply_model_override(config)",
            options.mode
        )))
    }

    fn analyze(
        &self,
        store: &CacheStore,
        input: &Path,
        options: &ProcessOptions,
        units: &mut [Unit],
    ) -> AnalysisReport {
        let ctx = AnalysisContext {
            store,
            source: input,
            model: self.analysis_model(options.mode),
            progress: self.config.progress_callback.as_ref(),
            image_edge: self.config.max_rendered_pixels,
        };
        match options.mode {
            AnalysisMode::Text => analyze::analyze_text(&ctx, units),
            AnalysisMode::Visual => analyze::analyze_visual(&ctx, units, options.batch_size),
        }
    }
}

/// Process one file with models resolved from `config`.
///
/// Returns `false` (after logging the cause) when the file could not be
/// turned into notes.
pub fn process(options: &ProcessOptions, config: &NotesConfig) -> bool {
    match NotesPipeline::from_config(options.apply_model_override(config)) {
        Ok(pipeline) => pipeline.process(options),
        Err(e) => {
            error!("{e}");
            false
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn stage_start(progress: Option<&ProgressCallback>, stage: PipelineStage, total: usize) {
    debug!("Stage start: {stage}");
    if let Some(cb) = progress {
        cb.on_stage_start(stage, total);
    }
}

fn stage_complete(progress: Option<&ProgressCallback>, stage: PipelineStage) {
    if let Some(cb) = progress {
        cb.on_stage_complete(stage);
    }
}

fn parent_or_cwd(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Text mode: give parsed units their rendered page and extracted images.
fn attach_pages(units: &mut [Unit], pages: Vec<RasterPage>) {
    for page in pages {
        match units.iter_mut().find(|u| u.index == page.index) {
            Some(unit) => {
                unit.page_image = Some(page.image_path);
                unit.images = page.images;
            }
            None => debug!("Rendered page {} has no parsed unit", page.index + 1),
        }
    }
}

/// Visual mode: one unit per rendered page.
fn units_from_pages(pages: Vec<RasterPage>) -> Vec<Unit> {
    pages
        .into_iter()
        .map(|page| {
            let mut unit = Unit::new(page.index, page.title);
            if !page.text_hint.trim().is_empty() {
                unit.content.push(page.text_hint);
            }
            unit.embedded_image_count = page.images.len();
            unit.images = page.images;
            unit.page_image = Some(page.image_path);
            unit
        })
        .collect()
}

/// Copy rendered pages next to the notes as `fullpage_N.png`.
fn copy_full_pages(units: &mut [Unit], sink: &ImageSink) {
    if let Err(e) = std::fs::create_dir_all(&sink.dir) {
        warn!("Could not create '{}': {e}", sink.dir.display());
        return;
    }
    for unit in units.iter_mut() {
        let Some(page) = unit.page_image.as_deref() else {
            continue;
        };
        let descriptor: ImageDescriptor =
            sink.descriptor(&format!("fullpage_{}.png", unit.number()), unit.index);
        match std::fs::copy(page, &descriptor.path) {
            Ok(_) => unit.full_page_image = Some(descriptor),
            Err(e) => warn!("Unit {}: could not copy full page: {e}", unit.number()),
        }
    }
}

fn full_page_links(units: &[Unit]) -> FullPageLinks {
    units
        .iter()
        .filter_map(|u| {
            let image = u.full_page_image.as_ref()?;
            Some((u.index, image.relative_path.clone()))
        })
        .collect()
}

/// Write through a temp file in the destination directory, then rename.
fn write_atomic(path: &Path, contents: &str) -> Result<(), NotesError> {
    let failed = |source: std::io::Error| NotesError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = parent_or_cwd(path);
    std::fs::create_dir_all(dir).map_err(failed)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(failed)?;
    tmp.write_all(contents.as_bytes()).map_err(failed)?;
    tmp.persist(path).map_err(|e| failed(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, dir: &Path) -> RasterPage {
        let image_path = dir.join(format!("page_{}.png", index + 1));
        std::fs::write(&image_path, b"png").unwrap();
        RasterPage {
            index,
            title: format!("Page {}", index + 1),
            text_hint: "hint".into(),
            image_path,
            images: Vec::new(),
        }
    }

    #[test]
    fn visual_units_mirror_pages() {
        let dir = tempfile::tempdir().unwrap();
        let units = units_from_pages(vec![page(0, dir.path()), page(1, dir.path())]);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].title, "Page 2");
        assert_eq!(units[1].content, vec!["hint".to_string()]);
        assert!(units[0].page_image.is_some());
    }

    #[test]
    fn pages_attach_to_matching_units() {
        let dir = tempfile::tempdir().unwrap();
        let mut units = vec![Unit::new(0, "A"), Unit::new(1, "B")];
        attach_pages(&mut units, vec![page(1, dir.path()), page(5, dir.path())]);
        assert!(units[0].page_image.is_none());
        assert!(units[1].page_image.is_some());
    }

    #[test]
    fn full_pages_are_copied_with_stable_links() {
        let dir = tempfile::tempdir().unwrap();
        let mut units = units_from_pages(vec![page(0, dir.path())]);
        let sink = ImageSink::new(dir.path().join("images/deck_fullpages"), "images/deck_fullpages");
        copy_full_pages(&mut units, &sink);
        let image = units[0].full_page_image.as_ref().unwrap();
        assert_eq!(image.relative_path, "images/deck_fullpages/fullpage_1.png");
        assert!(image.path.is_file());
        assert_eq!(full_page_links(&units).get(&0).map(String::as_str), Some(image.relative_path.as_str()));
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/notes.md");
        write_atomic(&path, "# Notes\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Notes\n");
    }
}
