//! Document summary (visual mode) and notes generation.
//!
//! Both stages are whole-document: they run once per file and cache a single
//! string. They only cache when every unit was analysed, so a run with
//! failed units does not freeze notes written around the failure sentinel.

use super::analyze::is_failed;
use super::Unit;
use crate::cache::{CacheStore, StageKey};
use crate::config::{AnalysisMode, NoteStyle};
use crate::error::ModelError;
use crate::model::{complete_text, LanguageModel, ModelRequest};
use crate::prompts::{self, NotesPromptInput};
use std::path::Path;
use tracing::{debug, info, warn};

/// Title used when the first unit has none.
pub const DEFAULT_TITLE: &str = "Lecture Notes";

/// Shared inputs of the whole-document stages.
pub struct StageContext<'a> {
    pub store: &'a CacheStore,
    pub source: &'a Path,
    pub model: &'a dyn LanguageModel,
    /// Whether results may be cached (every unit analysed successfully).
    pub cacheable: bool,
}

/// Title of the document: the first unit's title, or [`DEFAULT_TITLE`].
pub fn document_title(units: &[Unit]) -> String {
    units
        .first()
        .map(|u| u.title.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string()
}

/// `--- Unit N: Title ---` blocks in unit order.
pub fn format_analyses(units: &[Unit]) -> String {
    let mut out = String::new();
    for unit in units {
        out.push_str(&format!("--- Unit {}: {} ---\n", unit.number(), unit.display_title()));
        out.push_str(unit.analysis.as_deref().unwrap_or_default());
        out.push_str("\n\n");
    }
    out
}

/// Whole-document summary from the per-page analyses.
///
/// Failed pages are left out of the prompt. Returns `None` when the request
/// fails; the notes are then written without a summary.
pub fn summarize(ctx: &StageContext<'_>, units: &[Unit]) -> Option<String> {
    let stage = StageKey::VISUAL_SUMMARY;
    let model_name = ctx.model.model_name();
    if let Some(summary) = ctx.store.load_as::<String>(ctx.source, &stage, model_name) {
        debug!("Summary restored from cache");
        return Some(summary);
    }

    let analyses = units
        .iter()
        .filter_map(|u| {
            let text = u.analysis.as_deref().filter(|a| !is_failed(a))?;
            Some(format!("Page {}: {}", u.number(), text))
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let request = ModelRequest::new(prompts::summary_prompt(&document_title(units), units.len(), &analyses));

    match complete_text(ctx.model, &request) {
        Ok(summary) => {
            if ctx.cacheable {
                ctx.store.save_as(ctx.source, &stage, model_name, &summary);
            }
            info!("Summary generated ({} chars)", summary.len());
            Some(summary)
        }
        Err(e) => {
            warn!("Summary failed, continuing without it: {e}");
            None
        }
    }
}

/// Settings of the notes call.
#[derive(Debug, Clone, Copy)]
pub struct NotesRequest<'a> {
    pub mode: AnalysisMode,
    pub style: NoteStyle,
    pub language: &'a str,
    pub summary: Option<&'a str>,
    pub full_pages: bool,
}

/// Raw notes from the model, cached under `notes_{mode}_{style}`.
///
/// Returns the text and whether it came from the cache.
pub fn generate_notes(
    ctx: &StageContext<'_>,
    units: &[Unit],
    request: &NotesRequest<'_>,
) -> Result<(String, bool), ModelError> {
    let stage = StageKey::notes(request.mode, request.style);
    let model_name = ctx.model.model_name();
    if let Some(notes) = ctx.store.load_as::<String>(ctx.source, &stage, model_name) {
        debug!(stage = %stage, "Notes restored from cache");
        return Ok((notes, true));
    }

    let title = document_title(units);
    let analyses = format_analyses(units);
    let prompt = prompts::notes_prompt(&NotesPromptInput {
        title: &title,
        style: request.style,
        language: request.language,
        analyses: &analyses,
        summary: request.summary,
        full_pages: request.full_pages,
    });
    let notes = complete_text(
        ctx.model,
        &ModelRequest::new(prompt).system(prompts::NOTES_SYSTEM_PROMPT),
    )?;

    if ctx.cacheable {
        ctx.store.save_as(ctx.source, &stage, model_name, &notes);
    } else {
        info!("Some units failed; notes are not cached");
    }
    Ok((notes, false))
}

/// `## Unit Notes` appendix: one `### N. Title` section per unit.
pub fn unit_sections(units: &[Unit]) -> String {
    let mut out = String::from("## Unit Notes\n");
    for unit in units {
        out.push_str(&format!("\n### {}. {}\n\n", unit.number(), unit.display_title()));
        out.push_str(unit.analysis.as_deref().unwrap_or_default().trim());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analyze::ANALYSIS_FAILED;
    use crate::model::ModelReply;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Echo {
        calls: AtomicUsize,
        last_prompt: Mutex<String>,
        fail: bool,
    }

    impl Echo {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(String::new()),
                fail,
            }
        }
    }

    impl LanguageModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = request.prompt.clone();
            if self.fail {
                return Err(ModelError::EmptyResponse { model: "echo".into() });
            }
            Ok(ModelReply::Text("# Generated".into()))
        }
    }

    fn units() -> Vec<Unit> {
        let mut a = Unit::new(0, "Kinematics");
        a.analysis = Some("position and velocity".into());
        let mut b = Unit::new(1, "");
        b.analysis = Some(ANALYSIS_FAILED.into());
        vec![a, b]
    }

    fn fixture() -> (tempfile::TempDir, CacheStore, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("deck.pdf");
        std::fs::write(&source, b"%PDF").unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        (dir, store, source)
    }

    const REQUEST: NotesRequest<'static> = NotesRequest {
        mode: AnalysisMode::Text,
        style: NoteStyle::Detailed,
        language: "English",
        summary: None,
        full_pages: false,
    };

    #[test]
    fn title_falls_back() {
        assert_eq!(document_title(&units()), "Kinematics");
        assert_eq!(document_title(&[Unit::new(0, " ")]), DEFAULT_TITLE);
        assert_eq!(document_title(&[]), DEFAULT_TITLE);
    }

    #[test]
    fn analyses_are_framed_per_unit() {
        let text = format_analyses(&units());
        assert!(text.starts_with("--- Unit 1: Kinematics ---\nposition and velocity"));
        assert!(text.contains("--- Unit 2: Unit 2 ---"));
    }

    #[test]
    fn appendix_lists_units_in_order() {
        let text = unit_sections(&units());
        let first = text.find("### 1. Kinematics").unwrap();
        let second = text.find("### 2. Unit 2").unwrap();
        assert!(text.starts_with("## Unit Notes"));
        assert!(first < second);
    }

    #[test]
    fn summary_skips_failed_pages() {
        let (_dir, store, source) = fixture();
        let model = Echo::new(false);
        let ctx = StageContext {
            store: &store,
            source: &source,
            model: &model,
            cacheable: true,
        };
        assert!(summarize(&ctx, &units()).is_some());
        let prompt = model.last_prompt.lock().unwrap().clone();
        assert!(prompt.contains("Page 1: position and velocity"));
        assert!(!prompt.contains(ANALYSIS_FAILED));

        summarize(&ctx, &units());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_summary_is_none() {
        let (_dir, store, source) = fixture();
        let model = Echo::new(true);
        let ctx = StageContext {
            store: &store,
            source: &source,
            model: &model,
            cacheable: true,
        };
        assert!(summarize(&ctx, &units()).is_none());
        assert!(!store.has(&source, &StageKey::VISUAL_SUMMARY, "echo"));
    }

    #[test]
    fn notes_are_cached_only_when_complete() {
        let (_dir, store, source) = fixture();
        let model = Echo::new(false);
        let mut ctx = StageContext {
            store: &store,
            source: &source,
            model: &model,
            cacheable: false,
        };
        let (_, cached) = generate_notes(&ctx, &units(), &REQUEST).unwrap();
        assert!(!cached);
        let key = StageKey::notes(AnalysisMode::Text, NoteStyle::Detailed);
        assert!(!store.has(&source, &key, "echo"));

        ctx.cacheable = true;
        generate_notes(&ctx, &units(), &REQUEST).unwrap();
        let (notes, cached) = generate_notes(&ctx, &units(), &REQUEST).unwrap();
        assert!(cached);
        assert_eq!(notes, "# Generated");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
