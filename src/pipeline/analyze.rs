//! Per-unit analysis with merge-on-write resume.
//!
//! Both modes follow the same cycle:
//!
//! 1. reload the stored [`PartialResultSet`] and attach every cached analysis
//!    to its unit (no request is sent for those);
//! 2. analyse the remaining units one by one (text) or in batches (visual);
//! 3. after each unit or batch, [`persist_merge`] the new records.
//!
//! A failed request never aborts the run: the affected units get the
//! [`ANALYSIS_FAILED`] sentinel, which is not persisted, so the next run
//! retries exactly those units.

use super::encode::encode_file;
use super::Unit;
use crate::cache::merge::{persist_merge, PartialResultSet, UnitAnalysis};
use crate::cache::{CacheStore, StageKey};
use crate::config::AnalysisMode;
use crate::error::ModelError;
use crate::model::{complete_text, EncodedImage, LanguageModel, ModelRequest};
use crate::progress::ProgressCallback;
use crate::prompts;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info, warn};

/// Analysis text of a unit whose request failed.
pub const ANALYSIS_FAILED: &str = "analysis failed";

/// Analysis text of a batch member with an empty section.
pub const MISSING_SECTION: &str = "(no analysis could be extracted for this page)";

/// Whether an analysis is the failure sentinel.
pub fn is_failed(analysis: &str) -> bool {
    analysis == ANALYSIS_FAILED
}

/// Everything an analysis pass needs besides the units.
pub struct AnalysisContext<'a> {
    pub store: &'a CacheStore,
    pub source: &'a Path,
    pub model: &'a dyn LanguageModel,
    pub progress: Option<&'a ProgressCallback>,
    /// Longest edge of page images sent in visual mode.
    pub image_edge: u32,
}

/// Outcome counts of one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub cached: usize,
    pub analysed: usize,
    /// Indices of units that received the sentinel.
    pub failed: Vec<usize>,
}

impl AnalysisReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Analyse units from their extracted text.
pub fn analyze_text(ctx: &AnalysisContext<'_>, units: &mut [Unit]) -> AnalysisReport {
    let stage = StageKey::analysis(AnalysisMode::Text);
    let total = units.len();
    let mut report = AnalysisReport::default();
    let pending = restore_cached(ctx, &stage, units, &mut report);
    info!(
        "Text analysis: {} cached, {} to analyse",
        report.cached,
        pending.len()
    );

    for pos in pending {
        let unit = &mut units[pos];
        notify(ctx, |cb| cb.on_unit_start(unit.number(), total));

        let mut content = unit.text();
        if unit.embedded_image_count > 0 {
            content.push_str(&format!(
                "\n[This slide contains {} images]",
                unit.embedded_image_count
            ));
        }
        let request = ModelRequest::new(prompts::unit_analysis_prompt(
            unit.number(),
            &unit.display_title(),
            &content,
        ))
        .system(prompts::ANALYSIS_SYSTEM_PROMPT);

        match complete_text(ctx.model, &request) {
            Ok(text) => {
                record_success(ctx, &stage, unit, text, total);
                report.analysed += 1;
            }
            Err(e) => record_failure(ctx, unit, &e, total, &mut report),
        }
    }
    report
}

/// Analyse rendered pages with a vision model, `batch_size` pages per request.
///
/// A batch of one uses the single-page prompt. Pages whose image cannot be
/// encoded fail individually and are dropped from their batch; a failed
/// batch request fails every page in it.
pub fn analyze_visual(ctx: &AnalysisContext<'_>, units: &mut [Unit], batch_size: usize) -> AnalysisReport {
    let stage = StageKey::analysis(AnalysisMode::Visual);
    let total = units.len();
    let mut report = AnalysisReport::default();
    let pending = restore_cached(ctx, &stage, units, &mut report);
    info!(
        "Visual analysis: {} cached, {} to analyse in batches of {}",
        report.cached,
        pending.len(),
        batch_size.max(1)
    );

    for chunk in pending.chunks(batch_size.max(1)) {
        let mut batch: Vec<(usize, EncodedImage)> = Vec::with_capacity(chunk.len());
        for &pos in chunk {
            let unit = &mut units[pos];
            notify(ctx, |cb| cb.on_unit_start(unit.number(), total));
            match encode_page(unit, ctx.image_edge) {
                Ok(image) => batch.push((pos, image)),
                Err(e) => record_failure(ctx, unit, &e, total, &mut report),
            }
        }

        match batch.len() {
            0 => {}
            1 => {
                let (pos, image) = batch.remove(0);
                let unit = &mut units[pos];
                let request = ModelRequest::new(prompts::visual_page_prompt(
                    unit.number(),
                    &unit.display_title(),
                    &unit.text(),
                ))
                .system(prompts::ANALYSIS_SYSTEM_PROMPT)
                .image(image);
                match complete_text(ctx.model, &request) {
                    Ok(text) => {
                        record_success(ctx, &stage, unit, text, total);
                        report.analysed += 1;
                    }
                    Err(e) => record_failure(ctx, unit, &e, total, &mut report),
                }
            }
            _ => analyze_batch(ctx, &stage, units, batch, total, &mut report),
        }
    }
    report
}

fn analyze_batch(
    ctx: &AnalysisContext<'_>,
    stage: &StageKey,
    units: &mut [Unit],
    batch: Vec<(usize, EncodedImage)>,
    total: usize,
    report: &mut AnalysisReport,
) {
    let positions: Vec<usize> = batch.iter().map(|(pos, _)| *pos).collect();
    let titles: Vec<String> = positions.iter().map(|&p| units[p].display_title()).collect();
    let listing: Vec<(usize, &str)> = positions
        .iter()
        .zip(&titles)
        .map(|(&p, t)| (units[p].number(), t.as_str()))
        .collect();
    let request = ModelRequest::new(prompts::visual_batch_prompt(&listing))
        .system(prompts::ANALYSIS_SYSTEM_PROMPT)
        .images(batch.into_iter().map(|(_, image)| image));

    match complete_text(ctx.model, &request) {
        Ok(response) => {
            let numbers: Vec<usize> = positions.iter().map(|&p| units[p].number()).collect();
            let sections = split_batch_response(&response, &numbers);
            let mut records = Vec::with_capacity(sections.len());
            for (&pos, section) in positions.iter().zip(sections) {
                records.push(UnitAnalysis::new(units[pos].index, section.clone()));
                units[pos].analysis = Some(section);
            }
            persist_merge(ctx.store, ctx.source, stage, ctx.model.model_name(), records);
            for &pos in &positions {
                notify(ctx, |cb| cb.on_unit_complete(units[pos].number(), total));
            }
            report.analysed += positions.len();
            debug!("Batch {:?} analysed", numbers);
        }
        Err(e) => {
            for pos in positions {
                record_failure(ctx, &mut units[pos], &e, total, report);
            }
        }
    }
}

/// Split a multi-page response into one section per expected page.
///
/// A page's section starts at its `Page N` / `Slide N` / `Unit N` marker
/// (optionally as a `#` heading or in `**bold**`) and ends at the nearest
/// marker of a later page. A page whose marker is missing gets the i-th of N equal
/// slices of the whole response instead. Empty sections become
/// [`MISSING_SECTION`].
pub fn split_batch_response(response: &str, numbers: &[usize]) -> Vec<String> {
    let n = numbers.len();
    if n == 0 {
        return Vec::new();
    }
    let chunks = equal_chunks(response, n);

    numbers
        .iter()
        .enumerate()
        .map(|(i, &number)| {
            let section = match find_marker(response, number, 0) {
                Some(start) => {
                    let end = numbers[i + 1..]
                        .iter()
                        .filter_map(|&later| find_marker(response, later, start + 1))
                        .min()
                        .unwrap_or(response.len());
                    &response[start..end]
                }
                None => chunks[i],
            };
            let section = section.trim();
            if section.is_empty() {
                MISSING_SECTION.to_string()
            } else {
                section.to_string()
            }
        })
        .collect()
}

/// Byte offset of the first marker for `number` at or after `from`.
fn find_marker(text: &str, number: usize, from: usize) -> Option<usize> {
    let pattern = format!(r"(?i)(?:#+[ \t]*|\*\*)?\b(?:page|slide|unit)\s*{number}\b");
    let re = Regex::new(&pattern).ok()?;
    let from = (from..=text.len()).find(|&i| text.is_char_boundary(i))?;
    re.find_at(text, from).map(|m| m.start())
}

/// `n` contiguous slices of roughly equal length whose concatenation is
/// `text`. Boundaries are moved forward to the next char boundary.
pub fn equal_chunks(text: &str, n: usize) -> Vec<&str> {
    if n == 0 {
        return Vec::new();
    }
    let len = text.len();
    let step = len / n;
    let mut bounds = Vec::with_capacity(n + 1);
    bounds.push(0);
    for i in 1..n {
        let mut b = (i * step).max(bounds[i - 1]);
        while b < len && !text.is_char_boundary(b) {
            b += 1;
        }
        bounds.push(b);
    }
    bounds.push(len);
    bounds.windows(2).map(|w| &text[w[0]..w[1]]).collect()
}

// ── Shared steps ─────────────────────────────────────────────────────────

/// Attach cached analyses; return positions of units still to analyse.
fn restore_cached(
    ctx: &AnalysisContext<'_>,
    stage: &StageKey,
    units: &mut [Unit],
    report: &mut AnalysisReport,
) -> Vec<usize> {
    let cached = PartialResultSet::load(ctx.store, ctx.source, stage, ctx.model.model_name());
    let total = units.len();
    let mut pending = Vec::new();
    for (pos, unit) in units.iter_mut().enumerate() {
        match cached.get(unit.index) {
            Some(text) if !is_failed(text) => {
                unit.analysis = Some(text.to_string());
                report.cached += 1;
                notify(ctx, |cb| cb.on_unit_cached(unit.number(), total));
            }
            _ => pending.push(pos),
        }
    }
    pending
}

fn encode_page(unit: &Unit, edge: u32) -> Result<EncodedImage, ModelError> {
    let path = unit.page_image.as_deref().ok_or_else(|| ModelError::ImageEncoding {
        path: Default::default(),
        detail: format!("unit {} has no rendered page", unit.number()),
    })?;
    encode_file(path, Some(edge))
}

fn record_success(ctx: &AnalysisContext<'_>, stage: &StageKey, unit: &mut Unit, text: String, total: usize) {
    persist_merge(
        ctx.store,
        ctx.source,
        stage,
        ctx.model.model_name(),
        [UnitAnalysis::new(unit.index, text.clone())],
    );
    unit.analysis = Some(text);
    notify(ctx, |cb| cb.on_unit_complete(unit.number(), total));
}

fn record_failure(
    ctx: &AnalysisContext<'_>,
    unit: &mut Unit,
    error: &ModelError,
    total: usize,
    report: &mut AnalysisReport,
) {
    warn!("Unit {}: {}", unit.number(), error);
    unit.analysis = Some(ANALYSIS_FAILED.to_string());
    report.failed.push(unit.index);
    notify(ctx, |cb| cb.on_unit_error(unit.number(), total, &error.to_string()));
}

fn notify(ctx: &AnalysisContext<'_>, f: impl FnOnce(&ProgressCallback)) {
    if let Some(cb) = ctx.progress {
        f(cb);
    }
}
