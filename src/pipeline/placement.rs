//! Image relevance scoring and placement in the generated notes.
//!
//! Extracted images are mostly noise: logos, template backgrounds, bullet
//! glyphs. Each one is shown to the vision model together with its unit's
//! title and analysis, and only images scoring at or above
//! [`RELEVANCE_THRESHOLD`] are inserted into the notes.
//!
//! ## Where does an image go?
//!
//! The notes are free-form Markdown written by a model, so there is no fixed
//! anchor per unit. [`find_insertion_line`] picks a line from the headings:
//!
//! 1. a heading containing the unit title, or naming `Page/Slide/Unit N`
//! 2. the N-th heading for the N-th unit
//! 3. a few lines below the first heading
//! 4. the top of the document
//!
//! A match inserts right before the following heading, or
//! [`LINES_AFTER_LAST_HEADING`] lines below the match when it is the last one.

use super::encode::encode_file;
use super::postprocess::is_fence;
use super::{ImageDescriptor, Unit};
use crate::cache::{CacheStore, StageKey};
use crate::model::{complete_text, LanguageModel, ModelRequest};
use crate::progress::ProgressCallback;
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Minimum score for an image to be inserted (inclusive).
pub const RELEVANCE_THRESHOLD: f32 = 0.6;

/// Score used when the model's answer has no readable `Relevance:` line.
pub const UNPARSED_SCORE: f32 = 0.5;

/// Score used when the image could not be sent or the request failed.
/// Below the threshold, and never cached.
pub const FAILED_SCORE: f32 = 0.1;

pub const DEFAULT_CAPTION: &str = "Figure";

pub const MAX_CAPTION_CHARS: usize = 25;

pub const LINES_AFTER_LAST_HEADING: usize = 3;

const ANALYSIS_EXCERPT_CHARS: usize = 1000;

static RE_RELEVANCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)relevance\s*[:：]\s*\**\s*([0-9]*\.?[0-9]+)").unwrap());

static RE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:caption|description)\s*[:：]\s*([^\n]+)").unwrap());

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

// ── Verdicts ─────────────────────────────────────────────────────────────

/// The model's judgement of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub relevance: f32,
    pub caption: String,
}

impl Verdict {
    pub fn is_relevant(&self) -> bool {
        is_relevant(self.relevance)
    }
}

pub fn is_relevant(score: f32) -> bool {
    score >= RELEVANCE_THRESHOLD
}

/// Read `Relevance: <0..1>` and `Caption: <text>` from a model answer.
///
/// Scores are clamped to `[0, 1]`. A missing or unreadable score gives
/// [`UNPARSED_SCORE`]; a missing caption gives [`DEFAULT_CAPTION`].
pub fn parse_relevance(response: &str) -> Verdict {
    let relevance = RE_RELEVANCE
        .captures(response)
        .and_then(|c| c[1].parse::<f32>().ok())
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 1.0))
        .unwrap_or(UNPARSED_SCORE);

    let caption = RE_CAPTION
        .captures(response)
        .map(|c| c[1].trim().trim_matches(|ch| ch == '*' || ch == '"').trim().to_string())
        .filter(|c| !c.is_empty())
        .map(|c| truncate_caption(&c))
        .unwrap_or_else(|| DEFAULT_CAPTION.to_string());

    Verdict { relevance, caption }
}

fn truncate_caption(caption: &str) -> String {
    if caption.chars().count() <= MAX_CAPTION_CHARS {
        caption.to_string()
    } else {
        let cut: String = caption.chars().take(MAX_CAPTION_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────

/// Everything a scoring pass needs besides the units.
pub struct ScoringContext<'a> {
    pub store: &'a CacheStore,
    pub source: &'a Path,
    pub model: &'a dyn LanguageModel,
    pub progress: Option<&'a ProgressCallback>,
    /// Longest edge of images sent for scoring.
    pub image_edge: u32,
    pub max_tokens: usize,
}

/// An image accepted for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub unit_index: usize,
    pub relative_path: String,
    pub caption: String,
}

impl PlacedImage {
    pub fn markdown(&self) -> String {
        format!("![{}]({})", self.caption, self.relative_path)
    }
}

/// Score every extracted image of every unit and return the accepted ones in
/// unit order.
///
/// Verdicts are cached per relative path; only images without a stored
/// verdict are sent to the model. Each image's `relevance` is filled in.
pub fn score_images(ctx: &ScoringContext<'_>, units: &mut [Unit]) -> Vec<PlacedImage> {
    let model_name = ctx.model.model_name();
    let mut verdicts: BTreeMap<String, Verdict> = ctx
        .store
        .load_as(ctx.source, &StageKey::IMAGE_RELEVANCE, model_name)
        .unwrap_or_default();
    let mut fresh = 0usize;
    let total = units.len();
    let mut placed = Vec::new();

    for unit in units.iter_mut() {
        if unit.images.is_empty() {
            continue;
        }
        if let Some(cb) = ctx.progress {
            cb.on_unit_start(unit.number(), total);
        }
        let title = unit.display_title();
        let excerpt: String = unit
            .analysis
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(ANALYSIS_EXCERPT_CHARS)
            .collect();

        for image in unit.images.iter_mut() {
            let verdict = match verdicts.get(&image.relative_path) {
                Some(v) => {
                    debug!("Image {}: cached verdict {:.2}", image.relative_path, v.relevance);
                    v.clone()
                }
                None => match ask_model(ctx, image, &title, &excerpt) {
                    Some(v) => {
                        verdicts.insert(image.relative_path.clone(), v.clone());
                        fresh += 1;
                        v
                    }
                    None => Verdict {
                        relevance: FAILED_SCORE,
                        caption: DEFAULT_CAPTION.to_string(),
                    },
                },
            };
            image.relevance = Some(verdict.relevance);
            if verdict.is_relevant() {
                placed.push(PlacedImage {
                    unit_index: unit.index,
                    relative_path: image.relative_path.clone(),
                    caption: verdict.caption,
                });
            }
        }
        if let Some(cb) = ctx.progress {
            cb.on_unit_complete(unit.number(), total);
        }
    }

    if fresh > 0 {
        ctx.store
            .save_as(ctx.source, &StageKey::IMAGE_RELEVANCE, model_name, &verdicts);
    }
    info!("Image scoring: {} accepted, {} newly scored", placed.len(), fresh);
    placed
}

fn ask_model(ctx: &ScoringContext<'_>, image: &ImageDescriptor, title: &str, excerpt: &str) -> Option<Verdict> {
    let encoded = match encode_file(&image.path, Some(ctx.image_edge)) {
        Ok(e) => e,
        Err(e) => {
            warn!("Image {}: {e}", image.relative_path);
            return None;
        }
    };
    let request = ModelRequest::new(prompts::relevance_prompt(title, excerpt))
        .image(encoded)
        .max_tokens(ctx.max_tokens);
    match complete_text(ctx.model, &request) {
        Ok(answer) => Some(parse_relevance(&answer)),
        Err(e) => {
            warn!("Image {}: relevance request failed: {e}", image.relative_path);
            None
        }
    }
}

/// Full-page images are always placed, captioned `Full page N`.
///
/// Pages already linked in the notes (through an expanded placeholder) are
/// skipped.
pub fn full_page_placements(units: &[Unit], markdown: &str) -> Vec<PlacedImage> {
    units
        .iter()
        .filter_map(|unit| {
            let image = unit.full_page_image.as_ref()?;
            if markdown.contains(&format!("]({})", image.relative_path)) {
                return None;
            }
            Some(PlacedImage {
                unit_index: unit.index,
                relative_path: image.relative_path.clone(),
                caption: format!("Full page {}", unit.number()),
            })
        })
        .collect()
}

// ── Placement ────────────────────────────────────────────────────────────

/// A Markdown heading and its 0-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub line: usize,
    pub level: usize,
    pub text: String,
}

/// Headings outside fenced code blocks.
pub fn headings(markdown: &str) -> Vec<Heading> {
    let mut in_code = false;
    markdown
        .lines()
        .enumerate()
        .filter_map(|(line, text)| {
            if is_fence(text) {
                in_code = !in_code;
                return None;
            }
            if in_code {
                return None;
            }
            let caps = RE_HEADING.captures(text)?;
            Some(Heading {
                line,
                level: caps[1].len(),
                text: caps[2].trim().to_string(),
            })
        })
        .collect()
}

fn names_unit(heading: &str, number: usize) -> bool {
    let pattern = format!(r"(?i)\b(?:page|slide|unit)\s*{number}\b");
    Regex::new(&pattern).map(|re| re.is_match(heading)).unwrap_or(false)
}

/// Line before which an image of unit `number` (1-based) titled `title` is
/// inserted.
pub fn find_insertion_line(headings: &[Heading], line_count: usize, number: usize, title: &str) -> usize {
    let after = |k: usize| match headings.get(k + 1) {
        Some(next) => next.line,
        None => (headings[k].line + LINES_AFTER_LAST_HEADING).min(line_count),
    };

    let title = title.trim().to_lowercase();
    let matched = headings.iter().position(|h| {
        (!title.is_empty() && h.text.to_lowercase().contains(&title)) || names_unit(&h.text, number)
    });
    if let Some(k) = matched {
        return after(k);
    }
    if number >= 1 && number <= headings.len() {
        return after(number - 1);
    }
    match headings.first() {
        Some(first) => (first.line + LINES_AFTER_LAST_HEADING).min(line_count),
        None => 0,
    }
}

/// Insert each `(line, markdown)` snippet before its line.
///
/// Snippets are applied in line order (stable for equal lines); a line that
/// is already taken pushes the snippet one line further down. Line numbers
/// refer to the original document, so a running offset accounts for the
/// snippets already inserted.
pub fn insert_at_lines(markdown: &str, mut snippets: Vec<(usize, String)>) -> String {
    if snippets.is_empty() {
        return markdown.to_string();
    }
    let mut lines: Vec<String> = markdown.lines().map(str::to_string).collect();
    snippets.sort_by_key(|(line, _)| *line);

    let mut used = HashSet::new();
    let mut offset = 0usize;
    for (line, snippet) in snippets {
        let mut pos = line;
        while used.contains(&pos) {
            pos += 1;
        }
        used.insert(pos);
        let at = (pos + offset).min(lines.len());
        lines.insert(at, format!("\n{snippet}\n"));
        offset += 1;
    }

    let mut out = lines.join("\n");
    if markdown.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Insert accepted images into the notes next to their units' headings.
pub fn embed_images(markdown: &str, units: &[Unit], images: &[PlacedImage]) -> String {
    let found = headings(markdown);
    let line_count = markdown.lines().count();
    let snippets = images
        .iter()
        .map(|image| {
            let (number, title) = units
                .iter()
                .find(|u| u.index == image.unit_index)
                .map(|u| (u.number(), u.title.clone()))
                .unwrap_or((image.unit_index + 1, String::new()));
            let line = find_insertion_line(&found, line_count, number, &title);
            (line, image.markdown())
        })
        .collect();
    insert_at_lines(markdown, snippets)
}
