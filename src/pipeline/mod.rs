//! Pipeline stages for deck-to-notes processing.
//!
//! Each submodule implements one step. Stages only talk through [`Unit`]s, so
//! parsing and rasterisation can be swapped (or mocked) without touching the
//! analysis or placement logic.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌──────────── cache (side channel) ────────────┐
//!            │                                               │
//! rasterize ─┴─▶ parse ──▶ analyze ──▶ summarize ──▶ notes ──▶ placement
//! (pdfium)      (text/xml)  (LLM/VLM)   (vl only)   (LLM)     (VLM scoring)
//! ```
//!
//! 1. [`rasterize`]: render pages to PNG; required in visual mode, only run
//!    in text mode when images were requested
//! 2. [`parse`]: extract per-unit text (pdfium for PDF, [`pptx`] for decks)
//! 3. [`analyze`]: per-unit (or batched) model analysis with merge-on-write
//! 4. [`summarize`]: whole-document summary and notes generation
//! 5. [`postprocess`]: deterministic cleanup of the generated Markdown
//! 6. [`placement`]: score extracted images and insert the relevant ones

pub mod analyze;
pub mod encode;
pub mod office;
pub mod parse;
pub mod placement;
pub mod postprocess;
pub mod pptx;
pub mod rasterize;
pub mod summarize;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One page (PDF) or slide (deck).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unit {
    /// 0-based position in the source. Stable across runs; the merge key.
    pub index: usize,
    /// May be empty; see [`Unit::display_title`].
    pub title: String,
    pub content: Vec<String>,
    pub embedded_image_count: usize,
    pub analysis: Option<String>,
    /// Extracted images awaiting relevance scoring.
    pub images: Vec<ImageDescriptor>,
    pub full_page_image: Option<ImageDescriptor>,
    /// Rasterised page used by visual analysis. Transient.
    pub page_image: Option<PathBuf>,
}

impl Unit {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            ..Self::default()
        }
    }

    /// 1-based number used in prompts, headings and file names.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// Title, or `Unit N` when the source had none.
    pub fn display_title(&self) -> String {
        let title = self.title.trim();
        if title.is_empty() {
            format!("Unit {}", self.number())
        } else {
            title.to_string()
        }
    }

    /// Content blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

/// An image extracted from (or rendered for) one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the notes file, used in Markdown links.
    pub relative_path: String,
    pub unit_index: usize,
    /// In `[0, 1]`; assigned during placement.
    pub relevance: Option<f32>,
}

impl ImageDescriptor {
    pub fn new(path: impl Into<PathBuf>, relative_path: impl Into<String>, unit_index: usize) -> Self {
        Self {
            path: path.into(),
            relative_path: relative_path.into(),
            unit_index,
            relevance: None,
        }
    }
}

/// Destination for images written next to the notes file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSink {
    pub dir: PathBuf,
    /// Prefix of Markdown links, e.g. `images/lecture1`.
    pub relative_prefix: String,
}

impl ImageSink {
    pub fn new(dir: impl Into<PathBuf>, relative_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            relative_prefix: relative_prefix.into(),
        }
    }

    /// Absolute path and descriptor for `file_name` inside the sink.
    pub fn descriptor(&self, file_name: &str, unit_index: usize) -> ImageDescriptor {
        ImageDescriptor::new(
            self.dir.join(file_name),
            format!("{}/{}", self.relative_prefix.trim_end_matches('/'), file_name),
            unit_index,
        )
    }
}

/// Pipeline states, in order. Each needs the complete output of the previous
/// one, whether computed or loaded from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Rasterized,
    UnitsAnalyzed,
    Summarized,
    Assembled,
    ImagesEmbedded,
}

impl PipelineStage {
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Rasterized => "rasterize",
            PipelineStage::UnitsAnalyzed => "analyze",
            PipelineStage::Summarized => "summarize",
            PipelineStage::Assembled => "assemble notes",
            PipelineStage::ImagesEmbedded => "embed images",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_title_falls_back_to_number() {
        assert_eq!(Unit::new(4, "  ").display_title(), "Unit 5");
        assert_eq!(Unit::new(0, "Intro").display_title(), "Intro");
    }

    #[test]
    fn stages_are_ordered() {
        assert!(PipelineStage::Rasterized < PipelineStage::UnitsAnalyzed);
        assert!(PipelineStage::Assembled < PipelineStage::ImagesEmbedded);
    }
}
