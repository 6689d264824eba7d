//! # deck2notes
//!
//! Turn slide decks (`.pptx`, `.ppt`) and PDFs into study notes written by a
//! language model, optionally illustrated with images taken from the source.
//!
//! ## Why this crate?
//!
//! Writing notes for a 60-slide lecture takes dozens of model calls. Calls
//! fail (rate limits, timeouts), processes get killed, and decks get edited
//! between runs. This crate makes that practical: every stage result is
//! cached under a fingerprint of the source file, its modification time, the
//! stage and the model, and per-unit analyses are merged into the cache after
//! every unit. A rerun after a crash or partial failure only sends the
//! requests that are still missing; a rerun on an unchanged file sends none.
//!
//! ## Pipeline Overview
//!
//! ```text
//! deck / PDF
//!  │
//!  ├─ 1. Rasterize  pages → PNG via pdfium (visual mode, or when images are wanted)
//!  ├─ 2. Parse      per-slide / per-page text
//!  ├─ 3. Analyze    one request per unit (text) or per batch of pages (vl)
//!  ├─ 4. Summarize  whole-document overview (vl only)
//!  ├─ 5. Notes      one request over all analyses, then cleanup
//!  ├─ 6. Images     relevance scoring + placement under matching headings
//!  └─ 7. Output     <output_dir>/<stem>_notes.md, written atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deck2notes::{process, AnalysisMode, NotesConfig, ProcessOptions};
//!
//! // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//! let config = NotesConfig::default();
//! let mut options = ProcessOptions::new("lecture1.pptx");
//! options.mode = AnalysisMode::Visual;
//! options.include_images = true;
//! assert!(process(&options, &config));
//! ```
//!
//! For custom models (or tests), build a [`NotesPipeline`] from any
//! [`LanguageModel`] implementations and call
//! [`NotesPipeline::try_process`] to get a [`NotesOutcome`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deck2notes` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! deck2notes = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! PDF rendering needs a pdfium shared library (see `PDFIUM_LIB_PATH`).
//! Rendering decks and reading legacy `.ppt` files needs LibreOffice
//! (`soffice`) on `PATH`. Text mode on `.pptx` needs neither.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod notes;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheFilter, CacheProvenance, CacheStore, StageKey};
pub use config::{AnalysisMode, NoteStyle, NotesConfig, NotesConfigBuilder, ProcessOptions};
pub use error::{CacheError, ModelError, NotesError};
pub use model::{EdgequakeModel, LanguageModel, ModelReply, ModelRequest};
pub use notes::{process, NotesOutcome, NotesPipeline};
pub use pipeline::{ImageDescriptor, PipelineStage, Unit};
pub use progress::{NoopProgressCallback, NotesProgressCallback, ProgressCallback};
