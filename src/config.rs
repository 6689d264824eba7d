//! Configuration types for deck-to-notes processing.
//!
//! Two layers of configuration exist:
//!
//! * [`NotesConfig`]: everything that is fixed for the lifetime of a process:
//!   model identifiers, sampling parameters, directories, render settings.
//!   Built once through [`NotesConfigBuilder`] and passed by reference to every
//!   component that needs it; nothing reads ambient global state.
//! * [`ProcessOptions`]: what varies per input file: the file itself, the
//!   note style, the analysis mode, batch size, and image options.

use crate::error::NotesError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default model used for text analysis, summaries, and note writing.
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4.1-nano";

/// Default vision-capable model used for page analysis and image relevance.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Default number of pages submitted together in visual mode.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Process-wide configuration.
///
/// # Example
/// ```rust
/// use deck2notes::NotesConfig;
///
/// let config = NotesConfig::builder()
///     .text_model("gpt-4.1-mini")
///     .output_dir("notes")
///     .dpi(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.cache_dir(), std::path::Path::new("notes/cache"));
/// ```
#[derive(Clone)]
pub struct NotesConfig {
    /// Directory for generated notes when no explicit output path is given. Default: `output`.
    pub output_dir: PathBuf,

    /// Cache directory. `None` means `<output_dir>/cache`.
    pub cache_dir: Option<PathBuf>,

    /// Model for per-unit text analysis, summaries and note writing.
    pub text_model: String,

    /// Vision model for page analysis and image relevance scoring.
    pub vision_model: String,

    /// Provider name for the text model (e.g. "openai", "anthropic", "ollama").
    /// If None, auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Provider name for the vision model. Falls back to `provider_name`.
    pub vision_provider_name: Option<String>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens per analysis/notes completion. Default: 4000.
    pub max_tokens: usize,

    /// Maximum tokens for one image relevance verdict. Default: 300.
    pub relevance_max_tokens: usize,

    /// Retry attempts on a transient model failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Rasterisation DPI. Range: 72–400. Default: 300.
    pub dpi: u32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 2000.
    ///
    /// A 300-DPI render of a large poster page would otherwise exhaust memory
    /// and blow through the upload limit of most vision APIs.
    pub max_rendered_pixels: u32,

    /// Longest edge of an image sent for relevance scoring. Default: 1200.
    pub relevance_image_edge: u32,

    /// Language the notes are written in. Default: "English".
    pub language: String,

    /// Append one `### N. Title` section per unit after the generated notes. Default: true.
    ///
    /// These sections also give image placement a heading per unit to anchor to.
    pub unit_sections: bool,

    /// Optional progress events sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            cache_dir: None,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            provider_name: None,
            vision_provider_name: None,
            temperature: 0.3,
            max_tokens: 4000,
            relevance_max_tokens: 300,
            max_retries: 3,
            retry_backoff_ms: 500,
            dpi: 300,
            max_rendered_pixels: 2000,
            relevance_image_edge: 1200,
            language: "English".to_string(),
            unit_sections: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for NotesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotesConfig")
            .field("output_dir", &self.output_dir)
            .field("cache_dir", &self.cache_dir)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("provider_name", &self.provider_name)
            .field("vision_provider_name", &self.vision_provider_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("language", &self.language)
            .field("unit_sections", &self.unit_sections)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn NotesProgressCallback>"),
            )
            .finish()
    }
}

impl NotesConfig {
    /// Create a new builder for `NotesConfig`.
    pub fn builder() -> NotesConfigBuilder {
        NotesConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("cache"))
    }

    /// Default notes path for an input: `<output_dir>/<stem>_notes.md`.
    pub fn default_output_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.output_dir.join(format!("{stem}_notes.md"))
    }
}

/// Builder for [`NotesConfig`].
#[derive(Debug)]
pub struct NotesConfigBuilder {
    config: NotesConfig,
}

impl NotesConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = model.into();
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn vision_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.vision_provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn relevance_max_tokens(mut self, n: usize) -> Self {
        self.config.relevance_max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn relevance_image_edge(mut self, px: u32) -> Self {
        self.config.relevance_image_edge = px.max(64);
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn unit_sections(mut self, v: bool) -> Self {
        self.config.unit_sections = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<NotesConfig, NotesError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(NotesError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.text_model.trim().is_empty() || c.vision_model.trim().is_empty() {
            return Err(NotesError::InvalidConfig(
                "Model identifiers must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(NotesError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Register of the generated notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStyle {
    /// Key points only.
    Concise,
    /// Full explanations with examples. (default)
    #[default]
    Detailed,
    /// Formal tone, definitions and references emphasised.
    Academic,
}

impl NoteStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            NoteStyle::Concise => "concise",
            NoteStyle::Detailed => "detailed",
            NoteStyle::Academic => "academic",
        }
    }
}

impl fmt::Display for NoteStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How each unit is analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisMode {
    /// Extracted text of each unit is summarised by a language model. (default)
    #[default]
    #[serde(rename = "text")]
    Text,
    /// Each rasterised page is read by a vision model, optionally in batches.
    #[serde(rename = "vl")]
    Visual,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::Text => "text",
            AnalysisMode::Visual => "vl",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file options for one processing run.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Source deck or PDF.
    pub input: PathBuf,
    /// Notes destination. `None` means [`NotesConfig::default_output_for`].
    pub output: Option<PathBuf>,
    pub style: NoteStyle,
    /// Model that analyses units: replaces [`NotesConfig::text_model`] in
    /// text mode and [`NotesConfig::vision_model`] in visual mode. See
    /// [`ProcessOptions::apply_model_override`].
    pub model: Option<String>,
    pub mode: AnalysisMode,
    /// Pages per vision request in visual mode. Clamped to ≥ 1.
    pub batch_size: usize,
    /// Score extracted images and embed the relevant ones.
    pub include_images: bool,
    /// Embed a full-page render next to each unit's section.
    pub include_full_pages: bool,
}

impl ProcessOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            style: NoteStyle::default(),
            model: None,
            mode: AnalysisMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            include_images: false,
            include_full_pages: false,
        }
    }

    pub fn wants_images(&self) -> bool {
        self.include_images || self.include_full_pages
    }

    /// `config` with [`model`](Self::model) put in place of the model that
    /// analyses units in [`mode`](Self::mode). Image scoring uses the vision
    /// model, so in visual mode it follows the override too.
    pub fn apply_model_override(&self, config: &NotesConfig) -> NotesConfig {
        let mut config = config.clone();
        if let Some(model) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            match self.mode {
                AnalysisMode::Text => config.text_model = model.to_string(),
                AnalysisMode::Visual => config.vision_model = model.to_string(),
            }
        }
        config
    }
}
