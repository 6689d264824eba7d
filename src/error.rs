//! Error types for the deck2notes library.
//!
//! Three error types map onto three failure modes:
//!
//! * [`NotesError`]: **Fatal**: the file cannot be processed at all (missing
//!   input, zero units parsed, output not writable, provider not configured).
//!   Returned from [`crate::NotesPipeline::try_process`]; the boolean
//!   [`crate::process`] entry point logs it and returns `false`.
//!
//! * [`ModelError`]: **Transient**: one language-model call failed. The
//!   pipeline never propagates it; the affected unit (or batch) receives the
//!   [`crate::pipeline::analyze::ANALYSIS_FAILED`] sentinel and processing
//!   continues with the next unit.
//!
//! * [`CacheError`]: **Soft**: a cache entry could not be keyed, read, or
//!   written. It never leaves the [`crate::cache`] module; every public cache
//!   operation collapses it into a miss (`None` / `false`).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the deck2notes library.
#[derive(Debug, Error)]
pub enum NotesError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file extension is not one of `.pdf`, `.ppt`, `.pptx`.
    #[error("Unsupported file format: '{path}'\nOnly .ppt, .pptx and .pdf files are supported.")]
    UnsupportedFormat { path: PathBuf },

    /// The document could be opened but is structurally broken.
    #[error("Document '{path}' could not be read: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// Parsing or rasterisation produced zero units.
    #[error("'{path}' yielded no pages or slides to process")]
    NoUnits { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// LibreOffice could not convert a slide deck to PDF.
    #[error("Could not convert '{path}' to PDF: {detail}\nInstall LibreOffice (soffice) or use text mode with a .pptx file.")]
    OfficeConversionFailed { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The final notes call failed. Unit analyses stay in the cache.
    #[error("Notes could not be generated: {source}")]
    NotesGenerationFailed {
        #[source]
        source: ModelError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache directory could not be created.
    #[error("Cache directory '{path}' is unavailable: {detail}")]
    CacheUnavailable { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Place libpdfium next to the binary or in the working directory.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n\
  • Install pdfium system-wide so the loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed language-model round trip.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Network, HTTP, or provider-side failure after all retries.
    #[error("{model}: request failed after {retries} retries: {detail}")]
    Transport {
        model: String,
        retries: u32,
        detail: String,
    },

    /// The provider answered, but with nothing usable.
    #[error("{model}: empty response")]
    EmptyResponse { model: String },

    /// An image could not be prepared for the request.
    #[error("image '{path}' could not be encoded: {detail}")]
    ImageEncoding { path: PathBuf, detail: String },
}

/// Cache-internal failure. Never crosses the cache boundary.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The source file is missing, so no fingerprint can be derived.
    #[error("source '{path}' is unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading, writing, or deleting a cache file failed.
    #[error("cache I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cache file is not valid JSON or has the wrong shape.
    #[error("cache entry '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
