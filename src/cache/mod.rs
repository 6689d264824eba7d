//! Persistent per-stage memoization.
//!
//! Every expensive stage result is stored as one JSON file under the cache
//! directory, named by the [`fingerprint`] of `(source file, stage, model)`:
//!
//! ```text
//! output/cache/
//!   3f1c…e9.json   {"file_path": "/decks/l1.pptx", "stage": "text_analyze",
//!                   "model": "gpt-4.1-nano", "timestamp": 1718000000.5,
//!                   "data": [{"index": 0, "analysis": "…"}, …]}
//! ```
//!
//! ## Why every operation is infallible
//!
//! The cache is an accelerator. A missing source, an unreadable directory, or
//! a corrupt entry must degrade to "recompute", never abort a run, so the
//! public operations collapse [`CacheError`] into `None` / `false` / `0` and
//! log the cause. Entries are written through a temp file in the same
//! directory and renamed into place, so a crash mid-write leaves either the
//! old entry or the new one.
//!
//! There is no locking: one entry per `(file, stage, model)`, last write wins.

pub mod fingerprint;
pub mod merge;

pub use fingerprint::{fingerprint, source_identity, Fingerprint};

use crate::config::{AnalysisMode, NoteStyle};
use crate::error::CacheError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

// ── Stage keys ───────────────────────────────────────────────────────────

/// Name of a cache partition. Part of every fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageKey(Cow<'static, str>);

impl StageKey {
    /// Text-mode per-unit analyses.
    pub const TEXT_ANALYZE: StageKey = StageKey(Cow::Borrowed("text_analyze"));
    /// Visual-mode per-unit analyses.
    pub const VISUAL_ANALYZE: StageKey = StageKey(Cow::Borrowed("vl_analyze"));
    /// Whole-document summary produced in visual mode.
    pub const VISUAL_SUMMARY: StageKey = StageKey(Cow::Borrowed("vl_summary"));
    /// Relevance verdicts for extracted images.
    pub const IMAGE_RELEVANCE: StageKey = StageKey(Cow::Borrowed("image_relevance"));

    /// Per-unit analysis partition for a mode.
    pub fn analysis(mode: AnalysisMode) -> StageKey {
        match mode {
            AnalysisMode::Text => Self::TEXT_ANALYZE,
            AnalysisMode::Visual => Self::VISUAL_ANALYZE,
        }
    }

    /// Assembled notes, e.g. `notes_text_detailed`.
    pub fn notes(mode: AnalysisMode, style: NoteStyle) -> StageKey {
        StageKey(Cow::Owned(format!("notes_{}_{}", mode.as_str(), style.as_str())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Entries ──────────────────────────────────────────────────────────────

/// On-disk shape of one cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub file_path: String,
    pub stage: String,
    pub model: String,
    /// Seconds since the Unix epoch, fractional.
    pub timestamp: f64,
    pub data: Value,
}

/// Provenance of a stored entry, without its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheProvenance {
    /// File stem of the entry (the fingerprint).
    pub key: String,
    pub file_path: String,
    pub stage: String,
    pub model: String,
    pub timestamp: f64,
}

/// Selects entries for [`CacheStore::invalidate`]. Unset fields match anything;
/// an empty filter matches every entry.
#[derive(Debug, Clone, Default)]
pub struct CacheFilter {
    pub file: Option<PathBuf>,
    pub stage: Option<String>,
    pub model: Option<String>,
}

impl CacheFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.file.is_none() && self.stage.is_none() && self.model.is_none()
    }

    fn matches(&self, entry: &CacheEntry) -> bool {
        let file_ok = self.file.as_deref().map_or(true, |f| {
            identity_candidates(f)
                .iter()
                .any(|c| entry.file_path == c.display().to_string())
        });
        let stage_ok = self.stage.as_deref().map_or(true, |s| entry.stage == s);
        let model_ok = self.model.as_deref().map_or(true, |m| entry.model == m);
        file_ok && stage_ok && model_ok
    }
}

/// Paths under which `file` may have been recorded. A deleted source cannot
/// be canonicalised, so its absolute form and the form under its canonical
/// parent directory are tried as well.
fn identity_candidates(file: &Path) -> Vec<PathBuf> {
    let mut out = vec![source_identity(file), file.to_path_buf()];
    let absolute = if file.is_relative() {
        std::env::current_dir().map(|cwd| cwd.join(file)).ok()
    } else {
        Some(file.to_path_buf())
    };
    if let Some(absolute) = absolute {
        if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
            if let Ok(parent) = std::fs::canonicalize(parent) {
                out.push(parent.join(name));
            }
        }
        out.push(absolute);
    }
    out.dedup();
    out
}

// ── Store ────────────────────────────────────────────────────────────────

/// Directory of fingerprinted JSON entries.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, file: &Path, stage: &StageKey, model: &str) -> Result<PathBuf, CacheError> {
        let key = fingerprint(file, stage.as_str(), model)?;
        Ok(self.dir.join(key.file_name()))
    }

    /// Whether an entry exists. `false` when the source file is missing.
    pub fn has(&self, file: &Path, stage: &StageKey, model: &str) -> bool {
        self.entry_path(file, stage, model)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Payload of the entry, or `None` on a miss or any read/parse failure.
    pub fn load(&self, file: &Path, stage: &StageKey, model: &str) -> Option<Value> {
        match self.try_load(file, stage, model) {
            Ok(Some(entry)) => {
                debug!(stage = %stage, file = %file.display(), "cache hit");
                Some(entry.data)
            }
            Ok(None) => {
                debug!(stage = %stage, file = %file.display(), "cache miss");
                None
            }
            Err(e) => {
                warn!("Cache read failed, treating as miss: {e}");
                None
            }
        }
    }

    /// Typed [`load`](Self::load). A payload of the wrong shape is a miss.
    pub fn load_as<T: DeserializeOwned>(&self, file: &Path, stage: &StageKey, model: &str) -> Option<T> {
        let value = self.load(file, stage, model)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(stage = %stage, "Cached payload has unexpected shape, ignoring: {e}");
                None
            }
        }
    }

    /// Store a payload. Returns `false` (and logs) on any failure.
    pub fn save(&self, file: &Path, stage: &StageKey, model: &str, data: Value) -> bool {
        match self.try_save(file, stage, model, data) {
            Ok(path) => {
                debug!(stage = %stage, entry = %path.display(), "cache saved");
                true
            }
            Err(e) => {
                warn!("Cache write failed: {e}");
                false
            }
        }
    }

    /// Typed [`save`](Self::save).
    pub fn save_as<T: Serialize>(&self, file: &Path, stage: &StageKey, model: &str, data: &T) -> bool {
        match serde_json::to_value(data) {
            Ok(value) => self.save(file, stage, model, value),
            Err(e) => {
                warn!(stage = %stage, "Cache payload could not be serialised: {e}");
                false
            }
        }
    }

    /// Remove matching entries and return how many were deleted.
    ///
    /// An empty filter removes every `*.json` file in the directory without
    /// reading it. Otherwise each entry's stored provenance is compared
    /// against the filter; unreadable entries are skipped.
    pub fn invalidate(&self, filter: &CacheFilter) -> usize {
        let mut removed = 0;
        for path in self.entry_files() {
            if !filter.is_empty() {
                match read_entry(&path) {
                    Ok(entry) if filter.matches(&entry) => {}
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Skipping unreadable cache entry: {e}");
                        continue;
                    }
                }
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove cache entry '{}': {e}", path.display()),
            }
        }
        debug!(removed, "cache invalidated");
        removed
    }

    /// Provenance of every readable entry, oldest first.
    pub fn entries(&self) -> Vec<CacheProvenance> {
        let mut out: Vec<CacheProvenance> = self
            .entry_files()
            .into_iter()
            .filter_map(|path| {
                let entry = read_entry(&path).ok()?;
                let key = path.file_stem()?.to_string_lossy().into_owned();
                Some(CacheProvenance {
                    key,
                    file_path: entry.file_path,
                    stage: entry.stage,
                    model: entry.model,
                    timestamp: entry.timestamp,
                })
            })
            .collect();
        out.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        out
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn try_load(&self, file: &Path, stage: &StageKey, model: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(file, stage, model)?;
        if !path.is_file() {
            return Ok(None);
        }
        read_entry(&path).map(Some)
    }

    fn try_save(&self, file: &Path, stage: &StageKey, model: &str, data: Value) -> Result<PathBuf, CacheError> {
        let path = self.entry_path(file, stage, model)?;
        let entry = CacheEntry {
            file_path: source_identity(file).display().to_string(),
            stage: stage.to_string(),
            model: model.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            data,
        };
        let bytes = serde_json::to_vec_pretty(&entry).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(path)
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }
}

fn read_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let bytes = std::fs::read(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
