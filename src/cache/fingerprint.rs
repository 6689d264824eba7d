//! Content-addressed cache keys.
//!
//! A key is the SHA-256 of `"{path}|{mtime}|{stage}|{model}"`. The mtime is
//! part of the key, so touching the source file silently orphans every entry
//! derived from the old version; nothing has to be invalidated explicitly.

use crate::error::CacheError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// 64-character lowercase hex SHA-256 digest identifying one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the file holding this entry inside the cache directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path recorded in cache provenance and hashed into keys.
///
/// Canonicalised when possible so relative and absolute spellings of the same
/// file share entries.
pub fn source_identity(file: &Path) -> PathBuf {
    std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf())
}

/// Derive the cache key for `(file, stage, model)`.
///
/// Fails with [`CacheError::SourceUnavailable`] when the file's metadata
/// cannot be read.
pub fn fingerprint(file: &Path, stage: &str, model: &str) -> Result<Fingerprint, CacheError> {
    let unavailable = |source| CacheError::SourceUnavailable {
        path: file.to_path_buf(),
        source,
    };
    let modified = std::fs::metadata(file)
        .and_then(|m| m.modified())
        .map_err(unavailable)?;
    // Pre-epoch mtimes are clamped to zero rather than rejected.
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    let mtime = format!(
        "{}.{:09}",
        since_epoch.as_secs(),
        since_epoch.subsec_nanos()
    );

    let identity = source_identity(file);
    let material = format!("{}|{}|{}|{}", identity.display(), mtime, stage, model);

    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn same_inputs_give_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let a = fingerprint(&path, "text_analyze", "m").unwrap();
        let b = fingerprint(&path, "text_analyze", "m").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stage_and_model_partition_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let base = fingerprint(&path, "text_analyze", "m").unwrap();
        assert_ne!(base, fingerprint(&path, "vl_analyze", "m").unwrap());
        assert_ne!(base, fingerprint(&path, "text_analyze", "other").unwrap());
    }

    #[test]
    fn mtime_change_changes_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        touch(&path, 1_700_000_000);
        let before = fingerprint(&path, "text_analyze", "m").unwrap();
        touch(&path, 1_700_000_100);
        let after = fingerprint(&path, "text_analyze", "m").unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn missing_source_is_an_error() {
        let err = fingerprint(Path::new("/definitely/not/here.pdf"), "s", "m").unwrap_err();
        assert!(matches!(err, CacheError::SourceUnavailable { .. }));
    }

    #[test]
    fn relative_and_absolute_paths_share_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let dotted = dir.path().join(".").join("deck.pdf");

        assert_eq!(
            fingerprint(&path, "s", "m").unwrap(),
            fingerprint(&dotted, "s", "m").unwrap()
        );
    }
}
