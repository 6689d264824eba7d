//! Slide-deck conversion through a headless LibreOffice.
//!
//! pdfium only reads PDF, and legacy binary `.ppt` has no pure-Rust reader, so
//! both are handed to `soffice --headless --convert-to <ext>`. The converted
//! file lands in a caller-owned directory and lives as long as it does.

use crate::error::NotesError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Binary name, overridable with `DECK2NOTES_SOFFICE`.
fn soffice_binary() -> String {
    std::env::var("DECK2NOTES_SOFFICE")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "soffice".to_string())
}

/// Convert `input` to `target_ext` (`"pdf"`, `"pptx"`) inside `out_dir`.
///
/// Returns the path of the converted file.
pub fn convert(input: &Path, target_ext: &str, out_dir: &Path) -> Result<PathBuf, NotesError> {
    let failed = |detail: String| NotesError::OfficeConversionFailed {
        path: input.to_path_buf(),
        detail,
    };

    let binary = soffice_binary();
    info!("Converting {} to {} with {}", input.display(), target_ext, binary);

    let output = Command::new(&binary)
        .arg("--headless")
        .arg("--convert-to")
        .arg(target_ext)
        .arg("--outdir")
        .arg(out_dir)
        .arg(input)
        .output()
        .map_err(|e| failed(format!("could not run '{binary}': {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!(
            "'{binary}' exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stem = input
        .file_stem()
        .ok_or_else(|| failed("input has no file name".to_string()))?;
    let converted = out_dir.join(stem).with_extension(target_ext);
    if !converted.is_file() {
        return Err(failed(format!(
            "expected output '{}' was not produced",
            converted.display()
        )));
    }
    debug!("Converted → {}", converted.display());
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_conversion_error() {
        std::env::set_var("DECK2NOTES_SOFFICE", "/nonexistent/soffice-for-tests");
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("deck.ppt");
        std::fs::write(&input, b"\xD0\xCF").unwrap();

        let err = convert(&input, "pdf", dir.path()).unwrap_err();
        std::env::remove_var("DECK2NOTES_SOFFICE");
        assert!(matches!(err, NotesError::OfficeConversionFailed { .. }));
        assert!(err.to_string().contains("LibreOffice"));
    }
}
