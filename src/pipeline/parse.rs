//! Unit extraction: turn a source file into ordered [`Unit`]s.
//!
//! | Format  | Reader |
//! |---------|--------|
//! | `.pdf`  | pdfium text layer, one unit per page |
//! | `.pptx` | [`super::pptx`], one unit per slide |
//! | `.ppt`  | converted to `.pptx` by LibreOffice, then as above |

use super::rasterize::bind_pdfium;
use super::{office, pptx, Unit};
use crate::error::NotesError;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Longest first line still accepted as a page title.
const MAX_TITLE_CHARS: usize = 100;

/// Source formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Pptx,
    Ppt,
}

impl DocumentKind {
    /// Classify by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, NotesError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "pptx" => Ok(DocumentKind::Pptx),
            "ppt" => Ok(DocumentKind::Ppt),
            _ => Err(NotesError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn is_deck(self) -> bool {
        matches!(self, DocumentKind::Pptx | DocumentKind::Ppt)
    }
}

/// Extracts units from a source file.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<Unit>, NotesError>;
}

/// Default parser covering PDF, PPTX and legacy PPT.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeckParser;

impl DocumentParser for DeckParser {
    fn parse(&self, path: &Path) -> Result<Vec<Unit>, NotesError> {
        let units = match DocumentKind::from_path(path)? {
            DocumentKind::Pdf => parse_pdf(path)?,
            DocumentKind::Pptx => pptx::parse(path)?,
            DocumentKind::Ppt => {
                let scratch = tempfile::tempdir()
                    .map_err(|e| NotesError::Internal(format!("Failed to create temp dir: {e}")))?;
                let converted = office::convert(path, "pptx", scratch.path())?;
                pptx::parse(&converted)?
            }
        };
        info!("Parsed {} units from {}", units.len(), path.display());
        Ok(units)
    }
}

/// First line of `text` when it is short enough to be a title, else
/// `"{fallback} {number}"`.
pub fn title_from_text(text: &str, fallback: &str, number: usize) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .filter(|l| l.chars().count() <= MAX_TITLE_CHARS)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback} {number}"))
}

fn parse_pdf(path: &Path) -> Result<Vec<Unit>, NotesError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| NotesError::CorruptDocument {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let mut units = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        let image_count = page
            .objects()
            .iter()
            .filter(|object| object.as_image_object().is_some())
            .count();

        let mut unit = Unit::new(index, title_from_text(&text, "Page", index + 1));
        if !text.trim().is_empty() {
            unit.content.push(text);
        }
        unit.embedded_image_count = image_count;
        debug!(
            "Page {}: {} chars, {} images",
            index + 1,
            unit.text().len(),
            image_count
        );
        units.push(unit);
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pptx::tests::{build_pptx, slide_xml};

    #[test]
    fn kind_is_case_insensitive() {
        assert_eq!(DocumentKind::from_path(Path::new("a.PDF")).unwrap(), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path(Path::new("a.Pptx")).unwrap(), DocumentKind::Pptx);
        assert!(DocumentKind::from_path(Path::new("a.ppt")).unwrap().is_deck());
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = DocumentKind::from_path(Path::new("notes.docx")).unwrap_err();
        assert!(matches!(err, NotesError::UnsupportedFormat { .. }));
        assert!(DocumentKind::from_path(Path::new("README")).is_err());
    }

    #[test]
    fn title_uses_first_short_line() {
        assert_eq!(title_from_text("\n  Thermodynamics \nbody", "Page", 1), "Thermodynamics");
        assert_eq!(title_from_text("", "Page", 3), "Page 3");
        let long = "x".repeat(101);
        assert_eq!(title_from_text(&long, "Page", 2), "Page 2");
    }

    #[test]
    fn deck_parser_reads_pptx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lecture.pptx");
        let slides = vec![slide_xml("Vectors", &["Dot product"], 0)];
        std::fs::write(&path, build_pptx(&slides, &[])).unwrap();

        let units = DeckParser.parse(&path).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].title, "Vectors");
    }
}
