//! Page rasterisation via pdfium, plus embedded-image extraction.
//!
//! Decks are first converted to PDF with LibreOffice ([`super::office`]); the
//! slide titles and media are then read back from the `.pptx` itself because
//! the converted PDF loses both.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 300 DPI would produce a
//! 10,000 × 14,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot of vision models (around 1,024–2,048 px).

use super::parse::{title_from_text, DocumentKind};
use super::{office, pptx, ImageDescriptor, ImageSink};
use crate::config::NotesConfig;
use crate::error::NotesError;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Characters of page text kept as a hint for visual analysis.
const TEXT_HINT_CHARS: usize = 500;

/// Bind to a pdfium shared library.
///
/// Looks at `PDFIUM_LIB_PATH` (a file or a directory) first, then the
/// working directory, then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, NotesError> {
    let local = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let p = PathBuf::from(p);
            if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&p)
            } else {
                p
            }
        }
        _ => Pdfium::pdfium_platform_library_name_at_path("./"),
    };

    let bindings = Pdfium::bind_to_library(&local)
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| NotesError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Where rasterised output goes.
#[derive(Debug, Clone)]
pub struct RasterTarget {
    /// Directory for page PNGs (`page_N.png`).
    pub pages_dir: PathBuf,
    /// When set, embedded images are extracted here.
    pub images: Option<ImageSink>,
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPage {
    pub index: usize,
    pub title: String,
    pub text_hint: String,
    pub image_path: PathBuf,
    pub images: Vec<ImageDescriptor>,
}

/// Renders a source file to page images.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, path: &Path, target: &RasterTarget) -> Result<Vec<RasterPage>, NotesError>;
}

/// pdfium-backed [`Rasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn from_config(config: &NotesConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, path: &Path, target: &RasterTarget) -> Result<Vec<RasterPage>, NotesError> {
        let kind = DocumentKind::from_path(path)?;
        std::fs::create_dir_all(&target.pages_dir).map_err(|source| NotesError::OutputWriteFailed {
            path: target.pages_dir.clone(),
            source,
        })?;

        if !kind.is_deck() {
            return self.render_pdf(path, target.images.as_ref(), target);
        }

        let scratch = tempfile::tempdir()
            .map_err(|e| NotesError::Internal(format!("Failed to create temp dir: {e}")))?;
        let pdf = office::convert(path, "pdf", scratch.path())?;

        if kind == DocumentKind::Ppt {
            return self.render_pdf(&pdf, target.images.as_ref(), target);
        }

        // PPTX: images and titles come from the deck, pixels from the PDF.
        let mut pages = self.render_pdf(&pdf, None, target)?;
        match pptx::read_deck(path) {
            Ok(slides) => {
                for (page, slide) in pages.iter_mut().zip(slides) {
                    if !slide.title.trim().is_empty() {
                        page.title = slide.title;
                    }
                }
            }
            Err(e) => warn!("Could not read slide titles: {e}"),
        }
        if let Some(sink) = &target.images {
            for image in pptx::extract_media(path, sink)? {
                if let Some(page) = pages.get_mut(image.unit_index) {
                    page.images.push(image);
                }
            }
        }
        Ok(pages)
    }
}

impl PdfiumRasterizer {
    fn render_pdf(
        &self,
        pdf_path: &Path,
        images: Option<&ImageSink>,
        target: &RasterTarget,
    ) -> Result<Vec<RasterPage>, NotesError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| NotesError::CorruptDocument {
                path: pdf_path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let scale = self.dpi as f32 / 72.0;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        if let Some(sink) = images {
            std::fs::create_dir_all(&sink.dir).map_err(|source| NotesError::OutputWriteFailed {
                path: sink.dir.clone(),
                source,
            })?;
        }

        let mut results = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| NotesError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;
            let image = bitmap.as_image();
            let image_path = target.pages_dir.join(format!("page_{}.png", idx + 1));
            image
                .save_with_format(&image_path, ImageFormat::Png)
                .map_err(|e| NotesError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("could not save page image: {e}"),
                })?;
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            let text = page.text().map(|t| t.all()).unwrap_or_default();
            let embedded = match images {
                Some(sink) => extract_page_images(&page, idx, sink),
                None => Vec::new(),
            };

            results.push(RasterPage {
                index: idx,
                title: title_from_text(&text, "Page", idx + 1),
                text_hint: text.chars().take(TEXT_HINT_CHARS).collect(),
                image_path,
                images: embedded,
            });
        }

        Ok(results)
    }
}

/// Save every decodable image object of a page as `page{N}_img{K}.png`.
fn extract_page_images(page: &PdfPage<'_>, idx: usize, sink: &ImageSink) -> Vec<ImageDescriptor> {
    let mut out = Vec::new();
    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let raw = match image_object.get_raw_image() {
            Ok(img) => img,
            Err(e) => {
                debug!("Page {}: skipping undecodable image: {e:?}", idx + 1);
                continue;
            }
        };
        let descriptor = sink.descriptor(&format!("page{}_img{}.png", idx + 1, out.len() + 1), idx);
        match raw.save_with_format(&descriptor.path, ImageFormat::Png) {
            Ok(()) => out.push(descriptor),
            Err(e) => warn!("Page {}: could not save embedded image: {e}", idx + 1),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_copies_render_settings() {
        let config = NotesConfig::builder().dpi(150).max_rendered_pixels(1600).build().unwrap();
        let r = PdfiumRasterizer::from_config(&config);
        assert_eq!(r.dpi, 150);
        assert_eq!(r.max_rendered_pixels, 1600);
    }

    #[test]
    fn unsupported_input_fails_before_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let target = RasterTarget {
            pages_dir: dir.path().join("pages"),
            images: None,
        };
        let err = PdfiumRasterizer::from_config(&NotesConfig::default())
            .rasterize(Path::new("slides.key"), &target)
            .unwrap_err();
        assert!(matches!(err, NotesError::UnsupportedFormat { .. }));
    }
}
