//! `.pptx` reading: a zip of OOXML parts.
//!
//! ```text
//! ppt/presentation.xml            <p:sldIdLst> gives slide order (r:id)
//! ppt/_rels/presentation.xml.rels r:id → slides/slideN.xml
//! ppt/slides/slideN.xml           shapes: <p:sp>, <p:pic>, <a:t> text runs
//! ppt/slides/_rels/slideN.xml.rels image relationships → ../media/*
//! ```
//!
//! Slide order comes from the presentation part; when that cannot be read the
//! slide files are ordered by their numeric suffix.

use super::{ImageDescriptor, ImageSink, Unit};
use crate::error::NotesError;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Media extensions the image pipeline can decode.
const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Text and media of one slide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slide {
    /// Zip path of the slide part.
    pub part: String,
    pub title: String,
    /// One block per text shape (or table), paragraphs joined by newlines.
    pub blocks: Vec<String>,
    pub picture_count: usize,
    /// Zip paths of referenced images, in relationship order.
    pub media: Vec<String>,
}

/// Read every slide of a deck, in presentation order.
pub fn read_deck(path: &Path) -> Result<Vec<Slide>, NotesError> {
    let bytes = std::fs::read(path).map_err(|_| NotesError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    read_deck_bytes(&bytes).map_err(|detail| NotesError::CorruptDocument {
        path: path.to_path_buf(),
        detail,
    })
}

/// Parse a deck into units. Slides without a title placeholder are titled
/// `Slide N`.
pub fn parse(path: &Path) -> Result<Vec<Unit>, NotesError> {
    let slides = read_deck(path)?;
    Ok(slides
        .into_iter()
        .enumerate()
        .map(|(index, slide)| {
            let title = if slide.title.trim().is_empty() {
                format!("Slide {}", index + 1)
            } else {
                slide.title
            };
            let mut unit = Unit::new(index, title);
            unit.content = slide.blocks;
            unit.embedded_image_count = slide.picture_count;
            unit
        })
        .collect())
}

/// Write every raster image referenced by a slide into `sink`.
///
/// Files are named `slide{N}_img{K}.{ext}`. Unsupported formats (EMF, WMF,
/// SVG) are skipped.
pub fn extract_media(path: &Path, sink: &ImageSink) -> Result<Vec<ImageDescriptor>, NotesError> {
    let bytes = std::fs::read(path).map_err(|_| NotesError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let corrupt = |detail: String| NotesError::CorruptDocument {
        path: path.to_path_buf(),
        detail,
    };
    let slides = read_deck_bytes(&bytes).map_err(corrupt)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
        .map_err(|e| corrupt(format!("not a zip archive: {e}")))?;

    std::fs::create_dir_all(&sink.dir).map_err(|source| NotesError::OutputWriteFailed {
        path: sink.dir.clone(),
        source,
    })?;

    let mut out = Vec::new();
    for (index, slide) in slides.iter().enumerate() {
        let mut k = 0;
        for media in &slide.media {
            let ext = media.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
            if !RASTER_EXTENSIONS.contains(&ext.as_str()) {
                debug!("Slide {}: skipping non-raster media {}", index + 1, media);
                continue;
            }
            let Some(data) = read_entry_bytes(&mut archive, media) else {
                warn!("Slide {}: media part {} is missing", index + 1, media);
                continue;
            };
            k += 1;
            let descriptor = sink.descriptor(&format!("slide{}_img{}.{}", index + 1, k, ext), index);
            std::fs::write(&descriptor.path, data).map_err(|source| NotesError::OutputWriteFailed {
                path: descriptor.path.clone(),
                source,
            })?;
            out.push(descriptor);
        }
    }
    debug!("Extracted {} deck images", out.len());
    Ok(out)
}

// ── Archive walking ─────────────────────────────────────────────────────

fn read_deck_bytes(bytes: &[u8]) -> Result<Vec<Slide>, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip archive: {e}"))?;

    let parts = slide_parts(&mut archive);
    if parts.is_empty() {
        return Err("no slides found in ppt/slides/".to_string());
    }

    let mut slides = Vec::with_capacity(parts.len());
    for part in parts {
        let Some(xml) = read_entry_string(&mut archive, &part) else {
            warn!("Slide part {} is unreadable; keeping an empty slide", part);
            slides.push(Slide {
                part,
                ..Slide::default()
            });
            continue;
        };
        let mut slide = parse_slide_xml(&xml);
        slide.media = read_entry_string(&mut archive, &rels_path(&part))
            .map(|rels| {
                parse_relationships(&rels)
                    .into_iter()
                    .filter(|r| r.kind.ends_with("/image"))
                    .map(|r| resolve_target(&part, &r.target))
                    .collect()
            })
            .unwrap_or_default();
        slide.part = part;
        slides.push(slide);
    }
    Ok(slides)
}

/// Slide part paths in presentation order.
fn slide_parts(archive: &mut Archive<'_>) -> Vec<String> {
    let ordered = read_entry_string(archive, "ppt/presentation.xml")
        .zip(read_entry_string(archive, "ppt/_rels/presentation.xml.rels"))
        .map(|(pres, rels)| {
            let targets: HashMap<String, String> = parse_relationships(&rels)
                .into_iter()
                .map(|r| (r.id, resolve_target("ppt/presentation.xml", &r.target)))
                .collect();
            slide_ids(&pres)
                .into_iter()
                .filter_map(|rid| targets.get(&rid).cloned())
                .filter(|part| archive.by_name(part).is_ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if !ordered.is_empty() {
        return ordered;
    }

    let mut numbered: Vec<(usize, String)> = archive
        .file_names()
        .filter_map(|name| {
            let num = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<usize>()
                .ok()?;
            Some((num, name.to_string()))
        })
        .collect();
    numbered.sort();
    numbered.into_iter().map(|(_, name)| name).collect()
}

fn read_entry_string(archive: &mut Archive<'_>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    Some(buf)
}

fn read_entry_bytes(archive: &mut Archive<'_>, name: &str) -> Option<Vec<u8>> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// `ppt/slides/slide3.xml` → `ppt/slides/_rels/slide3.xml.rels`.
fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target relative to the part that owns it.
fn resolve_target(part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = part.split('/').collect();
    segments.pop();
    for seg in target.split('/') {
        match seg {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            s => segments.push(s),
        }
    }
    segments.join("/")
}

// ── XML parts ───────────────────────────────────────────────────────────

struct Relationship {
    id: String,
    kind: String,
    target: String,
}

fn parse_relationships(xml: &str) -> Vec<Relationship> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut rels = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut rel = Relationship {
                    id: String::new(),
                    kind: String::new(),
                    target: String::new(),
                };
                for attr in e.attributes().flatten() {
                    let Ok(val) = attr.unescape_value() else { continue };
                    match attr.key.as_ref() {
                        b"Id" => rel.id = val.to_string(),
                        b"Type" => rel.kind = val.to_string(),
                        b"Target" => rel.target = val.to_string(),
                        _ => {}
                    }
                }
                rels.push(rel);
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    rels
}

/// `r:id` values of `<p:sldId>` entries, in order.
fn slide_ids(xml: &str) -> Vec<String> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut ids = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) if e.local_name().as_ref() == b"sldId" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"r:id" {
                        if let Ok(val) = attr.unescape_value() {
                            ids.push(val.to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    ids
}

/// Extract title, text blocks and picture count from one slide part.
fn parse_slide_xml(xml: &str) -> Slide {
    let mut reader = XmlReader::from_str(xml);
    // Run boundaries carry meaningful spaces ("Hello " + "world").
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut slide = Slide::default();
    let mut in_shape = false;
    let mut shape_is_title = false;
    let mut in_text = false;
    let mut paragraph = String::new();
    let mut shape_paragraphs: Vec<String> = Vec::new();
    let mut loose_paragraphs: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"sp" => {
                    in_shape = true;
                    shape_is_title = false;
                    shape_paragraphs.clear();
                }
                b"t" => in_text = true,
                b"pic" => slide.picture_count += 1,
                b"ph" if in_shape => shape_is_title |= is_title_placeholder(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"ph" if in_shape => shape_is_title |= is_title_placeholder(e),
                b"br" => paragraph.push('\n'),
                b"pic" => slide.picture_count += 1,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                if let Ok(text) = e.unescape() {
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        if in_shape {
                            shape_paragraphs.push(text.to_string());
                        } else {
                            loose_paragraphs.push(text.to_string());
                        }
                    }
                    paragraph.clear();
                }
                b"sp" => {
                    if shape_is_title && slide.title.is_empty() {
                        slide.title = shape_paragraphs.join(" ");
                    } else if !shape_paragraphs.is_empty() {
                        slide.blocks.push(shape_paragraphs.join("\n"));
                    }
                    shape_paragraphs.clear();
                    in_shape = false;
                }
                b"graphicFrame" if !loose_paragraphs.is_empty() => {
                    slide.blocks.push(loose_paragraphs.join("\n"));
                    loose_paragraphs.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    if !loose_paragraphs.is_empty() {
        slide.blocks.push(loose_paragraphs.join("\n"));
    }
    slide
}

fn is_title_placeholder(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|attr| {
        attr.key.as_ref() == b"type"
            && matches!(attr.value.as_ref(), b"title" | b"ctrTitle")
    })
}
