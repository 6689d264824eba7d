//! Post-processing: deterministic cleanup of model-written notes.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models produce artefacts that are fine from the model's
//! point of view but wrong in a notes file:
//!
//! - the whole answer wrapped in a ` ```markdown ` fence
//! - `![diagram](diagram.png)` links to files that do not exist
//! - `\r\n` line endings, trailing blanks, runs of empty lines
//! - tables without (or with too many) separator rows
//!
//! The rules below fix these without touching content. The one rule that
//! *adds* content is the expansion of `{{{fullpage: page_N description}}}`
//! placeholders into links to the rendered page images.
//!
//! ## Rule Order
//!
//! Hallucinated links are removed *before* placeholders are expanded, so the
//! relative links produced by the expansion survive.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Full-page image links available for placeholder expansion, by unit index.
pub type FullPageLinks = HashMap<usize, String>;

/// Apply every cleanup rule to generated notes.
///
/// Rules (applied in order):
/// 1. Strip an outer Markdown fence
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines to at most two
/// 5. Put a blank line before every heading
/// 6. Repair tables: add a missing header separator, drop body separators
/// 7. Replace hallucinated image links with their caption
/// 8. Expand `{{{fullpage: page_N …}}}` placeholders
/// 9. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 10. End with exactly one newline
pub fn clean_notes(input: &str, full_pages: &FullPageLinks) -> String {
    let s = strip_outer_fence(input);
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = trim_line_ends(&s);
    let s = RE_BLANK_RUN.replace_all(&s, "\n\n\n").into_owned();
    let s = space_headings(&s);
    let s = repair_tables(&s);
    let s = drop_hallucinated_images(&s);
    let s = expand_full_page_placeholders(&s, full_pages);
    let s = strip_invisible(&s);
    with_final_newline(&s)
}

// ── Whitespace and fences ────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Opening or closing line of a fenced code block.
pub(crate) fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn space_headings(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 64);
    let mut in_code = false;
    for line in input.lines() {
        if is_fence(line) {
            in_code = !in_code;
        } else if !in_code && RE_HEADING.is_match(line) && !out.is_empty() {
            let kept = out.trim_end_matches('\n').len();
            out.truncate(kept);
            out.push_str("\n\n");
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn strip_invisible(input: &str) -> String {
    input.replace(['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'], "")
}

fn with_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        "\n".to_string()
    } else {
        format!("{trimmed}\n")
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Within each block of consecutive table rows, the second row must be the
/// only separator: insert one when missing, drop any further ones.
fn repair_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.lines() {
        if !is_table_row(line) {
            row_in_table = 0;
            out.push(line.to_string());
            continue;
        }
        row_in_table += 1;
        let separator = is_separator_row(line);
        match (row_in_table, separator) {
            (1, true) => {
                // A table cannot open with a separator.
                row_in_table = 0;
            }
            (2, false) => {
                let columns = line.trim().matches('|').count().saturating_sub(1).max(1);
                out.push(format!("|{}", " --- |".repeat(columns)));
                out.push(line.to_string());
                row_in_table = 3;
            }
            (n, true) if n > 2 => {}
            _ => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

// ── Images ───────────────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

static RE_FULL_PAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\{fullpage:([^}]*)\}\}\}").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
];

/// Anything that is not an absolute http(s) URL on a real host was invented
/// by the model; the notes' own images are inserted after this pass.
fn is_invented_url(url: &str) -> bool {
    let u = url.trim();
    let absolute = u.starts_with("http://") || u.starts_with("https://");
    !absolute || PLACEHOLDER_HOSTS.iter().any(|h| u.contains(h))
}

fn drop_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !is_invented_url(&caps[2]) {
                return caps[0].to_string();
            }
            let alt = caps[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}

/// `{{{fullpage: page_3 The circuit}}}` → `![The circuit](images/x_fullpages/fullpage_3.png)`.
///
/// Placeholders naming a page without a rendered image become their
/// description in italics (or vanish when they have none).
pub fn expand_full_page_placeholders(input: &str, links: &FullPageLinks) -> String {
    RE_FULL_PAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let body = caps[1].trim();
            let (page_id, description) = match body.split_once(char::is_whitespace) {
                Some((id, rest)) => (id, rest.trim()),
                None => (body, ""),
            };
            let link = page_id
                .strip_prefix("page")
                .map(|n| n.trim_start_matches('_'))
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|&n| n >= 1)
                .and_then(|n| links.get(&(n - 1)).map(|path| (n, path)));
            match (link, description.is_empty()) {
                (Some((_, path)), false) => format!("![{description}]({path})"),
                (Some((n, path)), true) => format!("![Full page {n}]({path})"),
                (None, false) => format!("*{description}*"),
                (None, true) => String::new(),
            }
        })
        .into_owned()
}
