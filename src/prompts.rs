//! Prompts for every model call the pipeline makes.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing how units are analysed or how
//!    notes are phrased requires editing exactly one place.
//!
//! 2. **Testability**: unit tests can inspect prompts directly without a
//!    real model, so the structural promises the parsers rely on (page
//!    markers, `Relevance:` / `Caption:` labels) are easy to pin down.

use crate::config::NoteStyle;

/// System prompt shared by per-unit analysis calls (text and visual).
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert educational content analyst. You read lecture slides and document pages and extract what a student needs to learn from them.

Be complete and accurate. Pay particular attention to technical and academic content: definitions, formulas, worked examples, and how ideas connect. Use Markdown. Do not add commentary about the task itself."#;

/// System prompt for the final notes call.
pub const NOTES_SYSTEM_PROMPT: &str = r#"You are an experienced teaching assistant who writes clear, well-structured study notes in Markdown.

Output ONLY the Markdown notes. Do NOT wrap them in ```markdown fences. Do NOT insert image links; images are added afterwards."#;

/// Analysis structure requested for every unit.
const ANALYSIS_SECTIONS: &str = r#"Provide your analysis in this format:

1. Main concepts: the core ideas of this unit, briefly
2. Key points: the important information as bullet points
3. Definitions / formulas: every definition or formula present
4. Examples: any examples or case studies
5. Connections: how this relates to earlier material"#;

/// Text-mode analysis of one unit's extracted text.
pub fn unit_analysis_prompt(number: usize, title: &str, content: &str) -> String {
    let content = if content.trim().is_empty() {
        "(no text on this slide)"
    } else {
        content
    };
    format!(
        "Analyse the following slide.\n\n\
         Slide number: {number}\n\
         Slide title: {title}\n\
         Slide content:\n{content}\n\n\
         {ANALYSIS_SECTIONS}"
    )
}

/// Visual analysis of a single rendered page.
pub fn visual_page_prompt(number: usize, title: &str, text_hint: &str) -> String {
    let mut prompt = format!(
        "The attached image is page {number} (\"{title}\") of a lecture or document. \
         Read everything on it, including diagrams, charts and tables.\n\n\
         {ANALYSIS_SECTIONS}"
    );
    if !text_hint.trim().is_empty() {
        prompt.push_str("\n\nExtracted text of the page, for reference:\n");
        prompt.push_str(text_hint.trim());
    }
    prompt
}

/// Visual analysis of several pages in one request.
///
/// The response must start each page's section with a `## Page N` heading;
/// [`crate::pipeline::analyze::split_batch_response`] relies on it.
pub fn visual_batch_prompt(pages: &[(usize, &str)]) -> String {
    let listing: String = pages
        .iter()
        .enumerate()
        .map(|(i, (number, title))| format!("- Image {}: page {number}, \"{title}\"\n", i + 1))
        .collect();
    let numbers: Vec<String> = pages.iter().map(|(n, _)| n.to_string()).collect();
    format!(
        "The {} attached images are consecutive pages of a lecture or document:\n{listing}\n\
         Analyse each page separately, in order. Start the section for each page with a \
         heading of the form `## Page N` using these page numbers: {}.\n\n\
         For every page, {ANALYSIS_SECTIONS}",
        pages.len(),
        numbers.join(", ")
    )
}

/// Whole-document summary built from per-page analyses (visual mode).
pub fn summary_prompt(title: &str, total_units: usize, analyses: &str) -> String {
    format!(
        "Write a concise overview of the document \"{title}\" ({total_units} pages): \
         its subject, its structure, and the most important ideas, in a few paragraphs.\n\n\
         Per-page analyses:\n\n{analyses}"
    )
}

fn style_guidance(style: NoteStyle) -> &'static str {
    match style {
        NoteStyle::Concise => {
            "Concise: keep only the key points, short bullet lists, no lengthy explanations."
        }
        NoteStyle::Detailed => {
            "Detailed: explain every concept fully, keep examples and worked steps, and add brief clarifications where the slides are terse."
        }
        NoteStyle::Academic => {
            "Academic: formal register, precise definitions, formulas in LaTeX ($...$), and explicit references to the source pages."
        }
    }
}

/// Inputs of the final notes call.
#[derive(Debug, Clone, Copy)]
pub struct NotesPromptInput<'a> {
    pub title: &'a str,
    pub style: NoteStyle,
    pub language: &'a str,
    /// `--- Unit N: Title ---` blocks.
    pub analyses: &'a str,
    pub summary: Option<&'a str>,
    /// Allow `{{{fullpage: page_N description}}}` placeholders.
    pub full_pages: bool,
}

/// Prompt for assembling the final notes from all unit analyses.
pub fn notes_prompt(input: &NotesPromptInput<'_>) -> String {
    let mut prompt = format!(
        "Write study notes in {language} for \"{title}\".\n\n\
         Style: {style}\n\n\
         Requirements:\n\
         - Start with a single `# {title}` heading\n\
         - Organise the material with `##` and `###` headings following the order of the source\n\
         - Highlight key terms in **bold**\n\
         - Keep every definition and formula\n\
         - End with a short summary section\n",
        language = input.language,
        title = input.title,
        style = style_guidance(input.style),
    );
    if input.full_pages {
        prompt.push_str(
            "- Where seeing a whole page helps, you may write a placeholder of the form \
             {{{fullpage: page_N short description}}} on its own line\n",
        );
    }
    if let Some(summary) = input.summary {
        prompt.push_str("\nDocument overview:\n");
        prompt.push_str(summary.trim());
        prompt.push('\n');
    }
    prompt.push_str("\nAnalyses of each unit:\n\n");
    prompt.push_str(input.analyses);
    prompt
}

/// Relevance question for one extracted image.
///
/// The answer is parsed by [`crate::pipeline::placement::parse_relevance`].
pub fn relevance_prompt(unit_title: &str, analysis_excerpt: &str) -> String {
    format!(
        "The attached image was extracted from the slide \"{unit_title}\". \
         Here is an analysis of that slide:\n\n{analysis_excerpt}\n\n\
         How useful is this image for understanding the slide's content? Logos, decorations \
         and background graphics are not useful; diagrams, charts, tables and photos that \
         illustrate the material are.\n\n\
         Answer in exactly this format:\n\
         Relevance: <a number between 0 and 1>\n\
         Caption: <a caption of at most 25 characters>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_prompt_lists_page_numbers() {
        let prompt = visual_batch_prompt(&[(4, "Forces"), (5, "Momentum")]);
        assert!(prompt.contains("## Page N"));
        assert!(prompt.contains("4, 5"));
        assert!(prompt.contains("\"Momentum\""));
    }

    #[test]
    fn notes_prompt_mentions_placeholders_only_with_full_pages() {
        let mut input = NotesPromptInput {
            title: "Optics",
            style: NoteStyle::Concise,
            language: "English",
            analyses: "--- Unit 1: Optics ---\nlight",
            summary: None,
            full_pages: false,
        };
        assert!(!notes_prompt(&input).contains("fullpage"));
        input.full_pages = true;
        input.summary = Some("An overview.");
        let prompt = notes_prompt(&input);
        assert!(prompt.contains("{{{fullpage: page_N"));
        assert!(prompt.contains("An overview."));
        assert!(prompt.contains("# Optics"));
    }

    #[test]
    fn relevance_prompt_asks_for_labels() {
        let prompt = relevance_prompt("Lenses", "convex lenses focus light");
        assert!(prompt.contains("Relevance:"));
        assert!(prompt.contains("Caption:"));
    }

    #[test]
    fn empty_unit_content_is_marked() {
        assert!(unit_analysis_prompt(2, "Blank", "  ").contains("(no text on this slide)"));
    }
}
