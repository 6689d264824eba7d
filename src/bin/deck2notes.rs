//! CLI binary for deck2notes.
//!
//! A thin shim over the library crate that maps CLI flags to `NotesConfig`
//! and `ProcessOptions`, renders progress, and manages the cache.

use anyhow::{Context, Result};
use clap::builder::TypedValueParser;
use clap::Parser;
use deck2notes::{
    AnalysisMode, CacheFilter, CacheStore, NoteStyle, NotesConfig, NotesPipeline,
    NotesProgressCallback, PipelineStage, ProcessOptions, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per stage, one log line per failed or
/// cached unit.
struct CliProgressCallback {
    bar: ProgressBar,
    cached: AtomicUsize,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            cached: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        })
    }

    fn counting_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }
}

impl NotesProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: PipelineStage, total_units: usize) {
        self.bar.set_prefix(stage.label().to_string());
        self.bar.set_position(0);
        if matches!(stage, PipelineStage::UnitsAnalyzed | PipelineStage::ImagesEmbedded) && total_units > 0 {
            self.bar.set_length(total_units as u64);
            self.bar.set_style(Self::counting_style());
            self.bar.reset_eta();
        } else {
            self.bar.set_message("working…");
        }
    }

    fn on_unit_start(&self, unit_num: usize, _total: usize) {
        self.bar.set_message(format!("unit {unit_num}"));
    }

    fn on_unit_complete(&self, _unit_num: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_unit_cached(&self, _unit_num: usize, _total: usize) {
        self.cached.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    fn on_unit_error(&self, unit_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {}",
            red("✗"),
            unit_num,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: PipelineStage) {
        let detail = match stage {
            PipelineStage::UnitsAnalyzed => dim(&format!(
                "{} from cache, {} failed",
                self.cached.load(Ordering::SeqCst),
                self.errors.load(Ordering::SeqCst)
            )),
            _ => String::new(),
        };
        self.bar.println(format!("{} {}  {}", green("✓"), bold(stage.label()), detail));
        if stage == PipelineStage::ImagesEmbedded || stage == PipelineStage::Assembled {
            self.bar.set_message("");
        }
    }
}

impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text mode (default): analyse the text of each slide
  deck2notes lecture1.pptx

  # Read rendered pages with a vision model, 4 pages per request
  deck2notes --mode vl --batch-size 4 slides.pdf -o notes/slides.md

  # Academic notes with the relevant slide images embedded
  deck2notes -s academic --include-images lecture2.pptx

  # Forget everything cached for one file (and stop)
  deck2notes --clear-cache lecture1.pptx

  # Forget only the assembled notes, then regenerate them
  deck2notes --clear-cache --stage notes_text_detailed lecture1.pptx -o out.md

  # What is in the cache?
  deck2notes --list-cache

CACHE STAGES:
  text_analyze, vl_analyze      per-unit analyses (resumable)
  vl_summary                    document summary (vl mode)
  notes_<mode>_<style>          assembled notes, e.g. notes_vl_concise
  image_relevance               image relevance verdicts

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  DECK2NOTES_SOFFICE      LibreOffice binary used for .ppt/.pptx conversion
"#;

/// Turn slide decks and PDFs into study notes with a language model.
#[derive(Parser, Debug)]
#[command(
    name = "deck2notes",
    version,
    about = "Turn slide decks and PDFs into LLM-written study notes",
    long_about = "Turn .pptx, .ppt and .pdf files into Markdown study notes. Every stage is \
cached per file, stage and model, so interrupted or partially failed runs resume where they \
stopped and unchanged files are not re-sent to the model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Slide deck or PDF to process.
    #[arg(required_unless_present_any = ["clear_cache", "list_cache"])]
    input: Option<PathBuf>,

    /// Notes file to write. Default: <output-dir>/<stem>_notes.md.
    #[arg(short, long, env = "DECK2NOTES_OUTPUT")]
    output: Option<PathBuf>,

    /// Note style.
    #[arg(short, long, env = "DECK2NOTES_STYLE", value_enum, default_value = "detailed")]
    style: StyleArg,

    /// Model for text analysis and note writing.
    #[arg(short, long, env = "DECK2NOTES_MODEL")]
    model: Option<String>,

    /// Vision model for page analysis and image scoring.
    #[arg(long, env = "DECK2NOTES_VL_MODEL")]
    vl_model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Analysis mode: extracted text, or rendered pages read by a vision model.
    #[arg(long, env = "DECK2NOTES_MODE", value_enum, default_value = "text")]
    mode: ModeArg,

    /// Pages per vision request in vl mode.
    #[arg(long, env = "DECK2NOTES_BATCH_SIZE", default_value_t = deck2notes::config::DEFAULT_BATCH_SIZE,
          value_parser = clap::value_parser!(u64).range(1..=20).map(|v| v as usize))]
    batch_size: usize,

    /// Embed relevant images extracted from the source.
    #[arg(long)]
    include_images: bool,

    /// Embed a rendering of every page.
    #[arg(long)]
    include_full_pages: bool,

    /// Directory for notes when --output is not given.
    #[arg(long, env = "DECK2NOTES_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Cache directory. Default: <output-dir>/cache.
    #[arg(long, env = "DECK2NOTES_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "DECK2NOTES_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Language of the notes.
    #[arg(long, env = "DECK2NOTES_LANGUAGE", default_value = "English")]
    language: String,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DECK2NOTES_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per request.
    #[arg(long, env = "DECK2NOTES_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// Retries per request on LLM failure.
    #[arg(long, env = "DECK2NOTES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delete cached results: for INPUT when given, otherwise all.
    #[arg(long)]
    clear_cache: bool,

    /// With --clear-cache, only delete this stage (e.g. text_analyze).
    #[arg(long, requires = "clear_cache")]
    stage: Option<String>,

    /// List cache entries and exit.
    #[arg(long)]
    list_cache: bool,

    /// Disable progress bar.
    #[arg(long, env = "DECK2NOTES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DECK2NOTES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DECK2NOTES_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StyleArg {
    Concise,
    Detailed,
    Academic,
}

impl From<StyleArg> for NoteStyle {
    fn from(v: StyleArg) -> Self {
        match v {
            StyleArg::Concise => NoteStyle::Concise,
            StyleArg::Detailed => NoteStyle::Detailed,
            StyleArg::Academic => NoteStyle::Academic,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Text,
    Vl,
}

impl From<ModeArg> for AnalysisMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Text => AnalysisMode::Text,
            ModeArg::Vl => AnalysisMode::Visual,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.list_cache;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress && cli.input.is_some() {
        Some(CliProgressCallback::new() as Arc<dyn NotesProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Cache management ─────────────────────────────────────────────────
    if cli.list_cache {
        return list_cache(&config);
    }
    if cli.clear_cache {
        clear_cache(&cli, &config)?;
        // Clearing alone does not process; an explicit output asks for both.
        if cli.output.is_none() {
            return Ok(());
        }
    }

    let Some(input) = cli.input.clone() else {
        return Ok(());
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let mut options = ProcessOptions::new(&input);
    options.output = cli.output.clone();
    options.style = cli.style.into();
    options.model = cli.model.clone();
    options.mode = cli.mode.into();
    options.batch_size = cli.batch_size;
    options.include_images = cli.include_images;
    options.include_full_pages = cli.include_full_pages;

    let pipeline = NotesPipeline::from_config(options.apply_model_override(&config))
        .context("Could not set up the language models")?;
    let outcome = pipeline
        .try_process(&options)
        .with_context(|| format!("Processing {} failed", input.display()))?;
    drop(pipeline);

    if !cli.quiet {
        let mark = if outcome.is_complete() {
            green("✔")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{}  {}  {} units ({} cached, {} analysed, {} failed)  {}ms  →  {}",
            mark,
            bold(&outcome.title),
            outcome.total_units,
            outcome.cached_units,
            outcome.analysed_units,
            outcome.failed_units.len(),
            outcome.duration_ms,
            bold(&outcome.output_path.display().to_string()),
        );
        if outcome.images_embedded > 0 {
            eprintln!("   {}", dim(&format!("{} images embedded", outcome.images_embedded)));
        }
        if !outcome.is_complete() {
            eprintln!(
                "   {}",
                red("Some units failed and were not cached; run again to retry them.")
            );
        }
    }
    Ok(())
}

/// Map CLI args to `NotesConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<NotesConfig> {
    let mut builder = NotesConfig::builder()
        .output_dir(&cli.output_dir)
        .dpi(cli.dpi)
        .language(&cli.language)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries);

    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(ref model) = cli.vl_model {
        builder = builder.vision_model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn open_store(config: &NotesConfig) -> Result<CacheStore> {
    let dir = config.cache_dir();
    CacheStore::open(&dir).with_context(|| format!("Cannot open cache directory {}", dir.display()))
}

fn clear_cache(cli: &Cli, config: &NotesConfig) -> Result<()> {
    let store = open_store(config)?;
    let mut filter = match cli.input {
        Some(ref input) => CacheFilter::for_file(input),
        None => CacheFilter::all(),
    };
    if let Some(ref stage) = cli.stage {
        filter = filter.stage(stage);
    }
    let removed = store.invalidate(&filter);
    if !cli.quiet {
        let scope = match cli.input {
            Some(ref input) => input.display().to_string(),
            None => "all files".to_string(),
        };
        eprintln!("{} Removed {} cache entries for {}", green("✔"), removed, scope);
    }
    Ok(())
}

fn list_cache(config: &NotesConfig) -> Result<()> {
    let store = open_store(config)?;
    let entries = store.entries();
    if entries.is_empty() {
        println!("Cache at {} is empty", store.dir().display());
        return Ok(());
    }
    println!("{:<20} {:<28} {:<16} FILE", "KEY", "STAGE", "MODEL");
    for entry in &entries {
        let short_key: String = entry.key.chars().take(16).collect();
        println!(
            "{:<20} {:<28} {:<16} {}",
            format!("{short_key}…"),
            entry.stage,
            entry.model,
            entry.file_path
        );
    }
    println!("{} entries in {}", entries.len(), store.dir().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_parsed_and_bounded() {
        let cli = Cli::try_parse_from(["deck2notes", "deck.pptx", "--batch-size", "5"]).unwrap();
        assert_eq!(cli.batch_size, 5);

        let cli = Cli::try_parse_from(["deck2notes", "deck.pptx"]).unwrap();
        assert_eq!(cli.batch_size, deck2notes::config::DEFAULT_BATCH_SIZE);

        assert!(Cli::try_parse_from(["deck2notes", "deck.pptx", "--batch-size", "0"]).is_err());
    }
}
