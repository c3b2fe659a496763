//! CLI binary for edgequake-forms.
//!
//! A thin shim over the library crate that maps CLI flags to `FormsConfig`,
//! picks an ingestion path from the input, and prints the fields.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_forms::{
    classify_from_html, classify_from_url, BatchOptions, FieldCandidate, FormsConfig,
    FormsPipeline, FormsProgressCallback, HttpPage, ImageSource, OcrPage, ProgressCallback,
    ReasoningEffort, UnitError,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over classifier batches (or image sections).
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Fetching and reading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl FormsProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize, total_batches: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_batches as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Classifying");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_pages} page(s) in {total_batches} batch(es)…"))
        ));
    }

    fn on_batch_start(&self, batch: usize, _total: usize, pages: &[u32]) {
        self.bar.set_message(format!("batch {batch} (pages {pages:?})"));
    }

    fn on_batch_complete(&self, batch: usize, total: usize, field_count: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            green("✓"),
            batch,
            total,
            dim(&format!("{field_count} fields"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            red("✗"),
            batch,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, successful: usize, total: usize, field_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(successful);
        if failed == 0 {
            eprintln!("{} {} fields extracted", green("✔"), bold(&field_count.to_string()));
        } else {
            eprintln!(
                "{} {} fields from {}/{} batches  ({} failed)",
                cyan("⚠"),
                bold(&field_count.to_string()),
                successful,
                total,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scanned pages (OCR + LLM), one job
  form2schema page1.jpg page2.jpg

  # A very tall screenshot, classified section by section
  form2schema --split long-form.png

  # Raw HTML or a live page (no LLM needed)
  form2schema signup.html
  form2schema https://example.com/contact.html

  # Pages OCR'd elsewhere: JSON array of {page, text, blocks}
  form2schema --batch-size 3 pages.json --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key (provider auto-detection)
  EDGEQUAKE_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL           Override model ID
  FORMS_LLM_BASE_URL        OpenAI-compatible endpoint (forwards reasoning effort)
  GOOGLE_VISION_API_KEY     OCR key (also FORMS_OCR_API_KEY)
  RUST_LOG                  Log filter, overrides -v / -q
"#;

#[derive(Parser, Debug)]
#[command(
    name = "form2schema",
    version,
    about = "Extract form-field schemas from scans, images, HTML and web pages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image paths/URLs, an .html file or URL, or a .json page dump.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Write the JSON result to this file.
    #[arg(short, long, env = "FORMS_OUTPUT")]
    output: Option<PathBuf>,

    /// Force an ingestion path instead of detecting it from the input.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Classify a single image section by section (vision path).
    #[arg(long, env = "FORMS_SPLIT")]
    split: bool,

    #[arg(long, env = "FORMS_MODEL")]
    model: Option<String>,

    #[arg(long, env = "FORMS_LLM_PROVIDER")]
    provider: Option<String>,

    #[arg(long, env = "FORMS_LLM_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "FORMS_LLM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "FORMS_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    #[arg(long, env = "FORMS_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    #[arg(long, env = "FORMS_REASONING_EFFORT", value_enum)]
    reasoning_effort: Option<EffortArg>,

    #[arg(long, env = "FORMS_MAX_TOKENS", default_value_t = 16_000)]
    max_tokens: usize,

    #[arg(long, env = "FORMS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    #[arg(long, env = "FORMS_SPLIT_MAX_HEIGHT", default_value_t = 4000)]
    split_max_height: u32,

    #[arg(long, env = "FORMS_SPLIT_OVERLAP", default_value_t = 200)]
    split_overlap: u32,

    /// File holding a replacement classification system prompt.
    #[arg(long, env = "FORMS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    #[arg(long, env = "FORMS_LLM_TIMEOUT_SECS", default_value_t = 180)]
    llm_timeout: u64,

    #[arg(long, env = "FORMS_OCR_TIMEOUT_SECS", default_value_t = 60)]
    ocr_timeout: u64,

    /// Print the full result (fields, analytics, errors) as JSON.
    #[arg(long, env = "FORMS_JSON")]
    json: bool,

    #[arg(long, env = "FORMS_NO_PROGRESS")]
    no_progress: bool,

    #[arg(short, long, env = "FORMS_VERBOSE")]
    verbose: bool,

    #[arg(short, long, env = "FORMS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    /// OCR each image, classify pages in batches.
    Ocr,
    /// Split one image and classify each section from pixels.
    Vision,
    /// Read fields from HTML (file or URL).
    Dom,
    /// Classify a JSON array of OCR'd pages.
    Pages,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EffortArg {
    Minimal,
    Low,
    Medium,
    High,
}

impl From<EffortArg> for ReasoningEffort {
    fn from(v: EffortArg) -> Self {
        match v {
            EffortArg::Minimal => ReasoningEffort::Minimal,
            EffortArg::Low => ReasoningEffort::Low,
            EffortArg::Medium => ReasoningEffort::Medium,
            EffortArg::High => ReasoningEffort::High,
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff"];

fn extension(input: &str) -> Option<String> {
    let path = input.split(['?', '#']).next().unwrap_or(input);
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn detect_mode(cli: &Cli) -> ModeArg {
    if let Some(mode) = cli.mode {
        return mode;
    }
    if cli.split {
        return ModeArg::Vision;
    }
    let first = &cli.inputs[0];
    match extension(first).as_deref() {
        Some("html" | "htm") => ModeArg::Dom,
        Some("json") => ModeArg::Pages,
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => ModeArg::Ocr,
        _ if first.starts_with("http://") || first.starts_with("https://") => ModeArg::Dom,
        _ => ModeArg::Ocr,
    }
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FormsConfig> {
    let mut builder = FormsConfig::builder()
        .batch_size(cli.batch_size)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .split_max_height(cli.split_max_height)
        .split_overlap(cli.split_overlap)
        .llm_timeout_secs(cli.llm_timeout)
        .ocr_timeout_secs(cli.ocr_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.llm_base_url(url);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.llm_api_key(key);
    }
    if let Some(ref key) = cli
        .ocr_api_key
        .clone()
        .or_else(|| std::env::var("GOOGLE_VISION_API_KEY").ok())
    {
        builder = builder.ocr_api_key(key);
    }
    if let Some(effort) = cli.reasoning_effort {
        builder = builder.reasoning_effort(effort.into());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Whatever the chosen path produced, ready to print or serialise.
#[derive(Serialize)]
#[serde(untagged)]
enum Report {
    Fields(Vec<FieldCandidate>),
    Classified(edgequake_forms::ClassificationOutput),
    Split(edgequake_forms::SplitClassification),
}

impl Report {
    fn fields(&self) -> &[FieldCandidate] {
        match self {
            Report::Fields(fields) => fields,
            Report::Classified(out) => &out.fields,
            Report::Split(out) => &out.fields,
        }
    }

    fn errors(&self) -> &[UnitError] {
        match self {
            Report::Fields(_) => &[],
            Report::Classified(out) => &out.errors,
            Report::Split(out) => &out.errors,
        }
    }
}

fn print_fields(fields: &[FieldCandidate]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (i, field) in fields.iter().enumerate() {
        let name = match field.rich_text_content() {
            Some(html) => html.to_string(),
            None => field.label.clone(),
        };
        write!(
            out,
            "{:>3}. [{}] {}{}",
            i + 1,
            field.field_type(),
            name,
            if field.required { " *" } else { "" }
        )?;
        if !field.options().is_empty() {
            write!(out, "  ({})", field.options().join(" | "))?;
        }
        if let Some(page) = field.page_number {
            write!(out, "  p.{page}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = detect_mode(&cli);

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && mode != ModeArg::Dom;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn FormsProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let options = BatchOptions {
        batch_size: Some(cli.batch_size),
        reasoning_effort: cli.reasoning_effort.map(Into::into),
        system_prompt: None,
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let report = match mode {
        ModeArg::Dom => {
            let input = &cli.inputs[0];
            let fields = if input.starts_with("http://") || input.starts_with("https://") {
                classify_from_url(&HttpPage::new(), input, &config)
                    .await
                    .with_context(|| format!("Failed to extract fields from {input}"))?
            } else {
                let html = std::fs::read_to_string(input)
                    .with_context(|| format!("Failed to read {input}"))?;
                classify_from_html(&html)
            };
            Report::Fields(fields)
        }
        ModeArg::Pages => {
            let input = &cli.inputs[0];
            let raw = std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?;
            let pages: Vec<OcrPage> =
                serde_json::from_str(&raw).context("Expected a JSON array of {page, text, blocks}")?;
            let pipeline = FormsPipeline::from_config(config).context("LLM provider setup failed")?;
            Report::Classified(
                pipeline
                    .classify_pages_from_ocr(&pages, &options)
                    .await
                    .context("Classification failed")?,
            )
        }
        ModeArg::Vision => {
            if cli.inputs.len() > 1 {
                bail!("--split takes exactly one image");
            }
            let source = ImageSource::parse(&cli.inputs[0]);
            let pipeline = FormsPipeline::from_config(config).context("LLM provider setup failed")?;
            let bytes = edgequake_forms::pipeline::input::fetch_image(
                &reqwest::Client::new(),
                &source,
                pipeline.config().fetch_timeout_secs,
            )
            .await
            .context("Failed to load image")?;
            Report::Split(
                pipeline
                    .split_and_classify_image(&bytes)
                    .await
                    .context("Classification failed")?,
            )
        }
        ModeArg::Ocr => {
            let sources: Vec<ImageSource> = cli.inputs.iter().map(|i| ImageSource::parse(i)).collect();
            let pipeline = FormsPipeline::from_config(config).context("LLM provider setup failed")?;
            Report::Classified(
                pipeline
                    .classify_images(&sources, &options)
                    .await
                    .context("Extraction failed")?,
            )
        }
    };

    // ── Output ───────────────────────────────────────────────────────────
    if let Some(ref path) = cli.output {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise output")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!(
                "{}  {} fields  →  {}",
                green("✔"),
                report.fields().len(),
                bold(&path.display().to_string())
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_fields(report.fields())?;
    }

    if !cli.quiet {
        for error in report.errors() {
            eprintln!("{} {}", cyan("⚠"), error);
        }
    }
    Ok(())
}
