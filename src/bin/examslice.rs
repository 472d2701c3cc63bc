//! CLI binary for exam-slicer.
//!
//! A thin shim over the library crate: each subcommand maps its flags onto
//! the library API and prints JSON or a short summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use exam_slicer::pipeline::composite::overlay_answer_spaces;
use exam_slicer::{
    apply_markscheme, composite_answer_view, inspect, load_markscheme, persist, slice_document,
    AnswerOverlay, AnswerSpace, Diagnostic, EditSession, InMemoryStore, NoOcr, PageSelection,
    PaperCode, PersistContext, ProgressCallback, QuestionNode, SliceConfig, SliceConfigBuilder,
    SliceOutput, SliceProgressCallback, TreeEdit,
};
#[cfg(feature = "tesseract")]
use exam_slicer::Tesseract;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
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

/// Two-phase bar: pages while scanning for bands, then regions while OCR
/// runs. Region events arrive out of order, so only counters are kept.
struct CliProgressCallback {
    bar: ProgressBar,
    in_regions: AtomicBool,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rasterising PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            in_regions: AtomicBool::new(false),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, prefix: &'static str, unit: &str, total: usize) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}"
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }

    fn enter_regions(&self, total: usize) {
        if !self.in_regions.swap(true, Ordering::SeqCst) {
            self.activate_bar("Reading", "regions", total);
        }
    }
}

impl SliceProgressCallback for CliProgressCallback {
    fn on_slice_start(&self, total_pages: usize) {
        self.activate_bar("Scanning", "pages", total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Scanning {total_pages} pages for colour bands…"))
        ));
    }

    fn on_page_scanned(&self, page_num: usize, total_pages: usize, bands: usize) {
        let mark = if bands == 0 { cyan("·") } else { green("✓") };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            mark,
            page_num,
            total_pages,
            dim(&format!("{bands} bands")),
        ));
        self.bar.inc(1);
    }

    fn on_region_complete(&self, _index: usize, total: usize, _text_len: usize) {
        self.enter_regions(total);
        self.bar.inc(1);
    }

    fn on_region_error(&self, index: usize, total: usize, error: &str) {
        self.enter_regions(total);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Region {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_slice_complete(&self, questions: usize, diagnostics: &[Diagnostic]) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} questions  ({} diagnostics, {} OCR failures)",
            if diagnostics.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&questions.to_string()),
            diagnostics.len(),
            if failed == 0 {
                dim("0")
            } else {
                red(&failed.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Slice a marked-up paper into a question tree
  examslice slice 0625_s23_qp_31.pdf -o 0625_s23_qp_31.json

  # Fill part answers from the mark scheme
  examslice slice 0625_s23_qp_31.pdf --markscheme 0625_s23_ms_31.pdf -o tree.json

  # Correct the tree
  examslice edit tree.json --op '{"operation":"update_marks","node_path":[0,1],"marks":3}' --in-place
  examslice edit tree.json --op '{"operation":"add_child","parent_path":[0]}' --in-place

  # Commit it (subject and year default from the paper code)
  examslice persist 0625_s23_qp_31.json --grade 10

  # Grading view: paste answer images onto a question image
  examslice composite question.png --overlay 40,310,answer1.png -o review.png

  # PDF metadata only
  examslice inspect 0625_s23_qp_31.pdf

MARKERS:
  red     start of a question        green   start of a part
  purple  start of a part's answer   blue    rectangle bounding the content width

ENVIRONMENT VARIABLES:
  EXAMSLICE_*       Any flag, e.g. EXAMSLICE_ZOOM=3, EXAMSLICE_GRADE=10
  PDFIUM_LIB_PATH   Path to libpdfium (or its directory)
  RUST_LOG          Log filter, overrides -v / -q
"#;

/// Slice colour-annotated exam PDFs into question trees.
#[derive(Parser, Debug)]
#[command(
    name = "examslice",
    version,
    about = "Slice colour-annotated exam PDFs into question trees",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EXAMSLICE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EXAMSLICE_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "EXAMSLICE_NO_PROGRESS")]
    no_progress: bool,

    /// Path to libpdfium (file or directory).
    #[arg(long, global = true, env = "EXAMSLICE_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Slice a PDF into a question tree (JSON).
    Slice(SliceArgs),
    /// Apply one edit to a tree JSON file.
    Edit(EditArgs),
    /// Commit a tree to an in-memory store and print the records.
    Persist(PersistArgs),
    /// Overlay answer images onto a question image.
    Composite(CompositeArgs),
    /// Print PDF metadata and paper-code details.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct SliceArgs {
    /// Question paper PDF.
    input: PathBuf,

    /// Write the tree JSON here instead of stdout.
    #[arg(short, long, env = "EXAMSLICE_OUTPUT")]
    output: Option<PathBuf>,

    /// Detection render scale (0.5–8).
    #[arg(long, env = "EXAMSLICE_ZOOM", default_value_t = 2.0)]
    zoom: f32,

    /// Scale of region crops handed to OCR and stored.
    #[arg(long, env = "EXAMSLICE_REGION_ZOOM", default_value_t = 2.0)]
    region_zoom: f32,

    /// Colour sampling tolerance; larger values accept paler markers.
    #[arg(long, env = "EXAMSLICE_TOLERANCE", default_value_t = 30)]
    tolerance: u8,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "EXAMSLICE_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "EXAMSLICE_PASSWORD")]
    password: Option<String>,

    /// Concurrent OCR calls.
    #[arg(short, long, env = "EXAMSLICE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-region OCR timeout in seconds.
    #[arg(long, env = "EXAMSLICE_OCR_TIMEOUT", default_value_t = 30)]
    ocr_timeout: u64,

    /// Marks for a part whose text states none.
    #[arg(long, env = "EXAMSLICE_DEFAULT_MARKS", default_value_t = 1.0)]
    default_marks: f64,

    /// Skip OCR; labels and marks fall back to defaults.
    #[arg(long, env = "EXAMSLICE_NO_OCR")]
    no_ocr: bool,

    /// Tesseract language (builds with the `tesseract` feature).
    #[arg(long, env = "EXAMSLICE_OCR_LANG", default_value = "eng")]
    lang: String,

    /// Mark-scheme PDF used to fill part answers.
    #[arg(long, env = "EXAMSLICE_MARKSCHEME")]
    markscheme: Option<PathBuf>,

    /// First mark-scheme page (0-based) holding the answer table.
    #[arg(long, env = "EXAMSLICE_MARKSCHEME_START",
          default_value_t = exam_slicer::markscheme::DEFAULT_START_PAGE)]
    markscheme_start: usize,
}

#[derive(Args, Debug)]
struct EditArgs {
    /// Tree JSON written by `slice` (or a bare array of questions).
    tree: PathBuf,

    /// The edit, as JSON: {"operation": "add_child" | "remove_node" | "update_marks" | "update_label", ...}
    #[arg(long)]
    op: String,

    /// Write the result back to the input file.
    #[arg(long, conflicts_with = "output")]
    in_place: bool,

    /// Write the result here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PersistArgs {
    /// Tree JSON written by `slice` or `edit`.
    tree: PathBuf,

    #[arg(long, env = "EXAMSLICE_GRADE")]
    grade: Option<String>,

    /// Defaults to the subject named by the paper code.
    #[arg(long, env = "EXAMSLICE_SUBJECT")]
    subject: Option<String>,

    #[arg(long, env = "EXAMSLICE_TOPIC")]
    topic: Option<String>,

    /// Defaults to the year named by the paper code.
    #[arg(long, env = "EXAMSLICE_YEAR")]
    year: Option<i32>,

    #[arg(long, env = "EXAMSLICE_OWNER", default_value = "")]
    owner: String,

    /// Paper code such as 0625_s23_qp_31. Defaults to the tree file name.
    #[arg(long, env = "EXAMSLICE_PAPER_CODE")]
    paper_code: Option<String>,
}

#[derive(Args, Debug)]
struct CompositeArgs {
    /// Base question image.
    base: PathBuf,

    /// Answer image at an offset: X,Y,PATH. Repeatable; later ones paint over earlier.
    #[arg(long = "overlay", value_parser = parse_overlay_arg)]
    overlays: Vec<(i64, i64, PathBuf)>,

    /// JSON array of answer spaces to draw as placeholder boxes first.
    #[arg(long)]
    spaces: Option<PathBuf>,

    /// Output image; format follows the extension.
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct InspectArgs {
    input: PathBuf,

    #[arg(long, env = "EXAMSLICE_PASSWORD")]
    password: Option<String>,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

/// A tree file: full `slice` output, or just the question list.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TreeFile {
    Bare(Vec<QuestionNode>),
    Output(SliceOutput),
}

impl TreeFile {
    fn questions_mut(&mut self) -> &mut Vec<QuestionNode> {
        match self {
            TreeFile::Bare(q) => q,
            TreeFile::Output(o) => &mut o.questions,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the progress bar is active.
    let show_progress =
        !cli.quiet && !cli.no_progress && matches!(cli.command, Command::Slice(_));
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

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(&cli, show_progress));
    // OCR calls still running past their timeout are abandoned, not joined.
    runtime.shutdown_background();
    result
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    match &cli.command {
        Command::Slice(args) => run_slice(cli, args, show_progress).await,
        Command::Edit(args) => run_edit(args).await,
        Command::Persist(args) => run_persist(cli, args).await,
        Command::Composite(args) => run_composite(cli, args),
        Command::Inspect(args) => run_inspect(cli, args).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────

async fn run_slice(cli: &Cli, args: &SliceArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn SliceProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, args, progress_cb)?;

    let mut output = slice_document(&args.input, &config)
        .await
        .context("Slicing failed")?;

    if let Some(ref ms_path) = args.markscheme {
        let scheme = load_markscheme(ms_path, &config, args.markscheme_start)
            .await
            .context("Failed to read mark scheme")?;
        let filled = apply_markscheme(&mut output.questions, &scheme);
        if !cli.quiet {
            eprintln!("   mark scheme filled {} answers", dim(&filled.to_string()));
        }
    }

    let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
    match args.output {
        Some(ref path) => {
            write_atomic(path, json.as_bytes()).await?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} questions  {} marks  {}ms  →  {}",
                    green("✔"),
                    output.questions.len(),
                    output.total_marks(),
                    output.stats.total_duration_ms,
                    bold(&path.display().to_string()),
                );
            }
        }
        None => println!("{json}"),
    }

    if !cli.quiet && !show_progress {
        for d in &output.diagnostics {
            eprintln!("  {} {}", cyan("⚠"), d);
        }
    }
    Ok(())
}

async fn run_edit(args: &EditArgs) -> Result<()> {
    let mut file = read_tree(&args.tree).await?;
    let edit: TreeEdit = serde_json::from_str(&args.op).context("Invalid --op JSON")?;

    let roots = std::mem::take(file.questions_mut());
    let mut session = EditSession::new(roots);
    session
        .apply(&edit)
        .with_context(|| format!("Edit {:?} rejected", edit))?;
    *file.questions_mut() = session.into_tree();

    let json = serde_json::to_string_pretty(&file).context("Failed to serialise tree")?;
    let target = if args.in_place {
        Some(args.tree.as_path())
    } else {
        args.output.as_deref()
    };
    match target {
        Some(path) => write_atomic(path, json.as_bytes()).await?,
        None => println!("{json}"),
    }
    Ok(())
}

async fn run_persist(cli: &Cli, args: &PersistArgs) -> Result<()> {
    let mut file = read_tree(&args.tree).await?;
    let code = match args.paper_code {
        Some(ref c) => Some(PaperCode::parse(c)),
        None => PaperCode::from_path(&args.tree),
    };

    let ctx = PersistContext {
        grade: args.grade.clone().unwrap_or_default(),
        subject: args
            .subject
            .clone()
            .or_else(|| code.as_ref().and_then(|c| c.subject).map(str::to_string))
            .unwrap_or_default(),
        topic: args.topic.clone(),
        year: args.year.or_else(|| code.as_ref().and_then(|c| c.year)),
        owner: args.owner.clone(),
    };

    let mut store = InMemoryStore::new();
    let ids = persist(&mut store, file.questions_mut(), &ctx).context("Persist failed")?;

    let report = serde_json::json!({
        "context": ctx,
        "root_ids": ids,
        "store": store,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialise records")?
    );
    if !cli.quiet {
        eprintln!(
            "{}  {} roots, {} records",
            green("✔"),
            ids.len(),
            store.questions().len()
        );
    }
    Ok(())
}

fn run_composite(cli: &Cli, args: &CompositeArgs) -> Result<()> {
    let mut base = image::open(&args.base)
        .with_context(|| format!("Failed to open base image {:?}", args.base))?;

    if let Some(ref spaces_path) = args.spaces {
        let raw = std::fs::read_to_string(spaces_path)
            .with_context(|| format!("Failed to read {:?}", spaces_path))?;
        let spaces: Vec<AnswerSpace> =
            serde_json::from_str(&raw).context("Invalid answer-space JSON")?;
        base = overlay_answer_spaces(&base, &spaces);
    }

    let overlays = args
        .overlays
        .iter()
        .map(|(x, y, path)| {
            image::open(path)
                .with_context(|| format!("Failed to open overlay {:?}", path))
                .map(|image| AnswerOverlay { x: *x, y: *y, image })
        })
        .collect::<Result<Vec<_>>>()?;

    let view = composite_answer_view(&base, &overlays);
    view.image
        .save(&args.output)
        .with_context(|| format!("Failed to write {:?}", args.output))?;

    if !cli.quiet {
        for w in &view.warnings {
            eprintln!("  {} {}", cyan("⚠"), w);
        }
        eprintln!(
            "{}  {} overlays  →  {}",
            green("✔"),
            overlays.len(),
            bold(&args.output.display().to_string())
        );
    }
    Ok(())
}

async fn run_inspect(cli: &Cli, args: &InspectArgs) -> Result<()> {
    let mut builder = SliceConfig::builder();
    if let Some(ref p) = args.password {
        builder = builder.password(p.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    let meta = inspect(&args.input, &config)
        .await
        .context("Failed to inspect PDF")?;
    let code = PaperCode::from_path(&args.input);

    if args.json {
        let report = serde_json::json!({ "metadata": meta, "paper_code": code });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise metadata")?
        );
        return Ok(());
    }

    println!("File:         {}", args.input.display());
    if let Some(ref t) = meta.title {
        println!("Title:        {}", t);
    }
    if let Some(ref a) = meta.author {
        println!("Author:       {}", a);
    }
    println!("Pages:        {}", meta.page_count);
    if let Some(first) = meta.page_sizes.first() {
        println!("Page size:    {:.0} × {:.0} pt", first.width, first.height);
    }
    println!("PDF Version:  {}", meta.pdf_version);
    if let Some(ref p) = meta.producer {
        println!("Producer:     {}", p);
    }
    if let Some(code) = code.filter(|c| c.syllabus.is_some()) {
        if let Some(subject) = code.subject {
            println!("Subject:      {}", subject);
        }
        if let Some(year) = code.year {
            println!("Year:         {}", year);
        }
        if let Some(component) = code.component {
            println!("Component:    {}", component);
        }
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Map CLI args to `SliceConfig`.
fn build_config(
    cli: &Cli,
    args: &SliceArgs,
    progress: Option<ProgressCallback>,
) -> Result<SliceConfig> {
    let pages = PageSelection::parse(&args.pages).context("Invalid --pages")?;

    let mut builder = SliceConfig::builder()
        .zoom(args.zoom)
        .region_zoom(args.region_zoom)
        .color_tolerance(args.tolerance)
        .pages(pages)
        .concurrency(args.concurrency)
        .ocr_timeout_secs(args.ocr_timeout)
        .default_part_marks(args.default_marks);

    if let Some(ref p) = args.password {
        builder = builder.password(p.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib.clone());
    }
    builder = if args.no_ocr {
        builder.ocr_engine(Arc::new(NoOcr))
    } else {
        with_tesseract(builder, &args.lang)
    };
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(feature = "tesseract")]
fn with_tesseract(builder: SliceConfigBuilder, lang: &str) -> SliceConfigBuilder {
    match Tesseract::new(lang) {
        Ok(engine) => builder.ocr_engine(Arc::new(engine)),
        Err(e) => {
            tracing::warn!("{}; slicing without OCR", e);
            builder.ocr_engine(Arc::new(NoOcr))
        }
    }
}

/// Without Tesseract linked in, the library picks its fallback and says so.
#[cfg(not(feature = "tesseract"))]
fn with_tesseract(builder: SliceConfigBuilder, _lang: &str) -> SliceConfigBuilder {
    builder
}

async fn read_tree(path: &Path) -> Result<TreeFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read tree {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("{:?} is not a question tree", path))
}

/// Write via a temp file and rename, so readers never see partial JSON.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to rename into {:?}", path))?;
    Ok(())
}

/// Parse `--overlay X,Y,PATH`.
fn parse_overlay_arg(s: &str) -> Result<(i64, i64, PathBuf), String> {
    let mut parts = s.splitn(3, ',');
    let (Some(x), Some(y), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected X,Y,PATH, got '{s}'"));
    };
    let x = x.trim().parse().map_err(|_| format!("invalid x offset '{x}'"))?;
    let y = y.trim().parse().map_err(|_| format!("invalid y offset '{y}'"))?;
    Ok((x, y, PathBuf::from(path.trim())))
}
