//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docqa_core::engine::{Answer, ChatSession, EngineCell, Reply};
use docqa_core::pipeline::{self, ProgressReporter};
use docqa_models::GeminiClient;
use docqa_shared::{
    AppConfig, DocQaError, init_config, load_config, load_config_from, validate_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docqa: ask questions about your Word documents.
#[derive(Parser)]
#[command(
    name = "docqa",
    version,
    about = "Build a searchable index from .docx files and answer questions against it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.docqa/docqa.toml).
    #[arg(long, global = true, env = "DOCQA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Extract text, tables, and images from .docx files.
    Extract {
        /// Documents to extract (defaults to [extraction].documents).
        documents: Vec<PathBuf>,
    },

    /// Caption images and generate questions for the extracted content.
    Enrich {
        /// Enrich every extracted block again, keeping only curated records.
        #[arg(long)]
        restart: bool,
    },

    /// Embed the enriched content and rebuild the vector collection.
    Index,

    /// Run extract, enrich, and index in order.
    Build {
        /// Documents to extract (defaults to [extraction].documents).
        documents: Vec<PathBuf>,
    },

    /// Merge hand-written entries from a JSON file into the enriched content.
    Append {
        /// JSON array of curated entries.
        file: PathBuf,
    },

    /// Answer a single question.
    Ask {
        /// The question.
        question: String,
    },

    /// Interactive conversation (`/clear` resets history, `/quit` exits).
    Chat,

    /// List Gemini models that support content generation.
    Models,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so answers on
/// stdout stay clean.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docqa=info",
        1 => "docqa=debug",
        _ => "docqa=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    match cli.command {
        Command::Extract { documents } => cmd_extract(&config, &documents),
        Command::Enrich { restart } => cmd_enrich(&config, restart).await,
        Command::Index => cmd_index(&config).await,
        Command::Build { documents } => cmd_build(&config, &documents).await,
        Command::Append { file } => cmd_append(&config, &file),
        Command::Ask { question } => cmd_ask(config, &question).await,
        Command::Chat => cmd_chat(config).await,
        Command::Models => cmd_models(&config).await,
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Gemini client for both generation and embeddings. Fails early when the
/// API key is missing.
fn gemini_client(config: &AppConfig) -> Result<Arc<GeminiClient>> {
    let api_key = validate_api_key(config)?;
    Ok(Arc::new(GeminiClient::new(&config.gemini, api_key)?))
}

// ---------------------------------------------------------------------------
// Offline stages
// ---------------------------------------------------------------------------

fn cmd_extract(config: &AppConfig, documents: &[PathBuf]) -> Result<()> {
    let documents = pipeline::resolve_documents(config, documents)?;
    info!(documents = documents.len(), "extracting documents");

    let reporter = CliProgress::new();
    let summary = pipeline::run_extract(config, &documents, &reporter);
    reporter.finish();
    let summary = summary?;

    for (path, reason) in &summary.skipped {
        println!("  skipped {}: {reason}", path.display());
    }
    println!();
    println!("  Blocks:    {}", summary.blocks);
    println!("  Documents: {}", summary.processed.len());
    println!("  Output:    {}", summary.output.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_enrich(config: &AppConfig, restart: bool) -> Result<()> {
    let client = gemini_client(config)?;
    info!(model = %config.gemini.generative_model, restart, "enriching content");

    let reporter = CliProgress::new();
    let summary = pipeline::run_enrich(config, client.as_ref(), restart, &reporter).await;
    reporter.finish();
    let summary = summary?;

    println!();
    println!("  Records:   {}", summary.records);
    println!("  New:       {}", summary.processed);
    println!("  Reused:    {}", summary.reused);
    println!("  Degraded:  {}", summary.degraded);
    println!("  Output:    {}", summary.output.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_index(config: &AppConfig) -> Result<()> {
    let client = gemini_client(config)?;
    info!(model = %config.gemini.embedding_model, "building index");

    let reporter = CliProgress::new();
    let summary = pipeline::run_index(config, client.as_ref(), &reporter).await;
    reporter.finish();
    let summary = summary?;

    println!();
    println!("  Collection: {}", summary.collection.name);
    println!("  Records:    {}", summary.collection.record_count);
    println!("  Dimensions: {}", summary.collection.dimensions);
    println!("  Database:   {}", summary.database.display());
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_build(config: &AppConfig, documents: &[PathBuf]) -> Result<()> {
    let documents = pipeline::resolve_documents(config, documents)?;
    let client = gemini_client(config)?;

    let reporter = CliProgress::new();
    let summary = pipeline::run_build(
        config,
        &documents,
        client.as_ref(),
        client.as_ref(),
        &reporter,
    )
    .await;
    reporter.finish();
    let summary = summary?;

    let elapsed = summary.extract.elapsed + summary.enrich.elapsed + summary.index.elapsed;
    println!();
    println!("  Index built successfully!");
    println!("  Blocks:     {}", summary.extract.blocks);
    println!("  Degraded:   {}", summary.enrich.degraded);
    println!("  Records:    {}", summary.index.collection.record_count);
    println!("  Database:   {}", summary.index.database.display());
    println!("  Time:       {:.1}s", elapsed.as_secs_f64());
    println!();
    Ok(())
}

fn cmd_append(config: &AppConfig, file: &Path) -> Result<()> {
    let report = pipeline::run_append(config, file)?;
    println!(
        "Appended {} entries ({} already present); {} records total.",
        report.added,
        report.skipped,
        report.before + report.added
    );
    if report.added > 0 {
        println!("Run `docqa index` to make them searchable.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

fn engine(config: AppConfig) -> Result<EngineCell> {
    let client = gemini_client(&config)?;
    Ok(EngineCell::new(config, client.clone(), client))
}

async fn cmd_ask(config: AppConfig, question: &str) -> Result<()> {
    let engine = engine(config)?;
    let mut session = ChatSession::new();
    match session.submit(&engine, question).await {
        Reply::Answered(answer) => {
            print_answer(&answer);
            Ok(())
        }
        Reply::NotReady { reason } => {
            Err(DocQaError::IndexUnavailable { reason }).wrap_err("run `docqa build` first")
        }
        Reply::Failed { message } => Err(eyre!("query failed: {message}")),
    }
}

async fn cmd_chat(config: AppConfig) -> Result<()> {
    let engine = engine(config)?;
    let mut session = ChatSession::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Ask a question. /clear resets the conversation, /quit exits.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        match session.submit(&engine, line).await {
            Reply::Answered(answer) => print_answer(&answer),
            Reply::NotReady { reason } => {
                println!("System not ready: {reason}. Run `docqa build` first.");
            }
            Reply::Failed { message } => {
                println!(
                    "Something went wrong: {message}. Your conversation is intact; try again."
                );
            }
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!();
    println!("{}", answer.text.trim());
    if answer.sources.is_empty() {
        println!();
        return;
    }

    println!();
    println!("Sources:");
    for (rank, source) in answer.sources.iter().enumerate() {
        let section = source
            .metadata
            .section
            .as_deref()
            .map(|s| format!(" / {s}"))
            .unwrap_or_default();
        println!(
            "  [{}] {:.3}  {}{section} ({})",
            rank + 1,
            source.score,
            source.metadata.source,
            source.metadata.kind
        );
        println!("      {}", source.excerpt.replace('\n', " "));
        if let Some(path) = &source.image_path {
            println!("      image: {}", path.display());
        }
    }
    println!();
}

async fn cmd_models(config: &AppConfig) -> Result<()> {
    let client = gemini_client(config)?;
    let models = client.list_models().await?;
    if models.is_empty() {
        println!("No models support generateContent for this key.");
        return Ok(());
    }
    for model in models {
        println!("  {:<40} {}", model.name, model.display_name);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_progress(&self, current: usize, total: usize, detail: &str) {
        self.spinner.set_message(format!("[{current}/{total}] {detail}"));
    }

    fn done(&self, summary: &str) {
        self.spinner.println(format!("  done: {summary}"));
    }
}
