//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use rmproposal_core::{
    ChunkingConfig, Collaborators, IndexBuildOptions, IndexProgress, Pipeline, PipelineSettings,
    PipelineState, ProgressReporter, ProposalVariant, RetrievalIndex, StageId, VectorIndex,
    build_index, drop_index, index_stats, query_index,
};
use rmproposal_providers::{ChatClient, Embedder, EmbeddingClient, TavilySearch};
use rmproposal_shared::{
    AppConfig, WorkItem, init_config, load_config, load_config_from, resolve_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// rmproposal: research a company and draft an RM loan proposal.
#[derive(Parser)]
#[command(
    name = "rmproposal",
    version,
    about = "Draft corporate-banking RM proposals from web search and internal documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.rmproposal/rmproposal.toml.
    #[arg(long, global = true, env = "RMPROPOSAL_CONFIG")]
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
    /// Research a company and generate a proposal analysis.
    Propose {
        /// Company name.
        subject: String,

        /// Web search query (defaults to the configured query template).
        #[arg(short, long)]
        query: Option<String>,

        /// Query for internal retrieval (defaults to the web query).
        #[arg(long)]
        internal_query: Option<String>,

        /// Skip internal document retrieval.
        #[arg(long)]
        no_internal: bool,

        /// Proposal variant: basic or eligibility (defaults to config).
        #[arg(long)]
        variant: Option<String>,

        /// Output directory for the artifact (defaults to config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Do not write the artifact file.
        #[arg(long)]
        no_save: bool,

        /// Print the run record as JSON instead of the analysis text.
        #[arg(long)]
        json: bool,
    },

    /// Manage the internal document index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Index subcommands.
#[derive(Subcommand)]
pub(crate) enum IndexAction {
    /// Load, chunk, and embed every supported file under a directory.
    Build {
        /// Directory of documents to index.
        dir: PathBuf,
    },
    /// Query the index directly.
    Query {
        /// Free-text question.
        question: String,

        /// Number of chunks to return.
        #[arg(short, default_value = "5")]
        k: usize,
    },
    /// Show chunk counts per source.
    Stats,
    /// Delete the index file.
    Drop,
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

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rmproposal=info",
        1 => "rmproposal=debug",
        _ => "rmproposal=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
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
    let config_path = cli.config;
    match cli.command {
        Command::Propose {
            subject,
            query,
            internal_query,
            no_internal,
            variant,
            out,
            no_save,
            json,
        } => {
            let config = config_for(config_path.as_deref())?;
            let request = ProposeArgs {
                subject,
                query,
                internal_query,
                internal_enabled: !no_internal,
                variant,
                out,
                save: !no_save,
                json,
            };
            cmd_propose(&config, request).await
        }
        Command::Index { action } => {
            let config = config_for(config_path.as_deref())?;
            match action {
                IndexAction::Build { dir } => cmd_index_build(&config, &dir).await,
                IndexAction::Query { question, k } => {
                    cmd_index_query(&config, &question, k).await
                }
                IndexAction::Stats => cmd_index_stats(&config).await,
                IndexAction::Drop => cmd_index_drop(&config),
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn config_for(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn embedder_for(config: &AppConfig) -> Result<EmbeddingClient> {
    let key = resolve_api_key(&config.embedding.api_key_env, "Embedding")?;
    Ok(EmbeddingClient::new(&config.embedding, &key)?)
}

// ---------------------------------------------------------------------------
// propose
// ---------------------------------------------------------------------------

struct ProposeArgs {
    subject: String,
    query: Option<String>,
    internal_query: Option<String>,
    internal_enabled: bool,
    variant: Option<String>,
    out: Option<PathBuf>,
    save: bool,
    json: bool,
}

async fn cmd_propose(config: &AppConfig, args: ProposeArgs) -> Result<()> {
    let variant: ProposalVariant = args
        .variant
        .as_deref()
        .unwrap_or(&config.pipeline.variant)
        .parse()?;

    let item = WorkItem::new(
        args.subject,
        args.query,
        args.internal_query,
        args.internal_enabled,
        &config.pipeline.resolved_query_template(),
    )?;

    // Search and generation are required; the embedder only matters for retrieval.
    let search_key = resolve_api_key(&config.search.api_key_env, "Tavily")?;
    let generation_key = resolve_api_key(&config.generation.api_key_env, "Generation")?;
    let search = TavilySearch::new(&config.search, &search_key)?;
    let generator = ChatClient::new(&config.generation, &generation_key)?;

    let index = if item.internal_enabled() {
        match embedder_for(config) {
            Ok(embedder) => Some(VectorIndex::new(
                &config.index.path,
                Arc::new(embedder) as Arc<dyn Embedder>,
            )),
            Err(e) => {
                warn!(error = %e, "internal retrieval unavailable");
                None
            }
        }
    } else {
        None
    };

    let mut settings = PipelineSettings::from_config(config);
    if let Some(out) = args.out {
        settings.output_dir = out;
    }

    let mut pipeline = Pipeline::for_variant(variant);
    if !args.save {
        pipeline = pipeline.without_persist();
    }

    info!(
        subject = %item.subject(),
        %variant,
        model = generator.model(),
        internal = item.internal_enabled(),
        "starting proposal"
    );

    let collaborators = Collaborators {
        search: &search,
        generator: &generator,
        index: index.as_ref().map(|i| i as &dyn RetrievalIndex),
    };
    let reporter = CliProgress::new();
    let state = pipeline
        .run(item, &collaborators, &settings, &reporter)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run_record(&state))?);
    } else {
        print_summary(&state);
    }

    Ok(())
}

fn run_record(state: &PipelineState) -> serde_json::Value {
    serde_json::json!({
        "subject": state.item.subject(),
        "variant": state.variant,
        "products": state.products,
        "analysis": state.analysis,
        "artifact_path": state.artifact_path,
        "error": state.error(),
        "failures": state.failures,
        "web_sources": state.web,
        "internal_documents": state.internal,
        "product_info": state.product_info,
    })
}

fn print_summary(state: &PipelineState) {
    println!();
    if state.analysis.is_empty() {
        println!("  No analysis was generated.");
    } else {
        println!("{}", state.analysis);
    }
    println!();
    if !state.products.is_empty() {
        println!("  Products:  {}", state.products.join(", "));
    }
    println!("  Web:       {}", state.web.len());
    println!("  Internal:  {}", state.internal.len());
    println!("  Sheets:    {}", state.product_info.len());
    match &state.artifact_path {
        Some(path) => println!("  Saved:     {}", path.display()),
        None => println!("  Saved:     (not saved)"),
    }
    if state.is_degraded() {
        println!();
        println!("  Completed with degraded stages:");
        for failure in &state.failures {
            println!("  - {}: {}", failure.stage, failure.message);
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// index
// ---------------------------------------------------------------------------

async fn cmd_index_build(config: &AppConfig, dir: &Path) -> Result<()> {
    let embedder = embedder_for(config)?;
    let options = IndexBuildOptions {
        path: PathBuf::from(&config.index.path),
        chunking: ChunkingConfig {
            chunk_size: config.index.chunk_size,
            chunk_overlap: config.index.chunk_overlap,
        },
        batch_size: config.embedding.batch_size,
    };

    info!(dir = %dir.display(), index = %options.path.display(), "building index");

    let reporter = CliProgress::new();
    let report = build_index(&options, dir, &embedder, &reporter).await?;
    reporter.spinner.finish_and_clear();

    println!();
    println!("  Index built!");
    println!("  Documents:  {}", report.documents);
    println!("  Chunks:     {}", report.chunks);
    println!("  Inserted:   {}", report.inserted);
    println!("  Duplicates: {}", report.skipped_duplicates);
    println!("  Path:       {}", options.path.display());
    println!();

    Ok(())
}

async fn cmd_index_query(config: &AppConfig, question: &str, k: usize) -> Result<()> {
    let embedder: Arc<dyn Embedder> = Arc::new(embedder_for(config)?);
    let index = VectorIndex::new(&config.index.path, embedder);

    let hits = query_index(&index, question, k).await?;
    if hits.is_empty() {
        println!("No matching chunks.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("[{}] {:.3}  {} ({})", i + 1, hit.score, hit.source, hit.file_type);
        println!("    {}", hit.body.replace('\n', " "));
        println!();
    }
    Ok(())
}

async fn cmd_index_stats(config: &AppConfig) -> Result<()> {
    let path = PathBuf::from(&config.index.path);
    let Some(stats) = index_stats(&path).await? else {
        println!("No index at {}", path.display());
        return Ok(());
    };

    println!("  Path:    {}", path.display());
    println!("  Chunks:  {}", stats.chunks);
    println!(
        "  Model:   {}",
        stats.embedding_model.as_deref().unwrap_or("(unknown)")
    );
    println!("  Sources: {}", stats.sources.len());
    for source in &stats.sources {
        println!("    {:>5}  {} ({})", source.chunks, source.source, source.file_type);
    }
    Ok(())
}

fn cmd_index_drop(config: &AppConfig) -> Result<()> {
    let path = PathBuf::from(&config.index.path);
    if drop_index(&path)? {
        println!("Dropped index at {}", path.display());
    } else {
        println!("No index at {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = config_for(path)?;
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
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: StageId) {
        self.spinner.set_message(format!("{stage}..."));
    }

    fn stage_finished(&self, stage: StageId, summary: &str, degraded: bool) {
        let mark = if degraded { "!" } else { "✓" };
        self.spinner.println(format!("  {mark} {stage}: {summary}"));
    }

    fn done(&self, _state: &PipelineState) {
        self.spinner.finish_and_clear();
    }
}

impl IndexProgress for CliProgress {
    fn phase(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    fn batch_embedded(&self, done: usize, total: usize) {
        self.spinner
            .set_message(format!("Embedding [{done}/{total}] chunks"));
    }
}
