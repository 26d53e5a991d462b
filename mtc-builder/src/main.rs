//! mtc-builder - MeSH-tagged corpus builder
//!
//! Resolves PubMed queries over a year range, retrieves each article with
//! its MeSH headings, rolls the headings up into three category levels, and
//! writes one CSV row per article.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mtc_builder::sink::render_summary;
use mtc_builder::sources::EntrezClient;
use mtc_builder::{
    collect, classify, CsvSink, OrchestratorConfig, RetrievalOrchestrator, RetryPolicy, Taxonomy,
};
use mtc_common::config::{load_toml_config, CliOverrides, LoggingConfig, RunSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for mtc-builder
#[derive(Parser, Debug)]
#[command(name = "mtc-builder")]
#[command(about = "Build a MeSH-tagged PubMed corpus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect, retrieve, classify and write the corpus
    Run(RunArgs),
    /// Print the level summaries for descriptor names (offline)
    Classify {
        /// MeSH descriptor XML
        #[arg(long)]
        taxonomy: PathBuf,
        /// Descriptor names to classify
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML config file (default: ~/.config/mtc/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Query to run (repeatable)
    #[arg(short, long = "query")]
    queries: Vec<String>,

    /// First publication year (inclusive)
    #[arg(long = "from")]
    year_from: Option<i32>,

    /// Last publication year (inclusive)
    #[arg(long = "to")]
    year_to: Option<i32>,

    /// Concurrent retrieval workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Attempts per retrieval before deferring
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Maximum identifiers per query/year
    #[arg(long)]
    max_results: Option<u32>,

    /// MeSH descriptor XML
    #[arg(short, long)]
    taxonomy: Option<PathBuf>,

    /// CSV output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Contact email sent to NCBI
    #[arg(long)]
    email: Option<String>,

    /// NCBI API key
    #[arg(long)]
    api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            queries: self.queries.clone(),
            year_from: self.year_from,
            year_to: self.year_to,
            workers: self.workers,
            max_attempts: self.max_attempts,
            retry_delay_ms: self.retry_delay_ms,
            max_results: self.max_results,
            taxonomy_path: self.taxonomy.clone(),
            output_path: self.output.clone(),
            email: self.email.clone(),
            api_key: self.api_key.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let settings = resolve_settings(&args, std::io::stderr)?;
            init_tracing(&settings.logging)?;

            let run_id = uuid::Uuid::new_v4();
            run(settings)
                .instrument(info_span!("run", run_id = %run_id))
                .await
        }
        Command::Classify { taxonomy, names } => {
            init_tracing(&LoggingConfig::default())?;
            print_classification(&taxonomy, &names)
        }
    }
}

/// Subscriber active while the config, and so the log level, is still unknown
fn bootstrap_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
}

/// Load the TOML config and resolve run settings, logging through `writer`
fn resolve_settings<W>(args: &RunArgs, writer: W) -> Result<RunSettings>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing::subscriber::with_default(bootstrap_subscriber(writer), || -> Result<RunSettings> {
        let toml_config = load_toml_config(args.config.as_deref())?;
        Ok(RunSettings::resolve(&args.overrides(), &toml_config)?)
    })
}

/// Initialize tracing (RUST_LOG wins over the configured level)
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }
    Ok(())
}

async fn run(settings: RunSettings) -> Result<()> {
    let start_time = Instant::now();

    info!("Starting mtc-builder");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        queries = settings.queries.len(),
        years = %format!("{}-{}", settings.year_from, settings.year_to),
        workers = settings.workers,
        "Run configured"
    );

    // Taxonomy failure is fatal before any network traffic
    let taxonomy = Taxonomy::load_file(&settings.taxonomy_path)
        .with_context(|| format!("Failed to load taxonomy {}", settings.taxonomy_path.display()))?;
    let taxonomy = Arc::new(taxonomy);

    let retry = RetryPolicy::new(settings.max_attempts, settings.retry_delay);
    let client = Arc::new(EntrezClient::new(&settings.entrez, retry).context("Failed to create E-utilities client")?);

    let matches = collect(
        client.as_ref(),
        &settings.queries,
        settings.years(),
        settings.max_results,
    )
    .await;

    let report = matches.report();
    info!("Total unique PMIDs: {}", report.unique);
    info!("Total repeated PMIDs: {}", report.multi_query);

    let sink = CsvSink::create(&settings.output_path)
        .with_context(|| format!("Failed to create {}", settings.output_path.display()))?;

    let orchestrator = RetrievalOrchestrator::new(
        client.clone(),
        client,
        taxonomy,
        OrchestratorConfig {
            workers: settings.workers,
            retry,
        },
    );
    let retrieval = orchestrator.run(Arc::new(matches), sink).await?;

    info!(
        output = %settings.output_path.display(),
        written = retrieval.written,
        recovered = retrieval.recovered,
        permanently_failed = retrieval.permanently_failed.len(),
        "Corpus written"
    );
    info!("Total time taken: {:.2} seconds", start_time.elapsed().as_secs_f64());

    Ok(())
}

fn print_classification(taxonomy_path: &std::path::Path, names: &[String]) -> Result<()> {
    let taxonomy = Taxonomy::load_file(taxonomy_path)
        .with_context(|| format!("Failed to load taxonomy {}", taxonomy_path.display()))?;

    for name in names {
        if !taxonomy.contains(name) {
            eprintln!("warning: '{}' is not a descriptor in {}", name, taxonomy_path.display());
        }
    }

    let result = classify(&taxonomy, names);
    for (level, summary) in result.levels().iter().enumerate() {
        println!("Level {}: {}", level + 1, render_summary(summary));
    }
    Ok(())
}
