//! Crawl-Ingest main entry point
//!
//! This is the command-line interface for the Crawl-Ingest website ingestion crawler.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crawl_ingest::config::{load_config_with_hash, parse_config, Config};
use crawl_ingest::crawler::{CrawlReport, Crawler};
use crawl_ingest::report::{load_statistics, print_statistics};
use crawl_ingest::storage::open_storage;
use crawl_ingest::tasks::{CrawlTask, WorkerPool};
use crawl_ingest::url::scope_host;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Crawl-Ingest: a tenant-scoped website ingestion crawler
///
/// Crawl-Ingest renders every page of a site in a remote browser, follows
/// links on the same host, and stores embedded page chunks in a per-tenant
/// vector index. Each discovered URL is tracked so failures can be resumed.
#[derive(Parser, Debug)]
#[command(name = "crawl-ingest")]
#[command(version = "1.0.0")]
#[command(about = "A tenant-scoped website ingestion crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl one or more sites for a tenant
    Crawl {
        /// Seed URLs; each is crawled as a separate task
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,

        /// Tenant that owns the records and vectors
        #[arg(short, long, value_name = "ID")]
        tenant: String,
    },

    /// Retry failed or abandoned records without following their links
    Resume {
        #[arg(value_name = "RECORD_ID", required = true)]
        record_ids: Vec<i64>,
    },

    /// Show ingestion status from the state database
    Status {
        /// Only show this tenant
        #[arg(short, long, value_name = "ID")]
        tenant: Option<String>,

        /// List FAILED and PENDING records with their ids
        #[arg(long)]
        failed: bool,
    },

    /// Validate the configuration and print it
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = load(cli.config.as_deref())?;

    match cli.command {
        Command::Crawl { urls, tenant } => handle_crawl(config, urls, tenant).await,
        Command::Resume { record_ids } => handle_resume(config, record_ids).await,
        Command::Status { tenant, failed } => handle_status(&config, tenant.as_deref(), failed),
        Command::Validate => handle_validate(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_ingest=info,warn"),
            1 => EnvFilter::new("crawl_ingest=debug,info"),
            2 => EnvFilter::new("crawl_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the configuration file, or the defaults when no file is given
fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok(config)
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            parse_config("").context("default configuration is invalid")
        }
    }
}

/// Handles `crawl`: queues one task per seed and waits for all of them
async fn handle_crawl(config: Config, urls: Vec<String>, tenant: String) -> anyhow::Result<()> {
    for url in &urls {
        scope_host(url).with_context(|| format!("invalid seed URL '{}'", url))?;
    }
    if tenant.trim().is_empty() {
        bail!("tenant id cannot be empty");
    }

    let tasks = urls
        .into_iter()
        .map(|url| CrawlTask::crawl(url, tenant.clone()))
        .collect();
    run_tasks(&config, tasks).await
}

/// Handles `resume`: queues one resume task per record id
async fn handle_resume(config: Config, record_ids: Vec<i64>) -> anyhow::Result<()> {
    let tasks = record_ids.into_iter().map(CrawlTask::resume_failed).collect();
    run_tasks(&config, tasks).await
}

async fn run_tasks(config: &Config, tasks: Vec<CrawlTask>) -> anyhow::Result<()> {
    let crawler = Crawler::from_config(config).context("failed to set up crawler")?;
    let task_count = tasks.len();
    let pool = WorkerPool::start(
        Arc::new(crawler),
        config.workers.count,
        config.workers.queue_capacity,
    );

    for task in tasks {
        pool.submit(task).await?;
    }

    let reports = pool.shutdown().await;
    for report in &reports {
        print_report(report);
    }

    let unfinished = task_count - reports.len();
    let aborted = reports.iter().filter(|r| r.aborted.is_some()).count();
    if unfinished + aborted > 0 {
        bail!("{} of {} tasks did not complete", unfinished + aborted, task_count);
    }

    Ok(())
}

fn print_report(report: &CrawlReport) {
    let status = if report.is_clean() { "✓" } else { "✗" };
    println!(
        "{} {} [{}]: {} succeeded, {} failed, {} skipped, {} left pending",
        status,
        report.seed_url,
        report.tenant_id,
        report.succeeded,
        report.failed,
        report.skipped,
        report.left_pending
    );
    if let Some(reason) = &report.aborted {
        println!("    aborted: {}", reason);
    }
}

/// Handles `status`: shows per-tenant record counts
fn handle_status(config: &Config, tenant: Option<&str>, failed: bool) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))
        .context("failed to open state database")?;
    let stats = load_statistics(&storage, tenant, failed)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles `validate`: prints the effective configuration
fn handle_validate(config: &Config) -> anyhow::Result<()> {
    println!("=== Crawl-Ingest Configuration ===\n");

    println!("Crawler:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Navigation timeout: {}s", config.crawler.navigation_timeout_secs);
    println!("  Script timeout: {}s", config.crawler.script_timeout_secs);

    println!("\nBrowser:");
    println!("  WebDriver: {}", config.browser.webdriver_url);
    println!(
        "  Browser: {}{}",
        config.browser.browser_name,
        if config.browser.headless { " (headless)" } else { "" }
    );

    println!("\nPipeline:");
    println!(
        "  Chunks: {} chars, {} overlap",
        config.pipeline.chunk_size, config.pipeline.chunk_overlap
    );
    println!(
        "  Embeddings: {} at {} (key from ${})",
        config.embedding.model, config.embedding.endpoint, config.embedding.api_key_env
    );
    println!(
        "  Vector store: {} collections '{}-<tenant>'",
        config.vector_store.url, config.vector_store.collection_prefix
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nWorkers:");
    println!(
        "  {} workers, queue capacity {}",
        config.workers.count, config.workers.queue_capacity
    );

    println!("\n✓ Configuration is valid");

    Ok(())
}
