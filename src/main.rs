//! Ripple-Fetch main entry point
//!
//! Command-line access to the fetch engine: policy checks, one-off polite
//! fetches and inspection of persisted job state.

use clap::{Parser, Subcommand};
use ripple_fetch::config::{load_config_with_hash, Config};
use ripple_fetch::policy::PolicyCache;
use ripple_fetch::ratelimit::DomainRateLimiter;
use ripple_fetch::storage::{open_store, PolicyStore, SqliteStore, StateStore};
use ripple_fetch::{parse_target, FetchClient, FetchContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Ripple-Fetch: a polite fetch and incremental-state engine
///
/// Fetches pages while respecting robots.txt and per-domain rate limits,
/// and keeps job cursors, seen items and failed URLs in SQLite.
#[derive(Parser, Debug)]
#[command(name = "ripple-fetch")]
#[command(version)]
#[command(about = "A polite fetch and incremental-state engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG")]
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
    /// Show the robots.txt decision for a URL
    Check {
        url: String,
    },

    /// Fetch one URL politely and report the outcome
    Fetch {
        url: String,

        /// Record the outcome in this job's failure ledger
        #[arg(long)]
        job: Option<String>,

        /// Write the response body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a job's cursor, seen-item count and failures
    State {
        job: String,
    },

    /// List a job's failed URLs
    Failures {
        job: String,

        /// Include failures that were later resolved
        #[arg(long)]
        all: bool,
    },

    /// List every job with persisted state
    Jobs,

    /// Delete all persisted state of a job
    Reset {
        job: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    cfg
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => Config::default(),
    };

    match cli.command {
        Command::Check { url } => handle_check(&config, &url).await?,
        Command::Fetch { url, job, output } => {
            handle_fetch(&config, &url, job, output.as_deref()).await?
        }
        Command::State { job } => handle_state(&config, &job)?,
        Command::Failures { job, all } => handle_failures(&config, &job, all)?,
        Command::Jobs => handle_jobs(&config)?,
        Command::Reset { job } => handle_reset(&config, &job)?,
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_fetch=info,warn"),
            1 => EnvFilter::new("ripple_fetch=debug,info"),
            2 => EnvFilter::new("ripple_fetch=trace,debug"),
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

fn open_state(config: &Config) -> Result<Arc<SqliteStore>, Box<dyn std::error::Error>> {
    let store = open_store(Path::new(&config.storage.database_path))?;
    Ok(Arc::new(store))
}

fn policy_cache(
    config: &Config,
    store: Arc<SqliteStore>,
) -> Result<PolicyCache, Box<dyn std::error::Error>> {
    let store: Arc<dyn PolicyStore> = store;
    Ok(PolicyCache::new(config.policy.clone(), &config.fetch)?.with_store(store))
}

/// Handles `check`: shows how robots.txt treats a URL
async fn handle_check(config: &Config, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (url, domain) = parse_target(url)?;
    let cache = policy_cache(config, open_state(config)?)?;
    let decision = cache.check(&url, cache.agent()).await;

    println!("URL:     {}", url);
    println!("Agent:   {}", cache.agent());
    println!("Allowed: {}", if decision.allowed { "yes" } else { "no" });
    match &decision.rule {
        Some(rule) => println!("Rule:    {}", rule),
        None => println!("Rule:    (none matched)"),
    }
    if let Some(group) = &decision.group {
        println!("Group:   User-agent: {}", group);
    }
    if let Some(delay) = decision.crawl_delay {
        println!("Delay:   {}s between requests to {}", delay, domain);
    }
    match decision.source {
        Some(source) => println!("Source:  {}", source),
        None => println!("Source:  enforcement disabled"),
    }

    Ok(())
}

/// Handles `fetch`: one polite fetch, optionally recorded for a job
async fn handle_fetch(
    config: &Config,
    url: &str,
    job: Option<String>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_state(config)?;
    let limiter = Arc::new(DomainRateLimiter::from_config(&config.fetch, &config.domains));
    let policy = Arc::new(policy_cache(config, Arc::clone(&store))?);
    let client = FetchClient::with_parts(config, limiter, policy)?;

    let cancel = CancellationToken::new();
    let ctx = FetchContext {
        job_name: job.clone(),
        cancel: cancel.clone(),
    };
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling fetch");
            cancel.cancel();
        }
    });

    let outcome = client.fetch(url, &ctx).await?;

    println!("Status:   {}", outcome.status);
    if let Some(code) = outcome.http_status {
        println!("HTTP:     {}", code);
    }
    println!("Attempts: {}", outcome.attempts);
    println!("Elapsed:  {:.2?}", outcome.elapsed);
    if let Some(final_url) = &outcome.final_url {
        println!("Final:    {}", final_url);
    }
    if let Some(error) = &outcome.error {
        println!("Error:    {}", error);
    }

    if let Some(body) = &outcome.body {
        match output {
            Some(path) => {
                std::fs::write(path, body)?;
                println!("Body:     {} bytes written to {}", body.len(), path.display());
            }
            None => println!("Body:     {} bytes", body.len()),
        }
    }

    if let Some(job) = &job {
        outcome.record(store.as_ref(), job, url)?;
    }

    Ok(())
}

/// Handles `state`: summary of one job
fn handle_state(config: &Config, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_state(config)?;
    let summary = store.job_summary(job)?;

    println!("Job: {}", summary.job_name);
    match (&summary.cursor, summary.cursor_updated_at) {
        (Some(cursor), Some(at)) => println!("  Cursor:   {} (updated {})", cursor, at),
        (Some(cursor), None) => println!("  Cursor:   {}", cursor),
        _ => println!("  Cursor:   (none)"),
    }
    println!("  Seen:     {}", summary.seen_items);
    println!("  Failures: {} open, {} resolved", summary.open_failures, summary.resolved_failures);

    Ok(())
}

/// Handles `failures`: the failed-URL ledger of a job
fn handle_failures(config: &Config, job: &str, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_state(config)?;
    let entries = if all {
        store.failure_history(job)?
    } else {
        store.list_failures(job)?
    };

    if entries.is_empty() {
        println!("No failures recorded for {}", job);
        return Ok(());
    }

    for entry in &entries {
        let state = match entry.resolved_at {
            Some(at) => format!("resolved {}", at),
            None => "open".to_string(),
        };
        println!(
            "{}  retries={}  last={}  [{}]  {}",
            entry.url, entry.retry_count, entry.last_attempt_at, state, entry.last_error
        );
    }

    Ok(())
}

/// Handles `jobs`: every job with persisted state
fn handle_jobs(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_state(config)?;
    for job in store.list_jobs()? {
        println!("{}", job);
    }
    Ok(())
}

/// Handles `reset`: drops a job's cursor, seen items and failures
fn handle_reset(config: &Config, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_state(config)?;
    store.reset_job(job)?;
    println!("✓ State of job {} deleted", job);
    Ok(())
}
