//! taxosync: reconcile a remote taxonomy with an upstream SKOS graph.
//!
//! Reports and validation errors go to stdout as JSON; logs go to stderr
//! (or `LOG_FILE`).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taxosync_core::{logging, Error, SyncRequest};
use taxosync_engine::{SyncConfig, SyncEngine};
use taxosync_remote::ContentfulClient;

/// Exit code when the payload fails validation.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "taxosync")]
#[command(author, version, about = "Reconcile a Contentful taxonomy with a SKOS graph")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the graph, then create, update, link and delete until the
    /// remote matches it
    Sync {
        /// JSON document of the form {"graph": [...]} ("-" reads stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check the graph against the remote's limits without changing anything
    Validate {
        /// JSON document of the form {"graph": [...]} ("-" reads stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Delete every concept and concept scheme in the organization
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _file_guard = init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!({ logging::SUBSYSTEM } = "cli", error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taxosync_cli=info,taxosync_engine=info,taxosync_remote=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("taxosync.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        { logging::SUBSYSTEM } = "cli",
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Sync { input } => {
            let request = read_request(&input)?;
            let engine = build_engine()?;
            match engine.sync(&request).await {
                Ok(report) => {
                    info!(
                        { logging::SUBSYSTEM } = "cli",
                        { logging::RUN_ID } = %report.run_id,
                        failures = report.failures.len(),
                        "Sync finished"
                    );
                    print_json(&report)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(Error::Validation(errors)) => reject(&errors),
                Err(e) => Err(e).context("sync aborted"),
            }
        }
        Commands::Validate { input } => {
            let request = read_request(&input)?;
            let errors = build_engine()?.validate(&request).await?;
            if errors.is_empty() {
                print_json(&errors)?;
                Ok(ExitCode::SUCCESS)
            } else {
                reject(&errors)
            }
        }
        Commands::Purge { yes } => {
            if !yes {
                anyhow::bail!("purge deletes the whole taxonomy; pass --yes to confirm");
            }
            let summary = build_engine()?.purge().await?;
            print_json(&summary)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_engine() -> anyhow::Result<SyncEngine<ContentfulClient>> {
    let client = ContentfulClient::from_env().context("remote configuration")?;
    Ok(SyncEngine::new(client, SyncConfig::from_env()))
}

fn reject(errors: &[String]) -> anyhow::Result<ExitCode> {
    error!(
        { logging::SUBSYSTEM } = "cli",
        error_count = errors.len(),
        "Graph rejected by validation"
    );
    print_json(&errors)?;
    Ok(ExitCode::from(EXIT_REJECTED))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a sync document from `path`, or stdin when `path` is `-`.
fn read_request(path: &Path) -> anyhow::Result<SyncRequest> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading graph from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    parse_request(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn parse_request(raw: &str) -> anyhow::Result<SyncRequest> {
    Ok(serde_json::from_str(raw)?)
}
