use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rfjd_sync::{RunConfig, RunOutcome, RunPipeline};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rfjd")]
#[command(about = "Remote frontend job digest: fetch, dedupe, email")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every source and deliver one digest of unseen jobs.
    Run(RunArgs),
    /// List registered sources in precedence order.
    Sources,
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Print the email instead of sending it.
    #[arg(long, conflicts_with = "live")]
    dry_run: bool,
    /// Send through SMTP regardless of DRY_RUN.
    #[arg(long)]
    live: bool,
    /// Seen-links file (overrides SEEN_JOBS_FILE).
    #[arg(long, value_name = "PATH")]
    seen_file: Option<PathBuf>,
    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(mut config: RunConfig, args: &RunArgs) -> RunConfig {
    if args.dry_run {
        config.mail.dry_run = true;
    } else if args.live {
        config.mail.dry_run = false;
    }
    if let Some(path) = &args.seen_file {
        config.seen_file = path.clone();
    }
    // stdout carries only the JSON document
    config.mail.preview_to_stderr = args.json;
    config
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = apply_overrides(RunConfig::from_env(), &args);
    let outcome = match RunPipeline::new(config) {
        Ok(pipeline) => pipeline.run_once().await,
        Err(err) => Err(err),
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(category = err.category(), "{err}");
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(ExitCode::SUCCESS);
    }

    match outcome {
        RunOutcome::NothingNew { fetched_total, .. } => {
            println!("No new jobs since last run ({fetched_total} fetched).");
        }
        RunOutcome::Delivered(summary) => {
            for source in &summary.sources {
                match &source.error {
                    Some(err) => println!("  {:<16} FAIL {err}", source.source_id),
                    None => println!("  {:<16} {:>3} jobs", source.source_id, source.fetched),
                }
            }
            println!(
                "run complete: run_id={} fetched={} sent={} duplicates={} already_seen={} mode={} \
                 seen_total={}",
                summary.run_id,
                summary.fetched_total,
                summary.jobs_sent,
                summary.skipped_duplicate,
                summary.skipped_seen,
                summary.delivery_mode,
                summary.seen_total
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await,
        Commands::Sources => {
            for adapter in rfjd_adapters::default_adapters() {
                println!(
                    "{:<16} {:<20} {:?}  {}",
                    adapter.source_id(),
                    adapter.display_name(),
                    adapter.crawlability(),
                    adapter.listing_url()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
