use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use jz_core::DATE_FORMAT;
use jz_sync::{run_scheduler_until_shutdown, ReportSummary, SyncConfig, SyncPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jz")]
#[command(about = "Junior Zone job digest: ingest postings, build the daily message and exports")]
struct Cli {
    /// Overrides JZ_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read `<dir>/<term>.json` instead of calling the API.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch postings and append the accepted ones to the day's export.
    Ingest {
        /// Calendar day the window ends on (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,
    },
    /// Build the message and report exports from the day's records.
    Report {
        /// Generation timestamp (YYYY-MM-DDTHH:MM:SS). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
    /// Ingest then report.
    Run,
    /// Run on the configured morning/afternoon schedule until Ctrl-C.
    Schedule,
}

fn init_tracing() -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = std::env::var("JZ_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(&level)
                .with_context(|| format!("invalid log level/filter '{level}'"))?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("installing tracing subscriber: {err}"))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("expected YYYY-MM-DD, got '{value}'"))
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .with_context(|| format!("expected YYYY-MM-DDTHH:MM:SS, got '{value}'"))
}

/// Prints the message, then fails if the export could not be archived.
fn deliver(report: &ReportSummary) -> Result<()> {
    println!("{}", report.message);
    if let Some(sheet) = report.archive_conflict() {
        anyhow::bail!(
            "archive already has a sheet named `{sheet}`; message kept at {}",
            report.message_path.display()
        );
    }
    Ok(())
}

fn build_pipeline(cli: &Cli) -> Result<SyncPipeline> {
    let mut config = SyncConfig::from_env();
    if let Some(data_dir) = &cli.data_dir {
        if std::env::var_os("JZ_LEDGER_PATH").is_none() {
            config.ledger_path = data_dir.join("job_ids.csv");
        }
        config.data_dir = data_dir.clone();
    }

    let pipeline = SyncPipeline::new(config)?;
    Ok(match &cli.fixtures {
        Some(dir) => pipeline.with_source(Box::new(jz_adapters::FixtureSource::new(dir))),
        None => pipeline,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let pipeline = build_pipeline(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Ingest { date } => {
            let today = match date {
                Some(value) => parse_date(&value)?,
                None => Local::now().date_naive(),
            };
            let summary = pipeline.run_ingest(today).await?;
            eprintln!(
                "ingest complete: run_id={} fetched={} accepted={} duplicates={} export={}",
                summary.run_id,
                summary.counts.fetched,
                summary.counts.accepted,
                summary.counts.duplicates,
                summary.daily_export.display()
            );
        }
        Commands::Report { at } => {
            let generated_at = match at {
                Some(value) => parse_timestamp(&value)?,
                None => Local::now().naive_local(),
            };
            deliver(&pipeline.run_report(generated_at)?)?;
        }
        Commands::Run => {
            let summary = pipeline.run_once(Local::now().naive_local()).await?;
            deliver(&summary.report)?;
        }
        Commands::Schedule => {
            run_scheduler_until_shutdown(Arc::new(pipeline)).await?;
        }
    }

    Ok(())
}
