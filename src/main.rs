use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Instrument;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod config;
mod drive;
mod error;
mod evaluator;
mod google;
mod ingest;
mod models;
mod occupancy;
mod report;
mod sheets;
mod telegram;
#[cfg(test)]
mod testing;

use crate::config::{EvaluateConfig, IngestConfig, INGEST_SOURCES};
use crate::drive::DriveClient;
use crate::google::GoogleSession;
use crate::sheets::SheetsClient;
use crate::telegram::TelegramBot;

#[derive(Parser)]
#[command(name = "occupancy-alerts")]
#[command(about = "Hospital bed occupancy ingest and alerting jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the drive folder's CSV extracts into the shared spreadsheet
    Ingest,
    /// Notify on occupancy breaches and append them to the alert log
    Evaluate,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();
}

async fn run_ingest() -> anyhow::Result<()> {
    let config = IngestConfig::from_env().context("invalid ingest configuration")?;
    let session = GoogleSession::connect(&config.credentials)
        .await
        .context("failed to authenticate with Google")?;

    let drive = DriveClient::new(&session);
    let sheets = SheetsClient::new(&session);
    let report = ingest::ingest(
        &drive,
        &sheets,
        &config.folder_id,
        &config.spreadsheet_name,
        &INGEST_SOURCES,
    )
    .await?;

    print!("{}", report::ingest_summary(&report));
    Ok(())
}

async fn run_evaluate() -> anyhow::Result<()> {
    let config = EvaluateConfig::from_env().context("invalid evaluate configuration")?;
    let session = GoogleSession::connect(&config.credentials)
        .await
        .context("failed to authenticate with Google")?;

    let sheets = SheetsClient::new(&session);
    let messenger = TelegramBot::new(session.http().clone(), config.telegram.clone());
    let report = evaluator::evaluate(
        &sheets,
        &messenger,
        &config.spreadsheet_name,
        &config.policy,
        chrono::Utc::now(),
    )
    .await?;

    print!("{}", report::evaluation_summary(&report));
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let run_id = uuid::Uuid::new_v4();
    match cli.command {
        Commands::Ingest => {
            run_ingest()
                .instrument(tracing::info_span!("ingest", %run_id))
                .await?
        }
        Commands::Evaluate => {
            run_evaluate()
                .instrument(tracing::info_span!("evaluate", %run_id))
                .await?
        }
    }

    Ok(())
}
