use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, ValueEnum};
use pitwall_core::{Mode, Registry};
use pitwall_store::{JolpicaGateway, PgStore};
use pitwall_sync::{PlanRequest, Planner, RunSummary, SyncConfig, TaskStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    PreSeason,
    PostRace,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::PreSeason => Mode::PreSeason,
            ModeArg::PostRace => Mode::PostRace,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pitwall")]
#[command(about = "Motorsport statistics sync engine")]
struct Cli {
    /// Run all entities of one loading strategy.
    #[arg(long, value_enum, conflicts_with = "entity")]
    mode: Option<ModeArg>,

    /// Sync a single entity (e.g. driver, round, race_result).
    #[arg(long)]
    entity: Option<String>,

    /// Season year; defaults to the current year.
    #[arg(long)]
    year: Option<i32>,

    /// Specific round number (round-scoped entities only).
    #[arg(long)]
    round: Option<i32>,

    /// Run even when the watermark says nothing is due.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.mode.is_none() && cli.entity.is_none() {
        bail!("select --mode or --entity");
    }

    let config = SyncConfig::from_env();
    let registry = Registry::builtin().context("building entity registry")?;

    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    store
        .ensure_schema()
        .await
        .context("ensuring metadata schema")?;
    pitwall_store::MetadataStore::provision(store.as_ref(), &registry)
        .await
        .context("provisioning sync state")?;

    let gateway = Arc::new(
        JolpicaGateway::new(config.gateway_config()).context("building source gateway")?,
    );

    let planner = Planner::new(
        registry,
        gateway,
        store.clone(),
        store.clone(),
        store,
    )
    .with_timing(config.result_buffer(), config.stale_after());

    let request = PlanRequest {
        mode: cli.mode.map(Mode::from),
        entity: cli.entity,
        year: cli.year.unwrap_or_else(|| Utc::now().year()),
        round: cli.round,
        force: cli.force,
    };

    let summary = planner.run(&request).await.context("running sync")?;
    print_summary(&summary);

    Ok(ExitCode::from(summary.exit_code() as u8))
}

fn print_summary(summary: &RunSummary) {
    println!(
        "sync run for {}: {} succeeded, {} failed, {} skipped",
        summary.year, summary.succeeded, summary.failed, summary.skipped
    );
    for detail in &summary.details {
        let status = match detail.status {
            TaskStatus::Success => "ok",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "skipped",
        };
        match &detail.error {
            Some(error) => println!(
                "  {:22} {:8} {:>6} records  {}",
                detail.entity, status, detail.records, error
            ),
            None => println!(
                "  {:22} {:8} {:>6} records  {}s",
                detail.entity, status, detail.records, detail.duration_seconds
            ),
        }
    }
}
