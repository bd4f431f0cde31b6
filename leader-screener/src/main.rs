//! Leader Screener - batch screening CLI.
//!
//! Runs the screening pipeline once or on a schedule, and reads the latest
//! published snapshot.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use leader_common::logging::init_logging_with_exclusions;
use leader_common::Config;
use std::path::PathBuf;
use std::sync::Arc;

use leader_screener::screener::report::{
    to_legacy_json, Envelope, ReportFormat, RunReport, ScreenerRecord,
};
use leader_screener::store::layout;
use leader_screener::{
    CancelFlag, JsonDirSource, Pipeline, PipelineConfig, RunContext, RunScheduler, SnapshotStore,
};

#[derive(Parser, Debug)]
#[command(name = "leader-screener")]
#[command(version)]
#[command(about = "Multi-factor leader screening and ranking.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.leader-screener/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline once and publish a snapshot
    Run {
        /// As-of date (YYYY-MM-DD), default: today in UTC
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Run the pipeline on the configured cron schedule
    Schedule,

    /// Signals within N days of the latest run
    Signals {
        #[arg(long, default_value = "1")]
        days: u32,
    },

    /// Top-N leaders of the latest run
    Top,

    /// One screener's list from the latest run
    Latest {
        #[arg(long)]
        screener: String,

        /// Emit legacy VCP_Pattern / Cup_Handle_Pattern field names
        #[arg(long)]
        legacy: bool,
    },

    /// Summary of the latest run
    Report {
        /// Output format (markdown, json)
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_and_validate(cli.config.as_deref())?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    let pipeline_config = PipelineConfig::load(&config).context("Invalid pipeline configuration")?;
    tracing::info!(
        config = %pipeline_config.summary(),
        "Leader Screener v{}",
        env!("CARGO_PKG_VERSION")
    );
    let store = SnapshotStore::new(
        config.storage.snapshot_path(),
        pipeline_config.execution.retain_runs,
    );

    match cli.command {
        Commands::Run { as_of } => {
            let pipeline = pipeline(&config)?;
            let ctx = RunContext::new(as_of.unwrap_or_else(|| Utc::now().date_naive()), Utc::now());
            let summary = pipeline.run(ctx, CancelFlag::new()).await?;
            println!(
                "Published {} ({} evaluated, {} excluded); leaders: {}",
                summary.run_id,
                summary.evaluated,
                summary.excluded,
                summary.leaders.join(", ")
            );
        }
        Commands::Schedule => {
            if !config.schedule.enabled {
                tracing::warn!("Scheduling is disabled in config");
                return Ok(());
            }
            let scheduler =
                RunScheduler::new(Arc::new(pipeline(&config)?), &config.schedule.run_cron)?;
            scheduler.run_forever().await?;
        }
        Commands::Signals { days } => {
            let last_updated = published(&store)?;
            let signals = store.recent_signals(days)?;
            println!("{}", serde_json::to_string_pretty(&Envelope::new(signals, last_updated))?);
        }
        Commands::Top => {
            published(&store)?;
            let top = store.top_stocks()?.context("Latest run has no leaders list")?;
            println!("{}", serde_json::to_string_pretty(&top)?);
        }
        Commands::Latest { screener, legacy } => {
            published(&store)?;
            let bytes = store
                .read_latest(&layout::screener_file(&screener))?
                .with_context(|| format!("No screener named '{}' in latest run", screener))?;
            if legacy {
                let envelope: Envelope<ScreenerRecord> = serde_json::from_slice(&bytes)
                    .context("Legacy field names apply to rule screeners only")?;
                println!("{}", to_legacy_json(&envelope)?);
            } else {
                println!("{}", String::from_utf8_lossy(&bytes));
            }
        }
        Commands::Report { format } => {
            published(&store)?;
            let manifest = store.manifest()?.context("Latest run has no manifest")?;
            let leaders = store.top_stocks()?.map(|e| e.data).unwrap_or_default();
            let signals = store.signals()?;
            println!("{}", RunReport::new(&manifest, &leaders, &signals).generate(format)?);
        }
    }

    Ok(())
}

fn pipeline(config: &Config) -> Result<Pipeline> {
    let source = JsonDirSource::new(config.storage.data_path());
    Pipeline::from_config(config, Arc::new(source))
}

/// `last_updated` of the published snapshot, or an error if none exists.
fn published(store: &SnapshotStore) -> Result<chrono::DateTime<Utc>> {
    store
        .last_updated()?
        .with_context(|| format!("No snapshot published under {}", store.root().display()))
}
