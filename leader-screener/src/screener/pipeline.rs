//! One end-to-end run: lock, fetch, screen, publish.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use leader_common::logging::generate_run_token;
use leader_common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::config::PipelineConfig;
use super::engine::{CancelFlag, RunContext, ScreenerEngine};
use super::report;
use crate::data::{MarketDataSource, Universe};
use crate::error::ScreenerError;
use crate::store::SnapshotStore;

/// Outcome of a published run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub as_of: NaiveDate,
    pub universe_size: usize,
    pub evaluated: usize,
    pub excluded: usize,
    /// Top-N symbols in rank order
    pub leaders: Vec<String>,
    pub path: PathBuf,
}

/// Wires a data source, the engine, and the snapshot store together.
pub struct Pipeline {
    engine: Arc<ScreenerEngine>,
    store: SnapshotStore,
    source: Arc<dyn MarketDataSource>,
    markdown_report: bool,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: SnapshotStore,
        source: Arc<dyn MarketDataSource>,
    ) -> Self {
        Self {
            engine: Arc::new(ScreenerEngine::new(config)),
            store,
            source,
            markdown_report: true,
        }
    }

    /// Build from the service config, publishing under its snapshot directory.
    pub fn from_config(config: &Config, source: Arc<dyn MarketDataSource>) -> Result<Self> {
        let pipeline = PipelineConfig::load(config).context("Invalid pipeline configuration")?;
        let store =
            SnapshotStore::new(config.storage.snapshot_path(), pipeline.execution.retain_runs);
        Ok(Self::new(pipeline, store, source).with_markdown_report(config.storage.markdown_report))
    }

    pub fn with_markdown_report(mut self, enabled: bool) -> Self {
        self.markdown_report = enabled;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        self.engine.config()
    }

    /// Run the whole pipeline for `ctx` and publish the result.
    ///
    /// Nothing is published unless every stage succeeds; the previous
    /// snapshot stays visible otherwise.
    pub async fn run(&self, ctx: RunContext, cancel: CancelFlag) -> Result<RunSummary> {
        let lock = self.store.lock(ctx.as_of)?;
        info!(
            as_of = %ctx.as_of,
            source = self.source.name(),
            config = %self.engine.config().summary(),
            "Run started"
        );

        let universe = Universe::fetch(self.source.as_ref())
            .await
            .map_err(|e| ScreenerError::UpstreamDataUnavailable {
                symbol: None,
                reason: e.to_string(),
            })?;
        let previous = self.store.previous_signals().context("Failed to read previous signals")?;

        let engine = Arc::clone(&self.engine);
        let output =
            tokio::task::spawn_blocking(move || engine.run(universe, &ctx, &previous, &cancel))
                .await
                .context("Screening task failed")??;

        let run_id = format!(
            "{}-{}-{}",
            ctx.as_of.format("%Y%m%d"),
            ctx.generated_at.format("%H%M%S"),
            generate_run_token()
        );
        let bundle = report::bundle(&output, &run_id, self.markdown_report)
            .context("Failed to serialize run")?;

        let store = self.store.clone();
        let path = tokio::task::spawn_blocking(move || store.publish(&bundle))
            .await
            .context("Publish task failed")??;
        drop(lock);

        let summary = RunSummary {
            run_id,
            as_of: ctx.as_of,
            universe_size: output.universe_size,
            evaluated: output.evaluations.len(),
            excluded: output.exclusions.len(),
            leaders: output.ranking.entries.iter().map(|e| e.symbol.clone()).collect(),
            path,
        };
        info!(
            run_id = %summary.run_id,
            evaluated = summary.evaluated,
            excluded = summary.excluded,
            leaders = summary.leaders.len(),
            "Run published"
        );
        Ok(summary)
    }
}
