//! Run scheduler.
//!
//! Fires the pipeline on a cron cadence and accepts manual triggers. Only one
//! run is in flight per process; the file lock covers other processes.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::engine::{CancelFlag, RunContext};
use super::pipeline::{Pipeline, RunSummary};

// ============================================================================
// Scheduler State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Scheduler status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

// ============================================================================
// Run Scheduler
// ============================================================================

pub struct RunScheduler {
    pipeline: Arc<Pipeline>,
    schedule: Schedule,
    cancel: CancelFlag,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl RunScheduler {
    /// Create a scheduler for a six-field cron expression (UTC).
    pub fn new(pipeline: Arc<Pipeline>, cron_expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .with_context(|| format!("Invalid cron expression: {}", cron_expr))?;
        Ok(Self {
            pipeline,
            schedule,
            cancel: CancelFlag::new(),
            status: Arc::new(RwLock::new(SchedulerStatus {
                state: SchedulerState::Idle,
                last_run_at: None,
                last_run_id: None,
                next_run_at: None,
                error_message: None,
            })),
        })
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    pub async fn state(&self) -> SchedulerState {
        self.status.read().await.state
    }

    /// First fire time strictly after `after`.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Run now for `as_of`.
    pub async fn trigger(&self, as_of: NaiveDate) -> Result<RunSummary> {
        {
            let mut status = self.status.write().await;
            match status.state {
                SchedulerState::Running => {
                    return Err(anyhow::anyhow!("A run is already in progress"))
                }
                SchedulerState::Stopped => return Err(anyhow::anyhow!("Scheduler is stopped")),
                SchedulerState::Idle => {}
            }
            status.state = SchedulerState::Running;
            status.error_message = None;
        }

        info!(as_of = %as_of, "Triggered run");
        let ctx = RunContext::new(as_of, Utc::now());
        let result = self.pipeline.run(ctx, self.cancel.clone()).await;

        let mut status = self.status.write().await;
        if status.state == SchedulerState::Running {
            status.state = SchedulerState::Idle;
        }
        match &result {
            Ok(summary) => {
                status.last_run_at = Some(ctx.generated_at);
                status.last_run_id = Some(summary.run_id.clone());
            }
            Err(e) => status.error_message = Some(format!("{:#}", e)),
        }
        result
    }

    /// Fire on every schedule tick until stopped or interrupted.
    ///
    /// A failed run is logged and the loop continues; the previous snapshot
    /// stays published.
    pub async fn run_forever(&self) -> Result<()> {
        info!(
            next = ?self.next_run_after(Utc::now()),
            "Scheduler started"
        );

        loop {
            if self.state().await == SchedulerState::Stopped {
                break;
            }
            let now = Utc::now();
            let Some(next) = self.next_run_after(now) else {
                warn!("Schedule has no upcoming fire times");
                break;
            };
            self.status.write().await.next_run_at = Some(next);
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.trigger(next.date_naive()).await {
                        Ok(summary) => info!(
                            run_id = %summary.run_id,
                            leaders = summary.leaders.len(),
                            "Scheduled run complete"
                        ),
                        Err(e) => error!(error = %format!("{:#}", e), "Scheduled run failed"),
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for shutdown signal")?;
                    info!("Shutdown signal received");
                    self.stop().await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop scheduling and cancel an in-flight run at its next chunk boundary.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut status = self.status.write().await;
        status.state = SchedulerState::Stopped;
        status.next_run_at = None;
        info!("Run scheduler stopped");
    }
}
