//! Screening pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────────────────────┐   ┌────────────┐
//! │ MarketData   │──▶│ ScreenerEngine                           │──▶│ Snapshot   │
//! │ Source       │   │  per ticker (rayon, chunked):            │   │ Store      │
//! └──────────────┘   │   align → indicators → patterns          │   │  staging → │
//!                    │   fundamentals                            │   │  runs/ →   │
//!                    │  reducers: composite → TOPSIS → profiles │   │  LATEST    │
//!                    └──────────────────────────────────────────┘   └────────────┘
//! ```
//!
//! [`Pipeline`] owns one run end to end; [`RunScheduler`] fires it on a cron
//! cadence.

pub mod config;
pub mod engine;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod scheduler;

pub use config::{CalendarConfig, ExecutionConfig, PipelineConfig, CONFIG_VERSION};
pub use engine::{
    CancelFlag, Exclusion, PreviousSignals, RunContext, RunOutput, ScreenerEngine, ScreenerOutput,
    ScreenerRecords, TickerEvaluation,
};
pub use pipeline::{Pipeline, RunSummary};
pub use profile::{default_profiles, ProfileKind, ScreenerProfile, ScreenerRule};
pub use report::{
    to_legacy_json, Envelope, LeaderRecord, LegacyScreenerRecord, ReportFormat, RunManifest,
    RunReport, ScreenerRecord,
};
pub use scheduler::{RunScheduler, SchedulerState, SchedulerStatus};
