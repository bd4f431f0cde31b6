//! Output records and reports.
//!
//! Every published file goes through the typed records here: one canonical
//! field name per value, `symbol` first, numbers as JSON numbers. The legacy
//! capitalized pattern flags exist only in [`LegacyScreenerRecord`], which
//! callers opt into at the boundary.

use chrono::{DateTime, NaiveDate, Utc};
use leader_common::util::round_to;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

use super::engine::{Exclusion, RunOutput, ScreenerRecords, TickerEvaluation};
use crate::error::ExclusionReason;
use crate::financial::FinancialMetricSet;
use crate::indicators::IndicatorSet;
use crate::pattern::{PatternKind, PatternResult};
use crate::ranking::{CompositeScore, TopsisRankEntry};
use crate::signals::SignalEvent;
use crate::store::{layout, SnapshotBundle};

// ============================================================================
// Envelope
// ============================================================================

/// The JSON contract every screener file follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub last_updated: DateTime<Utc>,
    pub total_count: usize,
}

impl<T> Envelope<T> {
    pub fn new(data: Vec<T>, last_updated: DateTime<Utc>) -> Self {
        Self {
            success: true,
            total_count: data.len(),
            data,
            last_updated,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Entry of a rule-based screener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerRecord {
    pub symbol: String,
    pub signal_date: NaiveDate,
    pub sector: Option<String>,
    pub close: f64,
    pub rs_score: f64,
    pub rs_new_high: bool,
    pub trend_template_count: u8,
    pub volume_ratio: Option<f64>,
    pub momentum_20d: f64,
    pub met_count: u8,
    pub total_percentile: f64,
    pub vcp_detected: bool,
    pub vcp_confidence: f64,
    pub cup_with_handle_detected: bool,
    pub cup_with_handle_confidence: f64,
}

impl ScreenerRecord {
    pub fn new(
        eval: &TickerEvaluation,
        composite: &CompositeScore,
        signal_date: NaiveDate,
    ) -> Self {
        let ind = &eval.indicators;
        let pattern = |kind| {
            eval.pattern(kind)
                .map(|p| (p.detected, p.confidence))
                .unwrap_or((false, 0.0))
        };
        let (vcp_detected, vcp_confidence) = pattern(PatternKind::VolatilityContraction);
        let (cup_with_handle_detected, cup_with_handle_confidence) =
            pattern(PatternKind::CupWithHandle);

        Self {
            symbol: eval.symbol.clone(),
            signal_date,
            sector: eval.sector.clone(),
            close: round_to(ind.close, 4),
            rs_score: round_to(ind.rs_score, 4),
            rs_new_high: ind.rs_new_high,
            trend_template_count: ind.trend_template_count(),
            volume_ratio: ind.volume_ratio.map(|r| round_to(r, 4)),
            momentum_20d: round_to(ind.momentum_20d, 4),
            met_count: eval.financial.met_count,
            total_percentile: round_to(composite.total_percentile, 4),
            vcp_detected,
            vcp_confidence,
            cup_with_handle_detected,
            cup_with_handle_confidence,
        }
    }

    pub fn signal(&self, screener: &str) -> SignalEvent {
        let metrics = BTreeMap::from([
            ("rs_score".to_string(), self.rs_score),
            ("total_percentile".to_string(), self.total_percentile),
            ("met_count".to_string(), self.met_count as f64),
            ("trend_template_count".to_string(), self.trend_template_count as f64),
            ("vcp_confidence".to_string(), self.vcp_confidence),
            ("cup_with_handle_confidence".to_string(), self.cup_with_handle_confidence),
        ]);
        SignalEvent {
            symbol: self.symbol.clone(),
            screener: screener.to_string(),
            signal_date: self.signal_date,
            metrics,
        }
    }
}

/// Entry of the Top-N leader list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub symbol: String,
    pub rank: usize,
    pub topsis_score: f64,
    pub signal_date: NaiveDate,
    pub composite_rank: usize,
    pub distance_to_ideal: f64,
    pub distance_to_anti_ideal: f64,
    /// Raw criterion values behind the score
    pub criteria: BTreeMap<String, f64>,
}

impl LeaderRecord {
    pub fn new(entry: &TopsisRankEntry, signal_date: NaiveDate) -> Self {
        Self {
            symbol: entry.symbol.clone(),
            rank: entry.rank,
            topsis_score: entry.topsis_score,
            signal_date,
            composite_rank: entry.composite_rank,
            distance_to_ideal: entry.distance_to_ideal,
            distance_to_anti_ideal: entry.distance_to_anti_ideal,
            criteria: entry.criteria.clone(),
        }
    }

    pub fn signal(&self, screener: &str) -> SignalEvent {
        let mut metrics = self.criteria.clone();
        metrics.insert("topsis_score".to_string(), self.topsis_score);
        metrics.insert("rank".to_string(), self.rank as f64);
        SignalEvent {
            symbol: self.symbol.clone(),
            screener: screener.to_string(),
            signal_date: self.signal_date,
            metrics,
        }
    }
}

// ============================================================================
// Legacy Aliases
// ============================================================================

/// [`ScreenerRecord`] with the historical `VCP_Pattern` and
/// `Cup_Handle_Pattern` flag names, for consumers that still expect them.
pub struct LegacyScreenerRecord<'a>(pub &'a ScreenerRecord);

impl Serialize for LegacyScreenerRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let r = self.0;
        let mut s = serializer.serialize_struct("ScreenerRecord", 15)?;
        s.serialize_field("symbol", &r.symbol)?;
        s.serialize_field("signal_date", &r.signal_date)?;
        s.serialize_field("sector", &r.sector)?;
        s.serialize_field("close", &r.close)?;
        s.serialize_field("rs_score", &r.rs_score)?;
        s.serialize_field("rs_new_high", &r.rs_new_high)?;
        s.serialize_field("trend_template_count", &r.trend_template_count)?;
        s.serialize_field("volume_ratio", &r.volume_ratio)?;
        s.serialize_field("momentum_20d", &r.momentum_20d)?;
        s.serialize_field("met_count", &r.met_count)?;
        s.serialize_field("total_percentile", &r.total_percentile)?;
        s.serialize_field("VCP_Pattern", &r.vcp_detected)?;
        s.serialize_field("vcp_confidence", &r.vcp_confidence)?;
        s.serialize_field("Cup_Handle_Pattern", &r.cup_with_handle_detected)?;
        s.serialize_field("cup_with_handle_confidence", &r.cup_with_handle_confidence)?;
        s.end()
    }
}

/// Re-serialize a canonical screener envelope with legacy flag names.
pub fn to_legacy_json(envelope: &Envelope<ScreenerRecord>) -> serde_json::Result<String> {
    let legacy = Envelope {
        success: envelope.success,
        data: envelope.data.iter().map(LegacyScreenerRecord).collect(),
        last_updated: envelope.last_updated,
        total_count: envelope.total_count,
    };
    serde_json::to_string_pretty(&legacy)
}

// ============================================================================
// Manifest
// ============================================================================

/// Run-level facts published next to the screener files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub as_of: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub config_version: String,
    pub universe_size: usize,
    pub evaluated: usize,
    pub exclusions: Vec<Exclusion>,
    pub candidate_count: usize,
    pub degenerate_criteria: Vec<String>,
    /// Candidates left out of the ranking for a missing criterion value
    #[serde(default)]
    pub incomplete_candidates: Vec<String>,
    /// Entry count per screener
    pub screeners: BTreeMap<String, usize>,
    /// Name of the screener holding the Top-N list
    pub leaders_screener: Option<String>,
}

impl RunManifest {
    pub fn new(output: &RunOutput, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            as_of: output.context.as_of,
            generated_at: output.context.generated_at,
            config_version: output.config_version.clone(),
            universe_size: output.universe_size,
            evaluated: output.evaluations.len(),
            exclusions: output.exclusions.clone(),
            candidate_count: output.ranking.candidate_count,
            degenerate_criteria: output.ranking.degenerate_criteria.clone(),
            incomplete_candidates: output.ranking.incomplete_candidates.clone(),
            screeners: output.screeners.iter().map(|s| (s.name.clone(), s.records.len())).collect(),
            leaders_screener: output.leaders().map(|s| s.name.clone()),
        }
    }

    pub fn excluded_for(&self, reason: ExclusionReason) -> usize {
        self.exclusions.iter().filter(|e| e.reason == reason).count()
    }
}

// ============================================================================
// Report Format
// ============================================================================

/// Human-facing report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Summary of a published run, rendered from its manifest and files.
pub struct RunReport<'a> {
    manifest: &'a RunManifest,
    leaders: &'a [LeaderRecord],
    signals: &'a [SignalEvent],
}

impl<'a> RunReport<'a> {
    pub fn new(
        manifest: &'a RunManifest,
        leaders: &'a [LeaderRecord],
        signals: &'a [SignalEvent],
    ) -> Self {
        Self {
            manifest,
            leaders,
            signals,
        }
    }

    pub fn generate(&self, format: ReportFormat) -> serde_json::Result<String> {
        match format {
            ReportFormat::Markdown => Ok(self.to_markdown()),
            ReportFormat::Json => serde_json::to_string_pretty(self.manifest),
        }
    }

    pub fn to_markdown(&self) -> String {
        let m = self.manifest;
        let mut md = String::new();

        md.push_str(&format!(
            "# Leader Screener Run\n\n\
             **Run**: {}\n**As of**: {}\n**Generated**: {}\n**Config**: v{}\n\n",
            m.run_id,
            m.as_of,
            m.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            m.config_version
        ));

        md.push_str("## Funnel\n\n");
        md.push_str(&format!("- **Universe**: {}\n", m.universe_size));
        md.push_str(&format!(
            "- **Data unavailable**: {}\n",
            m.excluded_for(ExclusionReason::UpstreamDataUnavailable)
        ));
        md.push_str(&format!(
            "- **Insufficient history**: {}\n",
            m.excluded_for(ExclusionReason::InsufficientHistory)
        ));
        md.push_str(&format!("- **Evaluated**: {}\n", m.evaluated));
        md.push_str(&format!("- **Ranking candidates**: {}\n", m.candidate_count));
        if !m.degenerate_criteria.is_empty() {
            md.push_str(&format!(
                "- **Criteria without variance**: {}\n",
                m.degenerate_criteria.join(", ")
            ));
        }
        if !m.incomplete_candidates.is_empty() {
            md.push_str(&format!(
                "- **Unranked (missing criterion)**: {}\n",
                m.incomplete_candidates.join(", ")
            ));
        }
        md.push('\n');

        md.push_str("## Screeners\n\n| Screener | Entries |\n|----------|---------|\n");
        for (name, count) in &m.screeners {
            md.push_str(&format!("| {} | {} |\n", name, count));
        }
        md.push('\n');

        if !self.leaders.is_empty() {
            let criteria: Vec<&String> = self.leaders[0].criteria.keys().collect();
            md.push_str("## Top Leaders\n\n| Rank | Symbol | TOPSIS |");
            for c in &criteria {
                md.push_str(&format!(" {} |", c));
            }
            md.push_str("\n|------|--------|--------|");
            for _ in &criteria {
                md.push_str("------|");
            }
            md.push('\n');
            for leader in self.leaders {
                md.push_str(&format!(
                    "| {} | {} | {:.4} |",
                    leader.rank, leader.symbol, leader.topsis_score
                ));
                for c in &criteria {
                    let value = leader.criteria.get(*c).copied().unwrap_or(0.0);
                    md.push_str(&format!(" {:.2} |", value));
                }
                md.push('\n');
            }
            md.push('\n');
        }

        let fresh: Vec<&SignalEvent> =
            self.signals.iter().filter(|s| s.signal_date == m.as_of).collect();
        md.push_str(&format!("## New Signals ({})\n\n", fresh.len()));
        if fresh.is_empty() {
            md.push_str("_None today._\n");
        }
        for s in fresh {
            md.push_str(&format!("- **{}** ({})\n", s.symbol, s.screener));
        }

        md
    }
}

// ============================================================================
// Snapshot Bundle
// ============================================================================

/// Serialize a run into the files that make up its snapshot.
pub fn bundle(
    output: &RunOutput,
    run_id: &str,
    markdown: bool,
) -> serde_json::Result<SnapshotBundle> {
    let last_updated = output.context.generated_at;
    let manifest = RunManifest::new(output, run_id);
    let mut files = BTreeMap::new();

    for screener in &output.screeners {
        let json = match &screener.records {
            ScreenerRecords::Rules(records) => {
                serde_json::to_string_pretty(&Envelope::new(records.clone(), last_updated))?
            }
            ScreenerRecords::Leaders(records) => {
                serde_json::to_string_pretty(&Envelope::new(records.clone(), last_updated))?
            }
        };
        files.insert(layout::screener_file(&screener.name), json.into_bytes());
    }

    let evaluations = &output.evaluations;
    let indicators: Vec<&IndicatorSet> = evaluations.iter().map(|e| &e.indicators).collect();
    let patterns: Vec<&PatternResult> = evaluations.iter().flat_map(|e| &e.patterns).collect();
    let financials: Vec<&FinancialMetricSet> = evaluations.iter().map(|e| &e.financial).collect();
    files.insert(
        layout::INDICATORS.to_string(),
        serde_json::to_string_pretty(&Envelope::new(indicators, last_updated))?.into_bytes(),
    );
    files.insert(
        layout::PATTERNS.to_string(),
        serde_json::to_string_pretty(&Envelope::new(patterns, last_updated))?.into_bytes(),
    );
    files.insert(
        layout::FINANCIALS.to_string(),
        serde_json::to_string_pretty(&Envelope::new(financials, last_updated))?.into_bytes(),
    );

    let signals = output.signal_events();
    files.insert(
        layout::COMPOSITE.to_string(),
        serde_json::to_string_pretty(&Envelope::new(output.composite.clone(), last_updated))?
            .into_bytes(),
    );
    files.insert(
        layout::SIGNALS.to_string(),
        serde_json::to_string_pretty(&Envelope::new(signals.clone(), last_updated))?.into_bytes(),
    );
    files.insert(
        layout::MANIFEST.to_string(),
        serde_json::to_string_pretty(&manifest)?.into_bytes(),
    );

    if markdown {
        let leaders = output.leaders().map(|s| s.leader_records()).unwrap_or_default();
        let report = RunReport::new(&manifest, &leaders, &signals);
        files.insert(layout::REPORT.to_string(), report.to_markdown().into_bytes());
    }

    Ok(SnapshotBundle {
        run_id: run_id.to_string(),
        files,
    })
}
