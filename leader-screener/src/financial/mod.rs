//! Financial metric evaluation.
//!
//! Nine fixed conditions over the latest quarterly and annual statements.
//! A condition whose inputs are missing evaluates to `false` and is listed in
//! [`FinancialMetricSet::missing_conditions`]; it never disqualifies the
//! ticker by itself.

use chrono::{Duration, NaiveDate};
use leader_common::util::round_to;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{FinancialPeriod, Fundamentals};
use crate::error::ScreenerError;

// ============================================================================
// Conditions
// ============================================================================

/// The fixed condition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialCondition {
    EpsGrowthQuarterly,
    EpsAcceleration,
    RevenueGrowthQuarterly,
    RevenueAcceleration,
    NetIncomeGrowthQuarterly,
    EpsGrowthAnnual,
    OperatingMarginExpansion,
    ReturnOnEquity,
    DebtRatio,
}

impl FinancialCondition {
    pub const ALL: [FinancialCondition; 9] = [
        Self::EpsGrowthQuarterly,
        Self::EpsAcceleration,
        Self::RevenueGrowthQuarterly,
        Self::RevenueAcceleration,
        Self::NetIncomeGrowthQuarterly,
        Self::EpsGrowthAnnual,
        Self::OperatingMarginExpansion,
        Self::ReturnOnEquity,
        Self::DebtRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EpsGrowthQuarterly => "eps_growth_quarterly",
            Self::EpsAcceleration => "eps_acceleration",
            Self::RevenueGrowthQuarterly => "revenue_growth_quarterly",
            Self::RevenueAcceleration => "revenue_acceleration",
            Self::NetIncomeGrowthQuarterly => "net_income_growth_quarterly",
            Self::EpsGrowthAnnual => "eps_growth_annual",
            Self::OperatingMarginExpansion => "operating_margin_expansion",
            Self::ReturnOnEquity => "return_on_equity",
            Self::DebtRatio => "debt_ratio",
        }
    }
}

impl std::fmt::Display for FinancialCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Threshold table, all values in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialThresholds {
    #[serde(default = "default_eps_growth_min")]
    pub eps_growth_quarterly_min: f64,

    #[serde(default = "default_revenue_growth_min")]
    pub revenue_growth_quarterly_min: f64,

    #[serde(default = "default_net_income_growth_min")]
    pub net_income_growth_quarterly_min: f64,

    #[serde(default = "default_eps_growth_min")]
    pub eps_growth_annual_min: f64,

    /// Required change in operating margin, percentage points
    #[serde(default)]
    pub operating_margin_delta_min: f64,

    #[serde(default = "default_roe_min")]
    pub roe_min: f64,

    /// Liabilities over equity
    #[serde(default = "default_debt_ratio_max")]
    pub debt_ratio_max: f64,

    /// Tolerance when matching a period with the one a year earlier
    #[serde(default = "default_period_match_days")]
    pub period_match_days: i64,
}

impl Default for FinancialThresholds {
    fn default() -> Self {
        Self {
            eps_growth_quarterly_min: default_eps_growth_min(),
            revenue_growth_quarterly_min: default_revenue_growth_min(),
            net_income_growth_quarterly_min: default_net_income_growth_min(),
            eps_growth_annual_min: default_eps_growth_min(),
            operating_margin_delta_min: 0.0,
            roe_min: default_roe_min(),
            debt_ratio_max: default_debt_ratio_max(),
            period_match_days: default_period_match_days(),
        }
    }
}

fn default_eps_growth_min() -> f64 {
    20.0
}

fn default_revenue_growth_min() -> f64 {
    15.0
}

fn default_net_income_growth_min() -> f64 {
    15.0
}

fn default_roe_min() -> f64 {
    15.0
}

fn default_debt_ratio_max() -> f64 {
    150.0
}

fn default_period_match_days() -> i64 {
    45
}

// ============================================================================
// Metric Set
// ============================================================================

/// Evaluated fundamentals for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialMetricSet {
    pub symbol: String,
    /// Latest quarter the metrics refer to
    pub period_end: Option<NaiveDate>,
    pub eps_growth_quarterly: Option<f64>,
    pub eps_growth_prev_quarter: Option<f64>,
    pub revenue_growth_quarterly: Option<f64>,
    pub revenue_growth_prev_quarter: Option<f64>,
    pub net_income_growth_quarterly: Option<f64>,
    pub eps_growth_annual: Option<f64>,
    pub operating_margin_delta: Option<f64>,
    pub roe: Option<f64>,
    pub debt_ratio: Option<f64>,
    pub conditions: BTreeMap<FinancialCondition, bool>,
    pub met_count: u8,
    pub missing_conditions: Vec<FinancialCondition>,
}

impl FinancialMetricSet {
    pub fn is_met(&self, condition: FinancialCondition) -> bool {
        self.conditions.get(&condition).copied().unwrap_or(false)
    }

    /// One `MissingFundamentals` error per condition that lacked inputs.
    pub fn missing_errors(&self) -> impl Iterator<Item = ScreenerError> + '_ {
        self.missing_conditions
            .iter()
            .map(|&condition| ScreenerError::MissingFundamentals {
                symbol: self.symbol.clone(),
                condition,
            })
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Scores fundamentals against [`FinancialThresholds`].
#[derive(Debug, Clone, Default)]
pub struct FinancialEvaluator {
    thresholds: FinancialThresholds,
}

impl FinancialEvaluator {
    pub fn new(thresholds: FinancialThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate with statements published on or before `as_of`.
    pub fn evaluate(
        &self,
        symbol: &str,
        fundamentals: Option<&Fundamentals>,
        as_of: NaiveDate,
    ) -> FinancialMetricSet {
        let f = fundamentals.map(|f| f.normalized(as_of)).unwrap_or_default();
        let t = &self.thresholds;
        let quarters = &f.quarterly;
        let years = &f.annual;

        let q_growth = |idx: usize, field: fn(&FinancialPeriod) -> Option<f64>| {
            let current = quarters.get(idx)?;
            let base = self.year_earlier(quarters, current)?;
            growth(field(current)?, field(base)?)
        };

        let eps_growth_quarterly = q_growth(0, |p| p.eps);
        let eps_growth_prev_quarter = q_growth(1, |p| p.eps);
        let revenue_growth_quarterly = q_growth(0, |p| p.revenue);
        let revenue_growth_prev_quarter = q_growth(1, |p| p.revenue);
        let net_income_growth_quarterly = q_growth(0, |p| p.net_income);

        let eps_growth_annual = years
            .first()
            .and_then(|current| Some((current, self.year_earlier(years, current)?)))
            .and_then(|(current, base)| growth(current.eps?, base.eps?));

        let operating_margin_delta = quarters.first().and_then(|current| {
            let base = self.year_earlier(quarters, current)?;
            Some(current.operating_margin()? - base.operating_margin()?)
        });

        let roe = years.first().and_then(|y| match (y.net_income, y.total_equity) {
            (Some(ni), Some(eq)) if eq > 0.0 => Some(ni / eq * 100.0),
            _ => None,
        });

        // Most recent balance sheet of either kind
        let latest_balance = quarters
            .iter()
            .chain(years.iter())
            .filter(|p| p.total_liabilities.is_some() && p.total_equity.is_some())
            .max_by_key(|p| p.period_end);
        let debt_ratio = latest_balance.and_then(|p| match (p.total_liabilities, p.total_equity) {
            (Some(l), Some(eq)) if eq > 0.0 => Some(l / eq * 100.0),
            _ => None,
        });

        let round = |v: Option<f64>| v.map(|x| round_to(x, 4));
        let eps_growth_quarterly = round(eps_growth_quarterly);
        let eps_growth_prev_quarter = round(eps_growth_prev_quarter);
        let revenue_growth_quarterly = round(revenue_growth_quarterly);
        let revenue_growth_prev_quarter = round(revenue_growth_prev_quarter);
        let net_income_growth_quarterly = round(net_income_growth_quarterly);
        let eps_growth_annual = round(eps_growth_annual);
        let operating_margin_delta = round(operating_margin_delta);
        let roe = round(roe);
        let debt_ratio = round(debt_ratio);

        let accelerating = |now: Option<f64>, before: Option<f64>| Some(now? > before?);
        let outcomes: [(FinancialCondition, Option<bool>); 9] = [
            (
                FinancialCondition::EpsGrowthQuarterly,
                eps_growth_quarterly.map(|g| g >= t.eps_growth_quarterly_min),
            ),
            (
                FinancialCondition::EpsAcceleration,
                accelerating(eps_growth_quarterly, eps_growth_prev_quarter),
            ),
            (
                FinancialCondition::RevenueGrowthQuarterly,
                revenue_growth_quarterly.map(|g| g >= t.revenue_growth_quarterly_min),
            ),
            (
                FinancialCondition::RevenueAcceleration,
                accelerating(revenue_growth_quarterly, revenue_growth_prev_quarter),
            ),
            (
                FinancialCondition::NetIncomeGrowthQuarterly,
                net_income_growth_quarterly.map(|g| g >= t.net_income_growth_quarterly_min),
            ),
            (
                FinancialCondition::EpsGrowthAnnual,
                eps_growth_annual.map(|g| g >= t.eps_growth_annual_min),
            ),
            (
                FinancialCondition::OperatingMarginExpansion,
                operating_margin_delta.map(|d| d > t.operating_margin_delta_min),
            ),
            (FinancialCondition::ReturnOnEquity, roe.map(|r| r >= t.roe_min)),
            (FinancialCondition::DebtRatio, debt_ratio.map(|d| d <= t.debt_ratio_max)),
        ];

        let mut conditions = BTreeMap::new();
        let mut missing_conditions = Vec::new();
        for (condition, outcome) in outcomes {
            if outcome.is_none() {
                missing_conditions.push(condition);
            }
            conditions.insert(condition, outcome.unwrap_or(false));
        }
        let met_count = conditions.values().filter(|met| **met).count() as u8;

        FinancialMetricSet {
            symbol: symbol.to_string(),
            period_end: quarters.first().map(|p| p.period_end),
            eps_growth_quarterly,
            eps_growth_prev_quarter,
            revenue_growth_quarterly,
            revenue_growth_prev_quarter,
            net_income_growth_quarterly,
            eps_growth_annual,
            operating_margin_delta,
            roe,
            debt_ratio,
            conditions,
            met_count,
            missing_conditions,
        }
    }

    /// The period ending about one year before `current`.
    fn year_earlier<'a>(
        &self,
        periods: &'a [FinancialPeriod],
        current: &FinancialPeriod,
    ) -> Option<&'a FinancialPeriod> {
        let target = current.period_end - Duration::days(365);
        let tolerance = self.thresholds.period_match_days;
        periods
            .iter()
            .filter(|p| p.period_end < current.period_end)
            .map(|p| (p, (p.period_end - target).num_days().abs()))
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by_key(|(_, distance)| *distance)
            .map(|(p, _)| p)
    }
}

/// Percent growth; undefined when the base is not positive.
fn growth(current: f64, base: f64) -> Option<f64> {
    if base > 0.0 && current.is_finite() {
        Some((current - base) / base * 100.0)
    } else {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
