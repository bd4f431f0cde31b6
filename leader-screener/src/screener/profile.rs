//! Screener profiles.
//!
//! Every strategy is the same pipeline with a different rule set. A ticker
//! qualifies for a rule profile when all of its rules pass; the `leaders`
//! profile is the TOPSIS Top-N instead.

use serde::{Deserialize, Serialize};

use super::engine::TickerEvaluation;
use crate::pattern::PatternKind;

/// One qualification rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ScreenerRule {
    /// At least `min_criteria` of the eight trend-template checks
    TrendTemplate { min_criteria: u8 },
    PatternDetected { pattern: PatternKind },
    RsNewHigh,
    /// Today's volume ratio at or above `min_ratio`
    VolumeSurge { min_ratio: f64 },
    MinMetCount { min: u8 },
    MinRsScore { min: f64 },
}

impl ScreenerRule {
    pub fn passes(&self, eval: &TickerEvaluation) -> bool {
        let ind = &eval.indicators;
        match self {
            Self::TrendTemplate { min_criteria } => ind.trend_template_count() >= *min_criteria,
            Self::PatternDetected { pattern } => eval.pattern(*pattern).is_some_and(|p| p.detected),
            Self::RsNewHigh => ind.rs_new_high,
            Self::VolumeSurge { min_ratio } => ind.volume_ratio.is_some_and(|r| r >= *min_ratio),
            Self::MinMetCount { min } => eval.financial.met_count >= *min,
            Self::MinRsScore { min } => ind.rs_score >= *min,
        }
    }
}

/// How a profile selects its tickers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    Rules,
    /// The TOPSIS Top-N list
    Leaders,
}

/// A named screener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerProfile {
    pub name: String,
    #[serde(default)]
    pub kind: ProfileKind,
    #[serde(default)]
    pub rules: Vec<ScreenerRule>,
}

impl ScreenerProfile {
    pub fn rules(name: &str, rules: Vec<ScreenerRule>) -> Self {
        Self {
            name: name.to_string(),
            kind: ProfileKind::Rules,
            rules,
        }
    }

    pub fn leaders(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ProfileKind::Leaders,
            rules: Vec::new(),
        }
    }

    /// Whether `eval` qualifies. Always false for the leaders profile, whose
    /// members come from the ranking.
    pub fn matches(&self, eval: &TickerEvaluation) -> bool {
        match self.kind {
            ProfileKind::Rules => self.rules.iter().all(|r| r.passes(eval)),
            ProfileKind::Leaders => false,
        }
    }
}

/// The built-in screeners.
pub fn default_profiles() -> Vec<ScreenerProfile> {
    vec![
        ScreenerProfile::rules(
            "trend_template",
            vec![ScreenerRule::TrendTemplate { min_criteria: 8 }],
        ),
        ScreenerProfile::rules(
            "vcp",
            vec![
                ScreenerRule::PatternDetected {
                    pattern: PatternKind::VolatilityContraction,
                },
                ScreenerRule::TrendTemplate { min_criteria: 6 },
            ],
        ),
        ScreenerProfile::rules(
            "cup_with_handle",
            vec![ScreenerRule::PatternDetected {
                pattern: PatternKind::CupWithHandle,
            }],
        ),
        ScreenerProfile::rules(
            "rs_new_high",
            vec![ScreenerRule::RsNewHigh, ScreenerRule::MinRsScore { min: 80.0 }],
        ),
        ScreenerProfile::leaders("leaders"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screener::engine::tests::evaluation;

    #[test]
    fn test_rules_all_must_pass() {
        let mut eval = evaluation("AAA", 85.0, 7);
        eval.indicators.rs_new_high = true;
        let profile = ScreenerProfile::rules(
            "rs",
            vec![ScreenerRule::RsNewHigh, ScreenerRule::MinRsScore { min: 80.0 }],
        );
        assert!(profile.matches(&eval));

        eval.indicators.rs_score = 79.0;
        assert!(!profile.matches(&eval));
    }

    #[test]
    fn test_pattern_and_volume_rules() {
        let mut eval = evaluation("AAA", 85.0, 7);
        let vcp = ScreenerRule::PatternDetected {
            pattern: PatternKind::VolatilityContraction,
        };
        assert!(!vcp.passes(&eval));
        eval.patterns[0].detected = true;
        assert!(vcp.passes(&eval));

        let surge = ScreenerRule::VolumeSurge { min_ratio: 1.5 };
        eval.indicators.volume_ratio = None;
        assert!(!surge.passes(&eval));
        eval.indicators.volume_ratio = Some(1.5);
        assert!(surge.passes(&eval));
        assert!(ScreenerRule::MinMetCount { min: 7 }.passes(&eval));
    }

    #[test]
    fn test_leaders_profile_never_matches_rules() {
        let eval = evaluation("AAA", 99.0, 9);
        assert!(!ScreenerProfile::leaders("leaders").matches(&eval));
    }

    #[test]
    fn test_profile_serde() {
        let json = r#"{
            "name": "surge",
            "rules": [
                {"rule": "volume_surge", "min_ratio": 2.0},
                {"rule": "pattern_detected", "pattern": "cup_with_handle"}
            ]
        }"#;
        let profile: ScreenerProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.kind, ProfileKind::Rules);
        assert_eq!(profile.rules[0], ScreenerRule::VolumeSurge { min_ratio: 2.0 });
        assert_eq!(
            profile.rules[1],
            ScreenerRule::PatternDetected {
                pattern: PatternKind::CupWithHandle
            }
        );
    }

    #[test]
    fn test_default_profiles() {
        let names: Vec<_> = default_profiles().into_iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec!["trend_template", "vcp", "cup_with_handle", "rs_new_high", "leaders"]
        );
    }
}
