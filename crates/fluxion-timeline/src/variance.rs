// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Ranking of the largest plan/actual cost deviations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::AnalysisConfig;
use crate::interval::{Interval, IntervalStore};

/// Minimum |delta| for an interval to be reported (CZK)
pub const VARIANCE_SIGNIFICANCE_THRESHOLD: f32 = 0.5;

pub const MAX_VARIANCE_ENTRIES: usize = 3;

const CONSUMPTION_REASON_THRESHOLD_KWH: f32 = 0.1;
const PRICE_REASON_THRESHOLD: f32 = 0.1;

/// Heuristic explanation of a deviation. Only the first matching rule is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarianceReason {
    #[serde(rename = "mode did not switch as planned")]
    ModeMismatch,
    #[serde(rename = "higher consumption than planned")]
    HigherConsumption,
    #[serde(rename = "lower consumption than planned")]
    LowerConsumption,
    #[serde(rename = "higher price than planned")]
    HigherPrice,
    #[serde(rename = "lower price than planned")]
    LowerPrice,
    #[serde(rename = "combination of factors")]
    Combination,
}

impl fmt::Display for VarianceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ModeMismatch => "mode did not switch as planned",
            Self::HigherConsumption => "higher consumption than planned",
            Self::LowerConsumption => "lower consumption than planned",
            Self::HigherPrice => "higher price than planned",
            Self::LowerPrice => "lower price than planned",
            Self::Combination => "combination of factors",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceEntry {
    pub time: DateTime<Utc>,
    /// Actual minus planned cost
    pub delta: f32,
    pub planned_cost: f32,
    pub actual_cost: f32,
    pub planned_mode: Option<String>,
    pub actual_mode: Option<String>,
    pub reason: VarianceReason,
}

fn explain(interval: &Interval) -> VarianceReason {
    let planned = &interval.planned;
    let Some(actual) = interval.actual.as_ref() else {
        return VarianceReason::Combination;
    };

    if let (Some(plan_mode), Some(actual_mode)) = (planned.mode(), actual.mode())
        && plan_mode != actual_mode
    {
        return VarianceReason::ModeMismatch;
    }

    if let (Some(plan), Some(real)) = (planned.consumption_kwh, actual.consumption_kwh) {
        let diff = real - plan;
        if diff.abs() > CONSUMPTION_REASON_THRESHOLD_KWH {
            return if diff > 0.0 {
                VarianceReason::HigherConsumption
            } else {
                VarianceReason::LowerConsumption
            };
        }
    }

    if let (Some(plan), Some(real)) = (planned.spot_price, actual.spot_price) {
        let diff = real - plan;
        if diff.abs() > PRICE_REASON_THRESHOLD {
            return if diff > 0.0 {
                VarianceReason::HigherPrice
            } else {
                VarianceReason::LowerPrice
            };
        }
    }

    VarianceReason::Combination
}

/// Largest significant cost deviations, sorted by |delta| descending.
///
/// Never more than [`MAX_VARIANCE_ENTRIES`], whatever `variance_top_n` says.
pub fn rank_variances(store: &IntervalStore, config: &AnalysisConfig) -> Vec<VarianceEntry> {
    let mut entries: Vec<VarianceEntry> = store
        .intervals()
        .iter()
        .filter_map(|interval| {
            let actual = interval.actual.as_ref()?;
            let planned_cost = interval.planned.net_cost?;
            let actual_cost = actual.net_cost?;
            let delta = actual_cost - planned_cost;
            if delta.abs() < config.variance_threshold {
                return None;
            }
            Some(VarianceEntry {
                time: interval.timestamp,
                delta,
                planned_cost,
                actual_cost,
                planned_mode: interval.planned.mode().map(str::to_owned),
                actual_mode: actual.mode().map(str::to_owned),
                reason: explain(interval),
            })
        })
        .collect();

    // Stable: equal deltas keep time order
    entries.sort_by(|a, b| b.delta.abs().total_cmp(&a.delta.abs()));
    entries.truncate(config.variance_top_n.min(MAX_VARIANCE_ENTRIES));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::IntervalRecord;
    use crate::interval::test_support::*;

    fn with(mode: &str, cost: f32, consumption: f32, price: f32) -> IntervalRecord {
        IntervalRecord {
            consumption_kwh: Some(consumption),
            spot_price: Some(price),
            ..record(mode, cost)
        }
    }

    #[test]
    fn test_ranking_by_absolute_delta() {
        let store = IntervalStore::new(vec![
            historical(0, record("HOME I", 1.0), Some(record("HOME I", 1.6))),
            historical(1, record("HOME I", 1.0), Some(record("HOME I", 0.3))),
        ])
        .unwrap();
        let ranked = rank_variances(&store, &AnalysisConfig::default());

        assert_eq!(ranked.len(), 2);
        assert!((ranked[0].delta + 0.7).abs() < 1e-4);
        assert!((ranked[1].delta - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_small_deltas_are_dropped_and_top_three_kept() {
        let store = IntervalStore::new(vec![
            historical(0, record("HOME I", 1.0), Some(record("HOME I", 1.4))),
            historical(1, record("HOME I", 1.0), Some(record("HOME I", 2.0))),
            historical(2, record("HOME I", 1.0), Some(record("HOME I", 3.0))),
            historical(3, record("HOME I", 1.0), Some(record("HOME I", 4.0))),
            historical(4, record("HOME I", 1.0), Some(record("HOME I", 5.0))),
            planned(5, "HOME I", 9.0),
        ])
        .unwrap();
        let ranked = rank_variances(&store, &AnalysisConfig::default());

        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| w[0].delta.abs() >= w[1].delta.abs()));
        assert!(ranked.iter().all(|e| e.delta.abs() >= 0.5));
        assert_eq!(ranked[0].time, slot(4));
    }

    #[test]
    fn test_reason_rules_fire_in_order() {
        let plan = || with("HOME I", 1.0, 0.5, 2.0);
        let cases = [
            (with("HOME II", 2.0, 1.5, 4.0), VarianceReason::ModeMismatch),
            (with("HOME I", 1.9, 1.5, 4.0), VarianceReason::HigherConsumption),
            (with("HOME I", 0.2, 0.5, 1.0), VarianceReason::LowerPrice),
            (with("HOME I", 1.7, 0.55, 2.05), VarianceReason::Combination),
        ];

        for (actual, expected) in cases {
            let store = IntervalStore::new(vec![historical(0, plan(), Some(actual))]).unwrap();
            let ranked = rank_variances(&store, &AnalysisConfig::default());
            assert_eq!(ranked.len(), 1);
            assert_eq!(ranked[0].reason, expected);
        }
    }

    #[test]
    fn test_configured_top_n_cannot_exceed_three() {
        let store = IntervalStore::new(
            (0..5)
                .map(|i| historical(i, record("HOME I", 1.0), Some(record("HOME I", 3.0))))
                .collect(),
        )
        .unwrap();
        let config = AnalysisConfig {
            variance_top_n: 5,
            ..Default::default()
        };

        assert_eq!(rank_variances(&store, &config).len(), MAX_VARIANCE_ENTRIES);

        let fewer = AnalysisConfig {
            variance_top_n: 1,
            ..Default::default()
        };
        assert_eq!(rank_variances(&store, &fewer).len(), 1);
    }

    #[test]
    fn test_reason_serializes_as_text() {
        let json = serde_json::to_string(&VarianceReason::ModeMismatch).unwrap();
        assert_eq!(json, "\"mode did not switch as planned\"");
        assert_eq!(
            VarianceReason::LowerConsumption.to_string(),
            "lower consumption than planned"
        );
    }
}
