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

//! Day-level plan-vs-actual summaries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::blocks::ModeBlock;
use crate::interval::{IntervalRecord, IntervalStore};

/// Deltas smaller than this are neither better nor worse
pub const NEUTRAL_DELTA_THRESHOLD: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKey {
    Cost,
    Solar,
    Consumption,
    /// Grid import
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    LowerIsBetter,
    HigherIsBetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaClass {
    Better,
    Worse,
    Neutral,
}

impl MetricKey {
    pub const ALL: [Self; 4] = [Self::Cost, Self::Solar, Self::Consumption, Self::Grid];

    pub fn unit(self) -> &'static str {
        match self {
            Self::Cost => "CZK",
            Self::Solar | Self::Consumption | Self::Grid => "kWh",
        }
    }

    pub fn preference(self) -> Preference {
        match self {
            Self::Solar => Preference::HigherIsBetter,
            Self::Cost | Self::Consumption | Self::Grid => Preference::LowerIsBetter,
        }
    }

    /// Classify an actual-minus-plan delta for this metric
    pub fn classify(self, delta: f32, neutral_threshold: f32) -> DeltaClass {
        if delta.abs() < neutral_threshold {
            return DeltaClass::Neutral;
        }
        let higher = delta > 0.0;
        match (self.preference(), higher) {
            (Preference::LowerIsBetter, false) | (Preference::HigherIsBetter, true) => {
                DeltaClass::Better
            }
            (Preference::LowerIsBetter, true) | (Preference::HigherIsBetter, false) => {
                DeltaClass::Worse
            }
        }
    }

    fn value(self, record: &IntervalRecord) -> Option<f32> {
        match self {
            Self::Cost => record.net_cost,
            Self::Solar => record.solar_kwh,
            Self::Consumption => record.consumption_kwh,
            Self::Grid => record.grid_import_kwh,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cost => "cost",
            Self::Solar => "solar",
            Self::Consumption => "consumption",
            Self::Grid => "grid",
        };
        f.write_str(name)
    }
}

/// Plan and actual totals of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub plan: f32,
    pub actual: f32,
    pub has_actual: bool,
    pub unit: String,
}

impl MetricSummary {
    fn empty(key: MetricKey) -> Self {
        Self {
            plan: 0.0,
            actual: 0.0,
            has_actual: false,
            unit: key.unit().to_owned(),
        }
    }

    /// Actual minus plan, once there is anything actual
    pub fn delta(&self) -> Option<f32> {
        self.has_actual.then(|| self.actual - self.plan)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub metrics: BTreeMap<MetricKey, MetricSummary>,
    /// Percent of known-status block time where the mode matched; `None` before any history
    pub overall_adherence: Option<f32>,
    pub mode_switches: usize,
}

impl DaySummary {
    pub fn metric(&self, key: MetricKey) -> Option<&MetricSummary> {
        self.metrics.get(&key)
    }

    pub fn classify(&self, key: MetricKey, neutral_threshold: f32) -> Option<DeltaClass> {
        let delta = self.metric(key)?.delta()?;
        Some(key.classify(delta, neutral_threshold))
    }
}

/// Summarize a day from its intervals and the blocks built from them
pub fn summarize(store: &IntervalStore, blocks: &[ModeBlock]) -> DaySummary {
    let mut metrics = BTreeMap::new();

    for key in MetricKey::ALL {
        let mut summary = MetricSummary::empty(key);
        for interval in store.intervals() {
            if let Some(plan) = key.value(&interval.planned) {
                summary.plan += plan;
            }
            if let Some(actual) = interval.actual.as_ref().and_then(|a| key.value(a)) {
                summary.actual += actual;
                summary.has_actual = true;
            }
        }
        metrics.insert(key, summary);
    }

    DaySummary {
        metrics,
        overall_adherence: overall_adherence(blocks),
        mode_switches: mode_switches(blocks),
    }
}

/// Summary for a day that arrived as server-built blocks only.
///
/// Blocks carry no per-metric actuals for energy, so only cost can report an actual.
pub fn summarize_blocks(blocks: &[ModeBlock]) -> DaySummary {
    let mut metrics: BTreeMap<MetricKey, MetricSummary> = MetricKey::ALL
        .into_iter()
        .map(|key| (key, MetricSummary::empty(key)))
        .collect();

    for block in blocks {
        if let Some(cost) = metrics.get_mut(&MetricKey::Cost) {
            cost.plan += block.cost_planned;
            if let Some(historical) = block.cost_historical {
                cost.actual += historical;
                cost.has_actual = true;
            }
        }
        if let Some(solar) = metrics.get_mut(&MetricKey::Solar) {
            solar.plan += block.solar_total_kwh;
        }
        if let Some(consumption) = metrics.get_mut(&MetricKey::Consumption) {
            consumption.plan += block.consumption_total_kwh;
        }
        if let Some(grid) = metrics.get_mut(&MetricKey::Grid) {
            grid.plan += block.grid_import_total_kwh;
        }
    }

    DaySummary {
        metrics,
        overall_adherence: overall_adherence(blocks),
        mode_switches: mode_switches(blocks),
    }
}

/// Matched elapsed time over elapsed time with an observed mode, in percent
pub fn overall_adherence(blocks: &[ModeBlock]) -> Option<f32> {
    let (matched, known) = blocks
        .iter()
        .fold((0.0_f32, 0.0_f32), |(matched, known), block| {
            (matched + block.matched_hours, known + block.known_hours)
        });

    (known > 0.0).then(|| (matched / known * 100.0).clamp(0.0, 100.0))
}

/// Number of mode changes between neighbouring blocks
pub fn mode_switches(blocks: &[ModeBlock]) -> usize {
    blocks.windows(2).filter(|w| w[0].mode != w[1].mode).count()
}
