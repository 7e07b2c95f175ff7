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

//! Collapsing intervals into mode blocks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::{INTERVAL_HOURS, Interval, IntervalStatus, IntervalStore};

/// Maximal run of consecutive intervals with the same selected mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeBlock {
    pub start_time: DateTime<Utc>,
    /// Exclusive end (start of the slot after the last member)
    pub end_time: DateTime<Utc>,
    pub interval_count: usize,
    pub duration_hours: f32,

    /// Selected mode shared by every member
    pub mode: String,
    pub status: IntervalStatus,

    /// Mode observed in telemetry, absent for planned-only blocks
    pub mode_historical: Option<String>,
    pub mode_planned: Option<String>,
    /// `Some(true)` only when every member matched, `Some(false)` once any member
    /// disagreed, `None` while some members have no observed mode yet
    pub mode_match: Option<bool>,
    /// Elapsed members with an observed mode, in hours
    #[serde(default)]
    pub known_hours: f32,
    /// Elapsed members whose observed mode equals the planned one, in hours
    #[serde(default)]
    pub matched_hours: f32,

    pub cost_historical: Option<f32>,
    pub cost_planned: f32,
    /// Block-level `cost_historical - cost_planned`
    pub cost_delta: Option<f32>,

    pub solar_total_kwh: f32,
    pub consumption_total_kwh: f32,
    pub grid_import_total_kwh: f32,
    pub grid_export_total_kwh: f32,
}

impl ModeBlock {
    pub fn is_planned_only(&self) -> bool {
        self.status == IntervalStatus::Planned
    }
}

/// Block being extended during the scan
struct OpenBlock {
    mode: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    interval_count: usize,
    has_historical: bool,
    has_current: bool,
    has_planned: bool,
    mode_historical: Option<String>,
    mode_planned: Option<String>,
    known_intervals: usize,
    matched_intervals: usize,
    cost_historical: Option<f32>,
    cost_planned: f32,
    solar: f32,
    consumption: f32,
    grid_import: f32,
    grid_export: f32,
}

impl OpenBlock {
    fn new(mode: &str, interval: &Interval) -> Self {
        let mut block = Self {
            mode: mode.to_owned(),
            start_time: interval.timestamp,
            end_time: interval.timestamp,
            interval_count: 0,
            has_historical: false,
            has_current: false,
            has_planned: false,
            mode_historical: None,
            mode_planned: interval.planned.mode().map(str::to_owned),
            known_intervals: 0,
            matched_intervals: 0,
            cost_historical: None,
            cost_planned: 0.0,
            solar: 0.0,
            consumption: 0.0,
            grid_import: 0.0,
            grid_export: 0.0,
        };
        block.push(interval);
        block
    }

    fn accepts(&self, mode: &str, interval: &Interval) -> bool {
        self.mode == mode && self.end_time == interval.timestamp
    }

    fn push(&mut self, interval: &Interval) {
        self.end_time = interval.end();
        self.interval_count += 1;

        match interval.status {
            IntervalStatus::Historical => self.has_historical = true,
            IntervalStatus::Current => self.has_current = true,
            IntervalStatus::Planned => self.has_planned = true,
        }

        if self.mode_planned.is_none() {
            self.mode_planned = interval.planned.mode().map(str::to_owned);
        }

        if let Some(actual) = &interval.actual {
            if self.mode_historical.is_none() {
                self.mode_historical = actual.mode().map(str::to_owned);
            }
            if let Some(cost) = actual.net_cost {
                *self.cost_historical.get_or_insert(0.0) += cost;
            }
        }

        if let Some(matches) = interval.mode_matches() {
            self.known_intervals += 1;
            if matches {
                self.matched_intervals += 1;
            }
        }

        self.cost_planned += interval.planned.net_cost.unwrap_or(0.0);

        let selected = interval.selected_record();
        self.solar += selected.solar_kwh.unwrap_or(0.0);
        self.consumption += selected.consumption_kwh.unwrap_or(0.0);
        self.grid_import += selected.grid_import_kwh.unwrap_or(0.0);
        self.grid_export += selected.grid_export_kwh.unwrap_or(0.0);
    }

    fn finish(self) -> ModeBlock {
        let status = if self.has_current || (self.has_historical && self.has_planned) {
            IntervalStatus::Current
        } else if self.has_historical {
            IntervalStatus::Historical
        } else {
            IntervalStatus::Planned
        };

        #[expect(
            clippy::cast_precision_loss,
            reason = "a day holds at most a few hundred intervals"
        )]
        let (duration_hours, known_hours, matched_hours) = (
            self.interval_count as f32 * INTERVAL_HOURS,
            self.known_intervals as f32 * INTERVAL_HOURS,
            self.matched_intervals as f32 * INTERVAL_HOURS,
        );

        let mode_match = if self.matched_intervals < self.known_intervals {
            Some(false)
        } else if self.known_intervals == self.interval_count {
            Some(true)
        } else {
            None
        };

        ModeBlock {
            start_time: self.start_time,
            end_time: self.end_time,
            interval_count: self.interval_count,
            duration_hours,
            mode: self.mode,
            status,
            mode_historical: self.mode_historical,
            mode_planned: self.mode_planned,
            mode_match,
            known_hours,
            matched_hours,
            cost_historical: self.cost_historical,
            cost_planned: self.cost_planned,
            cost_delta: self.cost_historical.map(|h| h - self.cost_planned),
            solar_total_kwh: self.solar,
            consumption_total_kwh: self.consumption,
            grid_import_total_kwh: self.grid_import,
            grid_export_total_kwh: self.grid_export,
        }
    }
}

/// Collapse ordered intervals into mode blocks.
///
/// An interval without a selected mode closes the open block and belongs to no block,
/// as does a missing slot. `mode_match` is strict: one disagreeing member makes the
/// whole block a mismatch.
pub fn build_mode_blocks(store: &IntervalStore) -> Vec<ModeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for interval in store.intervals() {
        let Some(mode) = interval.selected_mode() else {
            if let Some(block) = open.take() {
                blocks.push(block.finish());
            }
            continue;
        };

        match open.as_mut() {
            Some(block) if block.accepts(mode, interval) => block.push(interval),
            _ => {
                if let Some(block) = open.take() {
                    blocks.push(block.finish());
                }
                open = Some(OpenBlock::new(mode, interval));
            }
        }
    }

    if let Some(block) = open {
        blocks.push(block.finish());
    }

    blocks
}
