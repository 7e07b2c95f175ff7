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

//! Canonical 15-minute intervals and the validated per-day store

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::error::{TimelineError, TimelineResult};

/// Width of one interval
pub const INTERVAL_MINUTES: i64 = 15;

/// Width of one interval in hours
pub const INTERVAL_HOURS: f32 = 0.25;

/// Lifecycle status of an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStatus {
    Historical,
    Current,
    Planned,
}

impl IntervalStatus {
    /// Historical or current: the slot has (at least partly) happened
    pub fn is_elapsed(self) -> bool {
        matches!(self, Self::Historical | Self::Current)
    }

    /// Order of statuses along the time axis of one day
    fn position(self) -> u8 {
        match self {
            Self::Historical => 0,
            Self::Current => 1,
            Self::Planned => 2,
        }
    }

    /// How far the slot has progressed (planned -> current -> historical)
    fn stage(self) -> u8 {
        match self {
            Self::Planned => 0,
            Self::Current => 1,
            Self::Historical => 2,
        }
    }

    /// The more advanced of two statuses for the same slot
    pub fn advanced(self, other: Self) -> Self {
        if other.stage() > self.stage() { other } else { self }
    }
}

/// Plan or actual values for one interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub mode_name: Option<String>,
    /// Net cost of the slot (CZK)
    pub net_cost: Option<f32>,
    pub battery_soc: Option<f32>,
    pub solar_kwh: Option<f32>,
    pub consumption_kwh: Option<f32>,
    pub grid_import_kwh: Option<f32>,
    pub grid_export_kwh: Option<f32>,
    /// Spot price (CZK/kWh)
    pub spot_price: Option<f32>,
}

impl IntervalRecord {
    pub fn mode(&self) -> Option<&str> {
        self.mode_name.as_deref().filter(|m| !m.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.mode().is_none()
            && self.net_cost.is_none()
            && self.battery_soc.is_none()
            && self.solar_kwh.is_none()
            && self.consumption_kwh.is_none()
            && self.grid_import_kwh.is_none()
            && self.grid_export_kwh.is_none()
            && self.spot_price.is_none()
    }
}

/// One 15-minute slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Slot start
    pub timestamp: DateTime<Utc>,
    pub status: IntervalStatus,
    pub planned: IntervalRecord,
    /// Present only for elapsed slots whose telemetry has landed
    pub actual: Option<IntervalRecord>,
}

impl Interval {
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp + Duration::minutes(INTERVAL_MINUTES)
    }

    /// Actual mode when available, planned mode otherwise
    pub fn selected_mode(&self) -> Option<&str> {
        match self.status {
            IntervalStatus::Planned => self.planned.mode(),
            IntervalStatus::Historical | IntervalStatus::Current => self
                .actual
                .as_ref()
                .and_then(IntervalRecord::mode)
                .or_else(|| self.planned.mode()),
        }
    }

    /// Record whose values describe the slot best
    pub fn selected_record(&self) -> &IntervalRecord {
        match (&self.actual, self.status.is_elapsed()) {
            (Some(actual), true) => actual,
            _ => &self.planned,
        }
    }

    /// `None` while no actual mode is known
    pub fn mode_matches(&self) -> Option<bool> {
        let actual_mode = self.actual.as_ref()?.mode()?;
        Some(self.planned.mode() == Some(actual_mode))
    }
}

/// Ordered, validated intervals for one day (or a run of days)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalStore {
    intervals: Vec<Interval>,
}

impl IntervalStore {
    pub fn new(intervals: Vec<Interval>) -> TimelineResult<Self> {
        validate(&intervals)?;
        Ok(Self { intervals })
    }

    /// Join consecutive stores (e.g. yesterday, today, tomorrow)
    pub fn concat<'a>(stores: impl IntoIterator<Item = &'a IntervalStore>) -> TimelineResult<Self> {
        let intervals = stores
            .into_iter()
            .flat_map(|store| store.intervals.iter().cloned())
            .collect();
        Self::new(intervals)
    }

    /// Apply a newer telemetry batch.
    ///
    /// An interval's `actual` is never cleared once set and its status never moves back.
    /// On error the store is left untouched.
    pub fn merge(&mut self, update: IntervalStore) -> TimelineResult<()> {
        let mut merged: BTreeMap<DateTime<Utc>, Interval> = self
            .intervals
            .iter()
            .map(|interval| (interval.timestamp, interval.clone()))
            .collect();

        for incoming in update.intervals {
            match merged.entry(incoming.timestamp) {
                Entry::Vacant(slot) => {
                    slot.insert(incoming);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.status = existing.status.advanced(incoming.status);
                    existing.planned = incoming.planned;
                    if let Some(actual) = incoming.actual {
                        existing.actual = Some(actual);
                    }
                }
            }
        }

        let intervals: Vec<Interval> = merged.into_values().collect();
        validate(&intervals)?;
        self.intervals = intervals;
        Ok(())
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn current(&self) -> Option<&Interval> {
        self.intervals
            .iter()
            .find(|i| i.status == IntervalStatus::Current)
    }

    /// Historical and current intervals
    pub fn elapsed(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter().filter(|i| i.status.is_elapsed())
    }

    pub fn future(&self) -> impl Iterator<Item = &Interval> {
        self.intervals
            .iter()
            .filter(|i| i.status == IntervalStatus::Planned)
    }

    /// Store restricted to the elapsed part
    pub fn elapsed_only(&self) -> Self {
        Self {
            intervals: self.elapsed().cloned().collect(),
        }
    }
}

fn validate(intervals: &[Interval]) -> TimelineResult<()> {
    let mut previous: Option<&Interval> = None;
    let mut current_seen = false;

    for interval in intervals {
        if let Some(prev) = previous {
            if interval.timestamp == prev.timestamp {
                return Err(TimelineError::DuplicateInterval(interval.timestamp));
            }
            if interval.timestamp < prev.timestamp {
                return Err(TimelineError::OutOfOrder(interval.timestamp));
            }
            if interval.status.position() < prev.status.position() {
                return Err(TimelineError::StatusRegression(interval.timestamp));
            }
        }

        if interval.status == IntervalStatus::Current {
            if current_seen {
                return Err(TimelineError::StatusRegression(interval.timestamp));
            }
            current_seen = true;
        }

        previous = Some(interval);
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn slot(index: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 18, 0, 0, 0).unwrap()
            + Duration::minutes(INTERVAL_MINUTES * index)
    }

    pub fn record(mode: &str, cost: f32) -> IntervalRecord {
        IntervalRecord {
            mode_name: Some(mode.to_owned()),
            net_cost: Some(cost),
            ..Default::default()
        }
    }

    pub fn planned(index: i64, mode: &str, cost: f32) -> Interval {
        Interval {
            timestamp: slot(index),
            status: IntervalStatus::Planned,
            planned: record(mode, cost),
            actual: None,
        }
    }

    pub fn historical(index: i64, plan: IntervalRecord, actual: Option<IntervalRecord>) -> Interval {
        Interval {
            timestamp: slot(index),
            status: IntervalStatus::Historical,
            planned: plan,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_store_accepts_ordered_day() {
        let mut current = historical(1, record("HOME I", 0.2), Some(record("HOME I", 0.3)));
        current.status = IntervalStatus::Current;
        let store = IntervalStore::new(vec![
            historical(0, record("HOME I", 0.2), Some(record("HOME I", 0.2))),
            current,
            planned(2, "HOME II", 0.1),
        ])
        .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.current().unwrap().timestamp, slot(1));
        assert_eq!(store.elapsed().count(), 2);
        assert_eq!(store.future().count(), 1);
    }

    #[test]
    fn test_store_rejects_out_of_order() {
        let result = IntervalStore::new(vec![planned(2, "HOME I", 0.1), planned(1, "HOME I", 0.1)]);
        assert_eq!(result, Err(TimelineError::OutOfOrder(slot(1))));
    }

    #[test]
    fn test_store_rejects_duplicates() {
        let result = IntervalStore::new(vec![planned(1, "HOME I", 0.1), planned(1, "HOME I", 0.1)]);
        assert_eq!(result, Err(TimelineError::DuplicateInterval(slot(1))));
    }

    #[test]
    fn test_store_rejects_history_after_plan() {
        let result = IntervalStore::new(vec![
            planned(0, "HOME I", 0.1),
            historical(1, record("HOME I", 0.1), None),
        ]);
        assert_eq!(result, Err(TimelineError::StatusRegression(slot(1))));
    }

    #[test]
    fn test_store_rejects_two_current_intervals() {
        let mut first = historical(0, record("HOME I", 0.1), None);
        first.status = IntervalStatus::Current;
        let mut second = historical(1, record("HOME I", 0.1), None);
        second.status = IntervalStatus::Current;
        let result = IntervalStore::new(vec![first, second]);
        assert_eq!(result, Err(TimelineError::StatusRegression(slot(1))));
    }

    #[test]
    fn test_selected_mode_prefers_actual_for_elapsed() {
        let interval = historical(0, record("HOME I", 1.0), Some(record("HOME II", 1.5)));
        assert_eq!(interval.selected_mode(), Some("HOME II"));
        assert_eq!(interval.mode_matches(), Some(false));

        let pending = historical(0, record("HOME I", 1.0), None);
        assert_eq!(pending.selected_mode(), Some("HOME I"));
        assert_eq!(pending.mode_matches(), None);
    }

    #[test]
    fn test_empty_mode_name_is_absent() {
        let interval = planned(0, "", 0.0);
        assert_eq!(interval.selected_mode(), None);
    }

    #[test]
    fn test_merge_never_clears_actual() {
        let mut store = IntervalStore::new(vec![historical(
            0,
            record("HOME I", 1.0),
            Some(record("HOME I", 1.2)),
        )])
        .unwrap();

        let update = IntervalStore::new(vec![
            historical(0, record("HOME I", 1.0), None),
            planned(1, "HOME II", 0.5),
        ])
        .unwrap();
        store.merge(update).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.intervals()[0].actual.as_ref().unwrap().net_cost,
            Some(1.2)
        );
    }

    #[test]
    fn test_merge_never_moves_status_back() {
        let mut store =
            IntervalStore::new(vec![historical(0, record("HOME I", 1.0), None)]).unwrap();
        store
            .merge(IntervalStore::new(vec![planned(0, "HOME I", 1.0)]).unwrap())
            .unwrap();
        assert_eq!(store.intervals()[0].status, IntervalStatus::Historical);
    }

    #[test]
    fn test_failed_merge_leaves_store_untouched() {
        let mut current = historical(0, record("HOME I", 1.0), None);
        current.status = IntervalStatus::Current;
        let mut store = IntervalStore::new(vec![current.clone()]).unwrap();

        let mut other_current = historical(1, record("HOME I", 1.0), None);
        other_current.status = IntervalStatus::Current;
        let result = store.merge(IntervalStore::new(vec![other_current]).unwrap());

        assert!(result.is_err());
        assert_eq!(store.intervals(), &[current]);
    }
}
