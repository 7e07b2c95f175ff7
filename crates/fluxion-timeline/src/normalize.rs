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

//! Ingestion of forecast API payloads into canonical intervals and blocks
//!
//! The API has shipped two interval schemas: nested `planned`/`actual` objects, and an
//! older flat layout with the planned values at the top level. Both are accepted here,
//! once, so nothing downstream ever looks at raw field presence.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::blocks::ModeBlock;
use crate::error::{TimelineError, TimelineResult};
use crate::interval::{
    INTERVAL_HOURS, INTERVAL_MINUTES, Interval, IntervalRecord, IntervalStatus, IntervalStore,
};

/// Mode names behind the numeric ids of the legacy schema
pub const LEGACY_MODE_NAMES: [&str; 4] = ["HOME I", "HOME II", "HOME III", "HOME UPS"];

fn deserialize_mode<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(name)) => {
            let name = name.trim();
            Ok((!name.is_empty()).then(|| name.to_owned()))
        }
        Some(Value::Number(id)) => Ok(id
            .as_u64()
            .and_then(|id| usize::try_from(id).ok())
            .and_then(|id| LEGACY_MODE_NAMES.get(id))
            .map(|name| (*name).to_owned())),
        Some(other @ (Value::Bool(_) | Value::Array(_) | Value::Object(_))) => Err(D::Error::custom(format!(
            "unsupported mode value: {other}"
        ))),
    }
}

/// Plan or actual values as sent by the API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "mode", deserialize_with = "deserialize_mode")]
    pub mode_name: Option<String>,
    #[serde(default, alias = "cost")]
    pub net_cost: Option<f32>,
    #[serde(default, alias = "soc")]
    pub battery_soc: Option<f32>,
    #[serde(default, alias = "solar")]
    pub solar_kwh: Option<f32>,
    #[serde(default, alias = "consumption", alias = "load_kwh")]
    pub consumption_kwh: Option<f32>,
    #[serde(default, alias = "grid_import")]
    pub grid_import_kwh: Option<f32>,
    #[serde(default, alias = "grid_export")]
    pub grid_export_kwh: Option<f32>,
    #[serde(default, alias = "price")]
    pub spot_price: Option<f32>,
}

impl From<RawRecord> for IntervalRecord {
    fn from(raw: RawRecord) -> Self {
        Self {
            mode_name: raw.mode_name,
            net_cost: raw.net_cost,
            battery_soc: raw.battery_soc,
            solar_kwh: raw.solar_kwh,
            consumption_kwh: raw.consumption_kwh,
            grid_import_kwh: raw.grid_import_kwh,
            grid_export_kwh: raw.grid_export_kwh,
            spot_price: raw.spot_price,
        }
    }
}

/// One interval in either schema
#[derive(Debug, Clone, Deserialize)]
pub struct RawInterval {
    #[serde(alias = "timestamp")]
    pub time: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub planned: Option<RawRecord>,
    #[serde(default)]
    pub actual: Option<RawRecord>,
    /// Flat planned fields of the legacy schema
    #[serde(flatten)]
    pub legacy: RawRecord,
}

/// Block already built by the server
#[derive(Debug, Clone, Deserialize)]
pub struct RawModeBlock {
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub interval_count: Option<usize>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode_historical: Option<String>,
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode_planned: Option<String>,
    #[serde(default)]
    pub mode_match: Option<bool>,
    #[serde(default)]
    pub cost_historical: Option<f32>,
    #[serde(default)]
    pub cost_planned: Option<f32>,
    #[serde(default, alias = "solar_kwh")]
    pub solar_total_kwh: Option<f32>,
    #[serde(default, alias = "consumption_kwh")]
    pub consumption_total_kwh: Option<f32>,
    #[serde(default, alias = "grid_import_kwh")]
    pub grid_import_total_kwh: Option<f32>,
    #[serde(default, alias = "grid_export_kwh")]
    pub grid_export_total_kwh: Option<f32>,
}

/// `mode_blocks` entries are either raw intervals or server-built blocks
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBlockEntry {
    Block(RawModeBlock),
    Interval(RawInterval),
}

/// Response of `GET detail_tabs?plan=..&tab=..`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDetailTab {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub mode_blocks: Vec<RawBlockEntry>,
}

/// Canonical content of one tab
#[derive(Debug, Clone, PartialEq)]
pub enum TabPayload {
    Intervals(IntervalStore),
    /// Server sent blocks only
    Blocks(Vec<ModeBlock>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTab {
    pub date: Option<NaiveDate>,
    pub payload: TabPayload,
}

fn parse_status(status: &str) -> Option<IntervalStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "historical" | "completed" => Some(IntervalStatus::Historical),
        "current" | "active" => Some(IntervalStatus::Current),
        "planned" | "future" => Some(IntervalStatus::Planned),
        _ => None,
    }
}

/// Status of a span from the wall clock
fn status_at(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> IntervalStatus {
    if end <= now {
        IntervalStatus::Historical
    } else if start <= now {
        IntervalStatus::Current
    } else {
        IntervalStatus::Planned
    }
}

fn resolve_status(
    raw: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> IntervalStatus {
    match raw {
        Some(text) => parse_status(text).unwrap_or_else(|| {
            warn!("Unknown interval status '{}', deriving from clock", text);
            status_at(start, end, now)
        }),
        None => status_at(start, end, now),
    }
}

/// RFC 3339, or naive local time in `tz`
pub fn parse_timestamp(text: &str, tz: Tz) -> TimelineResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| TimelineError::InvalidTimestamp(text.to_owned()))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| TimelineError::InvalidTimestamp(text.to_owned()))
}

pub fn normalize_interval(
    raw: &RawInterval,
    tz: Tz,
    now: DateTime<Utc>,
) -> TimelineResult<Interval> {
    let timestamp = parse_timestamp(&raw.time, tz)?;
    let end = timestamp + Duration::minutes(INTERVAL_MINUTES);
    let status = resolve_status(raw.status.as_deref(), timestamp, end, now);

    let planned: IntervalRecord = raw
        .planned
        .clone()
        .unwrap_or_else(|| raw.legacy.clone())
        .into();

    let mut actual = raw
        .actual
        .clone()
        .map(IntervalRecord::from)
        .filter(|record| !record.is_empty());

    if status == IntervalStatus::Planned && actual.is_some() {
        warn!(
            "Dropping actual values of planned interval at {}",
            timestamp
        );
        actual = None;
    }

    Ok(Interval {
        timestamp,
        status,
        planned,
        actual,
    })
}

pub fn normalize_intervals(
    raw: &[RawInterval],
    tz: Tz,
    now: DateTime<Utc>,
) -> TimelineResult<IntervalStore> {
    let intervals = raw
        .iter()
        .map(|entry| normalize_interval(entry, tz, now))
        .collect::<TimelineResult<Vec<_>>>()?;
    IntervalStore::new(intervals)
}

/// Returns `None` for blocks without any mode name
pub fn normalize_block(
    raw: &RawModeBlock,
    tz: Tz,
    now: DateTime<Utc>,
) -> TimelineResult<Option<ModeBlock>> {
    let start_time = parse_timestamp(&raw.start_time, tz)?;
    let end_time = parse_timestamp(&raw.end_time, tz)?;
    if end_time <= start_time {
        return Err(TimelineError::OutOfOrder(end_time));
    }

    let Some(mode) = raw
        .mode_historical
        .clone()
        .or_else(|| raw.mode_planned.clone())
    else {
        debug!("Skipping server block at {} without a mode", start_time);
        return Ok(None);
    };

    let interval_count = raw.interval_count.unwrap_or_else(|| {
        let slots = (end_time - start_time)
            .num_minutes()
            .div_euclid(INTERVAL_MINUTES);
        usize::try_from(slots).unwrap_or(0)
    });

    let mode_match = raw.mode_match.or_else(|| {
        raw.mode_historical
            .as_ref()
            .map(|historical| raw.mode_planned.as_ref() == Some(historical))
    });

    let cost_planned = raw.cost_planned.unwrap_or(0.0);

    #[expect(
        clippy::cast_precision_loss,
        reason = "a day holds at most a few hundred intervals"
    )]
    let duration_hours = interval_count as f32 * INTERVAL_HOURS;

    // Server blocks carry no member detail, so the block-level flag covers the whole block
    let known_hours = if mode_match.is_some() { duration_hours } else { 0.0 };
    let matched_hours = if mode_match == Some(true) { duration_hours } else { 0.0 };

    Ok(Some(ModeBlock {
        start_time,
        end_time,
        interval_count,
        duration_hours,
        mode,
        status: resolve_status(raw.status.as_deref(), start_time, end_time, now),
        mode_historical: raw.mode_historical.clone(),
        mode_planned: raw.mode_planned.clone(),
        mode_match,
        known_hours,
        matched_hours,
        cost_historical: raw.cost_historical,
        cost_planned,
        cost_delta: raw.cost_historical.map(|h| h - cost_planned),
        solar_total_kwh: raw.solar_total_kwh.unwrap_or(0.0),
        consumption_total_kwh: raw.consumption_total_kwh.unwrap_or(0.0),
        grid_import_total_kwh: raw.grid_import_total_kwh.unwrap_or(0.0),
        grid_export_total_kwh: raw.grid_export_total_kwh.unwrap_or(0.0),
    }))
}

/// Normalize one `detail_tabs` response.
///
/// Raw intervals win when present; server blocks are only used when the tab has no intervals.
pub fn normalize_detail_tab(
    raw: &RawDetailTab,
    tz: Tz,
    now: DateTime<Utc>,
) -> TimelineResult<NormalizedTab> {
    let date = raw.date.as_deref().and_then(|text| {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|e| warn!("Ignoring unparsable tab date '{}': {}", text, e))
            .ok()
    });

    let mut raw_intervals = Vec::new();
    let mut raw_blocks = Vec::new();
    for entry in &raw.mode_blocks {
        match entry {
            RawBlockEntry::Interval(interval) => raw_intervals.push(interval.clone()),
            RawBlockEntry::Block(block) => raw_blocks.push(block),
        }
    }

    if !raw_intervals.is_empty() || raw_blocks.is_empty() {
        if !raw_blocks.is_empty() {
            warn!(
                "Tab mixes {} intervals with {} server blocks, using intervals",
                raw_intervals.len(),
                raw_blocks.len()
            );
        }
        let store = normalize_intervals(&raw_intervals, tz, now)?;
        return Ok(NormalizedTab {
            date,
            payload: TabPayload::Intervals(store),
        });
    }

    let mut blocks: Vec<ModeBlock> = Vec::with_capacity(raw_blocks.len());
    for raw_block in raw_blocks {
        let Some(block) = normalize_block(raw_block, tz, now)? else {
            continue;
        };
        if let Some(previous) = blocks.last()
            && block.start_time < previous.end_time
        {
            return Err(TimelineError::OutOfOrder(block.start_time));
        }
        blocks.push(block);
    }

    Ok(NormalizedTab {
        date,
        payload: TabPayload::Blocks(blocks),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 18, 10, 5, 0).unwrap()
    }

    const TZ: Tz = chrono_tz::Europe::Prague;

    #[test]
    fn test_nested_schema() {
        let raw: RawInterval = serde_json::from_value(json!({
            "time": "2025-10-18T09:00:00+00:00",
            "status": "historical",
            "planned": {"mode_name": "HOME I", "net_cost": 1.0, "spot_price": 2.5},
            "actual": {"mode_name": "HOME II", "net_cost": 1.5}
        }))
        .unwrap();
        let interval = normalize_interval(&raw, TZ, now()).unwrap();

        assert_eq!(interval.status, IntervalStatus::Historical);
        assert_eq!(interval.planned.mode(), Some("HOME I"));
        assert_eq!(interval.planned.spot_price, Some(2.5));
        assert_eq!(interval.actual.unwrap().net_cost, Some(1.5));
    }

    #[test]
    fn test_legacy_flat_schema_with_numeric_mode() {
        let raw: RawInterval = serde_json::from_value(json!({
            "timestamp": "2025-10-18T14:00:00",
            "mode": 1,
            "cost": 0.8,
            "consumption": 0.4
        }))
        .unwrap();
        let interval = normalize_interval(&raw, TZ, now()).unwrap();

        // 14:00 Prague (CEST) is 12:00 UTC
        assert_eq!(
            interval.timestamp,
            Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 0).unwrap()
        );
        assert_eq!(interval.status, IntervalStatus::Planned);
        assert_eq!(interval.planned.mode(), Some("HOME II"));
        assert_eq!(interval.planned.net_cost, Some(0.8));
        assert_eq!(interval.planned.consumption_kwh, Some(0.4));
        assert!(interval.actual.is_none());
    }

    #[test]
    fn test_status_derived_from_clock() {
        let current: RawInterval = serde_json::from_value(json!({
            "time": "2025-10-18T10:00:00Z",
            "planned": {"mode_name": "HOME I"}
        }))
        .unwrap();
        assert_eq!(
            normalize_interval(&current, TZ, now()).unwrap().status,
            IntervalStatus::Current
        );

        let past: RawInterval = serde_json::from_value(json!({
            "time": "2025-10-18T09:45:00Z",
            "planned": {"mode_name": "HOME I"}
        }))
        .unwrap();
        assert_eq!(
            normalize_interval(&past, TZ, now()).unwrap().status,
            IntervalStatus::Historical
        );
    }

    #[test]
    fn test_actual_dropped_on_planned_and_empty_actual_is_absent() {
        let planned: RawInterval = serde_json::from_value(json!({
            "time": "2025-10-18T11:00:00Z",
            "status": "planned",
            "planned": {"mode_name": "HOME I"},
            "actual": {"mode_name": "HOME I", "net_cost": 0.2}
        }))
        .unwrap();
        assert!(normalize_interval(&planned, TZ, now()).unwrap().actual.is_none());

        let empty: RawInterval = serde_json::from_value(json!({
            "time": "2025-10-18T08:00:00Z",
            "status": "historical",
            "planned": {"mode_name": "HOME I"},
            "actual": {"mode_name": ""}
        }))
        .unwrap();
        assert!(normalize_interval(&empty, TZ, now()).unwrap().actual.is_none());
    }

    #[test]
    fn test_invalid_timestamp() {
        let raw: RawInterval = serde_json::from_value(json!({"time": "yesterday-ish"})).unwrap();
        assert_eq!(
            normalize_interval(&raw, TZ, now()),
            Err(TimelineError::InvalidTimestamp("yesterday-ish".to_owned()))
        );
    }

    #[test]
    fn test_detail_tab_with_intervals() {
        let raw: RawDetailTab = serde_json::from_value(json!({
            "date": "2025-10-18",
            "mode_blocks": [
                {"time": "2025-10-18T09:00:00Z", "planned": {"mode_name": "HOME I", "net_cost": 0.25}},
                {"time": "2025-10-18T09:15:00Z", "planned": {"mode_name": "HOME I", "net_cost": 0.25}}
            ],
            "summary": {"ignored": true}
        }))
        .unwrap();
        let tab = normalize_detail_tab(&raw, TZ, now()).unwrap();

        assert_eq!(tab.date, NaiveDate::from_ymd_opt(2025, 10, 18));
        match tab.payload {
            TabPayload::Intervals(store) => assert_eq!(store.len(), 2),
            TabPayload::Blocks(_) => panic!("expected intervals"),
        }
    }

    #[test]
    fn test_detail_tab_with_server_blocks() {
        let raw: RawDetailTab = serde_json::from_value(json!({
            "date": "2025-10-17",
            "mode_blocks": [
                {
                    "start_time": "2025-10-17T00:00:00Z",
                    "end_time": "2025-10-17T02:00:00Z",
                    "mode_historical": "HOME I",
                    "mode_planned": "HOME I",
                    "cost_historical": 2.0,
                    "cost_planned": 1.5
                },
                {
                    "start_time": "2025-10-17T02:00:00Z",
                    "end_time": "2025-10-17T03:00:00Z",
                    "mode_planned": 3
                }
            ]
        }))
        .unwrap();
        let tab = normalize_detail_tab(&raw, TZ, now()).unwrap();

        let TabPayload::Blocks(blocks) = tab.payload else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].interval_count, 8);
        assert!((blocks[0].duration_hours - 2.0).abs() < 1e-6);
        assert_eq!(blocks[0].mode_match, Some(true));
        assert!((blocks[0].matched_hours - 2.0).abs() < 1e-6);
        assert!((blocks[0].cost_delta.unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(blocks[0].status, IntervalStatus::Historical);
        assert_eq!(blocks[1].mode, "HOME UPS");
        assert_eq!(blocks[1].mode_match, None);
        assert!(blocks[1].known_hours.abs() < 1e-6);
    }

    #[test]
    fn test_out_of_order_intervals_are_rejected() {
        let raw: RawDetailTab = serde_json::from_value(json!({
            "mode_blocks": [
                {"time": "2025-10-18T09:15:00Z", "planned": {"mode_name": "HOME I"}},
                {"time": "2025-10-18T09:00:00Z", "planned": {"mode_name": "HOME I"}}
            ]
        }))
        .unwrap();
        assert!(matches!(
            normalize_detail_tab(&raw, TZ, now()),
            Err(TimelineError::OutOfOrder(_))
        ));
    }
}
