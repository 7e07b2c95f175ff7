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

//! Per-tab outputs handed to renderers, and the per-plan snapshot that holds them

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::blocks::{ModeBlock, build_mode_blocks};
use crate::config::{AnalysisConfig, CacheSettings};
use crate::eod::{EodPrediction, predict_end_of_day};
use crate::error::{TimelineError, TimelineResult};
use crate::interval::{IntervalStatus, IntervalStore};
use crate::normalize::{NormalizedTab, TabPayload, normalize_detail_tab};
use crate::summary::{DaySummary, summarize, summarize_blocks};
use crate::traits::RawPlanData;
use crate::variance::{VarianceEntry, rank_variances};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabKind {
    Yesterday,
    Today,
    Tomorrow,
    /// Continuous timeline over all three days
    Detail,
    /// Elapsed part of yesterday and today
    History,
}

impl TabKind {
    pub const ALL: [Self; 5] = [
        Self::Yesterday,
        Self::Today,
        Self::Tomorrow,
        Self::Detail,
        Self::History,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yesterday => "yesterday",
            Self::Today => "today",
            Self::Tomorrow => "tomorrow",
            Self::Detail => "detail",
            Self::History => "history",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tab| tab.as_str() == text)
    }
}

impl fmt::Display for TabKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a renderer needs for one tab
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayView {
    pub tab: TabKind,
    pub date: Option<NaiveDate>,
    pub intervals: IntervalStore,
    pub blocks: Vec<ModeBlock>,
    pub summary: DaySummary,
    /// Today only
    pub eod: Option<EodPrediction>,
    pub variances: Vec<VarianceEntry>,
}

impl DayView {
    pub fn from_intervals(
        tab: TabKind,
        date: Option<NaiveDate>,
        intervals: IntervalStore,
        analysis: &AnalysisConfig,
    ) -> Self {
        let blocks = build_mode_blocks(&intervals);
        let summary = summarize(&intervals, &blocks);
        let eod = (tab == TabKind::Today && !intervals.is_empty())
            .then(|| predict_end_of_day(&intervals));
        let variances = rank_variances(&intervals, analysis);

        Self {
            tab,
            date,
            intervals,
            blocks,
            summary,
            eod,
            variances,
        }
    }

    /// View over server-built blocks; no interval-level analysis is possible
    pub fn from_blocks(tab: TabKind, date: Option<NaiveDate>, blocks: Vec<ModeBlock>) -> Self {
        let summary = summarize_blocks(&blocks);
        Self {
            tab,
            date,
            intervals: IntervalStore::default(),
            blocks,
            summary,
            eod: None,
            variances: Vec::new(),
        }
    }

    fn from_tab(tab: TabKind, normalized: NormalizedTab, analysis: &AnalysisConfig) -> Self {
        match normalized.payload {
            TabPayload::Intervals(store) => {
                Self::from_intervals(tab, normalized.date, store, analysis)
            }
            TabPayload::Blocks(blocks) => Self::from_blocks(tab, normalized.date, blocks),
        }
    }

    /// No mode blocks. Intervals without any mode yield no blocks either.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Cached payload of one plan: every tab, computed once per fetch
#[derive(Debug, Clone)]
pub struct PlanSnapshot {
    pub plan: String,
    pub fetched_at: DateTime<Utc>,
    /// Cache generation of the fetch that produced this snapshot
    pub generation: u64,
    tabs: BTreeMap<TabKind, Arc<DayView>>,
}

impl PlanSnapshot {
    /// Normalize raw plan data and compute every tab
    pub fn build(
        plan: &str,
        raw: &RawPlanData,
        settings: &CacheSettings,
        now: DateTime<Utc>,
        generation: u64,
    ) -> TimelineResult<Self> {
        let tz = settings.timezone;
        let analysis = &settings.analysis;

        let yesterday = DayView::from_tab(
            TabKind::Yesterday,
            normalize_detail_tab(&raw.yesterday, tz, now)?,
            analysis,
        );
        let today = DayView::from_tab(
            TabKind::Today,
            normalize_detail_tab(&raw.today, tz, now)?,
            analysis,
        );
        let tomorrow = DayView::from_tab(
            TabKind::Tomorrow,
            normalize_detail_tab(&raw.tomorrow, tz, now)?,
            analysis,
        );

        let detail = combined_view(TabKind::Detail, &[&yesterday, &today, &tomorrow], analysis);
        let history = history_view(&yesterday, &today, analysis);

        debug!(
            "Built snapshot for plan '{}' (generation {}): {} intervals today, {} blocks in detail",
            plan,
            generation,
            today.intervals.len(),
            detail.blocks.len()
        );

        let tabs = [yesterday, today, tomorrow, detail, history]
            .into_iter()
            .map(|view| (view.tab, Arc::new(view)))
            .collect();

        Ok(Self {
            plan: plan.to_owned(),
            fetched_at: now,
            generation,
            tabs,
        })
    }

    /// View for `tab`, or `MissingData` when it holds no mode blocks
    pub fn view(&self, tab: TabKind) -> TimelineResult<Arc<DayView>> {
        self.tabs
            .get(&tab)
            .filter(|view| !view.is_empty())
            .cloned()
            .ok_or(TimelineError::MissingData(tab))
    }
}

/// Join day views into one continuous view, rebuilding blocks across midnight
fn combined_view(tab: TabKind, days: &[&DayView], analysis: &AnalysisConfig) -> DayView {
    let date = days.iter().find(|d| d.tab == TabKind::Today).and_then(|d| d.date);
    let has_blocks_only = days
        .iter()
        .any(|d| d.intervals.is_empty() && !d.blocks.is_empty());

    if !has_blocks_only {
        match IntervalStore::concat(days.iter().map(|d| &d.intervals)) {
            Ok(store) => return DayView::from_intervals(tab, date, store, analysis),
            Err(e) => warn!("Cannot join day intervals for {} view: {}", tab, e),
        }
    }

    let blocks = days.iter().flat_map(|d| d.blocks.iter().cloned()).collect();
    DayView::from_blocks(tab, date, blocks)
}

fn history_view(yesterday: &DayView, today: &DayView, analysis: &AnalysisConfig) -> DayView {
    let elapsed_yesterday = elapsed_part(yesterday);
    let elapsed_today = elapsed_part(today);
    let mut view = combined_view(
        TabKind::History,
        &[&elapsed_yesterday, &elapsed_today],
        analysis,
    );
    view.date = today.date;
    view
}

fn elapsed_part(day: &DayView) -> DayView {
    DayView {
        intervals: day.intervals.elapsed_only(),
        blocks: day
            .blocks
            .iter()
            .filter(|b| b.status != IntervalStatus::Planned)
            .cloned()
            .collect(),
        ..day.clone()
    }
}
