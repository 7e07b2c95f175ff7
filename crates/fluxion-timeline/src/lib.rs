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

//! Plan-vs-actual reconciliation for FluxION battery schedules
//!
//! Turns 15-minute plan and telemetry intervals into mode blocks, day summaries,
//! an end-of-day cost prediction and ranked variances, and caches the results per plan.

pub mod blocks;
pub mod cache;
pub mod clock;
pub mod config;
pub mod eod;
pub mod error;
pub mod interval;
pub mod normalize;
pub mod plan_select;
pub mod session;
pub mod summary;
pub mod traits;
pub mod variance;
pub mod view;

pub use blocks::{ModeBlock, build_mode_blocks};
pub use cache::{GetOptions, PLAN_AUTONOMY, PLAN_HYBRID, PlanCache};
pub use clock::{Clock, ManualClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use config::{AnalysisConfig, CacheSettings, DEFAULT_CACHE_TTL, DEFAULT_REFRESH_INTERVAL};
pub use eod::{EodPrediction, predict_end_of_day};
pub use error::{FetchError, TimelineError, TimelineResult, ViewState};
pub use interval::{Interval, IntervalRecord, IntervalStatus, IntervalStore};
pub use normalize::{RawDetailTab, RawInterval, normalize_detail_tab, normalize_intervals};
pub use plan_select::PlanSelector;
pub use session::{SessionState, SessionView, TimelineSession};
pub use summary::{DaySummary, DeltaClass, MetricKey, MetricSummary, summarize};
pub use traits::{PlannerSettings, RawPlanData, SettingsStore, TimelineSource};
pub use variance::{VarianceEntry, VarianceReason, rank_variances};
pub use view::{DayView, PlanSnapshot, TabKind};
