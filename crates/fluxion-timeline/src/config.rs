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

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::summary::NEUTRAL_DELTA_THRESHOLD;
use crate::variance::{MAX_VARIANCE_ENTRIES, VARIANCE_SIGNIFICANCE_THRESHOLD};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Thresholds used by the analysis functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum |actual - planned| cost for a variance entry (CZK)
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f32,

    /// Maximum number of variance entries reported, capped at [`MAX_VARIANCE_ENTRIES`]
    #[serde(default = "default_variance_top_n")]
    pub variance_top_n: usize,

    /// Deltas below this are classified neutral
    #[serde(default = "default_neutral_threshold")]
    pub neutral_threshold: f32,
}

fn default_variance_threshold() -> f32 {
    VARIANCE_SIGNIFICANCE_THRESHOLD
}

fn default_variance_top_n() -> usize {
    MAX_VARIANCE_ENTRIES
}

fn default_neutral_threshold() -> f32 {
    NEUTRAL_DELTA_THRESHOLD
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            variance_threshold: VARIANCE_SIGNIFICANCE_THRESHOLD,
            variance_top_n: MAX_VARIANCE_ENTRIES,
            neutral_threshold: NEUTRAL_DELTA_THRESHOLD,
        }
    }
}

/// Runtime settings of the plan cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    /// Timezone used for naive timestamps in API payloads
    pub timezone: Tz,
    pub analysis: AnalysisConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            timezone: chrono_tz::Europe::Prague,
            analysis: AnalysisConfig::default(),
        }
    }
}
