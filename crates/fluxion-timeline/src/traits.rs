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

//! Seams to the forecast API and the planner settings store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::normalize::RawDetailTab;

/// Raw responses for the three day tabs of one plan
#[derive(Debug, Clone, Default)]
pub struct RawPlanData {
    pub yesterday: RawDetailTab,
    pub today: RawDetailTab,
    pub tomorrow: RawDetailTab,
}

/// Source of plan data.
///
/// Each call is one plan refresh; retries happen behind this boundary.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    async fn fetch_plan(&self, plan: &str) -> Result<RawPlanData, FetchError>;
}

fn default_auto_mode_plan() -> String {
    "hybrid".to_owned()
}

/// Persisted auto-mode preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerSettings {
    #[serde(default)]
    pub auto_mode_switch_enabled: bool,

    #[serde(default = "default_auto_mode_plan")]
    pub auto_mode_plan: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            auto_mode_switch_enabled: false,
            auto_mode_plan: default_auto_mode_plan(),
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> Result<PlannerSettings, FetchError>;

    async fn save_settings(&self, settings: &PlannerSettings) -> Result<(), FetchError>;
}
