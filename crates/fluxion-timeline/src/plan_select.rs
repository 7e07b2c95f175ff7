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

//! Which plan a session shows: auto-mode plan or the user's manual pick
//!
//! A manual pick is sticky until the session closes; closing drops the
//! override and falls back to the desired plan.

use tracing::debug;

use crate::traits::PlannerSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSelector {
    auto_mode_enabled: bool,
    auto_mode_plan: String,
    last_manual_plan: String,
    manual_override: bool,
    active: String,
}

impl PlanSelector {
    pub fn new(default_plan: &str) -> Self {
        Self {
            auto_mode_enabled: false,
            auto_mode_plan: default_plan.to_owned(),
            last_manual_plan: default_plan.to_owned(),
            manual_override: false,
            active: default_plan.to_owned(),
        }
    }

    /// Plan currently shown
    pub fn active_plan(&self) -> &str {
        &self.active
    }

    pub fn manual_override(&self) -> bool {
        self.manual_override
    }

    pub fn auto_mode_enabled(&self) -> bool {
        self.auto_mode_enabled
    }

    /// Auto-mode plan when auto mode is on, the last manual pick otherwise
    pub fn desired_plan(&self) -> &str {
        if self.auto_mode_enabled {
            &self.auto_mode_plan
        } else {
            &self.last_manual_plan
        }
    }

    /// Take new settings; returns true if the active plan changed
    pub fn apply_settings(&mut self, settings: &PlannerSettings) -> bool {
        self.auto_mode_enabled = settings.auto_mode_switch_enabled;
        if !settings.auto_mode_plan.is_empty() {
            self.auto_mode_plan.clone_from(&settings.auto_mode_plan);
        }
        self.sync()
    }

    /// Manual switch; suppresses auto-sync until close. Returns true if the plan changed.
    pub fn select_manual(&mut self, plan: &str) -> bool {
        self.manual_override = true;
        self.last_manual_plan = plan.to_owned();
        let changed = self.active != plan;
        self.active = plan.to_owned();
        changed
    }

    /// Move to the desired plan unless a manual pick is active
    pub fn sync(&mut self) -> bool {
        if self.manual_override || self.active == self.desired_plan() {
            return false;
        }
        self.active = self.desired_plan().to_owned();
        debug!("[PLAN] Auto-sync switched to plan '{}'", self.active);
        true
    }

    pub fn on_open(&mut self) -> bool {
        self.sync()
    }

    pub fn on_close(&mut self) {
        self.manual_override = false;
        self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto(plan: &str) -> PlannerSettings {
        PlannerSettings {
            auto_mode_switch_enabled: true,
            auto_mode_plan: plan.to_owned(),
        }
    }

    #[test]
    fn test_auto_mode_drives_desired_plan() {
        let mut selector = PlanSelector::new("hybrid");
        assert!(selector.apply_settings(&auto("autonomy")));
        assert_eq!(selector.active_plan(), "autonomy");
        assert_eq!(selector.desired_plan(), "autonomy");
    }

    #[test]
    fn test_manual_pick_is_sticky_until_close() {
        let mut selector = PlanSelector::new("hybrid");
        selector.apply_settings(&auto("autonomy"));

        assert!(selector.select_manual("hybrid"));
        assert!(selector.manual_override());
        assert!(!selector.apply_settings(&auto("autonomy")));
        assert_eq!(selector.active_plan(), "hybrid");

        selector.on_close();
        assert!(!selector.manual_override());
        assert_eq!(selector.active_plan(), "autonomy");
    }

    #[test]
    fn test_manual_pick_persists_without_auto_mode() {
        let mut selector = PlanSelector::new("hybrid");
        selector.select_manual("autonomy");
        selector.on_close();

        assert_eq!(selector.desired_plan(), "autonomy");
        assert_eq!(selector.active_plan(), "autonomy");
        assert!(!selector.on_open());
    }
}
