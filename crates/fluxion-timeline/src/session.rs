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

//! Timeline viewing session: open/loading/closed lifecycle with auto-refresh
//!
//! [`transition`] is pure and decides what happens; [`TimelineSession`] carries out
//! the resulting effects (cache loads, the refresh timer, plan selection).

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::cache::{GetOptions, PlanCache};
use crate::error::{TimelineError, TimelineResult, ViewState};
use crate::plan_select::PlanSelector;
use crate::traits::SettingsStore;
use crate::view::{DayView, TabKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Closed,
    Loading,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    OpenRequested,
    LoadSucceeded,
    LoadFailed,
    RefreshTick,
    /// Plan or tab changed while the session is visible
    SelectionChanged,
    CloseRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    /// Apply stored planner settings and auto-sync the plan
    SyncSettings,
    Load { force: bool },
    ArmRefreshTimer,
    ClearRefreshTimer,
    ResetOverride,
}

/// Next state and the effects to run for `event` in `state`
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<SessionEffect>) {
    use SessionEffect as Fx;
    use SessionEvent as Ev;
    use SessionState as St;

    match (state, event) {
        (St::Closed, Ev::OpenRequested) => (
            St::Loading,
            vec![Fx::SyncSettings, Fx::Load { force: false }],
        ),
        (St::Loading, Ev::LoadSucceeded | Ev::LoadFailed) => (St::Open, vec![Fx::ArmRefreshTimer]),
        (St::Open, Ev::RefreshTick) => (St::Open, vec![Fx::Load { force: true }]),
        (St::Loading | St::Open, Ev::SelectionChanged) => {
            (St::Loading, vec![Fx::Load { force: false }])
        }
        (St::Loading | St::Open, Ev::CloseRequested) => (
            St::Closed,
            vec![Fx::ClearRefreshTimer, Fx::ResetOverride],
        ),
        // Late results, repeated opens and ticks while loading change nothing
        (St::Closed, _)
        | (St::Loading, Ev::OpenRequested | Ev::RefreshTick)
        | (St::Open, Ev::OpenRequested | Ev::LoadSucceeded | Ev::LoadFailed) => (state, Vec::new()),
    }
}

/// What a renderer gets from the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub plan: String,
    pub tab: TabKind,
    pub session: SessionState,
    pub state: ViewState,
    /// Latest data for the tab; may be stale when `state` reports an error
    pub day: Option<Arc<DayView>>,
    pub error: Option<String>,
}

struct SessionCore {
    state: SessionState,
    /// Bumped whenever the session opens or closes
    epoch: u64,
    selector: PlanSelector,
    tab: TabKind,
    result: Option<TimelineResult<Arc<DayView>>>,
    timer: Option<JoinHandle<()>>,
}

struct SessionInner {
    cache: PlanCache,
    settings_store: Option<Arc<dyn SettingsStore>>,
    refresh_interval: Duration,
    core: Mutex<SessionCore>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(timer) = self.core.get_mut().timer.take() {
            timer.abort();
        }
    }
}

#[derive(Clone)]
pub struct TimelineSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for TimelineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("TimelineSession")
            .field("state", &core.state)
            .field("plan", &core.selector.active_plan())
            .field("tab", &core.tab)
            .finish_non_exhaustive()
    }
}

impl TimelineSession {
    pub fn new(
        cache: PlanCache,
        default_plan: &str,
        tab: TabKind,
        refresh_interval: Duration,
    ) -> Self {
        Self::build(cache, None, default_plan, tab, refresh_interval)
    }

    pub fn with_settings_store(
        cache: PlanCache,
        settings_store: Arc<dyn SettingsStore>,
        default_plan: &str,
        tab: TabKind,
        refresh_interval: Duration,
    ) -> Self {
        Self::build(
            cache,
            Some(settings_store),
            default_plan,
            tab,
            refresh_interval,
        )
    }

    fn build(
        cache: PlanCache,
        settings_store: Option<Arc<dyn SettingsStore>>,
        default_plan: &str,
        tab: TabKind,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                cache,
                settings_store,
                refresh_interval,
                core: Mutex::new(SessionCore {
                    state: SessionState::Closed,
                    epoch: 0,
                    selector: PlanSelector::new(default_plan),
                    tab,
                    result: None,
                    timer: None,
                }),
            }),
        }
    }

    pub async fn open(&self) {
        self.dispatch(SessionEvent::OpenRequested).await;
    }

    pub async fn close(&self) {
        self.dispatch(SessionEvent::CloseRequested).await;
    }

    /// Manual plan switch; auto-sync stays off until the session closes
    pub async fn select_plan(&self, plan: &str) {
        let changed = self.inner.core.lock().selector.select_manual(plan);
        if changed {
            info!("📋 [SESSION] Plan switched to '{}'", plan);
            self.dispatch(SessionEvent::SelectionChanged).await;
        }
    }

    pub async fn select_tab(&self, tab: TabKind) {
        let changed = {
            let mut core = self.inner.core.lock();
            let changed = core.tab != tab;
            core.tab = tab;
            changed
        };
        if changed {
            self.dispatch(SessionEvent::SelectionChanged).await;
        }
    }

    /// Refetch now, same as a timer tick
    pub async fn refresh(&self) {
        self.dispatch(SessionEvent::RefreshTick).await;
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn plan(&self) -> String {
        self.inner.core.lock().selector.active_plan().to_owned()
    }

    pub fn tab(&self) -> TabKind {
        self.inner.core.lock().tab
    }

    pub fn is_timer_armed(&self) -> bool {
        self.inner
            .core
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn view(&self) -> SessionView {
        let core = self.inner.core.lock();
        let plan = core.selector.active_plan().to_owned();
        let tab = core.tab;

        let (state, day, error) = match &core.result {
            None => (ViewState::Empty, None, None),
            Some(Ok(day)) => (ViewState::Ready, Some(Arc::clone(day)), None),
            Some(Err(e)) => {
                let stale = self
                    .inner
                    .cache
                    .peek(&plan, tab)
                    .and_then(Result::ok);
                (e.view_state(), stale, Some(e.to_string()))
            }
        };

        SessionView {
            plan,
            tab,
            session: core.state,
            state,
            day,
            error,
        }
    }

    async fn dispatch(&self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let (effects, epoch) = {
                let mut core = self.inner.core.lock();
                let previous = core.state;
                let (next, effects) = transition(previous, event);
                if next != previous {
                    debug!("[SESSION] {:?} -> {:?} on {:?}", previous, next, event);
                    if previous == SessionState::Closed || next == SessionState::Closed {
                        core.epoch += 1;
                    }
                }
                core.state = next;
                (effects, core.epoch)
            };

            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect, epoch).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn run_effect(&self, effect: SessionEffect, epoch: u64) -> Option<SessionEvent> {
        match effect {
            SessionEffect::SyncSettings => {
                self.sync_settings(epoch).await;
                None
            }
            SessionEffect::Load { force } => self.load(epoch, force).await,
            SessionEffect::ArmRefreshTimer => {
                self.arm_timer();
                None
            }
            SessionEffect::ClearRefreshTimer => {
                if let Some(timer) = self.inner.core.lock().timer.take() {
                    timer.abort();
                    debug!("[SESSION] Refresh timer cleared");
                }
                None
            }
            SessionEffect::ResetOverride => {
                self.inner.core.lock().selector.on_close();
                None
            }
        }
    }

    async fn sync_settings(&self, epoch: u64) {
        let settings = match &self.inner.settings_store {
            Some(store) => match store.load_settings().await {
                Ok(settings) => Some(settings),
                Err(e) => {
                    warn!("⚠️ [SESSION] Could not load planner settings: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut core = self.inner.core.lock();
        if core.epoch != epoch {
            return;
        }
        if let Some(settings) = settings {
            core.selector.apply_settings(&settings);
        }
        core.selector.on_open();
    }

    async fn load(&self, epoch: u64, force: bool) -> Option<SessionEvent> {
        let (plan, tab) = {
            let core = self.inner.core.lock();
            (core.selector.active_plan().to_owned(), core.tab)
        };

        let result = self
            .inner
            .cache
            .get(&plan, tab, GetOptions { force })
            .await;

        let mut core = self.inner.core.lock();
        let still_wanted = core.epoch == epoch
            && core.state != SessionState::Closed
            && core.selector.active_plan() == plan
            && core.tab == tab;
        if !still_wanted {
            debug!(
                "[SESSION] Dropping result for plan '{}' tab {} issued before a change",
                plan, tab
            );
            return None;
        }

        let event = match &result {
            Ok(_) | Err(TimelineError::MissingData(_)) => SessionEvent::LoadSucceeded,
            Err(_) => SessionEvent::LoadFailed,
        };
        core.result = Some(result);
        Some(event)
    }

    /// Clear-then-set: at most one timer per session
    fn arm_timer(&self) {
        let period = self.inner.refresh_interval;
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TimelineSession { inner }
                    .dispatch(SessionEvent::RefreshTick)
                    .await;
            }
        });

        let mut core = self.inner.core.lock();
        if let Some(previous) = core.timer.replace(handle) {
            previous.abort();
        }
        debug!("[SESSION] Refresh timer armed every {:?}", period);
    }
}
