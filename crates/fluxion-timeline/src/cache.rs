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

//! Per-plan cache of computed timeline views
//!
//! Every plan has its own bucket holding the latest [`PlanSnapshot`]. Concurrent
//! misses for one plan share a single fetch. Each fetch gets a generation number;
//! only the newest issued fetch may publish into the bucket, so a forced refresh
//! always wins over a fetch that was already running.

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::CacheSettings;
use crate::error::{TimelineError, TimelineResult};
use crate::traits::TimelineSource;
use crate::view::{DayView, PlanSnapshot, TabKind};

pub const PLAN_HYBRID: &str = "hybrid";
pub const PLAN_AUTONOMY: &str = "autonomy";

type SharedFetch = Shared<BoxFuture<'static, TimelineResult<Arc<PlanSnapshot>>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Bypass a fresh snapshot and fetch again
    pub force: bool,
}

impl GetOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Clone)]
struct InFlight {
    generation: u64,
    future: SharedFetch,
}

#[derive(Default)]
struct PlanBucket {
    snapshot: Option<Arc<PlanSnapshot>>,
    /// Generation of the most recently issued fetch
    issued: u64,
    /// Snapshots from this generation or older are stale
    invalidated_through: u64,
    /// Most recently issued fetch, kept after it completes
    latest: Option<InFlight>,
    last_error: Option<TimelineError>,
}

struct CacheInner {
    source: Arc<dyn TimelineSource>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    buckets: Mutex<HashMap<String, PlanBucket>>,
}

/// Plan cache shared by every session. Cloning is cheap.
#[derive(Clone)]
pub struct PlanCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCache")
            .field("settings", &self.inner.settings)
            .field("plans", &self.plans())
            .finish_non_exhaustive()
    }
}

impl PlanCache {
    pub fn new(
        source: Arc<dyn TimelineSource>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                clock,
                settings,
                buckets: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// View of `tab` for `plan`, fetching when the bucket is empty, stale or `force` is set
    pub async fn get(
        &self,
        plan: &str,
        tab: TabKind,
        options: GetOptions,
    ) -> TimelineResult<Arc<DayView>> {
        let mut pending = {
            let now = self.inner.clock.now();
            let mut buckets = self.inner.buckets.lock();
            let bucket = buckets.entry(plan.to_owned()).or_default();

            if options.force {
                debug!("[CACHE] Forced refresh of plan '{}'", plan);
                self.inner.start_fetch(plan, bucket)
            } else if let Some(snapshot) = self.inner.fresh(bucket, now) {
                debug!("[CACHE] Hit for plan '{}' tab {}", plan, tab);
                return snapshot.view(tab);
            } else if let Some(in_flight) = bucket
                .latest
                .clone()
                .filter(|latest| {
                    latest.future.peek().is_none()
                        && latest.generation > bucket.invalidated_through
                })
            {
                debug!(
                    "[CACHE] Joining in-flight fetch of plan '{}' (generation {})",
                    plan, in_flight.generation
                );
                in_flight
            } else {
                self.inner.start_fetch(plan, bucket)
            }
        };

        loop {
            let outcome = pending.future.clone().await;

            // Re-check after the await: a newer fetch supersedes this result,
            // and an invalidation while waiting makes it stale
            let next = {
                let mut buckets = self.inner.buckets.lock();
                let bucket = buckets.entry(plan.to_owned()).or_default();
                match bucket
                    .latest
                    .clone()
                    .filter(|latest| latest.generation > pending.generation)
                {
                    Some(newer) => {
                        debug!(
                            "[CACHE] Generation {} of plan '{}' superseded by {}",
                            pending.generation, plan, newer.generation
                        );
                        Some(newer)
                    }
                    None if pending.generation <= bucket.invalidated_through => {
                        debug!(
                            "[CACHE] Generation {} of plan '{}' invalidated while in flight, refetching",
                            pending.generation, plan
                        );
                        Some(self.inner.start_fetch(plan, bucket))
                    }
                    None => None,
                }
            };

            match next {
                Some(next) => pending = next,
                None => return outcome.and_then(|snapshot| snapshot.view(tab)),
            }
        }
    }

    /// Fresh cached view, without fetching
    pub fn cached(&self, plan: &str, tab: TabKind) -> Option<TimelineResult<Arc<DayView>>> {
        let now = self.inner.clock.now();
        let buckets = self.inner.buckets.lock();
        let bucket = buckets.get(plan)?;
        self.inner.fresh(bucket, now).map(|s| s.view(tab))
    }

    /// Last published view, fresh or not
    pub fn peek(&self, plan: &str, tab: TabKind) -> Option<TimelineResult<Arc<DayView>>> {
        self.snapshot(plan).map(|s| s.view(tab))
    }

    pub fn snapshot(&self, plan: &str) -> Option<Arc<PlanSnapshot>> {
        self.inner
            .buckets
            .lock()
            .get(plan)
            .and_then(|bucket| bucket.snapshot.clone())
    }

    /// True when there is no snapshot, it expired or it was invalidated
    pub fn is_stale(&self, plan: &str) -> bool {
        let now = self.inner.clock.now();
        let buckets = self.inner.buckets.lock();
        buckets
            .get(plan)
            .is_none_or(|bucket| self.inner.fresh(bucket, now).is_none())
    }

    pub fn snapshot_age(&self, plan: &str) -> Option<TimeDelta> {
        let now = self.inner.clock.now();
        self.snapshot(plan).map(|s| now - s.fetched_at)
    }

    /// Error of the latest completed fetch, cleared by the next success
    pub fn last_error(&self, plan: &str) -> Option<TimelineError> {
        self.inner
            .buckets
            .lock()
            .get(plan)
            .and_then(|bucket| bucket.last_error.clone())
    }

    /// Mark one plan (or every plan) stale, including fetches still in flight
    pub fn invalidate(&self, plan: Option<&str>) {
        let mut buckets = self.inner.buckets.lock();
        for (name, bucket) in buckets.iter_mut() {
            if plan.is_none_or(|p| p == name) {
                bucket.invalidated_through = bucket.issued;
            }
        }
        match plan {
            Some(name) => debug!("[CACHE] Invalidated plan '{}'", name),
            None => debug!("[CACHE] Invalidated all plans"),
        }
    }

    /// Plans with a bucket, sorted
    pub fn plans(&self) -> Vec<String> {
        let mut plans: Vec<String> = self.inner.buckets.lock().keys().cloned().collect();
        plans.sort();
        plans
    }
}

impl CacheInner {
    fn ttl(&self) -> TimeDelta {
        TimeDelta::from_std(self.settings.ttl).unwrap_or(TimeDelta::MAX)
    }

    fn fresh<'a>(&self, bucket: &'a PlanBucket, now: DateTime<Utc>) -> Option<&'a Arc<PlanSnapshot>> {
        let ttl = self.ttl();
        bucket.snapshot.as_ref().filter(|snapshot| {
            snapshot.generation > bucket.invalidated_through && now - snapshot.fetched_at <= ttl
        })
    }

    /// Issue a new fetch. A fetch already in flight runs to completion first.
    fn start_fetch(self: &Arc<Self>, plan: &str, bucket: &mut PlanBucket) -> InFlight {
        bucket.issued += 1;
        let generation = bucket.issued;
        let previous = bucket.latest.take().map(|latest| latest.future);

        let inner = Arc::clone(self);
        let plan = plan.to_owned();
        let future = async move {
            if let Some(previous) = previous {
                // Result is discarded, only ordering matters
                let _ = previous.await;
            }
            inner.run_fetch(&plan, generation).await
        }
        .boxed()
        .shared();

        let in_flight = InFlight { generation, future };
        bucket.latest = Some(in_flight.clone());
        in_flight
    }

    async fn run_fetch(&self, plan: &str, generation: u64) -> TimelineResult<Arc<PlanSnapshot>> {
        info!(
            "🔄 [CACHE] Fetching plan '{}' (generation {})",
            plan, generation
        );

        let result = match self.source.fetch_plan(plan).await {
            Ok(raw) => {
                PlanSnapshot::build(plan, &raw, &self.settings, self.clock.now(), generation)
                    .map(Arc::new)
            }
            Err(e) => Err(TimelineError::from(e)),
        };

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(plan.to_owned()).or_default();
        if generation != bucket.issued {
            debug!(
                "[CACHE] Discarding result of superseded generation {} for plan '{}'",
                generation, plan
            );
            return result;
        }

        match &result {
            Ok(snapshot) => {
                info!(
                    "✅ [CACHE] Plan '{}' refreshed (generation {})",
                    plan, generation
                );
                bucket.snapshot = Some(Arc::clone(snapshot));
                bucket.last_error = None;
            }
            Err(e) => {
                error!("❌ [CACHE] Fetch of plan '{}' failed: {}", plan, e);
                bucket.last_error = Some(e.clone());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::FetchError;
    use crate::traits::RawPlanData;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TimelineSource for CountingSource {
        async fn fetch_plan(&self, _plan: &str) -> Result<RawPlanData, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(FetchError::Auth { status: 401 });
            }
            Ok(RawPlanData {
                today: serde_json::from_value(json!({
                    "date": "2025-10-18",
                    "mode_blocks": [
                        {"time": "2025-10-18T08:00:00Z", "status": "planned",
                         "planned": {"mode_name": "HOME I", "net_cost": 0.25}}
                    ]
                }))
                .unwrap(),
                ..Default::default()
            })
        }
    }

    fn cache(fail: bool) -> (PlanCache, Arc<CountingSource>, ManualClock) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail,
        });
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 10, 18, 7, 0, 0).unwrap());
        let cache = PlanCache::new(
            source.clone(),
            Arc::new(clock.clone()),
            CacheSettings::default(),
        );
        (cache, source, clock)
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (cache, source, clock) = cache(false);
        cache
            .get(PLAN_HYBRID, TabKind::Today, GetOptions::default())
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(60));
        assert!(!cache.is_stale(PLAN_HYBRID));
        assert!(cache.cached(PLAN_HYBRID, TabKind::Today).is_some());

        clock.advance(TimeDelta::milliseconds(1));
        assert!(cache.is_stale(PLAN_HYBRID));
        assert!(cache.cached(PLAN_HYBRID, TabKind::Today).is_none());
        assert!(cache.peek(PLAN_HYBRID, TabKind::Today).is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let (cache, _source, _clock) = cache(true);
        let err = cache
            .get(PLAN_HYBRID, TabKind::Today, GetOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err, TimelineError::Fetch(FetchError::Auth { status: 401 }));
        assert_eq!(cache.last_error(PLAN_HYBRID), Some(err));
        assert!(cache.snapshot(PLAN_HYBRID).is_none());
        assert!(cache.is_stale(PLAN_HYBRID));
    }

    #[tokio::test]
    async fn test_plans_are_listed_sorted() {
        let (cache, _source, _clock) = cache(false);
        for plan in [PLAN_HYBRID, PLAN_AUTONOMY] {
            cache
                .get(plan, TabKind::Today, GetOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(cache.plans(), vec!["autonomy".to_owned(), "hybrid".to_owned()]);
        assert!(cache.is_stale("unknown"));
    }
}
