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

use async_trait::async_trait;
use fluxion_timeline::clock::{Sleeper, TokioSleeper};
use fluxion_timeline::normalize::{RawDetailTab, RawInterval};
use fluxion_timeline::{
    FetchError, PlannerSettings, RawPlanData, SettingsStore, TabKind, TimelineSource,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::{ApiError, ApiResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max)`, attempt counted from 0
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Classify an HTTP status. `None` means success.
pub fn classify_status(status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(FetchError::Auth { status }),
        500.. => Some(FetchError::Transient {
            attempts: 1,
            message: format!("HTTP {status}"),
        }),
        _ => Some(FetchError::Permanent {
            status,
            message: format!("HTTP {status}"),
        }),
    }
}

/// Client for the battery forecast API (`detail_tabs`, `timeline`, `planner_settings`)
#[derive(Clone)]
pub struct TimelineApiClient {
    base_url: String,
    token: String,
    client: Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for TimelineApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineApiClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn build_http_client(timeout: Duration) -> ApiResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {e}")))
}

impl TimelineApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ApiResult<Self> {
        let base_url: String = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidBaseUrl {
                url: base_url,
                reason: "expected an http:// or https:// URL".to_owned(),
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.into(),
            client: build_http_client(DEFAULT_TIMEOUT)?,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the backoff sleeper (tests use one that does not wait)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ApiResult<Self> {
        self.client = build_http_client(timeout)?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_detail_tab(
        &self,
        plan: &str,
        tab: TabKind,
    ) -> Result<RawDetailTab, FetchError> {
        let url = format!("{}/detail_tabs", self.base_url);
        debug!("🔍 [API QUERY] detail_tabs plan={} tab={}", plan, tab);

        let response = self
            .send_with_retry("detail_tabs", || {
                self.client
                    .get(&url)
                    .bearer_auth(&self.token)
                    .query(&[("plan", plan), ("tab", tab.as_str())])
                    .send()
            })
            .await?;

        let detail: RawDetailTab = decode(response).await?;
        debug!(
            "✅ [API RESULT] detail_tabs plan={} tab={}: {} entries",
            plan,
            tab,
            detail.mode_blocks.len()
        );
        Ok(detail)
    }

    /// Ordered intervals of the active timeline
    pub async fn fetch_active_timeline(&self) -> Result<Vec<RawInterval>, FetchError> {
        let url = format!("{}/timeline", self.base_url);
        debug!("🔍 [API QUERY] timeline type=active");

        let response = self
            .send_with_retry("timeline", || {
                self.client
                    .get(&url)
                    .bearer_auth(&self.token)
                    .query(&[("type", "active")])
                    .send()
            })
            .await?;

        let intervals: Vec<RawInterval> = decode(response).await?;
        debug!("✅ [API RESULT] timeline: {} intervals", intervals.len());
        Ok(intervals)
    }

    pub async fn get_planner_settings(&self) -> Result<PlannerSettings, FetchError> {
        let url = format!("{}/planner_settings", self.base_url);
        let response = self
            .send_with_retry("planner_settings", || {
                self.client.get(&url).bearer_auth(&self.token).send()
            })
            .await?;
        decode(response).await
    }

    /// POST the settings once; a write is never retried
    pub async fn save_planner_settings(&self, settings: &PlannerSettings) -> Result<(), FetchError> {
        let url = format!("{}/planner_settings", self.base_url);
        info!(
            "📞 [API SAVE] planner_settings auto={} plan={}",
            settings.auto_mode_switch_enabled, settings.auto_mode_plan
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(settings)
            .send()
            .await
            .map_err(|e| {
                error!("❌ [API ERROR] planner_settings POST failed: {}", e);
                FetchError::Transient {
                    attempts: 1,
                    message: e.to_string(),
                }
            })?;

        check_response(response).await.map(|_| ())
    }

    async fn send_with_retry<F, Fut>(&self, what: &str, mut request_fn: F) -> Result<Response, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response, reqwest::Error>>,
    {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let failure = match request_fn().await {
                Ok(response) => match check_response(response).await {
                    Ok(response) => return Ok(response),
                    Err(FetchError::Transient { message, .. }) => message,
                    Err(
                        terminal @ (FetchError::Auth { .. }
                        | FetchError::Permanent { .. }
                        | FetchError::Decode(_)),
                    ) => return Err(terminal),
                },
                Err(e) => e.to_string(),
            };

            if attempts > self.retry.max_retries {
                error!(
                    "❌ [API ERROR] {} failed after {} attempts: {}",
                    what, attempts, failure
                );
                return Err(FetchError::Transient {
                    attempts,
                    message: failure,
                });
            }

            let delay = self.retry.delay_for(attempts - 1);
            warn!(
                "⚠️ [API RETRY] {} failed (attempt {}/{}): {}. Retrying in {:?}",
                what,
                attempts,
                self.retry.max_retries + 1,
                failure,
                delay
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Turn a non-success status into its `FetchError`
async fn check_response(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    let Some(failure) = classify_status(status.as_u16()) else {
        return Ok(response);
    };

    match failure {
        FetchError::Auth { .. } => {
            error!("❌ [API ERROR] Authentication failed ({})", status);
            Err(failure)
        }
        FetchError::Permanent { status, .. } => {
            let message = response.text().await.unwrap_or_default();
            error!("❌ [API ERROR] Status {}: {}", status, message);
            Err(FetchError::Permanent { status, message })
        }
        FetchError::Transient { .. } | FetchError::Decode(_) => Err(failure),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Decode(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&body).map_err(|e| {
        error!("❌ [API ERROR] Malformed response: {}", e);
        FetchError::Decode(e.to_string())
    })
}

#[async_trait]
impl TimelineSource for TimelineApiClient {
    async fn fetch_plan(&self, plan: &str) -> Result<RawPlanData, FetchError> {
        let (yesterday, today, tomorrow) = tokio::try_join!(
            self.fetch_detail_tab(plan, TabKind::Yesterday),
            self.fetch_detail_tab(plan, TabKind::Today),
            self.fetch_detail_tab(plan, TabKind::Tomorrow),
        )?;

        info!("✅ [API RESULT] Plan '{}' fetched", plan);
        Ok(RawPlanData {
            yesterday,
            today,
            tomorrow,
        })
    }
}

#[async_trait]
impl SettingsStore for TimelineApiClient {
    async fn load_settings(&self) -> Result<PlannerSettings, FetchError> {
        self.get_planner_settings().await
    }

    async fn save_settings(&self, settings: &PlannerSettings) -> Result<(), FetchError> {
        self.save_planner_settings(settings).await
    }
}
