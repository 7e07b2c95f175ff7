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

use anyhow::{Context, Result};
use chrono_tz::Tz;
use fluxion_timeline::variance::MAX_VARIANCE_ENTRIES;
use fluxion_timeline::{AnalysisConfig, CacheSettings, PLAN_HYBRID};
use fluxion_timeline_ha::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Application configuration of the timeline tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub system: SystemConfig,
}

/// Forecast API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the battery forecast API, without the endpoint name
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. Falls back to `SUPERVISOR_TOKEN` when running as an add-on.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Auto-refresh period of an open session
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_plan")]
    pub default_plan: String,

    /// IANA timezone used for naive timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    "http://supervisor/core/api/oig_cloud/battery_forecast".to_owned()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_plan() -> String {
    PLAN_HYBRID.to_owned()
}

fn default_timezone() -> String {
    "Europe/Prague".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            default_plan: default_plan(),
            timezone: default_timezone(),
            log_level: default_log_level(),
        }
    }
}

/// Where a configuration was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    AddonOptions,
    File(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddonOptions => f.write_str("HA addon options"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults => f.write_str("defaults with environment overrides"),
        }
    }
}

/// Result of loading, reported once logging is up
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub source: ConfigSource,
    /// Ignored or suspicious values
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn log(&self) {
        match self.source {
            ConfigSource::Defaults => warn!("No configuration file found, using {}", self.source),
            ConfigSource::AddonOptions | ConfigSource::File(_) => {
                info!("✅ Loaded configuration from {}", self.source);
            }
        }
        for warning in &self.warnings {
            warn!("⚠️ [CONFIG] {}", warning);
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl AppConfig {
    /// Load configuration from the first source that exists:
    /// HA add-on options, `config.toml`, `config.json`, then defaults with env overrides.
    /// A missing token is taken from `HA_TOKEN` or `SUPERVISOR_TOKEN` on every path.
    pub fn load() -> Result<LoadedConfig> {
        if let Ok(options_str) = std::fs::read_to_string("/data/options.json") {
            let mut config: AppConfig =
                serde_json::from_str(&options_str).context("Failed to parse HA addon options")?;
            config.apply_token_fallback(env_lookup);
            config.validate()?;
            return Ok(LoadedConfig {
                config,
                source: ConfigSource::AddonOptions,
                warnings: Vec::new(),
            });
        }

        for candidate in ["config.toml", "config.json"] {
            if Path::new(candidate).exists() {
                return Self::load_from_path(candidate);
            }
        }

        let mut config = Self::default();
        let warnings = config.apply_overrides(env_lookup);
        config.validate()?;
        Ok(LoadedConfig {
            config,
            source: ConfigSource::Defaults,
            warnings,
        })
    }

    /// Load a TOML or JSON file, chosen by extension
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<LoadedConfig> {
        Self::load_from_path_with(path, env_lookup)
    }

    /// [`Self::load_from_path`] with an explicit environment
    pub fn load_from_path_with(
        path: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<LoadedConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let mut config: AppConfig = if is_toml {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        config.apply_token_fallback(lookup);
        config.validate()?;
        Ok(LoadedConfig {
            config,
            source: ConfigSource::File(path.to_path_buf()),
            warnings: Vec::new(),
        })
    }

    /// Fill an absent or blank token from `HA_TOKEN`, then `SUPERVISOR_TOKEN`
    pub fn apply_token_fallback(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let configured = self
            .api
            .token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty());
        if !configured {
            self.api.token = lookup("HA_TOKEN")
                .or_else(|| lookup("SUPERVISOR_TOKEN"))
                .filter(|token| !token.trim().is_empty());
        }
    }

    /// Apply `TIMELINE_*`, `HA_TOKEN` and `LOG_LEVEL` overrides from `lookup`.
    /// Returns a warning per ignored value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(url) = lookup("TIMELINE_API_URL") {
            self.api.base_url = url;
        }

        if let Some(token) = lookup("HA_TOKEN").or_else(|| lookup("SUPERVISOR_TOKEN")) {
            self.api.token = Some(token);
        }

        if let Some(plan) = lookup("TIMELINE_PLAN") {
            self.system.default_plan = plan;
        }

        if let Some(ttl) = lookup("TIMELINE_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(secs) => self.cache.ttl_secs = secs,
                Err(e) => warnings.push(format!("Ignoring invalid TIMELINE_TTL_SECS '{ttl}': {e}")),
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.system.log_level = level;
        }

        warnings
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("api.base_url cannot be empty");
        }
        if self.api.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs must be greater than zero");
        }
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than zero");
        }
        if self.cache.refresh_interval_secs == 0 {
            anyhow::bail!("cache.refresh_interval_secs must be greater than zero");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        if self.analysis.variance_threshold < 0.0 || self.analysis.neutral_threshold < 0.0 {
            anyhow::bail!("analysis thresholds cannot be negative");
        }
        if !(1..=MAX_VARIANCE_ENTRIES).contains(&self.analysis.variance_top_n) {
            anyhow::bail!(
                "analysis.variance_top_n must be between 1 and {}, got {}",
                MAX_VARIANCE_ENTRIES,
                self.analysis.variance_top_n
            );
        }
        if self.system.default_plan.trim().is_empty() {
            anyhow::bail!("system.default_plan cannot be empty");
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.system
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.system.timezone, e))
    }

    pub fn cache_settings(&self) -> Result<CacheSettings> {
        Ok(CacheSettings {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            timezone: self.timezone()?,
            analysis: self.analysis.clone(),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cache.refresh_interval_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.system.default_plan, "hybrid");
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Prague);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[api]
base_url = "http://localhost:8123/api/oig_cloud/battery_forecast/2206237016"
token = "secret"

[cache]
ttl_secs = 30

[analysis]
variance_threshold = 0.8

[system]
default_plan = "autonomy"
"#
        )
        .unwrap();

        let loaded =
            AppConfig::load_from_path_with(file.path(), |_| Some("env".to_owned())).unwrap();
        assert_eq!(loaded.source, ConfigSource::File(file.path().to_path_buf()));
        let config = loaded.config;
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.cache.refresh_interval_secs, 60);
        assert!((config.analysis.variance_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.analysis.variance_top_n, 3);
        assert_eq!(config.system.default_plan, "autonomy");
        assert_eq!(config.cache_settings().unwrap().ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(
            file,
            r#"{{"retry": {{"max_retries": 5}}, "system": {{"timezone": "UTC"}}}}"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap().config;
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[cache\nttl_secs = ").unwrap();

        let err = AppConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("ttl_secs"));

        let mut config = AppConfig::default();
        config.system.timezone = "Mars/Olympus".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("timezone"));

        let mut config = AppConfig::default();
        config.analysis.neutral_threshold = -0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_variance_top_n_is_bounded() {
        let mut config = AppConfig::default();
        config.analysis.variance_top_n = 5;
        assert!(config.validate().unwrap_err().to_string().contains("variance_top_n"));

        config.analysis.variance_top_n = 0;
        assert!(config.validate().is_err());

        config.analysis.variance_top_n = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_without_token_falls_back_to_env() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"api": {{"token": ""}}, "system": {{"timezone": "UTC"}}}}"#).unwrap();

        let env: HashMap<&str, &str> = HashMap::from([("SUPERVISOR_TOKEN", "supervisor")]);
        let loaded =
            AppConfig::load_from_path_with(file.path(), |key| env.get(key).map(|v| (*v).to_owned()))
                .unwrap();
        assert_eq!(loaded.config.api.token.as_deref(), Some("supervisor"));
        assert!(loaded.warnings.is_empty());

        let loaded = AppConfig::load_from_path_with(file.path(), |_| None).unwrap();
        assert_eq!(loaded.config.api.token, None);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TIMELINE_API_URL", "http://example:8123/forecast"),
            ("SUPERVISOR_TOKEN", "supervisor"),
            ("TIMELINE_PLAN", "autonomy"),
            ("TIMELINE_TTL_SECS", "not-a-number"),
            ("LOG_LEVEL", "debug"),
        ]);

        let mut config = AppConfig::default();
        let warnings = config.apply_overrides(|key| env.get(key).map(|v| (*v).to_owned()));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("TIMELINE_TTL_SECS"));

        assert_eq!(config.api.base_url, "http://example:8123/forecast");
        assert_eq!(config.api.token.as_deref(), Some("supervisor"));
        assert_eq!(config.system.default_plan, "autonomy");
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.system.log_level, "debug");
    }
}
