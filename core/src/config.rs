// Aggregator configuration
//
// Defaults come from environment variables; an optional TOML file is
// overlaid on top (path via PONTIFEX_CONFIG or ./pontifex.toml).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AnalyticsError, Result};

/// Window of history the dashboard covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1h",
            TimeRange::FourHours => "4h",
            TimeRange::EightHours => "8h",
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            TimeRange::OneHour => chrono::Duration::hours(1),
            TimeRange::FourHours => chrono::Duration::hours(4),
            TimeRange::EightHours => chrono::Duration::hours(8),
            TimeRange::Day => chrono::Duration::hours(24),
            TimeRange::Week => chrono::Duration::days(7),
            TimeRange::Month => chrono::Duration::days(30),
        }
    }

    /// Maximum number of points kept per trend series
    pub fn trend_buckets(&self) -> usize {
        match self {
            TimeRange::OneHour => 60,
            TimeRange::FourHours => 48,
            TimeRange::EightHours => 48,
            TimeRange::Day => 96,
            TimeRange::Week => 168,
            TimeRange::Month => 180,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1h" => Ok(TimeRange::OneHour),
            "4h" => Ok(TimeRange::FourHours),
            "8h" => Ok(TimeRange::EightHours),
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            other => Err(AnalyticsError::Config(format!(
                "unknown time range '{}'",
                other
            ))),
        }
    }
}

/// How often the dashboard is fully recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshRate {
    #[serde(rename = "realtime")]
    Realtime,
    #[serde(rename = "10s")]
    TenSeconds,
    #[serde(rename = "30s")]
    ThirtySeconds,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "manual")]
    Manual,
}

impl RefreshRate {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshRate::Realtime => "realtime",
            RefreshRate::TenSeconds => "10s",
            RefreshRate::ThirtySeconds => "30s",
            RefreshRate::OneMinute => "1m",
            RefreshRate::FiveMinutes => "5m",
            RefreshRate::Manual => "manual",
        }
    }

    /// Period of the full-refresh timer. `realtime` relies on change events
    /// alone and `manual` on explicit refreshes, so neither gets a timer.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            RefreshRate::Realtime | RefreshRate::Manual => None,
            RefreshRate::TenSeconds => Some(Duration::from_millis(10_000)),
            RefreshRate::ThirtySeconds => Some(Duration::from_millis(30_000)),
            RefreshRate::OneMinute => Some(Duration::from_millis(60_000)),
            RefreshRate::FiveMinutes => Some(Duration::from_millis(300_000)),
        }
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshRate {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "realtime" => Ok(RefreshRate::Realtime),
            "10s" => Ok(RefreshRate::TenSeconds),
            "30s" => Ok(RefreshRate::ThirtySeconds),
            "1m" => Ok(RefreshRate::OneMinute),
            "5m" => Ok(RefreshRate::FiveMinutes),
            "manual" => Ok(RefreshRate::Manual),
            other => Err(AnalyticsError::Config(format!(
                "unknown refresh rate '{}'",
                other
            ))),
        }
    }
}

/// Reconnect backoff for telemetry sockets
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: env_parse("PONTIFEX_RECONNECT_INITIAL_MS").unwrap_or(1_000),
            max_ms: env_parse("PONTIFEX_RECONNECT_MAX_MS").unwrap_or(60_000),
            multiplier: env_parse("PONTIFEX_RECONNECT_MULTIPLIER").unwrap_or(2.0),
        }
    }
}

/// Top-level aggregator configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub company_id: String,
    pub time_range: TimeRange,
    pub refresh_rate: RefreshRate,
    /// Exposure monitor feed; no listener when unset
    pub silica_monitor_url: Option<String>,
    /// Equipment telemetry feed; no listener when unset
    pub equipment_telemetry_url: Option<String>,
    pub max_alerts: usize,
    pub backoff: BackoffConfig,
    /// JSON fixture file used by the runner's in-memory data source
    pub fixtures_path: Option<PathBuf>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            company_id: std::env::var("PONTIFEX_COMPANY_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "default".to_string()),
            time_range: env_parse("PONTIFEX_TIME_RANGE").unwrap_or(TimeRange::Day),
            refresh_rate: env_parse("PONTIFEX_REFRESH_RATE").unwrap_or(RefreshRate::ThirtySeconds),
            silica_monitor_url: env_string("PONTIFEX_SILICA_MONITOR_URL"),
            equipment_telemetry_url: env_string("PONTIFEX_EQUIPMENT_TELEMETRY_URL"),
            max_alerts: env_parse("PONTIFEX_MAX_ALERTS").unwrap_or(100),
            backoff: BackoffConfig::default(),
            fixtures_path: env_string("PONTIFEX_FIXTURES").map(PathBuf::from),
        }
    }
}

impl AggregatorConfig {
    /// Environment-only configuration
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file, overlaying values onto env-driven
    /// defaults. A missing file is not an error; an unreadable or invalid one is
    /// logged and ignored.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("PONTIFEX_CONFIG").unwrap_or_else(|_| "pontifex.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "config", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// Overlay a TOML document onto `base`
    pub fn from_toml_str(s: &str, base: AggregatorConfig) -> Result<Self> {
        let t: AggregatorToml = toml::from_str(s)?;
        t.overlay(base)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct AggregatorToml {
    company_id: Option<String>,
    time_range: Option<String>,
    refresh_rate: Option<String>,
    max_alerts: Option<usize>,
    fixtures: Option<PathBuf>,
    telemetry: Option<TelemetryToml>,
    reconnect: Option<ReconnectToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TelemetryToml {
    silica_monitor_url: Option<String>,
    equipment_telemetry_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReconnectToml {
    initial_ms: Option<u64>,
    max_ms: Option<u64>,
    multiplier: Option<f64>,
}

impl AggregatorToml {
    fn overlay(self, mut base: AggregatorConfig) -> Result<AggregatorConfig> {
        if let Some(c) = self.company_id {
            base.company_id = c;
        }
        if let Some(r) = self.time_range {
            base.time_range = r.parse()?;
        }
        if let Some(r) = self.refresh_rate {
            base.refresh_rate = r.parse()?;
        }
        if let Some(m) = self.max_alerts {
            if m == 0 {
                return Err(AnalyticsError::Config("max_alerts must be > 0".into()));
            }
            base.max_alerts = m;
        }
        if let Some(f) = self.fixtures {
            base.fixtures_path = Some(f);
        }
        if let Some(t) = self.telemetry {
            if let Some(u) = t.silica_monitor_url.filter(|s| !s.is_empty()) {
                base.silica_monitor_url = Some(u);
            }
            if let Some(u) = t.equipment_telemetry_url.filter(|s| !s.is_empty()) {
                base.equipment_telemetry_url = Some(u);
            }
        }
        if let Some(r) = self.reconnect {
            if let Some(v) = r.initial_ms {
                base.backoff.initial_ms = v;
            }
            if let Some(v) = r.max_ms {
                base.backoff.max_ms = v;
            }
            if let Some(v) = r.multiplier {
                base.backoff.multiplier = v;
            }
        }
        Ok(base)
    }
}
