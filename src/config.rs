//! Application configuration loaded from environment variables.
//!
//! Everything is validated once at startup; a bad value stops the process
//! instead of surfacing later as a wrong leaderboard.

use crate::models::trail::{EdgePolicy, MatchOptions, DEFAULT_TOLERANCE_METERS};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Where application data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory; data is lost on restart
    Memory,
    Firestore,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "firestore" => Ok(StoreBackend::Firestore),
            other => Err(format!("expected 'memory' or 'firestore', got '{}'", other)),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    pub store_backend: StoreBackend,
    /// GCP project ID (required for Firestore)
    pub gcp_project_id: Option<String>,
    /// GeoJSON files making up the reference trail
    pub trail_data_paths: Vec<PathBuf>,
    pub trail_tolerance_meters: f64,
    pub trail_edge_policy: EdgePolicy,
    /// Zone used when neither the activity nor the athlete has one
    pub default_timezone: Tz,
    /// Activities starting (local time) before this date never count
    pub leaderboard_start_date: NaiveDate,
    /// Attempts per aggregate row before giving up with a conflict
    pub aggregate_max_retries: u32,
    /// Age after which a recompute lease is considered abandoned
    pub recalc_lease_minutes: i64,
    /// Cloud Tasks queue allowed to call `/tasks/*`
    pub tasks_queue_name: String,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            store_backend: StoreBackend::Memory,
            gcp_project_id: None,
            trail_data_paths: Vec::new(),
            trail_tolerance_meters: DEFAULT_TOLERANCE_METERS,
            trail_edge_policy: EdgePolicy::Either,
            default_timezone: chrono_tz::America::New_York,
            leaderboard_start_date: default_start_date(),
            aggregate_max_retries: 5,
            recalc_lease_minutes: 30,
            tasks_queue_name: "activity-processing".to_string(),
        }
    }

    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store_backend = parse_or(&get, "STORE_BACKEND", StoreBackend::Memory)?;
        let gcp_project_id = get("GCP_PROJECT_ID");
        if store_backend == StoreBackend::Firestore && gcp_project_id.is_none() {
            return Err(ConfigError::Missing("GCP_PROJECT_ID"));
        }

        let trail_data_paths = get("TRAIL_DATA_PATHS")
            .unwrap_or_else(|| "data/trails/main.geojson,data/trails/spurs.geojson".to_string())
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        if trail_data_paths.is_empty() {
            return Err(ConfigError::Invalid {
                key: "TRAIL_DATA_PATHS",
                reason: "no paths given".to_string(),
            });
        }

        let trail_tolerance_meters: f64 =
            parse_or(&get, "TRAIL_TOLERANCE_METERS", DEFAULT_TOLERANCE_METERS)?;
        if !trail_tolerance_meters.is_finite() || trail_tolerance_meters <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "TRAIL_TOLERANCE_METERS",
                reason: "must be a positive number".to_string(),
            });
        }

        let aggregate_max_retries: u32 = parse_or(&get, "AGGREGATE_MAX_RETRIES", 5)?;
        if aggregate_max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "AGGREGATE_MAX_RETRIES",
                reason: "must be at least 1".to_string(),
            });
        }

        let recalc_lease_minutes: i64 = parse_or(&get, "RECALC_LEASE_MINUTES", 30)?;
        if recalc_lease_minutes <= 0 {
            return Err(ConfigError::Invalid {
                key: "RECALC_LEASE_MINUTES",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            port: parse_or(&get, "PORT", 8080)?,
            store_backend,
            gcp_project_id,
            trail_data_paths,
            trail_tolerance_meters,
            trail_edge_policy: parse_or(&get, "TRAIL_EDGE_POLICY", EdgePolicy::Either)?,
            default_timezone: parse_or(&get, "DEFAULT_TIMEZONE", chrono_tz::America::New_York)?,
            leaderboard_start_date: parse_or(&get, "LEADERBOARD_START_DATE", default_start_date())?,
            aggregate_max_retries,
            recalc_lease_minutes,
            tasks_queue_name: get("TASKS_QUEUE_NAME")
                .unwrap_or_else(|| "activity-processing".to_string()),
        })
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            tolerance_meters: self.trail_tolerance_meters,
            edge_policy: self.trail_edge_policy,
            keep_point_flags: false,
        }
    }

    pub fn recalc_lease(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recalc_lease_minutes)
    }

    /// Local midnight of the leaderboard start date.
    pub fn leaderboard_start(&self) -> NaiveDateTime {
        self.leaderboard_start_date.and_time(NaiveTime::MIN)
    }
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default()
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
