// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard aggregates, metrics and query results.
//!
//! Aggregate values are kept as integer milli-units (millimeters,
//! milliseconds) so that adding and removing contributions is exact and the
//! result does not depend on the order in which activities were applied.

use crate::models::Activity;
use crate::services::window::WindowType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed-point scale for stored aggregate values.
pub const VALUE_SCALE: f64 = 1000.0;

/// Largest metric value one activity may contribute (a million km, or about
/// 31 years of moving time). Larger values are treated as corrupt input.
pub const MAX_METRIC_VALUE: f64 = 1.0e9;

/// Convert a metric value to fixed-point milli-units, clamped to
/// `0..=MAX_METRIC_VALUE`.
pub fn to_fixed(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(0.0, MAX_METRIC_VALUE) * VALUE_SCALE).round() as i64
}

/// Convert fixed-point milli-units back to a metric value.
pub fn from_fixed(value: i64) -> f64 {
    value as f64 / VALUE_SCALE
}

/// Partition every activity contributes to.
pub const ALL_ACTIVITY_TYPES: &str = "all";

/// A ranked quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Total activity distance (meters)
    Distance,
    /// Moving time (seconds)
    MovingTime,
    /// Elevation gain (meters)
    ElevationGain,
    /// Distance on the reference trail (meters)
    DistanceOnTrail,
    /// Time on the reference trail (seconds)
    TimeOnTrail,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Distance,
        Metric::MovingTime,
        Metric::ElevationGain,
        Metric::DistanceOnTrail,
        Metric::TimeOnTrail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Distance => "distance",
            Metric::MovingTime => "moving_time",
            Metric::ElevationGain => "elevation_gain",
            Metric::DistanceOnTrail => "distance_on_trail",
            Metric::TimeOnTrail => "time_on_trail",
        }
    }

    /// The activity's value for this metric, if it has one.
    ///
    /// Trail metrics are absent until the activity has been matched.
    /// Non-finite, negative and implausibly large values count as absent.
    pub fn value_of(&self, activity: &Activity) -> Option<f64> {
        let value = match self {
            Metric::Distance => Some(activity.distance_meters),
            Metric::MovingTime => Some(f64::from(activity.moving_time_secs)),
            Metric::ElevationGain => Some(activity.elevation_gain_meters),
            Metric::DistanceOnTrail => activity.distance_on_trail_meters,
            Metric::TimeOnTrail => activity.time_on_trail_secs.map(f64::from),
        };
        value.filter(|v| v.is_finite() && (0.0..=MAX_METRIC_VALUE).contains(v))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric '{}'", s))
    }
}

/// Coarse grouping of Strava activity types.
pub fn activity_type_group(activity_type: &str) -> Option<&'static str> {
    match activity_type {
        "Run" | "Walk" | "Hike" | "TrailRun" | "VirtualRun" => Some("foot"),
        "Ride" | "GravelRide" | "MountainBikeRide" | "EBikeRide" | "EMountainBikeRide"
        | "VirtualRide" => Some("bike"),
        _ => None,
    }
}

/// Every activity-type partition an activity of `activity_type` counts toward:
/// `all`, its own type, and its group if it has one.
pub fn activity_type_partitions(activity_type: &str) -> Vec<String> {
    let mut partitions = vec![ALL_ACTIVITY_TYPES.to_string()];
    let trimmed = activity_type.trim();
    if !trimmed.is_empty() && trimmed != ALL_ACTIVITY_TYPES {
        partitions.push(trimmed.to_string());
    }
    if let Some(group) = activity_type_group(trimmed) {
        partitions.push(group.to_string());
    }
    partitions
}

/// Identity of one aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggregateKey {
    pub window_key: String,
    pub metric: Metric,
    pub activity_type: String,
    pub athlete_id: u64,
}

impl AggregateKey {
    /// Stable document ID for storage.
    pub fn doc_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.window_key,
            self.metric.as_str(),
            urlencoding::encode(&self.activity_type),
            self.athlete_id
        )
    }

    /// The window type encoded in the key prefix.
    pub fn window_type(&self) -> Option<WindowType> {
        self.window_key
            .split_once('_')
            .and_then(|(prefix, _)| prefix.parse().ok())
    }
}

/// An aggregate sum left the range of `i64` milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aggregate value out of range")]
pub struct ValueOverflow;

/// Accumulated metric for one athlete in one window/metric/type partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardAggregate {
    pub window: WindowType,
    pub window_key: String,
    pub metric: Metric,
    pub activity_type: String,
    pub athlete_id: u64,
    /// Sum of contributions in milli-units
    pub value_milli: i64,
    /// Per-activity contribution (activity ID → milli-units)
    #[serde(default)]
    pub contributions: BTreeMap<String, i64>,
    pub last_updated: DateTime<Utc>,
    /// Bumped on every write for optimistic concurrency
    #[serde(default)]
    pub version: u64,
}

impl LeaderboardAggregate {
    /// A zero-valued row for `key`.
    pub fn empty(key: &AggregateKey, window: WindowType, now: DateTime<Utc>) -> Self {
        Self {
            window,
            window_key: key.window_key.clone(),
            metric: key.metric,
            activity_type: key.activity_type.clone(),
            athlete_id: key.athlete_id,
            value_milli: 0,
            contributions: BTreeMap::new(),
            last_updated: now,
            version: 0,
        }
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            window_key: self.window_key.clone(),
            metric: self.metric,
            activity_type: self.activity_type.clone(),
            athlete_id: self.athlete_id,
        }
    }

    /// Value in metric units.
    pub fn value(&self) -> f64 {
        from_fixed(self.value_milli)
    }

    pub fn activity_count(&self) -> usize {
        self.contributions.len()
    }

    pub fn contribution(&self, activity_id: u64) -> Option<i64> {
        self.contributions.get(&activity_id.to_string()).copied()
    }

    /// Set (or clear, with `None`) one activity's contribution, adjusting the
    /// value by the difference. Returns `Ok(false)` if nothing changed; the
    /// row is left untouched on overflow.
    pub fn set_contribution(
        &mut self,
        activity_id: u64,
        contribution: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, ValueOverflow> {
        let id = activity_id.to_string();
        let previous = self.contributions.get(&id).copied();
        if previous == contribution {
            return Ok(false);
        }

        let delta = contribution
            .unwrap_or(0)
            .checked_sub(previous.unwrap_or(0))
            .ok_or(ValueOverflow)?;
        self.value_milli = self.value_milli.checked_add(delta).ok_or(ValueOverflow)?;
        match contribution {
            Some(value) => {
                self.contributions.insert(id, value);
            }
            None => {
                self.contributions.remove(&id);
            }
        }
        self.last_updated = now;
        Ok(true)
    }
}

/// Result of an aggregate write with an expected version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Someone else wrote the row since it was read
    VersionConflict,
}

/// Summary of a bulk recompute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalculationReport {
    pub activities_processed: usize,
    pub athletes_processed: usize,
    /// Activities skipped for missing start dates
    pub activities_skipped: usize,
    pub aggregates_written: usize,
    pub duration_ms: u64,
}

/// Bookkeeping for the aggregate table as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardMeta {
    /// Set while a recompute holds the table; renewed before the table swap
    #[serde(default)]
    pub recalculation_started_at: Option<DateTime<Utc>>,
    /// Identifies the recompute holding the lease
    #[serde(default)]
    pub recalculation_lease_id: Option<String>,
    #[serde(default)]
    pub last_recalculated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_report: Option<RecalculationReport>,
}

impl LeaderboardMeta {
    /// A recompute lease is held and has not gone stale.
    pub fn recalculation_in_progress(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        self.recalculation_started_at
            .is_some_and(|started| now - started < lease)
    }

    /// The live lease belongs to `lease_id`.
    pub fn holds_lease(&self, lease_id: &str, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        self.recalculation_lease_id.as_deref() == Some(lease_id)
            && self.recalculation_in_progress(now, lease)
    }

    /// Take the lease for `lease_id` unless someone else holds a live one.
    pub fn try_take_lease(
        &mut self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> bool {
        if self.recalculation_in_progress(now, lease) {
            return false;
        }
        self.recalculation_started_at = Some(now);
        self.recalculation_lease_id = Some(lease_id.to_string());
        true
    }

    /// Extend a live lease held by `lease_id`. A stale or foreign lease is
    /// left alone.
    pub fn try_renew_lease(
        &mut self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> bool {
        if !self.holds_lease(lease_id, now, lease) {
            return false;
        }
        self.recalculation_started_at = Some(now);
        true
    }

    /// Drop the lease if `lease_id` still owns it. A `Some` report marks the
    /// table initialized. Returns `false` if the lease had passed to
    /// someone else.
    pub fn release_lease(
        &mut self,
        lease_id: &str,
        report: Option<&RecalculationReport>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.recalculation_lease_id.as_deref() != Some(lease_id) {
            return false;
        }
        self.recalculation_started_at = None;
        self.recalculation_lease_id = None;
        if let Some(report) = report {
            self.last_recalculated_at = Some(now);
            self.last_report = Some(report.clone());
        }
        true
    }
}

/// Whether a leaderboard read found data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardState {
    Populated,
    /// Aggregates exist in general but nobody qualified in this window
    Empty,
    /// The aggregate table was never built
    Uninitialized,
}

/// Public athlete info shown next to a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardUser {
    pub id: u64,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// One ranked row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user: LeaderboardUser,
    pub value: f64,
    pub activity_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// The requesting athlete's own position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MyRank {
    pub rank: usize,
    pub value: f64,
}

/// A page of leaderboard results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub rows: Vec<LeaderboardEntry>,
    pub my_rank: Option<MyRank>,
    pub previous_top3: Vec<LeaderboardEntry>,
    pub cursor: Option<String>,
    pub window_key: String,
    pub previous_window_key: String,
    pub metric: Metric,
    pub activity_type: String,
    pub total_athletes: usize,
    pub state: LeaderboardState,
}
