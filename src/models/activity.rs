// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava activity model for storage and leaderboard aggregation.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Strava activity ID (also used as document ID)
    pub strava_activity_id: u64,
    /// Strava athlete ID (owner)
    pub athlete_id: u64,
    /// Activity name/title
    #[serde(default)]
    pub name: String,
    /// Strava activity type (Ride, Run, Walk, etc.)
    #[serde(rename = "type")]
    pub activity_type: String,
    /// Start instant
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Start wall-clock time in the activity's own time zone
    #[serde(default)]
    pub start_date_local: Option<NaiveDateTime>,
    /// Strava time zone, e.g. "(GMT-08:00) America/Los_Angeles"
    #[serde(default)]
    pub timezone: Option<String>,
    /// Distance in meters
    #[serde(default)]
    pub distance_meters: f64,
    #[serde(default)]
    pub moving_time_secs: u32,
    #[serde(default)]
    pub elapsed_time_secs: u32,
    #[serde(default)]
    pub elevation_gain_meters: f64,
    /// Encoded route polyline (full or summary)
    #[serde(default)]
    pub polyline: Option<String>,
    /// Set by trail matching
    #[serde(default)]
    pub distance_on_trail_meters: Option<f64>,
    /// Set by trail matching
    #[serde(default)]
    pub time_on_trail_secs: Option<u32>,
    /// When trail matching last ran for this activity
    #[serde(default)]
    pub last_matched: Option<DateTime<Utc>>,
}

impl Activity {
    /// Whether trail metrics must be (re)computed for this record,
    /// given the previously stored version.
    pub fn needs_matching(&self, previous: Option<&Activity>) -> bool {
        match previous {
            Some(prev) => prev.last_matched.is_none() || prev.polyline != self.polyline,
            None => true,
        }
    }

    /// Copy trail metrics from a previously matched record.
    pub fn inherit_trail_metrics(&mut self, previous: &Activity) {
        self.distance_on_trail_meters = previous.distance_on_trail_meters;
        self.time_on_trail_secs = previous.time_on_trail_secs;
        self.last_matched = previous.last_matched;
    }
}

/// Webhook-style aspect of an activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectType {
    Create,
    Update,
    Delete,
}
