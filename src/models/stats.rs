// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-athlete views derived from the leaderboard aggregate rows.

use crate::models::Metric;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One activity's share of an athlete's windowed total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingActivity {
    pub activity_id: u64,
    /// Contribution in metric units
    pub value: f64,
    /// Activity details; absent if the record is gone
    pub name: Option<String>,
    pub activity_type: Option<String>,
    pub start_date_local: Option<NaiveDateTime>,
}

/// The activities behind one aggregate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteContributions {
    pub athlete_id: u64,
    pub window_key: String,
    pub metric: Metric,
    pub activity_type: String,
    pub total: f64,
    /// Newest first
    pub activities: Vec<ContributingActivity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

/// Current period against the one before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub window_key: String,
    pub previous_window_key: String,
    pub current: f64,
    /// `None` when the previous period has nothing recorded
    pub previous: Option<f64>,
    /// Current pace extended over the whole period
    pub projected: f64,
    /// Projection against the previous period; `None` when level or
    /// there is nothing to compare with
    pub trend: Option<Trend>,
    /// Still needed to pass the previous period, never negative
    pub remaining_to_beat: Option<f64>,
    /// Days into the period, counting today
    pub elapsed_days: i64,
    pub total_days: i64,
}

impl PeriodStats {
    pub fn new(
        window_key: String,
        previous_window_key: String,
        current: f64,
        previous: Option<f64>,
        elapsed_days: i64,
        total_days: i64,
    ) -> Self {
        let previous = previous.filter(|p| *p > 0.0);
        let elapsed_days = elapsed_days.clamp(1, total_days.max(1));

        let projected = if total_days > 0 {
            current / elapsed_days as f64 * total_days as f64
        } else {
            0.0
        };
        let projected = if projected.is_finite() { projected } else { 0.0 };

        let trend = previous.and_then(|p| {
            if projected > p {
                Some(Trend::Up)
            } else if projected < p {
                Some(Trend::Down)
            } else {
                None
            }
        });

        Self {
            window_key,
            previous_window_key,
            current,
            previous,
            projected,
            trend,
            remaining_to_beat: previous.map(|p| (p - current).max(0.0)),
            elapsed_days,
            total_days,
        }
    }
}

/// Week, month and year summaries for one athlete and metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub athlete_id: u64,
    pub metric: Metric,
    pub activity_type: String,
    pub week: PeriodStats,
    pub month: PeriodStats,
    pub year: PeriodStats,
}
