// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard window calculation.
//!
//! Windows are half-open `[start, end)` ranges of local wall-clock time. The
//! time zone is always supplied by the caller: an activity's own zone when
//! bucketing activities, the requester's zone when answering a query.

use crate::time_utils::local_to_utc;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Leaderboard period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    /// ISO week, Monday to Monday
    Week,
    Month,
    Year,
}

impl WindowType {
    pub const ALL: [WindowType; 3] = [WindowType::Week, WindowType::Month, WindowType::Year];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Week => "week",
            WindowType::Month => "month",
            WindowType::Year => "year",
        }
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(WindowType::Week),
            "month" => Ok(WindowType::Month),
            "year" => Ok(WindowType::Year),
            other => Err(format!("unknown window '{}'", other)),
        }
    }
}

/// One leaderboard period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub window_type: WindowType,
    /// Canonical key: `week_YYYY-MM-DD` (the Monday), `month_YYYY-MM`, `year_YYYY`
    pub key: String,
    /// Inclusive local start
    pub start: NaiveDateTime,
    /// Exclusive local end
    pub end: NaiveDateTime,
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.ordinal0()))
}

fn bounds_for(date: NaiveDate, window_type: WindowType) -> (NaiveDate, NaiveDate) {
    match window_type {
        WindowType::Week => {
            let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            (monday, monday + Duration::days(7))
        }
        WindowType::Month => {
            let first = first_of_month(date);
            (first, first_of_month(first + Duration::days(32)))
        }
        WindowType::Year => {
            let first = first_of_year(date);
            (first, first_of_year(first + Duration::days(366)))
        }
    }
}

fn key_for(start: NaiveDate, window_type: WindowType) -> String {
    match window_type {
        WindowType::Week => format!("week_{}", start.format("%Y-%m-%d")),
        WindowType::Month => format!("month_{}", start.format("%Y-%m")),
        WindowType::Year => format!("year_{}", start.format("%Y")),
    }
}

/// The window of `window_type` containing a local wall-clock time.
pub fn window_for_local(local: NaiveDateTime, window_type: WindowType) -> Window {
    let (start, end) = bounds_for(local.date(), window_type);
    Window {
        window_type,
        key: key_for(start, window_type),
        start: start.and_time(chrono::NaiveTime::MIN),
        end: end.and_time(chrono::NaiveTime::MIN),
    }
}

/// The window of `window_type` containing `timestamp` as seen in `tz`.
pub fn window_for_instant(timestamp: DateTime<Utc>, window_type: WindowType, tz: Tz) -> Window {
    window_for_local(timestamp.with_timezone(&tz).naive_local(), window_type)
}

/// One window of each type containing a local time.
pub fn windows_for_local(local: NaiveDateTime) -> [Window; 3] {
    WindowType::ALL.map(|wt| window_for_local(local, wt))
}

impl Window {
    /// The window immediately before this one.
    pub fn previous(&self) -> Window {
        window_for_local(self.start - Duration::days(1), self.window_type)
    }

    /// The window immediately after this one.
    pub fn next(&self) -> Window {
        window_for_local(self.end, self.window_type)
    }

    /// Whether a local time falls in `[start, end)`.
    pub fn contains(&self, local: NaiveDateTime) -> bool {
        self.start <= local && local < self.end
    }

    /// Calendar days in the window.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Days from the window start up to and including the day of `local`.
    pub fn days_elapsed(&self, local: NaiveDateTime) -> i64 {
        (local.date() - self.start.date()).num_days() + 1
    }

    /// Resolve the local boundaries to instants in `tz`.
    pub fn bounds_in(&self, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        (local_to_utc(self.start, tz), local_to_utc(self.end, tz))
    }

    /// Inverse of the key format. Rejects non-canonical keys (e.g. a week
    /// key that is not a Monday).
    pub fn parse_key(key: &str) -> Result<Window, String> {
        let (prefix, rest) = key
            .split_once('_')
            .ok_or_else(|| format!("malformed window key '{}'", key))?;
        let window_type: WindowType = prefix.parse()?;

        let date = match window_type {
            WindowType::Week => NaiveDate::parse_from_str(rest, "%Y-%m-%d").ok(),
            WindowType::Month => rest.split_once('-').and_then(|(y, m)| {
                NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1)
            }),
            WindowType::Year => rest
                .parse()
                .ok()
                .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
        }
        .ok_or_else(|| format!("malformed window key '{}'", key))?;

        let window = window_for_local(date.and_time(chrono::NaiveTime::MIN), window_type);
        if window.key != key {
            return Err(format!("non-canonical window key '{}'", key));
        }
        Ok(window)
    }
}
