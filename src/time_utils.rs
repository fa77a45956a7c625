// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and time zone resolution.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a time zone as Strava reports it, e.g.
/// `"(GMT-08:00) America/Los_Angeles"`, or a bare IANA name.
pub fn parse_strava_timezone(value: &str) -> Option<Tz> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let name = match trimmed.strip_prefix('(') {
        Some(rest) => rest.split_once(')').map(|(_, name)| name.trim())?,
        None => trimmed,
    };
    name.parse().ok()
}

/// Pick the first parseable zone from `candidates`, falling back to `default`.
///
/// Logs when the fallback is used so a silent drift to the default zone shows
/// up in the logs.
pub fn resolve_timezone<'a>(
    candidates: impl IntoIterator<Item = Option<&'a str>>,
    default: Tz,
) -> Tz {
    let mut rejected = Vec::new();
    for candidate in candidates.into_iter().flatten() {
        match parse_strava_timezone(candidate) {
            Some(tz) => return tz,
            None => rejected.push(candidate),
        }
    }
    tracing::debug!(
        rejected = ?rejected,
        default = %default,
        "No usable time zone, using default"
    );
    default
}

/// Resolve a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times in a DST
/// gap move forward to the first valid instant after the gap.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let mut candidate = local;
    // Gaps are at most a few hours; step by 15 minutes
    for _ in 0..=16 {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
        candidate += chrono::Duration::minutes(15);
    }
    // Unreachable for real zones; treat the wall clock as UTC
    Utc.from_utc_datetime(&local)
}
