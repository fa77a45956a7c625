// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Reference trail geometry, activity routes and match results.

use crate::geometry::GeoPoint;
use chrono::{DateTime, Utc};
use geo::{BoundingRect, LineString, Rect};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One named polyline of the reference trail (e.g. "main", "spur-1").
#[derive(Debug, Clone)]
pub struct TrailLine {
    pub name: String,
    /// Coordinates with x = longitude, y = latitude
    pub line: LineString<f64>,
}

impl TrailLine {
    /// Number of segments (consecutive point pairs).
    pub fn segment_count(&self) -> usize {
        self.line.0.len().saturating_sub(1)
    }
}

/// The reference trail: an ordered set of named polylines.
///
/// Loaded once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Trail {
    lines: Vec<TrailLine>,
    bounds: Option<Rect<f64>>,
}

impl Trail {
    pub fn new(lines: Vec<TrailLine>) -> Self {
        let bounds = lines
            .iter()
            .filter_map(|l| l.line.bounding_rect())
            .reduce(|acc, r| {
                Rect::new(
                    geo::coord! { x: acc.min().x.min(r.min().x), y: acc.min().y.min(r.min().y) },
                    geo::coord! { x: acc.max().x.max(r.max().x), y: acc.max().y.max(r.max().y) },
                )
            });
        Self { lines, bounds }
    }

    pub fn lines(&self) -> &[TrailLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.lines.iter().map(TrailLine::segment_count).sum()
    }

    /// Bounding box over every polyline (x = longitude, y = latitude).
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.bounds
    }
}

/// One recorded sample of an activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutePoint {
    pub point: GeoPoint,
    pub time: Option<DateTime<Utc>>,
}

/// The ordered samples of one recorded activity.
#[derive(Debug, Clone, Default)]
pub struct ActivityRoute {
    pub points: Vec<RoutePoint>,
    /// Moving time used to estimate time on trail when samples carry no timestamps
    pub moving_time_secs: Option<u32>,
}

impl ActivityRoute {
    /// Route from untimed points, e.g. a decoded polyline.
    pub fn from_points(points: impl IntoIterator<Item = GeoPoint>, moving_time_secs: Option<u32>) -> Self {
        Self {
            points: points
                .into_iter()
                .map(|point| RoutePoint { point, time: None })
                .collect(),
            moving_time_secs,
        }
    }

    /// Route from timestamped samples.
    pub fn from_timed_points(points: impl IntoIterator<Item = (GeoPoint, DateTime<Utc>)>) -> Self {
        Self {
            points: points
                .into_iter()
                .map(|(point, time)| RoutePoint {
                    point,
                    time: Some(time),
                })
                .collect(),
            moving_time_secs: None,
        }
    }

    /// Decode a Google encoded polyline (precision 5, as Strava uses).
    pub fn from_polyline(encoded: &str, moving_time_secs: Option<u32>) -> Result<Self, String> {
        let line = polyline::decode_polyline(encoded, 5).map_err(|e| e.to_string())?;
        Ok(Self::from_points(
            line.0.into_iter().map(GeoPoint::from),
            moving_time_secs,
        ))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// How an edge between two route points is attributed when only one
/// endpoint is on the trail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Edge counts as on-trail if either endpoint is on trail
    #[default]
    Either,
    /// Edge counts only if both endpoints are on trail
    Both,
    /// Edge counts if its midpoint is within tolerance of the trail
    Midpoint,
}

impl FromStr for EdgePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "either" => Ok(EdgePolicy::Either),
            "both" => Ok(EdgePolicy::Both),
            "midpoint" => Ok(EdgePolicy::Midpoint),
            other => Err(format!("unknown edge policy '{}'", other)),
        }
    }
}

/// Matching parameters.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub tolerance_meters: f64,
    pub edge_policy: EdgePolicy,
    /// Keep per-point flags and runs for debug visualization
    pub keep_point_flags: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            tolerance_meters: DEFAULT_TOLERANCE_METERS,
            edge_policy: EdgePolicy::default(),
            keep_point_flags: false,
        }
    }
}

/// Distance from the trail within which a point counts as on-trail.
pub const DEFAULT_TOLERANCE_METERS: f64 = 25.0;

/// A maximal stretch of consecutive points with the same classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailRun {
    pub on_trail: bool,
    /// Index of the first point (into the kept points)
    pub start_index: usize,
    /// Index of the last point, inclusive
    pub end_index: usize,
}

/// Derived on-trail aggregate for one activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub distance_on_trail_meters: f64,
    pub time_on_trail_secs: f64,
    pub total_distance_meters: f64,
    pub total_time_secs: f64,
    pub points_on_trail: usize,
    pub points_total: usize,
    /// Points dropped for non-finite coordinates
    pub points_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_flags: Option<Vec<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<Vec<TrailRun>>,
}

impl MatchResult {
    /// Fraction of the route distance that was on trail.
    pub fn on_trail_ratio(&self) -> f64 {
        if self.total_distance_meters > 0.0 {
            self.distance_on_trail_meters / self.total_distance_meters
        } else {
            0.0
        }
    }

    /// Time on trail rounded to whole seconds, as stored on the activity.
    pub fn time_on_trail_whole_secs(&self) -> u32 {
        self.time_on_trail_secs.round().max(0.0) as u32
    }
}

/// Group per-point flags into alternating runs.
pub fn group_runs(flags: &[bool]) -> Vec<TrailRun> {
    let mut runs: Vec<TrailRun> = Vec::new();
    for (i, &on) in flags.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.on_trail == on => run.end_index = i,
            _ => runs.push(TrailRun {
                on_trail: on,
                start_index: i,
                end_index: i,
            }),
        }
    }
    runs
}
