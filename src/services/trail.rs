// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Trail loading and route matching service.

use crate::geometry::{degree_margins, distance_to_segment, haversine_distance, GeoPoint};
use crate::models::trail::{
    group_runs, ActivityRoute, EdgePolicy, MatchOptions, MatchResult, RoutePoint, Trail, TrailLine,
};
use geo::{LineString, MultiLineString};
use geojson::GeoJson;
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use std::fs;
use std::path::Path;

/// Service holding the reference trail and matching routes against it.
#[derive(Debug, Default, Clone)]
pub struct TrailService {
    trail: Trail,
    options: MatchOptions,
}

impl TrailService {
    pub fn new(trail: Trail, options: MatchOptions) -> Self {
        Self { trail, options }
    }

    /// Load the trail from one GeoJSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Trail, TrailError> {
        let json_data =
            fs::read_to_string(path.as_ref()).map_err(|e| TrailError::IoError(e.to_string()))?;
        Self::load_from_json(&json_data)
    }

    /// Load and merge the trail from several GeoJSON files (e.g. main trail
    /// plus spurs).
    pub fn load_from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Trail, TrailError> {
        let mut lines = Vec::new();
        for path in paths {
            let trail = Self::load_from_file(path)?;
            tracing::debug!(
                path = %path.as_ref().display(),
                lines = trail.lines().len(),
                "Loaded trail file"
            );
            lines.extend(trail.lines().iter().cloned());
        }
        let trail = Trail::new(lines);
        tracing::info!(
            lines = trail.lines().len(),
            segments = trail.segment_count(),
            "Loaded trail"
        );
        Ok(trail)
    }

    /// Load the trail from a GeoJSON string.
    ///
    /// Accepts a FeatureCollection, a single Feature or a bare geometry.
    /// Only LineString and MultiLineString geometries are used; lines with
    /// fewer than two points are dropped.
    pub fn load_from_json(json_data: &str) -> Result<Trail, TrailError> {
        let geojson: GeoJson = json_data
            .parse()
            .map_err(|e: geojson::Error| TrailError::ParseError(e.to_string()))?;

        let features = match geojson {
            GeoJson::FeatureCollection(collection) => collection.features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(geometry) => vec![geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }],
        };

        let mut lines = Vec::new();
        for (index, feature) in features.into_iter().enumerate() {
            let name = feature
                .property("name")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("line-{}", index));

            let Some(geom) = feature.geometry else {
                continue;
            };

            let parts = match Self::convert_geometry(geom.value) {
                Some(parts) => parts,
                None => {
                    tracing::warn!(name = %name, "Skipping non-line trail geometry");
                    continue;
                }
            };

            let multi = parts.len() > 1;
            for (part, line) in parts.into_iter().enumerate() {
                if line.0.len() < 2 {
                    tracing::warn!(name = %name, part, "Dropping trail line with fewer than 2 points");
                    continue;
                }
                let name = if multi {
                    format!("{}-{}", name, part)
                } else {
                    name.clone()
                };
                lines.push(TrailLine { name, line });
            }
        }

        Ok(Trail::new(lines))
    }

    fn convert_geometry(value: geojson::Value) -> Option<Vec<LineString<f64>>> {
        use std::convert::TryInto;

        let line_result: Result<LineString<f64>, _> = value.clone().try_into();
        if let Ok(line) = line_result {
            return Some(vec![line]);
        }

        let multi_result: Result<MultiLineString<f64>, _> = value.try_into();
        multi_result.ok().map(|multi| multi.0)
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    /// Match one route with the service's options.
    pub fn match_route(&self, route: &ActivityRoute) -> MatchResult {
        match_route(route, &self.trail, &self.options)
    }

    /// Decode a Strava polyline (precision 5) and match it.
    pub fn match_polyline(
        &self,
        encoded: &str,
        moving_time_secs: Option<u32>,
    ) -> Result<MatchResult, TrailError> {
        let route = ActivityRoute::from_polyline(encoded, moving_time_secs)
            .map_err(TrailError::PolylineError)?;
        Ok(self.match_route(&route))
    }

    /// Match independent routes in parallel. Results are in input order.
    pub fn match_many(&self, routes: &[ActivityRoute]) -> Vec<MatchResult> {
        routes.par_iter().map(|r| self.match_route(r)).collect()
    }
}

/// A trail segment indexed by its bounding box grown by the tolerance.
struct Segment {
    a: GeoPoint,
    b: GeoPoint,
    envelope: AABB<[f64; 2]>,
}

impl Segment {
    fn new(a: GeoPoint, b: GeoPoint, lat_margin: f64, lon_margin: f64) -> Self {
        Self {
            a,
            b,
            envelope: AABB::from_corners(
                [a.lon.min(b.lon) - lon_margin, a.lat.min(b.lat) - lat_margin],
                [a.lon.max(b.lon) + lon_margin, a.lat.max(b.lat) + lat_margin],
            ),
        }
    }
}

impl RTreeObject for Segment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index over one trail's segments for a fixed tolerance.
struct Proximity {
    segments: RTree<Segment>,
    tolerance: f64,
}

impl Proximity {
    fn new(trail: &Trail, tolerance: f64) -> Self {
        // Largest longitude margin over the trail's latitude span keeps the
        // envelopes conservative.
        let (lat_margin, lon_margin) = match trail.bounds() {
            Some(rect) => {
                let poleward = if rect.min().y.abs() > rect.max().y.abs() {
                    rect.min().y
                } else {
                    rect.max().y
                };
                let (lat_m, _) = degree_margins(GeoPoint::new(poleward, 0.0), tolerance);
                let poleward = (poleward.abs() + lat_m).min(90.0);
                degree_margins(GeoPoint::new(poleward, 0.0), tolerance)
            }
            None => (0.0, 0.0),
        };

        let segments: Vec<Segment> = trail
            .lines()
            .iter()
            .flat_map(|l| {
                l.line.lines().map(move |seg| {
                    Segment::new(
                        GeoPoint::from(seg.start),
                        GeoPoint::from(seg.end),
                        lat_margin,
                        lon_margin,
                    )
                })
            })
            .collect();

        Self {
            segments: RTree::bulk_load(segments),
            tolerance,
        }
    }

    /// Within tolerance of any segment. The envelope lookup only narrows the
    /// candidates; the exact distance decides.
    fn is_near(&self, p: GeoPoint) -> bool {
        self.segments
            .locate_in_envelope_intersecting(&AABB::from_point([p.lon, p.lat]))
            .any(|s| distance_to_segment(p, s.a, s.b) <= self.tolerance)
    }
}

/// Match a route against a trail.
///
/// Pure: no I/O and no mutation of the inputs. An empty route or empty trail
/// yields zero on-trail metrics.
pub fn match_route(route: &ActivityRoute, trail: &Trail, options: &MatchOptions) -> MatchResult {
    let points: Vec<RoutePoint> = route
        .points
        .iter()
        .copied()
        .filter(|p| p.point.is_finite())
        .collect();
    let skipped = route.points.len() - points.len();
    if skipped > 0 {
        tracing::warn!(skipped, "Skipping route points with non-finite coordinates");
    }

    let proximity = Proximity::new(trail, options.tolerance_meters);
    let flags: Vec<bool> = points.iter().map(|p| proximity.is_near(p.point)).collect();

    let timed = !points.is_empty() && points.iter().all(|p| p.time.is_some());

    let mut total_distance = 0.0;
    let mut on_distance = 0.0;
    let mut total_time = 0.0;
    let mut on_time = 0.0;

    for (i, pair) in points.windows(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);
        let length = haversine_distance(a.point, b.point);
        let on = match options.edge_policy {
            EdgePolicy::Either => flags[i] || flags[i + 1],
            EdgePolicy::Both => flags[i] && flags[i + 1],
            EdgePolicy::Midpoint => proximity.is_near(a.point.midpoint(&b.point)),
        };

        total_distance += length;
        if on {
            on_distance += length;
        }

        if let (Some(ta), Some(tb)) = (a.time, b.time) {
            // Out-of-order samples contribute nothing
            let dt = ((tb - ta).num_milliseconds() as f64 / 1000.0).max(0.0);
            total_time += dt;
            if on {
                on_time += dt;
            }
        }
    }

    if !timed {
        total_time = f64::from(route.moving_time_secs.unwrap_or(0));
        on_time = if total_distance > 0.0 {
            total_time * on_distance / total_distance
        } else {
            0.0
        };
    }

    let runs = options.keep_point_flags.then(|| group_runs(&flags));
    MatchResult {
        distance_on_trail_meters: on_distance,
        time_on_trail_secs: on_time,
        total_distance_meters: total_distance,
        total_time_secs: total_time,
        points_on_trail: flags.iter().filter(|&&f| f).count(),
        points_total: points.len(),
        points_skipped: skipped,
        point_flags: options.keep_point_flags.then_some(flags),
        runs,
    }
}

/// Errors from trail operations.
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    #[error("Failed to read file: {0}")]
    IoError(String),

    #[error("Failed to parse GeoJSON: {0}")]
    ParseError(String),

    #[error("Failed to decode polyline: {0}")]
    PolylineError(String),
}
