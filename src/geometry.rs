// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geometry primitives for trail proximity checks.
//!
//! Point-to-segment distances use a local equirectangular projection centred
//! on the query point. That is accurate to well under a meter over the tens of
//! meters to few kilometers that trail matching cares about, and is not meant
//! for long-range geodesy. Route edge lengths use the haversine formula.

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Midpoint in degree space (fine for adjacent route samples).
    pub fn midpoint(&self, other: &GeoPoint) -> GeoPoint {
        GeoPoint::new((self.lat + other.lat) / 2.0, (self.lon + other.lon) / 2.0)
    }

    /// Convert to a `geo` point (x = longitude, y = latitude).
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

impl From<geo::Coord<f64>> for GeoPoint {
    fn from(c: geo::Coord<f64>) -> Self {
        GeoPoint::new(c.y, c.x)
    }
}

/// Local planar frame centred on an origin point, in meters.
struct LocalFrame {
    origin: GeoPoint,
    lon_scale: f64,
}

impl LocalFrame {
    fn centred_on(origin: GeoPoint) -> Self {
        Self {
            origin,
            lon_scale: METERS_PER_DEGREE * origin.lat.to_radians().cos(),
        }
    }

    fn project(&self, p: GeoPoint) -> (f64, f64) {
        (
            (p.lon - self.origin.lon) * self.lon_scale,
            (p.lat - self.origin.lat) * METERS_PER_DEGREE,
        )
    }
}

/// Equirectangular distance in meters between two nearby points.
pub fn point_distance(p: GeoPoint, a: GeoPoint) -> f64 {
    let (x, y) = LocalFrame::centred_on(p).project(a);
    x.hypot(y)
}

/// Minimum distance in meters from `p` to the segment `a`–`b`.
///
/// The segment is undirected. A degenerate segment (`a == b`) reduces to
/// [`point_distance`].
pub fn distance_to_segment(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let frame = LocalFrame::centred_on(p);
    let (ax, ay) = frame.project(a);
    let (bx, by) = frame.project(b);

    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return ax.hypot(ay);
    }

    // p sits at the origin of the frame, so (p - a) = (-ax, -ay)
    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    cx.hypot(cy)
}

/// Great-circle distance in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    Haversine.distance(a.to_point(), b.to_point())
}

/// Latitude/longitude margins (degrees) equivalent to `meters` around `at`.
///
/// Uses the same projection as [`distance_to_segment`], so a point outside a
/// box grown by these margins is guaranteed to be farther than `meters`.
pub fn degree_margins(at: GeoPoint, meters: f64) -> (f64, f64) {
    let lat_margin = meters / METERS_PER_DEGREE;
    let cos_lat = at.lat.to_radians().cos().abs();
    let lon_margin = if cos_lat < 1e-9 {
        f64::INFINITY
    } else {
        meters / (METERS_PER_DEGREE * cos_lat)
    };
    (lat_margin, lon_margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: GeoPoint = GeoPoint::new(39.9612, -82.9988);
    const B: GeoPoint = GeoPoint::new(39.9700, -82.9988);

    #[test]
    fn test_degenerate_segment_is_point_distance() {
        let p = GeoPoint::new(39.9650, -82.9950);
        assert_eq!(distance_to_segment(p, A, A), point_distance(p, A));
    }

    #[test]
    fn test_point_on_segment_is_zero() {
        let mid = A.midpoint(&B);
        assert!(distance_to_segment(mid, A, B) < 1e-6);
    }

    #[test]
    fn test_perpendicular_offset() {
        // ~100m east of a north-south segment
        let offset_deg = 100.0 / (METERS_PER_DEGREE * 39.9650_f64.to_radians().cos());
        let p = GeoPoint::new(39.9650, -82.9988 + offset_deg);
        let d = distance_to_segment(p, A, B);
        assert!((d - 100.0).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_projection_clamps_to_endpoint() {
        // Beyond B along the segment direction
        let p = GeoPoint::new(39.9800, -82.9988);
        let d = distance_to_segment(p, A, B);
        assert!((d - point_distance(p, B)).abs() < 1e-9);
    }

    #[test]
    fn test_segment_is_undirected() {
        let p = GeoPoint::new(39.9650, -82.9900);
        let forward = distance_to_segment(p, A, B);
        let backward = distance_to_segment(p, B, A);
        assert!((forward - backward).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_close_to_equirectangular_at_short_range() {
        let h = haversine_distance(A, B);
        let e = point_distance(A, B);
        assert!((h - e).abs() < 0.5, "haversine {} vs planar {}", h, e);
        // 0.0088 degrees of latitude is about 978.5m
        assert!((h - 978.5).abs() < 1.0);
    }

    #[test]
    fn test_non_finite_detection() {
        assert!(A.is_finite());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_finite());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_finite());
    }
}
