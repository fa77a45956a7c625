// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Trail matching behavior against a small synthetic trail.

use chrono::Duration;
use geo::LineString;
use rabbitmiles::geometry::GeoPoint;
use rabbitmiles::models::{ActivityRoute, EdgePolicy, MatchOptions, Trail, TrailLine};
use rabbitmiles::services::trail::match_route;
use rabbitmiles::services::TrailService;

mod common;
use common::{encode_route, parse_time, test_trail};

/// Meters north of the trail, in degrees of latitude.
fn north(meters: f64) -> f64 {
    38.8800 + meters / 111_195.0
}

fn route(points: &[(f64, f64)]) -> ActivityRoute {
    ActivityRoute::from_points(
        points.iter().map(|&(lat, lon)| GeoPoint::new(lat, lon)),
        Some(1000),
    )
}

fn options(edge_policy: EdgePolicy) -> MatchOptions {
    MatchOptions {
        edge_policy,
        ..MatchOptions::default()
    }
}

#[test]
fn test_empty_route_matches_nothing() {
    let result = match_route(&route(&[]), &test_trail(), &MatchOptions::default());
    assert_eq!(result.distance_on_trail_meters, 0.0);
    assert_eq!(result.time_on_trail_secs, 0.0);
    assert_eq!(result.points_total, 0);

    let single = match_route(
        &route(&[(38.88, -77.045)]),
        &test_trail(),
        &MatchOptions::default(),
    );
    assert_eq!(single.distance_on_trail_meters, 0.0);
    assert_eq!(single.points_on_trail, 1);
}

#[test]
fn test_empty_trail_matches_nothing() {
    let result = match_route(
        &route(&[(38.88, -77.05), (38.88, -77.04)]),
        &Trail::default(),
        &MatchOptions::default(),
    );
    assert_eq!(result.distance_on_trail_meters, 0.0);
    assert!(result.total_distance_meters > 0.0);
}

#[test]
fn test_route_along_trail_is_fully_on_trail() {
    let r = route(&[(38.88, -77.05), (38.88, -77.045), (38.88, -77.04)]);
    let result = match_route(&r, &test_trail(), &MatchOptions::default());

    assert!(
        (860.0..870.0).contains(&result.distance_on_trail_meters),
        "got {}",
        result.distance_on_trail_meters
    );
    assert_eq!(result.distance_on_trail_meters, result.total_distance_meters);
    assert_eq!(result.points_on_trail, 3);
    assert!((result.on_trail_ratio() - 1.0).abs() < 1e-9);
    assert!((result.time_on_trail_secs - 1000.0).abs() < 1e-6);
}

#[test]
fn test_far_route_is_off_trail() {
    let r = route(&[(38.90, -77.05), (38.90, -77.04)]);
    let result = match_route(&r, &test_trail(), &MatchOptions::default());
    assert_eq!(result.distance_on_trail_meters, 0.0);
    assert_eq!(result.time_on_trail_secs, 0.0);
    assert_eq!(result.points_on_trail, 0);
}

#[test]
fn test_tolerance_boundary() {
    let near = route(&[(north(20.0), -77.048), (north(20.0), -77.042)]);
    let result = match_route(&near, &test_trail(), &options(EdgePolicy::Both));
    assert!(result.distance_on_trail_meters > 500.0);

    let outside = route(&[(north(30.0), -77.048), (north(30.0), -77.042)]);
    let result = match_route(&outside, &test_trail(), &options(EdgePolicy::Either));
    assert_eq!(result.distance_on_trail_meters, 0.0);
}

#[test]
fn test_point_beyond_trail_end_uses_endpoint_distance() {
    // 15 m past the east end, on the trail's line
    let lon = -77.0400 + 15.0 / 86_556.0;
    let result = match_route(
        &route(&[(38.88, lon), (38.88, lon)]),
        &test_trail(),
        &MatchOptions::default(),
    );
    assert_eq!(result.points_on_trail, 2);

    // 40 m past the east end is off even though the latitude matches
    let lon = -77.0400 + 40.0 / 86_556.0;
    let result = match_route(
        &route(&[(38.88, lon)]),
        &test_trail(),
        &MatchOptions::default(),
    );
    assert_eq!(result.points_on_trail, 0);
}

#[test]
fn test_degenerate_trail_segment() {
    let trail = Trail::new(vec![TrailLine {
        name: "Marker".to_string(),
        line: LineString::from(vec![(-77.05, 38.88), (-77.05, 38.88)]),
    }]);
    let r = route(&[(38.88, -77.0501), (38.88, -77.0499)]);
    let result = match_route(&r, &trail, &options(EdgePolicy::Both));
    assert_eq!(result.points_on_trail, 2);
    assert!(result.distance_on_trail_meters > 10.0);
}

#[test]
fn test_edge_policies_for_partial_edge() {
    // One endpoint on trail, the other 111 m north
    let r = route(&[(38.88, -77.045), (north(111.0), -77.045)]);
    let trail = test_trail();

    let either = match_route(&r, &trail, &options(EdgePolicy::Either));
    assert!((100.0..120.0).contains(&either.distance_on_trail_meters));

    let both = match_route(&r, &trail, &options(EdgePolicy::Both));
    assert_eq!(both.distance_on_trail_meters, 0.0);

    let midpoint = match_route(&r, &trail, &options(EdgePolicy::Midpoint));
    assert_eq!(midpoint.distance_on_trail_meters, 0.0);

    // Midpoint 22 m away counts
    let short = route(&[(38.88, -77.045), (north(44.0), -77.045)]);
    let midpoint = match_route(&short, &trail, &options(EdgePolicy::Midpoint));
    assert!(midpoint.distance_on_trail_meters > 40.0);
    let both = match_route(&short, &trail, &options(EdgePolicy::Both));
    assert_eq!(both.distance_on_trail_meters, 0.0);
}

#[test]
fn test_untimed_route_time_is_proportional() {
    let r = route(&[
        (38.88, -77.05),
        (38.88, -77.045),
        (38.89, -77.045),
        (38.89, -77.05),
    ]);
    let result = match_route(&r, &test_trail(), &options(EdgePolicy::Both));

    assert_eq!(result.total_time_secs, 1000.0);
    let expected = 1000.0 * result.distance_on_trail_meters / result.total_distance_meters;
    assert!((result.time_on_trail_secs - expected).abs() < 1e-6);
    assert!(result.time_on_trail_secs > 0.0 && result.time_on_trail_secs < 1000.0);
}

#[test]
fn test_timed_route_uses_timestamps() {
    let t0 = parse_time("2026-03-01T10:00:00Z");
    let r = ActivityRoute::from_timed_points([
        (GeoPoint::new(38.88, -77.05), t0),
        (GeoPoint::new(38.88, -77.045), t0 + Duration::seconds(100)),
        (GeoPoint::new(38.89, -77.045), t0 + Duration::seconds(400)),
        (GeoPoint::new(38.89, -77.05), t0 + Duration::seconds(500)),
    ]);
    let result = match_route(&r, &test_trail(), &options(EdgePolicy::Both));

    assert!((result.total_time_secs - 500.0).abs() < 1e-9);
    assert!((result.time_on_trail_secs - 100.0).abs() < 1e-9);
    assert_eq!(result.time_on_trail_whole_secs(), 100);
}

#[test]
fn test_non_finite_points_are_skipped() {
    let clean = route(&[(38.88, -77.05), (38.88, -77.045), (38.88, -77.04)]);
    let dirty = route(&[
        (38.88, -77.05),
        (f64::NAN, -77.047),
        (38.88, -77.045),
        (38.88, f64::INFINITY),
        (38.88, -77.04),
    ]);
    let trail = test_trail();

    let expected = match_route(&clean, &trail, &MatchOptions::default());
    let result = match_route(&dirty, &trail, &MatchOptions::default());

    assert_eq!(result.points_skipped, 2);
    assert_eq!(result.points_total, 3);
    assert_eq!(result.distance_on_trail_meters, expected.distance_on_trail_meters);
}

#[test]
fn test_point_flags_and_runs() {
    let r = route(&[
        (38.88, -77.05),
        (38.88, -77.048),
        (38.89, -77.048),
        (38.88, -77.046),
    ]);
    let opts = MatchOptions {
        keep_point_flags: true,
        ..MatchOptions::default()
    };
    let result = match_route(&r, &test_trail(), &opts);
    assert_eq!(result.point_flags, Some(vec![true, true, false, true]));
    let runs = result.runs.expect("runs requested");
    assert_eq!(runs.len(), 3);
    assert_eq!((runs[1].start_index, runs[1].end_index), (2, 2));
    assert!(!runs[1].on_trail);

    let plain = match_route(&r, &test_trail(), &MatchOptions::default());
    assert!(plain.point_flags.is_none());
    assert!(plain.runs.is_none());
}

#[test]
fn test_match_many_preserves_order() {
    let service = TrailService::new(test_trail(), MatchOptions::default());
    let routes = vec![
        route(&[(38.90, -77.05), (38.90, -77.04)]),
        route(&[(38.88, -77.05), (38.88, -77.04)]),
        route(&[(38.70, -77.05), (38.70, -77.04)]),
    ];
    let results = service.match_many(&routes);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].distance_on_trail_meters, 0.0);
    assert!(results[1].distance_on_trail_meters > 800.0);
    assert_eq!(results[2].distance_on_trail_meters, 0.0);
}

#[test]
fn test_match_polyline() {
    let service = TrailService::new(test_trail(), MatchOptions::default());
    let encoded = encode_route(&[(38.88, -77.05), (38.88, -77.045), (38.88, -77.04)]);
    let result = service.match_polyline(&encoded, Some(600)).unwrap();
    assert!((860.0..870.0).contains(&result.distance_on_trail_meters));
    assert_eq!(result.time_on_trail_whole_secs(), 600);
}

#[test]
fn test_load_bundled_trail_data() {
    let trail =
        TrailService::load_from_files(&["data/trails/main.geojson", "data/trails/spurs.geojson"])
            .expect("bundled trail data should load");
    let names: Vec<&str> = trail.lines().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Main Trail", "Creek Spur-0", "Creek Spur-1"]);
    assert_eq!(trail.segment_count(), 6 + 2 + 1);
}
