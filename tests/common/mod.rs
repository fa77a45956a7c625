// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, NaiveDateTime, Utc};
use geo::LineString;
use rabbitmiles::config::Config;
use rabbitmiles::db::{Datastore, FirestoreDb, MemoryStore};
use rabbitmiles::models::{Activity, MatchOptions, Trail, TrailLine};
use rabbitmiles::routes::create_router;
use rabbitmiles::services::TrailService;
use rabbitmiles::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// West-east trail along latitude 38.88, about 870 m long.
#[allow(dead_code)]
pub fn test_trail() -> Trail {
    Trail::new(vec![TrailLine {
        name: "Main Trail".to_string(),
        line: LineString::from(vec![(-77.0500, 38.8800), (-77.0400, 38.8800)]),
    }])
}

#[allow(dead_code)]
pub fn test_trail_service() -> TrailService {
    TrailService::new(test_trail(), MatchOptions::default())
}

/// Create a test app backed by an in-memory store.
/// Returns the router, the shared state and the store.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, Arc<MemoryStore>) {
    let config = Config::test_default();
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(
        config,
        store.clone() as Arc<dyn Datastore>,
        test_trail_service(),
    ));
    (create_router(state.clone()), state, store)
}

#[allow(dead_code)]
pub fn parse_local(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").expect("Invalid local datetime")
}

#[allow(dead_code)]
pub fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("Invalid RFC3339 datetime")
        .with_timezone(&Utc)
}

/// An activity with a local start time and distance, no route.
#[allow(dead_code)]
pub fn activity(
    activity_id: u64,
    athlete_id: u64,
    activity_type: &str,
    start_local: &str,
    distance_meters: f64,
) -> Activity {
    Activity {
        strava_activity_id: activity_id,
        athlete_id,
        name: format!("Activity {}", activity_id),
        activity_type: activity_type.to_string(),
        start_date: None,
        start_date_local: Some(parse_local(start_local)),
        timezone: None,
        distance_meters,
        moving_time_secs: 1800,
        elapsed_time_secs: 2000,
        elevation_gain_meters: 10.0,
        polyline: None,
        distance_on_trail_meters: None,
        time_on_trail_secs: None,
        last_matched: None,
    }
}

/// Encode (lat, lon) pairs as a precision-5 polyline.
#[allow(dead_code)]
pub fn encode_route(points: &[(f64, f64)]) -> String {
    polyline::encode_coordinates(
        points.iter().map(|&(lat, lon)| geo::Coord { x: lon, y: lat }),
        5,
    )
    .expect("Failed to encode polyline")
}
