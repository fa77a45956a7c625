// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-athlete contribution lists and period summaries.

use rabbitmiles::error::AppError;
use rabbitmiles::models::{Activity, Metric, Trend};
use rabbitmiles::services::WindowType;
use rabbitmiles::AppState;

mod common;
use common::{activity, create_test_app, parse_local, parse_time};

const NEW_YORK: chrono_tz::Tz = chrono_tz::America::New_York;

async fn upsert(state: &AppState, activity: &Activity) {
    state
        .activity_processor
        .process_upsert(activity.clone())
        .await
        .expect("upsert should succeed");
}

/// Wednesday of the week of 2026-02-16, in New York.
fn wednesday() -> chrono::DateTime<chrono::Utc> {
    parse_time("2026-02-18T17:00:00Z")
}

#[tokio::test]
async fn test_contributions_list_the_window_newest_first() {
    let (_, state, _) = create_test_app();
    upsert(&state, &activity(1, 100, "Run", "2026-02-16T07:00:00", 5000.0)).await;
    upsert(&state, &activity(2, 100, "Run", "2026-02-18T06:30:00", 3000.0)).await;
    // Previous week and another athlete stay out
    upsert(&state, &activity(3, 100, "Run", "2026-02-15T23:00:00", 9000.0)).await;
    upsert(&state, &activity(4, 200, "Run", "2026-02-17T07:00:00", 1000.0)).await;

    let view = state
        .athlete_stats
        .contributions(100, WindowType::Week, Metric::Distance, "all", NEW_YORK, wednesday())
        .await
        .unwrap();

    assert_eq!(view.window_key, "week_2026-02-16");
    assert_eq!(view.total, 8000.0);
    let listed: Vec<(u64, f64)> = view
        .activities
        .iter()
        .map(|a| (a.activity_id, a.value))
        .collect();
    assert_eq!(listed, vec![(2, 3000.0), (1, 5000.0)]);
    assert_eq!(view.activities[0].name.as_deref(), Some("Activity 2"));
    assert_eq!(
        view.activities[0].start_date_local,
        Some(parse_local("2026-02-18T06:30:00"))
    );

    // The ledger sums to the row total
    let sum: f64 = view.activities.iter().map(|a| a.value).sum();
    assert_eq!(sum, view.total);
}

#[tokio::test]
async fn test_contributions_follow_updates_and_deletes() {
    let (_, state, _) = create_test_app();
    upsert(&state, &activity(1, 100, "Run", "2026-02-16T07:00:00", 5000.0)).await;
    upsert(&state, &activity(2, 100, "Run", "2026-02-17T07:00:00", 3000.0)).await;
    upsert(&state, &activity(1, 100, "Run", "2026-02-16T07:00:00", 4000.0)).await;
    state.activity_processor.process_delete(2).await.unwrap();

    let view = state
        .athlete_stats
        .contributions(100, WindowType::Week, Metric::Distance, "Run", NEW_YORK, wednesday())
        .await
        .unwrap();
    assert_eq!(view.total, 4000.0);
    assert_eq!(view.activities.len(), 1);
    assert_eq!(view.activities[0].value, 4000.0);
}

#[tokio::test]
async fn test_contributions_for_quiet_athlete_are_empty() {
    let (_, state, _) = create_test_app();
    let view = state
        .athlete_stats
        .contributions(42, WindowType::Month, Metric::MovingTime, "all", NEW_YORK, wednesday())
        .await
        .unwrap();
    assert_eq!(view.window_key, "month_2026-02");
    assert_eq!(view.total, 0.0);
    assert!(view.activities.is_empty());
}

#[tokio::test]
async fn test_opted_out_athlete_has_no_views() {
    let (_, state, _) = create_test_app();
    upsert(&state, &activity(1, 100, "Run", "2026-02-16T07:00:00", 5000.0)).await;
    state
        .leaderboard
        .set_leaderboard_preference(100, false)
        .await
        .unwrap();

    let err = state
        .athlete_stats
        .contributions(100, WindowType::Week, Metric::Distance, "all", NEW_YORK, wednesday())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = state
        .athlete_stats
        .period_summary(100, Metric::Distance, "all", NEW_YORK, wednesday())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_period_summary_compares_and_projects() {
    let (_, state, _) = create_test_app();
    // Previous week: 10 km. This week so far: 3 km by Wednesday.
    upsert(&state, &activity(1, 100, "Run", "2026-02-10T07:00:00", 10000.0)).await;
    upsert(&state, &activity(2, 100, "Run", "2026-02-17T07:00:00", 3000.0)).await;

    let summary = state
        .athlete_stats
        .period_summary(100, Metric::Distance, "all", NEW_YORK, wednesday())
        .await
        .unwrap();

    let week = &summary.week;
    assert_eq!(week.window_key, "week_2026-02-16");
    assert_eq!(week.previous_window_key, "week_2026-02-09");
    assert_eq!(week.current, 3000.0);
    assert_eq!(week.previous, Some(10000.0));
    assert_eq!((week.elapsed_days, week.total_days), (3, 7));
    assert_eq!(week.projected, 7000.0);
    assert_eq!(week.trend, Some(Trend::Down));
    assert_eq!(week.remaining_to_beat, Some(7000.0));

    // Both runs are in February and January is empty
    let month = &summary.month;
    assert_eq!(month.current, 13000.0);
    assert_eq!(month.previous, None);
    assert_eq!(month.trend, None);
    assert_eq!(month.remaining_to_beat, None);
    assert_eq!((month.elapsed_days, month.total_days), (18, 28));

    assert_eq!(summary.year.window_key, "year_2026");
    assert_eq!(summary.year.total_days, 365);
}

#[tokio::test]
async fn test_period_summary_uses_caller_zone() {
    let (_, state, _) = create_test_app();
    upsert(&state, &activity(1, 100, "Run", "2026-02-16T07:00:00", 2000.0)).await;

    // Monday 03:00 UTC is still Sunday in New York but Monday in Tokyo
    let at = parse_time("2026-02-23T03:00:00Z");
    let ny = state
        .athlete_stats
        .period_summary(100, Metric::Distance, "all", NEW_YORK, at)
        .await
        .unwrap();
    assert_eq!(ny.week.window_key, "week_2026-02-16");
    assert_eq!(ny.week.current, 2000.0);
    assert_eq!(ny.week.elapsed_days, 7);

    let tokyo = state
        .athlete_stats
        .period_summary(100, Metric::Distance, "all", chrono_tz::Asia::Tokyo, at)
        .await
        .unwrap();
    assert_eq!(tokyo.week.window_key, "week_2026-02-23");
    assert_eq!(tokyo.week.current, 0.0);
    assert_eq!(tokyo.week.previous, Some(2000.0));
    assert_eq!(tokyo.week.trend, Some(Trend::Down));
}
