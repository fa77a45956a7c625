// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Public leaderboard API routes.

use crate::error::{AppError, Result};
use crate::models::leaderboard::ALL_ACTIVITY_TYPES;
use crate::models::{AthleteContributions, LeaderboardPage, Metric, PeriodSummary};
use crate::services::{LeaderboardQuery, WindowType};
use crate::time_utils::resolve_timezone;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leaderboard", get(get_leaderboard))
        .route(
            "/api/athletes/{athlete_id}/contributions",
            get(get_contributions),
        )
        .route(
            "/api/athletes/{athlete_id}/period-summary",
            get(get_period_summary),
        )
}

#[derive(Deserialize)]
struct LeaderboardParams {
    /// week, month or year
    window: Option<String>,
    metric: Option<String>,
    activity_type: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    cursor: Option<String>,
    /// Requesting athlete, for `my_rank`
    athlete_id: Option<u64>,
    /// Requester's time zone (IANA or Strava format)
    tz: Option<String>,
    /// Evaluate as of this instant (RFC3339) instead of now
    at: Option<String>,
}

fn parse_at(at: Option<&str>) -> Result<chrono::DateTime<chrono::Utc>> {
    match at {
        Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|_| {
                AppError::BadRequest("Invalid 'at' parameter: must be RFC3339 datetime".to_string())
            }),
        None => Ok(chrono::Utc::now()),
    }
}

fn parse_window(window: Option<&str>) -> Result<WindowType> {
    window.unwrap_or("week").parse().map_err(AppError::BadRequest)
}

fn parse_metric(metric: Option<&str>, default: Metric) -> Result<Metric> {
    match metric {
        Some(raw) => raw.parse().map_err(AppError::BadRequest),
        None => Ok(default),
    }
}

fn parse_activity_type(activity_type: Option<String>) -> String {
    activity_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| ALL_ACTIVITY_TYPES.to_string())
}

/// Explicit zone, then the athlete's stored zone, then the default.
async fn requester_tz(state: &AppState, tz: Option<&str>, athlete_id: Option<u64>) -> Result<Tz> {
    let user_tz = match athlete_id {
        Some(id) => state.store.get_user(id).await?.and_then(|u| u.timezone),
        None => None,
    };
    Ok(resolve_timezone(
        [tz, user_tz.as_deref()],
        state.config.default_timezone,
    ))
}

async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardPage>> {
    let window = parse_window(params.window.as_deref())?;
    let metric = parse_metric(params.metric.as_deref(), Metric::Distance)?;
    let at = parse_at(params.at.as_deref())?;
    let tz = requester_tz(&state, params.tz.as_deref(), params.athlete_id).await?;

    tracing::debug!(
        window = %window,
        metric = %metric,
        activity_type = ?params.activity_type,
        athlete_id = ?params.athlete_id,
        tz = %tz,
        "Fetching leaderboard"
    );

    let mut query = LeaderboardQuery::new(window, metric, tz, at);
    query.activity_type = parse_activity_type(params.activity_type);
    query.limit = params.limit;
    query.offset = params.offset;
    query.cursor = params.cursor;
    query.athlete_id = params.athlete_id;

    let page = state.leaderboard_query.query(&query).await?;
    Ok(Json(page))
}

// ─── Per-Athlete Views ───────────────────────────────────────

#[derive(Deserialize)]
struct AthleteViewParams {
    /// week, month or year (contributions only)
    window: Option<String>,
    metric: Option<String>,
    activity_type: Option<String>,
    tz: Option<String>,
    at: Option<String>,
}

/// Activities behind an athlete's total for one window.
async fn get_contributions(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<u64>,
    Query(params): Query<AthleteViewParams>,
) -> Result<Json<AthleteContributions>> {
    let window = parse_window(params.window.as_deref())?;
    let metric = parse_metric(params.metric.as_deref(), Metric::Distance)?;
    let at = parse_at(params.at.as_deref())?;
    let tz = requester_tz(&state, params.tz.as_deref(), Some(athlete_id)).await?;
    let activity_type = parse_activity_type(params.activity_type);

    tracing::debug!(athlete_id, window = %window, metric = %metric, "Fetching contributions");

    let contributions = state
        .athlete_stats
        .contributions(athlete_id, window, metric, &activity_type, tz, at)
        .await?;
    Ok(Json(contributions))
}

/// Current vs previous week, month and year, with projections. Defaults to
/// distance on the trail.
async fn get_period_summary(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<u64>,
    Query(params): Query<AthleteViewParams>,
) -> Result<Json<PeriodSummary>> {
    let metric = parse_metric(params.metric.as_deref(), Metric::DistanceOnTrail)?;
    let at = parse_at(params.at.as_deref())?;
    let tz = requester_tz(&state, params.tz.as_deref(), Some(athlete_id)).await?;
    let activity_type = parse_activity_type(params.activity_type);

    tracing::debug!(athlete_id, metric = %metric, "Fetching period summary");

    let summary = state
        .athlete_stats
        .period_summary(athlete_id, metric, &activity_type, tz, at)
        .await?;
    Ok(Json(summary))
}
