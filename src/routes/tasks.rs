// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks, not directly by users. Any
//! non-2xx response makes Cloud Tasks retry the task, which is safe because
//! every handler is idempotent.

use crate::error::Result;
use crate::models::RecalculationReport;
use crate::services::activity::{ActivityEvent, MatchBatchReport, ProcessResult, RematchReport};
use crate::services::leaderboard::PreferenceOutcome;
use crate::AppState;
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_MATCH_BATCH: usize = 100;
const MAX_MATCH_BATCH: usize = 1000;

/// Task handler routes (called by Cloud Tasks).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/activity-event", post(activity_event))
        .route("/tasks/match-unmatched", post(match_unmatched))
        .route("/tasks/rematch-all", post(rematch_all))
        .route("/tasks/recalculate-leaderboard", post(recalculate_leaderboard))
        .route("/tasks/leaderboard-preference", post(leaderboard_preference))
}

/// Apply one activity create/update/delete.
async fn activity_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<ActivityEvent>,
) -> Result<Json<ProcessResult>> {
    tracing::info!(
        aspect_type = ?event.aspect_type,
        activity_id = ?event
            .activity_id
            .or(event.activity.as_ref().map(|a| a.strava_activity_id)),
        "Processing activity event from Cloud Task"
    );
    let result = state.activity_processor.process_event(event).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct MatchUnmatchedRequest {
    limit: Option<usize>,
}

async fn match_unmatched(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MatchUnmatchedRequest>,
) -> Result<Json<MatchBatchReport>> {
    let limit = payload
        .limit
        .unwrap_or(DEFAULT_MATCH_BATCH)
        .clamp(1, MAX_MATCH_BATCH);
    let report = state.activity_processor.match_unmatched(limit).await?;
    Ok(Json(report))
}

/// Re-match every activity and rebuild the leaderboard (after trail edits).
async fn rematch_all(State(state): State<Arc<AppState>>) -> Result<Json<RematchReport>> {
    let report = state.activity_processor.rematch_all().await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct RecalculateRequest {
    /// Only count activities starting (local time) on or after this date
    as_of: Option<NaiveDate>,
}

async fn recalculate_leaderboard(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RecalculateRequest>,
) -> Result<Json<RecalculationReport>> {
    let report = state.leaderboard.recalculate_all(payload.as_of).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct PreferenceRequest {
    athlete_id: u64,
    show_on_leaderboards: bool,
}

async fn leaderboard_preference(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PreferenceRequest>,
) -> Result<Json<PreferenceOutcome>> {
    let outcome = state
        .leaderboard
        .set_leaderboard_preference(payload.athlete_id, payload.show_on_leaderboards)
        .await?;
    Ok(Json(outcome))
}
