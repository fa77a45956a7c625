// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod api;
pub mod tasks;

use crate::middleware::require_tasks_auth;
use crate::AppState;
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub build_id: String,
    pub trail_lines: usize,
}

/// Health check response
async fn health_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<HealthResponse> {
    let build_id = option_env!("BUILD_ID").unwrap_or("unknown").to_string();
    Json(HealthResponse {
        status: "ok".to_string(),
        build_id,
        trail_lines: state.trail_service.trail().lines().len(),
    })
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .merge(api::routes());

    // Task handlers (called by Cloud Tasks)
    let task_routes = tasks::routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_tasks_auth));

    Router::new()
        .merge(public_routes)
        .merge(task_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
