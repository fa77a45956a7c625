// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks authentication middleware.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header Cloud Tasks sets on every delivery. External requests carrying it
/// are stripped by Cloud Run.
pub const QUEUE_NAME_HEADER: &str = "x-cloudtasks-queuename";
const TASK_NAME_HEADER: &str = "x-cloudtasks-taskname";
const RETRY_COUNT_HEADER: &str = "x-cloudtasks-taskretrycount";

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|h| h.to_str().ok())
}

/// Require the configured queue header for `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let queue_name = header_str(&request, QUEUE_NAME_HEADER);
    if queue_name != Some(state.config.tasks_queue_name.as_str()) {
        tracing::warn!(
            queue = ?queue_name,
            expected = %state.config.tasks_queue_name,
            "Blocked tasks request with invalid queue header"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    // Redeliveries are expected; handlers are idempotent
    tracing::debug!(
        task = header_str(&request, TASK_NAME_HEADER).unwrap_or("-"),
        retry_count = header_str(&request, RETRY_COUNT_HEADER).unwrap_or("0"),
        path = %request.uri().path(),
        "Accepted Cloud Tasks delivery"
    );

    Ok(next.run(request).await)
}
