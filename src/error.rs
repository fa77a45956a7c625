// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crate::models::leaderboard::ValueOverflow;
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Concurrent writers kept colliding; the caller may retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A full leaderboard recompute holds the aggregate table
    #[error("Leaderboard recalculation in progress")]
    RecalculationInProgress,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ValueOverflow> for AppError {
    fn from(err: ValueOverflow) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Conflict(msg) => {
                tracing::warn!(error = %msg, "Write conflict");
                (StatusCode::CONFLICT, "conflict", Some(msg.clone()))
            }
            AppError::RecalculationInProgress => (
                StatusCode::SERVICE_UNAVAILABLE,
                "recalculation_in_progress",
                None,
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
