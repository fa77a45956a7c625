// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! RabbitMiles API Server
//!
//! Matches Strava activities against the reference trail and serves
//! weekly, monthly and yearly leaderboards.

use rabbitmiles::{
    config::{Config, StoreBackend},
    db::{Datastore, FirestoreDb, MemoryStore},
    services::TrailService,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load and validate configuration; stop on anything invalid
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        backend = ?config.store_backend,
        tolerance_meters = config.trail_tolerance_meters,
        edge_policy = ?config.trail_edge_policy,
        default_timezone = %config.default_timezone,
        "Starting RabbitMiles API"
    );

    let store: Arc<dyn Datastore> = match config.store_backend {
        StoreBackend::Firestore => {
            let project = config
                .gcp_project_id
                .as_deref()
                .ok_or("GCP_PROJECT_ID is required for Firestore")?;
            Arc::new(FirestoreDb::new(project).await?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Load trail geometry
    tracing::info!(paths = ?config.trail_data_paths, "Loading trail data");
    let trail = TrailService::load_from_files(&config.trail_data_paths)?;
    if trail.is_empty() {
        tracing::warn!("Trail data has no usable lines; nothing will match");
    }
    let trail_service = TrailService::new(trail, config.match_options());

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), store, trail_service));

    // Build router
    let app = rabbitmiles::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rabbitmiles=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
