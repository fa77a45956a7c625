// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! RabbitMiles: trail matching and leaderboards for Strava activities
//!
//! This crate provides the backend that matches activity routes against a
//! reference trail and maintains windowed per-athlete leaderboards.

pub mod config;
pub mod db;
pub mod error;
pub mod geometry;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Datastore;
use services::{
    ActivityProcessor, AggregatorSettings, AthleteStatsService, LeaderboardAggregator,
    LeaderboardQueryService, TrailService,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Datastore>,
    pub trail_service: Arc<TrailService>,
    pub leaderboard: Arc<LeaderboardAggregator>,
    pub leaderboard_query: LeaderboardQueryService,
    pub athlete_stats: AthleteStatsService,
    pub activity_processor: ActivityProcessor,
}

impl AppState {
    /// Wire the services together around one store and trail.
    pub fn new(config: Config, store: Arc<dyn Datastore>, trail_service: TrailService) -> Self {
        let trail_service = Arc::new(trail_service);
        let leaderboard = Arc::new(LeaderboardAggregator::new(
            store.clone(),
            AggregatorSettings::from(&config),
        ));
        let leaderboard_query = LeaderboardQueryService::new(store.clone());
        let athlete_stats = AthleteStatsService::new(store.clone());
        let activity_processor =
            ActivityProcessor::new(store.clone(), trail_service.clone(), leaderboard.clone());
        Self {
            config,
            store,
            trail_service,
            leaderboard,
            leaderboard_query,
            athlete_stats,
            activity_processor,
        }
    }
}
