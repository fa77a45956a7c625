// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod activity;
pub mod athlete_stats;
pub mod leaderboard;
pub mod leaderboard_query;
pub mod trail;
pub mod window;

pub use activity::{ActivityEvent, ActivityProcessor, ProcessResult};
pub use athlete_stats::AthleteStatsService;
pub use leaderboard::{AggregatorSettings, LeaderboardAggregator};
pub use leaderboard_query::{LeaderboardQuery, LeaderboardQueryService};
pub use trail::{TrailError, TrailService};
pub use window::{Window, WindowType};
