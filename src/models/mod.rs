// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod leaderboard;
pub mod stats;
pub mod trail;
pub mod user;

pub use activity::{Activity, AspectType};
pub use leaderboard::{
    AggregateKey, LeaderboardAggregate, LeaderboardMeta, LeaderboardPage, LeaderboardState,
    Metric, RecalculationReport, WriteOutcome,
};
pub use stats::{AthleteContributions, ContributingActivity, PeriodStats, PeriodSummary, Trend};
pub use trail::{ActivityRoute, EdgePolicy, MatchOptions, MatchResult, Trail, TrailLine};
pub use user::User;
