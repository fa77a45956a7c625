// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ranked leaderboard reads.

use crate::db::Datastore;
use crate::error::AppError;
use crate::models::leaderboard::{
    LeaderboardEntry, LeaderboardPage, LeaderboardState, LeaderboardUser, MyRank,
    ALL_ACTIVITY_TYPES,
};
use crate::models::user::is_opted_in;
use crate::models::{LeaderboardAggregate, Metric, User};
use crate::services::window::{window_for_instant, WindowType};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;
const PREVIOUS_TOP: usize = 3;
const MAX_CONCURRENT_USER_READS: usize = 50;

/// A leaderboard read.
#[derive(Debug, Clone)]
pub struct LeaderboardQuery {
    pub window: WindowType,
    pub metric: Metric,
    pub activity_type: String,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Opaque token from a previous page; overrides `offset`
    pub cursor: Option<String>,
    /// Requesting athlete, for `my_rank`
    pub athlete_id: Option<u64>,
    /// Requester's zone; decides which window is "current"
    pub tz: Tz,
    pub at: DateTime<Utc>,
}

impl LeaderboardQuery {
    pub fn new(window: WindowType, metric: Metric, tz: Tz, at: DateTime<Utc>) -> Self {
        Self {
            window,
            metric,
            activity_type: ALL_ACTIVITY_TYPES.to_string(),
            limit: None,
            offset: None,
            cursor: None,
            athlete_id: None,
            tz,
            at,
        }
    }
}

pub struct LeaderboardQueryService {
    store: Arc<dyn Datastore>,
}

impl LeaderboardQueryService {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    pub async fn query(&self, query: &LeaderboardQuery) -> Result<LeaderboardPage, AppError> {
        let window = window_for_instant(query.at, query.window, query.tz);
        let previous = window.previous();

        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let board = board_id(&window.key, query.metric, &query.activity_type);
        let offset = match query.cursor.as_deref() {
            Some(raw) => parse_cursor(raw, &board)?,
            None => query.offset.unwrap_or(0),
        };

        let ranked = self
            .ranked(&window.key, query.metric, &query.activity_type)
            .await?;
        let previous_top3 = self
            .ranked(&previous.key, query.metric, &query.activity_type)
            .await?
            .into_iter()
            .take(PREVIOUS_TOP)
            .collect();

        let total_athletes = ranked.len();
        let my_rank = query.athlete_id.and_then(|id| {
            ranked.iter().find(|e| e.user.id == id).map(|e| MyRank {
                rank: e.rank,
                value: e.value,
            })
        });

        let end = offset.saturating_add(limit).min(total_athletes);
        let cursor = (end < total_athletes).then(|| encode_cursor(&board, end));
        let rows: Vec<LeaderboardEntry> = ranked.into_iter().skip(offset).take(limit).collect();

        let state = if total_athletes > 0 {
            LeaderboardState::Populated
        } else if self.store.get_leaderboard_meta().await?.last_recalculated_at.is_none() {
            tracing::warn!(
                window_key = %window.key,
                metric = %query.metric,
                "Leaderboard has never been built; run a recalculation"
            );
            LeaderboardState::Uninitialized
        } else {
            tracing::info!(
                window_key = %window.key,
                metric = %query.metric,
                activity_type = %query.activity_type,
                "No qualifying activity in leaderboard window"
            );
            LeaderboardState::Empty
        };

        Ok(LeaderboardPage {
            rows,
            my_rank,
            previous_top3,
            cursor,
            window_key: window.key,
            previous_window_key: previous.key,
            metric: query.metric,
            activity_type: query.activity_type.clone(),
            total_athletes,
            state,
        })
    }

    /// Rows for opted-in athletes, ordered by value then athlete ID.
    async fn ranked(
        &self,
        window_key: &str,
        metric: Metric,
        activity_type: &str,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let mut rows = self
            .store
            .read_aggregates(window_key, metric, activity_type)
            .await?;
        let users = self.load_users(&rows).await?;

        rows.retain(|row| is_opted_in(users.get(&row.athlete_id)));
        rows.sort_by(|a, b| {
            b.value_milli
                .cmp(&a.value_milli)
                .then_with(|| a.athlete_id.cmp(&b.athlete_id))
        });

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| entry(i + 1, &row, users.get(&row.athlete_id)))
            .collect())
    }

    async fn load_users(
        &self,
        rows: &[LeaderboardAggregate],
    ) -> Result<HashMap<u64, User>, AppError> {
        let store = &self.store;
        let ids: Vec<u64> = rows.iter().map(|r| r.athlete_id).collect();
        let users = stream::iter(ids)
            .map(|id| async move { store.get_user(id).await })
            .buffer_unordered(MAX_CONCURRENT_USER_READS)
            .collect::<Vec<Result<Option<User>, AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<Option<User>>, AppError>>()?;
        Ok(users
            .into_iter()
            .flatten()
            .map(|u| (u.athlete_id, u))
            .collect())
    }
}

fn entry(rank: usize, row: &LeaderboardAggregate, user: Option<&User>) -> LeaderboardEntry {
    let display_name = user
        .map(|u| u.display_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("Athlete {}", row.athlete_id));
    LeaderboardEntry {
        rank,
        user: LeaderboardUser {
            id: row.athlete_id,
            display_name,
            avatar_url: user.and_then(|u| u.profile_picture.clone()),
        },
        value: row.value(),
        activity_count: row.activity_count(),
        last_updated: row.last_updated,
    }
}

/// Identity of one ranked board; the type is escaped so it cannot contain
/// the separators.
fn board_id(window_key: &str, metric: Metric, activity_type: &str) -> String {
    format!(
        "{}/{}/{}",
        window_key,
        metric.as_str(),
        urlencoding::encode(activity_type)
    )
}

/// Cursors are bound to the board (window, metric, type) they were issued
/// for.
fn encode_cursor(board: &str, offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{}", board, offset))
}

fn parse_cursor(raw: &str, board: &str) -> Result<usize, AppError> {
    let invalid_cursor = || AppError::BadRequest("Invalid 'cursor' parameter".to_string());

    let decoded = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid_cursor())?;
    let decoded_str = std::str::from_utf8(&decoded).map_err(|_| invalid_cursor())?;
    let (issued_for, offset) = decoded_str.rsplit_once(':').ok_or_else(invalid_cursor)?;
    if issued_for != board {
        return Err(AppError::BadRequest(
            "'cursor' belongs to a different leaderboard".to_string(),
        ));
    }
    offset.parse().map_err(|_| invalid_cursor())
}
