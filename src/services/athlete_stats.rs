// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-athlete reads over the leaderboard aggregates.
//!
//! Both views read the same rows the rankings use, so they always agree with
//! what the leaderboard shows for the athlete.

use crate::db::Datastore;
use crate::error::AppError;
use crate::models::leaderboard::from_fixed;
use crate::models::user::is_opted_in;
use crate::models::{
    Activity, AggregateKey, AthleteContributions, ContributingActivity, Metric, PeriodStats,
    PeriodSummary,
};
use crate::services::window::{window_for_instant, Window, WindowType};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use futures_util::{stream, StreamExt};
use std::cmp::Reverse;
use std::sync::Arc;

const MAX_CONCURRENT_ACTIVITY_READS: usize = 20;

pub struct AthleteStatsService {
    store: Arc<dyn Datastore>,
}

impl AthleteStatsService {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Opted-out athletes are not shown anywhere.
    async fn ensure_listed(&self, athlete_id: u64) -> Result<(), AppError> {
        let user = self.store.get_user(athlete_id).await?;
        if !is_opted_in(user.as_ref()) {
            return Err(AppError::NotFound(format!(
                "athlete {} is not on the leaderboards",
                athlete_id
            )));
        }
        Ok(())
    }

    fn key(window: &Window, metric: Metric, activity_type: &str, athlete_id: u64) -> AggregateKey {
        AggregateKey {
            window_key: window.key.clone(),
            metric,
            activity_type: activity_type.to_string(),
            athlete_id,
        }
    }

    /// The activities making up an athlete's total in the window containing
    /// `at` (as seen in `tz`).
    pub async fn contributions(
        &self,
        athlete_id: u64,
        window_type: WindowType,
        metric: Metric,
        activity_type: &str,
        tz: Tz,
        at: DateTime<Utc>,
    ) -> Result<AthleteContributions, AppError> {
        self.ensure_listed(athlete_id).await?;

        let window = window_for_instant(at, window_type, tz);
        let row = self
            .store
            .read_aggregate(&Self::key(&window, metric, activity_type, athlete_id))
            .await?;

        let ledger: Vec<(u64, i64)> = row
            .as_ref()
            .map(|row| {
                row.contributions
                    .iter()
                    .filter_map(|(id, value)| match id.parse() {
                        Ok(id) => Some((id, *value)),
                        Err(_) => {
                            tracing::warn!(
                                athlete_id,
                                window_key = %window.key,
                                entry = %id,
                                "Skipping malformed contribution ledger entry"
                            );
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let store = &self.store;
        let loaded = stream::iter(ledger)
            .map(|(id, value)| async move {
                store
                    .get_activity(id)
                    .await
                    .map(|activity| contributing(id, value, activity))
            })
            .buffer_unordered(MAX_CONCURRENT_ACTIVITY_READS)
            .collect::<Vec<Result<ContributingActivity, AppError>>>()
            .await;
        let mut activities = loaded
            .into_iter()
            .collect::<Result<Vec<ContributingActivity>, AppError>>()?;
        activities.sort_by_key(|a| (Reverse(a.start_date_local), a.activity_id));

        tracing::debug!(
            athlete_id,
            window_key = %window.key,
            metric = %metric,
            activities = activities.len(),
            "Loaded leaderboard contributions"
        );

        Ok(AthleteContributions {
            athlete_id,
            window_key: window.key,
            metric,
            activity_type: activity_type.to_string(),
            total: row.map_or(0.0, |r| r.value()),
            activities,
        })
    }

    /// Week, month and year totals against the previous period, with a
    /// linear projection to the end of each period.
    pub async fn period_summary(
        &self,
        athlete_id: u64,
        metric: Metric,
        activity_type: &str,
        tz: Tz,
        at: DateTime<Utc>,
    ) -> Result<PeriodSummary, AppError> {
        self.ensure_listed(athlete_id).await?;

        let local = at.with_timezone(&tz).naive_local();
        let period = |window_type| {
            let window = window_for_instant(at, window_type, tz);
            self.period(window, local, metric, activity_type, athlete_id)
        };

        Ok(PeriodSummary {
            athlete_id,
            metric,
            activity_type: activity_type.to_string(),
            week: period(WindowType::Week).await?,
            month: period(WindowType::Month).await?,
            year: period(WindowType::Year).await?,
        })
    }

    async fn period(
        &self,
        window: Window,
        local: NaiveDateTime,
        metric: Metric,
        activity_type: &str,
        athlete_id: u64,
    ) -> Result<PeriodStats, AppError> {
        let previous = window.previous();
        let current = self
            .store
            .read_aggregate(&Self::key(&window, metric, activity_type, athlete_id))
            .await?
            .map_or(0.0, |r| r.value());
        let before = self
            .store
            .read_aggregate(&Self::key(&previous, metric, activity_type, athlete_id))
            .await?
            .map(|r| r.value());

        Ok(PeriodStats::new(
            window.key.clone(),
            previous.key,
            current,
            before,
            window.days_elapsed(local),
            window.days(),
        ))
    }
}

fn contributing(activity_id: u64, value: i64, activity: Option<Activity>) -> ContributingActivity {
    ContributingActivity {
        activity_id,
        value: from_fixed(value),
        name: activity.as_ref().map(|a| a.name.clone()),
        activity_type: activity.as_ref().map(|a| a.activity_type.clone()),
        start_date_local: activity.and_then(|a| a.start_date_local),
    }
}
