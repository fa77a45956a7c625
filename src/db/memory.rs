// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory datastore for tests and local development.

use crate::db::Datastore;
use crate::error::AppError;
use crate::models::{
    Activity, AggregateKey, LeaderboardAggregate, LeaderboardMeta, Metric, RecalculationReport,
    User, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Datastore backed by process memory.
///
/// The aggregate table sits behind one lock so that
/// [`replace_all_aggregates`](Datastore::replace_all_aggregates) is a single
/// swap.
#[derive(Default)]
pub struct MemoryStore {
    activities: DashMap<u64, Activity>,
    users: DashMap<u64, User>,
    aggregates: RwLock<BTreeMap<String, LeaderboardAggregate>>,
    meta: Mutex<LeaderboardMeta>,
    fail_writes: AtomicBool,
    forced_conflicts: AtomicUsize,
    activity_read_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a database error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Report a version conflict on the next `count` aggregate writes.
    pub fn force_version_conflicts(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Delay every activity read, to widen race windows in tests.
    pub fn set_activity_read_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.activity_read_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Snapshot of every aggregate row, ordered by document ID.
    pub async fn all_aggregates(&self) -> Vec<LeaderboardAggregate> {
        self.aggregates.read().await.values().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("injected write failure".to_string()));
        }
        Ok(())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError> {
        let delay = self.activity_read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.activities.get(&activity_id).map(|a| a.clone()))
    }

    async fn upsert_activity(&self, activity: &Activity) -> Result<(), AppError> {
        self.check_writable()?;
        self.activities
            .insert(activity.strava_activity_id, activity.clone());
        Ok(())
    }

    async fn delete_activity(&self, activity_id: u64) -> Result<(), AppError> {
        self.check_writable()?;
        self.activities.remove(&activity_id);
        Ok(())
    }

    async fn list_activities_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Activity>, AppError> {
        Ok(self
            .activities
            .iter()
            .filter(|a| a.start_date.map_or(true, |start| start >= since))
            .map(|a| a.clone())
            .collect())
    }

    async fn list_activities_for_athlete(
        &self,
        athlete_id: u64,
    ) -> Result<Vec<Activity>, AppError> {
        Ok(self
            .activities
            .iter()
            .filter(|a| a.athlete_id == athlete_id)
            .map(|a| a.clone())
            .collect())
    }

    async fn list_unmatched_activities(&self, limit: usize) -> Result<Vec<Activity>, AppError> {
        let mut unmatched: Vec<Activity> = self
            .activities
            .iter()
            .filter(|a| a.last_matched.is_none())
            .map(|a| a.clone())
            .collect();
        unmatched.sort_by_key(|a| a.strava_activity_id);
        unmatched.truncate(limit);
        Ok(unmatched)
    }

    async fn list_all_activities(&self) -> Result<Vec<Activity>, AppError> {
        Ok(self.activities.iter().map(|a| a.clone()).collect())
    }

    async fn get_user(&self, athlete_id: u64) -> Result<Option<User>, AppError> {
        Ok(self.users.get(&athlete_id).map(|u| u.clone()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        self.check_writable()?;
        self.users.insert(user.athlete_id, user.clone());
        Ok(())
    }

    async fn read_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<LeaderboardAggregate>, AppError> {
        Ok(self.aggregates.read().await.get(&key.doc_id()).cloned())
    }

    async fn upsert_aggregate(
        &self,
        aggregate: &LeaderboardAggregate,
        expected_version: u64,
    ) -> Result<WriteOutcome, AppError> {
        self.check_writable()?;
        if self.take_forced_conflict() {
            return Ok(WriteOutcome::VersionConflict);
        }

        let doc_id = aggregate.key().doc_id();
        let mut table = self.aggregates.write().await;
        let current = table.get(&doc_id).map(|a| a.version).unwrap_or(0);
        if current != expected_version {
            return Ok(WriteOutcome::VersionConflict);
        }

        if aggregate.contributions.is_empty() {
            table.remove(&doc_id);
        } else {
            let mut row = aggregate.clone();
            row.version = expected_version + 1;
            table.insert(doc_id, row);
        }
        Ok(WriteOutcome::Applied)
    }

    async fn read_aggregates(
        &self,
        window_key: &str,
        metric: Metric,
        activity_type: &str,
    ) -> Result<Vec<LeaderboardAggregate>, AppError> {
        Ok(self
            .aggregates
            .read()
            .await
            .values()
            .filter(|a| {
                a.window_key == window_key && a.metric == metric && a.activity_type == activity_type
            })
            .cloned()
            .collect())
    }

    async fn delete_all_aggregates(&self) -> Result<usize, AppError> {
        self.check_writable()?;
        let mut table = self.aggregates.write().await;
        let count = table.len();
        table.clear();
        Ok(count)
    }

    async fn replace_all_aggregates(
        &self,
        aggregates: Vec<LeaderboardAggregate>,
    ) -> Result<usize, AppError> {
        self.check_writable()?;
        let fresh: BTreeMap<String, LeaderboardAggregate> = aggregates
            .into_iter()
            .filter(|a| !a.contributions.is_empty())
            .map(|mut a| {
                a.version = 1;
                (a.key().doc_id(), a)
            })
            .collect();
        let count = fresh.len();
        *self.aggregates.write().await = fresh;
        Ok(count)
    }

    async fn delete_aggregates_for_athlete(&self, athlete_id: u64) -> Result<usize, AppError> {
        self.check_writable()?;
        let mut table = self.aggregates.write().await;
        let before = table.len();
        table.retain(|_, a| a.athlete_id != athlete_id);
        Ok(before - table.len())
    }

    async fn get_leaderboard_meta(&self) -> Result<LeaderboardMeta, AppError> {
        Ok(self.meta.lock().await.clone())
    }

    async fn try_begin_recalculation(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, AppError> {
        self.check_writable()?;
        Ok(self.meta.lock().await.try_take_lease(lease_id, now, lease))
    }

    async fn renew_recalculation(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, AppError> {
        self.check_writable()?;
        Ok(self.meta.lock().await.try_renew_lease(lease_id, now, lease))
    }

    async fn finish_recalculation(
        &self,
        lease_id: &str,
        report: Option<&RecalculationReport>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if !self.meta.lock().await.release_lease(lease_id, report, now) {
            tracing::warn!(lease_id, "Recalculation lease held by another run, leaving it");
        }
        Ok(())
    }
}
