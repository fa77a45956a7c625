//! Database layer.
//!
//! [`Datastore`] is the persistence boundary used by the services. Firestore
//! backs production; [`MemoryStore`] serves tests and local runs.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{
    Activity, AggregateKey, LeaderboardAggregate, LeaderboardMeta, Metric, RecalculationReport,
    User, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const ACTIVITIES: &str = "activities";
    /// Leaderboard rows, keyed by [`AggregateKey::doc_id`](crate::models::AggregateKey::doc_id)
    pub const LEADERBOARD_AGGREGATES: &str = "leaderboard_aggregates";
    /// Single-document collection for table-wide leaderboard state
    pub const LEADERBOARD_META: &str = "leaderboard_meta";
    pub const LEADERBOARD_META_DOC: &str = "state";
}

#[async_trait]
pub trait Datastore: Send + Sync {
    // ─── Activities ──────────────────────────────────────────────

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError>;

    async fn upsert_activity(&self, activity: &Activity) -> Result<(), AppError>;

    /// Deleting a missing activity is not an error.
    async fn delete_activity(&self, activity_id: u64) -> Result<(), AppError>;

    /// Activities with `start_date >= since`, plus any without a start date.
    async fn list_activities_since(&self, since: DateTime<Utc>)
        -> Result<Vec<Activity>, AppError>;

    async fn list_activities_for_athlete(&self, athlete_id: u64)
        -> Result<Vec<Activity>, AppError>;

    /// Activities that were never trail-matched.
    async fn list_unmatched_activities(&self, limit: usize) -> Result<Vec<Activity>, AppError>;

    async fn list_all_activities(&self) -> Result<Vec<Activity>, AppError>;

    // ─── Users ───────────────────────────────────────────────────

    async fn get_user(&self, athlete_id: u64) -> Result<Option<User>, AppError>;

    async fn upsert_user(&self, user: &User) -> Result<(), AppError>;

    // ─── Leaderboard aggregates ──────────────────────────────────

    async fn read_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<LeaderboardAggregate>, AppError>;

    /// Write `aggregate` if the stored row is still at `expected_version`
    /// (0 for "absent"). The stored row gets `expected_version + 1`. A row with
    /// an empty contribution ledger is deleted instead.
    async fn upsert_aggregate(
        &self,
        aggregate: &LeaderboardAggregate,
        expected_version: u64,
    ) -> Result<WriteOutcome, AppError>;

    /// All rows of one window/metric/type partition, unordered.
    async fn read_aggregates(
        &self,
        window_key: &str,
        metric: Metric,
        activity_type: &str,
    ) -> Result<Vec<LeaderboardAggregate>, AppError>;

    /// Returns the number of rows deleted.
    async fn delete_all_aggregates(&self) -> Result<usize, AppError>;

    /// Swap the whole aggregate table for `aggregates`.
    async fn replace_all_aggregates(
        &self,
        aggregates: Vec<LeaderboardAggregate>,
    ) -> Result<usize, AppError>;

    async fn delete_aggregates_for_athlete(&self, athlete_id: u64) -> Result<usize, AppError>;

    // ─── Leaderboard metadata ────────────────────────────────────

    async fn get_leaderboard_meta(&self) -> Result<LeaderboardMeta, AppError>;

    /// Take the recompute lease for `lease_id` unless a live one is held.
    /// Returns `false` if another recompute is running.
    async fn try_begin_recalculation(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, AppError>;

    /// Restart the lease clock if `lease_id` still holds a live lease.
    /// Returns `false` if the lease went stale or passed to someone else.
    async fn renew_recalculation(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, AppError>;

    /// Release the lease if `lease_id` still owns it. A `Some` report also
    /// marks the table initialized.
    async fn finish_recalculation(
        &self,
        lease_id: &str,
        report: Option<&RecalculationReport>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;
}
