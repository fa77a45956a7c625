// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard aggregation service.
//!
//! Every activity contributes one value per (window, metric, activity type)
//! row. Rows keep a ledger of contributions keyed by activity ID, so applying
//! an event means "set this activity's contribution to X" rather than "add
//! X". Replaying an event is therefore harmless, and a create followed by a
//! delete leaves the row exactly as it was.
//!
//! Concurrency:
//! - Events for one athlete are serialized by a per-athlete mutex.
//! - Each row write is a compare-and-swap on the row's version.
//! - A full recompute excludes incremental work with an in-process
//!   `RwLock` and a lease stored with the leaderboard metadata. The lease
//!   carries an owner ID and is renewed right before the table swap; a run
//!   whose lease went stale aborts instead of overwriting newer writes.

use crate::config::Config;
use crate::db::Datastore;
use crate::error::AppError;
use crate::models::leaderboard::{activity_type_partitions, to_fixed};
use crate::models::user::is_opted_in;
use crate::models::{
    Activity, AggregateKey, LeaderboardAggregate, Metric, RecalculationReport, User, WriteOutcome,
};
use crate::services::window::{windows_for_local, WindowType};
use crate::time_utils::resolve_timezone;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

const MAX_CONCURRENT_ROW_WRITES: usize = 16;

static LEASE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Owner ID for one recompute run, unique across processes in practice.
fn new_lease_id(now: chrono::DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        now.timestamp_micros(),
        LEASE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Lazily created async mutexes keyed by athlete or activity ID.
pub type KeyedLocks = Arc<DashMap<u64, Arc<Mutex<()>>>>;

pub(crate) fn keyed_lock(locks: &KeyedLocks, id: u64) -> Arc<Mutex<()>> {
    locks
        .entry(id)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// One activity's share of one aggregate row.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Contribution {
    window: WindowType,
    value: i64,
}

type ContributionMap = BTreeMap<AggregateKey, Contribution>;

/// Settings the aggregator needs from [`Config`].
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub default_timezone: Tz,
    /// Local start of the leaderboard season
    pub start: NaiveDateTime,
    pub max_retries: u32,
    pub lease: chrono::Duration,
}

impl From<&Config> for AggregatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_timezone: config.default_timezone,
            start: config.leaderboard_start(),
            max_retries: config.aggregate_max_retries,
            lease: config.recalc_lease(),
        }
    }
}

/// Result of an incremental event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Rows whose value or ledger changed
    pub rows_changed: usize,
    /// Rows that already held the target contribution
    pub rows_unchanged: usize,
}

/// Result of a leaderboard preference change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PreferenceOutcome {
    pub show_on_leaderboards: bool,
    pub rows_deleted: usize,
    pub rows_written: usize,
}

/// Maintains leaderboard aggregate rows.
pub struct LeaderboardAggregator {
    store: Arc<dyn Datastore>,
    settings: AggregatorSettings,
    athlete_locks: KeyedLocks,
    /// Incremental work holds it shared, a recompute holds it exclusively
    recompute_gate: RwLock<()>,
}

impl LeaderboardAggregator {
    pub fn new(store: Arc<dyn Datastore>, settings: AggregatorSettings) -> Self {
        Self {
            store,
            settings,
            athlete_locks: Arc::new(DashMap::new()),
            recompute_gate: RwLock::new(()),
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// The activity's local start time, or `None` if it cannot be resolved.
    ///
    /// Prefers Strava's `start_date_local`; otherwise converts `start_date`
    /// through the activity zone, then the athlete's zone, then the default.
    pub fn local_start(&self, activity: &Activity, user_tz: Option<&str>) -> Option<NaiveDateTime> {
        if let Some(local) = activity.start_date_local {
            return Some(local);
        }
        let start = activity.start_date?;
        let tz = resolve_timezone(
            [activity.timezone.as_deref(), user_tz],
            self.settings.default_timezone,
        );
        Some(start.with_timezone(&tz).naive_local())
    }

    /// Every row the activity contributes to, with its value.
    ///
    /// `None` means the start date could not be resolved. Activities before the
    /// season start contribute nothing.
    fn contributions(&self, activity: &Activity, user_tz: Option<&str>) -> Option<ContributionMap> {
        let local = self.local_start(activity, user_tz)?;
        let mut map = ContributionMap::new();
        if local < self.settings.start {
            return Some(map);
        }

        let partitions = activity_type_partitions(&activity.activity_type);
        for window in windows_for_local(local) {
            for metric in Metric::ALL {
                let Some(value) = metric.value_of(activity) else {
                    continue;
                };
                let value = to_fixed(value);
                for activity_type in &partitions {
                    map.insert(
                        AggregateKey {
                            window_key: window.key.clone(),
                            metric,
                            activity_type: activity_type.clone(),
                            athlete_id: activity.athlete_id,
                        },
                        Contribution {
                            window: window.window_type,
                            value,
                        },
                    );
                }
            }
        }
        Some(map)
    }

    fn athlete_lock(&self, athlete_id: u64) -> Arc<Mutex<()>> {
        keyed_lock(&self.athlete_locks, athlete_id)
    }

    /// Fail fast if a recompute is running here or in another process.
    async fn ensure_no_recalculation(&self) -> Result<(), AppError> {
        let meta = self.store.get_leaderboard_meta().await?;
        if meta.recalculation_in_progress(Utc::now(), self.settings.lease) {
            tracing::info!("Leaderboard recalculation lease held, rejecting incremental update");
            return Err(AppError::RecalculationInProgress);
        }
        Ok(())
    }

    pub async fn apply_activity_created(&self, activity: &Activity) -> Result<ApplyOutcome, AppError> {
        self.apply_change(None, Some(activity)).await
    }

    /// Move an activity's contribution from its old state to its new one.
    /// Changed windows or types clear the old rows and fill the new ones.
    pub async fn apply_activity_updated(
        &self,
        old: &Activity,
        new: &Activity,
    ) -> Result<ApplyOutcome, AppError> {
        self.apply_change(Some(old), Some(new)).await
    }

    pub async fn apply_activity_deleted(&self, activity: &Activity) -> Result<ApplyOutcome, AppError> {
        self.apply_change(Some(activity), None).await
    }

    async fn apply_change(
        &self,
        old: Option<&Activity>,
        new: Option<&Activity>,
    ) -> Result<ApplyOutcome, AppError> {
        let Some(subject) = new.or(old) else {
            return Ok(ApplyOutcome::default());
        };
        let athlete_id = subject.athlete_id;
        let activity_id = subject.strava_activity_id;

        let Ok(_gate) = self.recompute_gate.try_read() else {
            tracing::info!(athlete_id, activity_id, "Recalculation running, rejecting incremental update");
            return Err(AppError::RecalculationInProgress);
        };
        self.ensure_no_recalculation().await?;

        let lock = self.athlete_lock(athlete_id);
        let _guard = lock.lock().await;

        let user = self.store.get_user(athlete_id).await?;
        if !is_opted_in(user.as_ref()) {
            tracing::debug!(athlete_id, activity_id, "Athlete opted out, skipping leaderboard update");
            return Ok(ApplyOutcome::default());
        }
        let user_tz = user.as_ref().and_then(|u| u.timezone.as_deref());

        // Old rows are cleared unless the new state writes them again
        let mut targets: BTreeMap<AggregateKey, (WindowType, Option<i64>)> = BTreeMap::new();
        for (activity, is_new) in [(old, false), (new, true)] {
            let Some(activity) = activity else {
                continue;
            };
            let Some(contributions) = self.contributions(activity, user_tz) else {
                tracing::warn!(
                    athlete_id,
                    activity_id,
                    "Activity has no usable start date, skipping leaderboard update"
                );
                continue;
            };
            for (key, c) in contributions {
                targets.insert(key, (c.window, is_new.then_some(c.value)));
            }
        }

        let results = stream::iter(targets)
            .map(|(key, (window, target))| async move {
                self.set_row_contribution(&key, window, activity_id, target)
                    .await
            })
            .buffer_unordered(MAX_CONCURRENT_ROW_WRITES)
            .collect::<Vec<Result<bool, AppError>>>()
            .await;

        let mut outcome = ApplyOutcome::default();
        for result in results {
            if result? {
                outcome.rows_changed += 1;
            } else {
                outcome.rows_unchanged += 1;
            }
        }

        tracing::debug!(
            athlete_id,
            activity_id,
            rows_changed = outcome.rows_changed,
            rows_unchanged = outcome.rows_unchanged,
            "Applied leaderboard change"
        );
        Ok(outcome)
    }

    /// Compare-and-swap one row until it holds `target` for `activity_id`.
    /// Returns `false` if the row already did.
    async fn set_row_contribution(
        &self,
        key: &AggregateKey,
        window: WindowType,
        activity_id: u64,
        target: Option<i64>,
    ) -> Result<bool, AppError> {
        for attempt in 1..=self.settings.max_retries {
            let now = Utc::now();
            let mut row = match self.store.read_aggregate(key).await? {
                Some(row) => row,
                None => LeaderboardAggregate::empty(key, window, now),
            };
            let expected_version = row.version;
            if !row.set_contribution(activity_id, target, now)? {
                return Ok(false);
            }

            match self.store.upsert_aggregate(&row, expected_version).await? {
                WriteOutcome::Applied => return Ok(true),
                WriteOutcome::VersionConflict => {
                    tracing::debug!(
                        doc_id = %key.doc_id(),
                        attempt,
                        "Aggregate changed underneath us, retrying"
                    );
                }
            }
        }

        tracing::warn!(
            doc_id = %key.doc_id(),
            attempts = self.settings.max_retries,
            "Giving up on contended aggregate row"
        );
        Err(AppError::Conflict(format!(
            "aggregate {} kept changing",
            key.doc_id()
        )))
    }

    /// Rebuild every aggregate row from the activity table.
    ///
    /// Only activities starting (local time) on or after `as_of` count; the
    /// season start date applies as well. Rows are accumulated in memory and
    /// written with one table replace.
    pub async fn recalculate_all(
        &self,
        as_of: Option<NaiveDate>,
    ) -> Result<RecalculationReport, AppError> {
        let started = Instant::now();
        let now = Utc::now();
        let lease_id = new_lease_id(now);

        // ─────────────────────────────────────────────────────────────
        // STEP 1: Take the store lease, then drain in-process writers
        // ─────────────────────────────────────────────────────────────
        if !self
            .store
            .try_begin_recalculation(&lease_id, now, self.settings.lease)
            .await?
        {
            tracing::warn!("Leaderboard recalculation already running");
            return Err(AppError::Conflict(
                "leaderboard recalculation already running".to_string(),
            ));
        }
        tracing::info!(as_of = ?as_of, lease_id = %lease_id, "Leaderboard recalculation started");

        let result = {
            let _gate = self.recompute_gate.write().await;
            self.rebuild_table(&lease_id, as_of, started).await
        };

        // ─────────────────────────────────────────────────────────────
        // STEP 4: Release the lease whatever happened
        // ─────────────────────────────────────────────────────────────
        let finished = self
            .store
            .finish_recalculation(&lease_id, result.as_ref().ok(), Utc::now())
            .await;

        let report = result?;
        finished?;

        tracing::info!(
            activities_processed = report.activities_processed,
            athletes_processed = report.athletes_processed,
            activities_skipped = report.activities_skipped,
            aggregates_written = report.aggregates_written,
            duration_ms = report.duration_ms,
            "Leaderboard recalculation complete"
        );
        Ok(report)
    }

    async fn rebuild_table(
        &self,
        lease_id: &str,
        as_of: Option<NaiveDate>,
        started: Instant,
    ) -> Result<RecalculationReport, AppError> {
        // ─────────────────────────────────────────────────────────────
        // STEP 2: Stream activities and accumulate rows in memory
        // ─────────────────────────────────────────────────────────────
        let cutoff = as_of
            .map(|d| d.and_time(NaiveTime::MIN))
            .map_or(self.settings.start, |d| d.max(self.settings.start));

        // Local times run at most 14h ahead of UTC; a day of slack is enough
        let since = cutoff.and_utc() - chrono::Duration::days(1);
        let activities = self.store.list_activities_since(since).await?;
        let users = self.load_users(&activities).await?;

        let now = Utc::now();
        let mut rows: BTreeMap<AggregateKey, LeaderboardAggregate> = BTreeMap::new();
        let mut athletes = HashSet::new();
        let mut report = RecalculationReport::default();

        for activity in &activities {
            let user = users.get(&activity.athlete_id);
            if !is_opted_in(user) {
                continue;
            }
            let user_tz = user.and_then(|u| u.timezone.as_deref());

            let Some(local) = self.local_start(activity, user_tz) else {
                tracing::warn!(
                    activity_id = activity.strava_activity_id,
                    "Activity has no usable start date, skipping"
                );
                report.activities_skipped += 1;
                continue;
            };
            if local < cutoff {
                continue;
            }

            let Some(contributions) = self.contributions(activity, user_tz) else {
                continue;
            };
            for (key, c) in contributions {
                rows.entry(key.clone())
                    .or_insert_with(|| LeaderboardAggregate::empty(&key, c.window, now))
                    .set_contribution(activity.strava_activity_id, Some(c.value), now)?;
            }
            report.activities_processed += 1;
            athletes.insert(activity.athlete_id);
        }
        report.athletes_processed = athletes.len();

        // ─────────────────────────────────────────────────────────────
        // STEP 3: Confirm the lease is still ours, then swap the table
        // ─────────────────────────────────────────────────────────────
        // Writers resume once the lease is stale, and the swap would drop
        // whatever they wrote since.
        if !self
            .store
            .renew_recalculation(lease_id, Utc::now(), self.settings.lease)
            .await?
        {
            tracing::warn!(lease_id, "Recalculation lease lost, not replacing aggregates");
            return Err(AppError::Conflict(
                "leaderboard recalculation lease expired before the rebuild finished".to_string(),
            ));
        }

        report.aggregates_written = self
            .store
            .replace_all_aggregates(rows.into_values().collect())
            .await?;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(report)
    }

    async fn load_users(&self, activities: &[Activity]) -> Result<HashMap<u64, User>, AppError> {
        let athlete_ids: HashSet<u64> = activities.iter().map(|a| a.athlete_id).collect();
        let store = &self.store;
        let users = stream::iter(athlete_ids)
            .map(|id| async move { store.get_user(id).await })
            .buffer_unordered(MAX_CONCURRENT_ROW_WRITES)
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

    /// Change an athlete's leaderboard visibility.
    ///
    /// Opting out removes every row for the athlete. Opting in rebuilds the
    /// athlete's rows from their stored activities.
    pub async fn set_leaderboard_preference(
        &self,
        athlete_id: u64,
        show: bool,
    ) -> Result<PreferenceOutcome, AppError> {
        let Ok(_gate) = self.recompute_gate.try_read() else {
            return Err(AppError::RecalculationInProgress);
        };
        self.ensure_no_recalculation().await?;

        let lock = self.athlete_lock(athlete_id);
        let _guard = lock.lock().await;

        let mut user = self
            .store
            .get_user(athlete_id)
            .await?
            .unwrap_or_else(|| User::new(athlete_id, ""));
        user.show_on_leaderboards = show;
        self.store.upsert_user(&user).await?;

        let rows_deleted = self.store.delete_aggregates_for_athlete(athlete_id).await?;
        let mut outcome = PreferenceOutcome {
            show_on_leaderboards: show,
            rows_deleted,
            rows_written: 0,
        };

        if show {
            let activities = self.store.list_activities_for_athlete(athlete_id).await?;
            let now = Utc::now();
            let mut rows: BTreeMap<AggregateKey, LeaderboardAggregate> = BTreeMap::new();
            for activity in &activities {
                let Some(contributions) = self.contributions(activity, user.timezone.as_deref())
                else {
                    tracing::warn!(
                        athlete_id,
                        activity_id = activity.strava_activity_id,
                        "Activity has no usable start date, skipping"
                    );
                    continue;
                };
                for (key, c) in contributions {
                    rows.entry(key.clone())
                        .or_insert_with(|| LeaderboardAggregate::empty(&key, c.window, now))
                        .set_contribution(activity.strava_activity_id, Some(c.value), now)?;
                }
            }

            for row in rows.values() {
                match self.store.upsert_aggregate(row, 0).await? {
                    WriteOutcome::Applied => outcome.rows_written += 1,
                    WriteOutcome::VersionConflict => {
                        return Err(AppError::Conflict(format!(
                            "aggregate {} appeared during rebuild",
                            row.key().doc_id()
                        )));
                    }
                }
            }
        }

        tracing::info!(
            athlete_id,
            show,
            rows_deleted = outcome.rows_deleted,
            rows_written = outcome.rows_written,
            "Leaderboard preference updated"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::{DateTime, NaiveDate};

    fn aggregator() -> LeaderboardAggregator {
        LeaderboardAggregator::new(
            Arc::new(MemoryStore::new()),
            AggregatorSettings::from(&Config::test_default()),
        )
    }

    fn activity(start_date: Option<&str>, start_local: Option<&str>, tz: Option<&str>) -> Activity {
        Activity {
            strava_activity_id: 1,
            athlete_id: 7,
            name: String::new(),
            activity_type: "Run".to_string(),
            start_date: start_date.map(|s| s.parse::<DateTime<Utc>>().unwrap()),
            start_date_local: start_local.map(|s| s.parse::<NaiveDateTime>().unwrap()),
            timezone: tz.map(String::from),
            distance_meters: 5000.0,
            moving_time_secs: 1800,
            elapsed_time_secs: 1900,
            elevation_gain_meters: 30.0,
            polyline: None,
            distance_on_trail_meters: None,
            time_on_trail_secs: None,
            last_matched: None,
        }
    }

    #[test]
    fn test_local_start_prefers_strava_local() {
        let agg = aggregator();
        let a = activity(
            Some("2026-03-02T02:00:00Z"),
            Some("2026-03-01T18:00:00"),
            None,
        );
        assert_eq!(
            agg.local_start(&a, None),
            Some(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(18, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_local_start_fallback_chain() {
        let agg = aggregator();
        let a = activity(Some("2026-03-02T02:00:00Z"), None, Some("(GMT-08:00) America/Los_Angeles"));
        assert_eq!(agg.local_start(&a, None).unwrap().to_string(), "2026-03-01 18:00:00");

        // No activity zone: athlete zone, then the configured default
        let a = activity(Some("2026-03-02T02:00:00Z"), None, None);
        assert_eq!(
            agg.local_start(&a, Some("Europe/Berlin")).unwrap().to_string(),
            "2026-03-02 03:00:00"
        );
        assert_eq!(agg.local_start(&a, None).unwrap().to_string(), "2026-03-01 21:00:00");

        assert!(agg.local_start(&activity(None, None, None), None).is_none());
    }

    #[test]
    fn test_contributions_cover_windows_metrics_partitions() {
        let agg = aggregator();
        let a = activity(None, Some("2026-03-04T07:00:00"), None);
        let map = agg.contributions(&a, None).unwrap();
        // 3 windows x 3 base metrics (trail metrics unmatched) x 3 partitions
        assert_eq!(map.len(), 27);
        let key = AggregateKey {
            window_key: "week_2026-03-02".to_string(),
            metric: Metric::Distance,
            activity_type: "foot".to_string(),
            athlete_id: 7,
        };
        assert_eq!(map[&key].value, 5_000_000);
    }

    #[test]
    fn test_contributions_before_season_are_empty() {
        let agg = aggregator();
        let a = activity(None, Some("2025-12-31T23:59:00"), None);
        assert!(agg.contributions(&a, None).unwrap().is_empty());
    }
}
