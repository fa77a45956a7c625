// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity processing service.
//!
//! Handles the core workflow for an activity event:
//! 1. Take the activity's lock
//! 2. Load the previously stored version of the activity
//! 3. Match the route against the trail if the polyline changed
//! 4. Apply the leaderboard change
//! 5. Store (or delete) the activity record
//!
//! The lock is held until the record is written, so two deliveries for the
//! same activity each see the record the other left behind.
//!
//! The leaderboard is updated before the record is written. If the write
//! fails the event is retried, and the retry sees the old record again and
//! converges on the same aggregate state.

use crate::db::Datastore;
use crate::error::{AppError, Result};
use crate::models::trail::MatchResult;
use crate::models::{Activity, ActivityRoute, AspectType, RecalculationReport};
use crate::services::leaderboard::{keyed_lock, KeyedLocks};
use crate::services::{LeaderboardAggregator, TrailService};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An activity event as delivered by the task queue.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityEvent {
    pub aspect_type: AspectType,
    /// Full activity for create/update
    #[serde(default)]
    pub activity: Option<Activity>,
    /// Enough for delete
    #[serde(default)]
    pub activity_id: Option<u64>,
}

/// Result of processing an activity event.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub activity_id: u64,
    /// Trail matching ran for this event
    pub matched: bool,
    pub distance_on_trail_meters: Option<f64>,
    pub rows_changed: usize,
}

/// Result of a batch re-match.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchBatchReport {
    pub activities_matched: usize,
    /// Activities with any distance on trail
    pub activities_on_trail: usize,
    /// Polylines that would not decode (stored with zero trail metrics)
    pub decode_failures: usize,
    /// Activities whose update failed and will be picked up again
    pub failed: usize,
}

/// Result of re-matching every stored activity.
#[derive(Debug, Clone, Serialize)]
pub struct RematchReport {
    pub matching: MatchBatchReport,
    pub recalculation: RecalculationReport,
}

pub struct ActivityProcessor {
    store: Arc<dyn Datastore>,
    trails: Arc<TrailService>,
    leaderboard: Arc<LeaderboardAggregator>,
    activity_locks: KeyedLocks,
}

impl ActivityProcessor {
    pub fn new(
        store: Arc<dyn Datastore>,
        trails: Arc<TrailService>,
        leaderboard: Arc<LeaderboardAggregator>,
    ) -> Self {
        Self {
            store,
            trails,
            leaderboard,
            activity_locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn process_event(&self, event: ActivityEvent) -> Result<ProcessResult> {
        match event.aspect_type {
            AspectType::Create | AspectType::Update => {
                let activity = event.activity.ok_or_else(|| {
                    AppError::BadRequest("'activity' is required for create/update".to_string())
                })?;
                self.process_upsert(activity).await
            }
            AspectType::Delete => {
                let activity_id = event
                    .activity_id
                    .or(event.activity.map(|a| a.strava_activity_id))
                    .ok_or_else(|| {
                        AppError::BadRequest("'activity_id' is required for delete".to_string())
                    })?;
                self.process_delete(activity_id).await
            }
        }
    }

    /// Store a created or updated activity.
    ///
    /// A create for an activity that is already stored is handled as an
    /// update, so duplicate deliveries are harmless.
    pub async fn process_upsert(&self, mut activity: Activity) -> Result<ProcessResult> {
        let athlete_id = activity.athlete_id;
        let activity_id = activity.strava_activity_id;
        tracing::info!(athlete_id, activity_id, "Processing activity");

        let lock = keyed_lock(&self.activity_locks, activity_id);
        let _guard = lock.lock().await;

        let previous = self.store.get_activity(activity_id).await?;

        let matched = activity.needs_matching(previous.as_ref());
        if matched {
            self.match_activity(&mut activity, Utc::now()).await?;
        } else if let Some(prev) = &previous {
            activity.inherit_trail_metrics(prev);
        }

        let outcome = match &previous {
            Some(prev) => {
                self.leaderboard
                    .apply_activity_updated(prev, &activity)
                    .await?
            }
            None => self.leaderboard.apply_activity_created(&activity).await?,
        };

        self.store.upsert_activity(&activity).await?;

        tracing::info!(
            athlete_id,
            activity_id,
            matched,
            distance_on_trail = ?activity.distance_on_trail_meters,
            rows_changed = outcome.rows_changed,
            "Activity processed"
        );

        Ok(ProcessResult {
            activity_id,
            matched,
            distance_on_trail_meters: activity.distance_on_trail_meters,
            rows_changed: outcome.rows_changed,
        })
    }

    /// Remove an activity. Unknown activities are a no-op.
    pub async fn process_delete(&self, activity_id: u64) -> Result<ProcessResult> {
        let lock = keyed_lock(&self.activity_locks, activity_id);
        let _guard = lock.lock().await;

        let Some(previous) = self.store.get_activity(activity_id).await? else {
            tracing::debug!(activity_id, "Activity not stored, nothing to delete");
            return Ok(ProcessResult {
                activity_id,
                matched: false,
                distance_on_trail_meters: None,
                rows_changed: 0,
            });
        };

        let outcome = self.leaderboard.apply_activity_deleted(&previous).await?;
        self.store.delete_activity(activity_id).await?;

        tracing::info!(
            athlete_id = previous.athlete_id,
            activity_id,
            rows_changed = outcome.rows_changed,
            "Activity deleted"
        );

        Ok(ProcessResult {
            activity_id,
            matched: false,
            distance_on_trail_meters: None,
            rows_changed: outcome.rows_changed,
        })
    }

    /// Match the activity's polyline on the blocking pool and store the
    /// trail metrics on it.
    ///
    /// Activities without a route, or with one that will not decode, get zero
    /// trail metrics so they are not picked up again.
    async fn match_activity(&self, activity: &mut Activity, now: DateTime<Utc>) -> Result<()> {
        let result = match activity.polyline.clone().filter(|p| !p.is_empty()) {
            Some(encoded) => {
                let trails = self.trails.clone();
                let moving_time = activity.moving_time_secs;
                tokio::task::spawn_blocking(move || trails.match_polyline(&encoded, Some(moving_time)))
                    .await
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Matching task failed: {}", e)))?
                    .unwrap_or_else(|e| {
                        tracing::warn!(
                            activity_id = activity.strava_activity_id,
                            error = %e,
                            "Trail matching failed, storing zero trail metrics"
                        );
                        MatchResult::default()
                    })
            }
            None => MatchResult::default(),
        };
        store_match(activity, &result, now);
        Ok(())
    }

    /// Match activities that were stored but never matched.
    pub async fn match_unmatched(&self, limit: usize) -> Result<MatchBatchReport> {
        let activities = self.store.list_unmatched_activities(limit).await?;
        tracing::info!(count = activities.len(), "Matching unmatched activities");
        self.match_batch(activities, true).await
    }

    /// Re-match every stored activity (e.g. after the trail data changed) and
    /// rebuild the leaderboard from the results.
    pub async fn rematch_all(&self) -> Result<RematchReport> {
        let activities = self.store.list_all_activities().await?;
        tracing::info!(count = activities.len(), "Re-matching all activities");
        let matching = self.match_batch(activities, false).await?;
        let recalculation = self.leaderboard.recalculate_all(None).await?;
        Ok(RematchReport {
            matching,
            recalculation,
        })
    }

    /// Match a batch on the blocking pool, then store the results.
    ///
    /// With `incremental`, each activity's leaderboard rows are updated too;
    /// otherwise the caller is expected to recompute.
    async fn match_batch(
        &self,
        activities: Vec<Activity>,
        incremental: bool,
    ) -> Result<MatchBatchReport> {
        let mut report = MatchBatchReport::default();

        let mut routes = Vec::with_capacity(activities.len());
        let mut route_index = Vec::with_capacity(activities.len());
        for activity in &activities {
            let route = match activity.polyline.as_deref().filter(|p| !p.is_empty()) {
                Some(encoded) => {
                    match ActivityRoute::from_polyline(encoded, Some(activity.moving_time_secs)) {
                        Ok(route) => Some(route),
                        Err(e) => {
                            tracing::warn!(
                                activity_id = activity.strava_activity_id,
                                error = %e,
                                "Failed to decode polyline"
                            );
                            report.decode_failures += 1;
                            None
                        }
                    }
                }
                None => None,
            };
            route_index.push(route.as_ref().map(|_| routes.len()));
            if let Some(route) = route {
                routes.push(route);
            }
        }

        let trails = self.trails.clone();
        let results = tokio::task::spawn_blocking(move || trails.match_many(&routes))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Matching task failed: {}", e)))?;

        let now = Utc::now();
        for (activity, index) in activities.into_iter().zip(route_index) {
            let result = index
                .and_then(|i| results.get(i))
                .cloned()
                .unwrap_or_default();

            let stored = self
                .store_rematched(&activity, &result, now, incremental)
                .await;
            match stored {
                Ok(true) => {
                    report.activities_matched += 1;
                    if result.distance_on_trail_meters > 0.0 {
                        report.activities_on_trail += 1;
                    }
                }
                Ok(false) => {}
                Err(AppError::RecalculationInProgress) => {
                    return Err(AppError::RecalculationInProgress)
                }
                Err(e) => {
                    tracing::warn!(
                        activity_id = activity.strava_activity_id,
                        error = %e,
                        "Failed to store re-matched activity"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            matched = report.activities_matched,
            on_trail = report.activities_on_trail,
            decode_failures = report.decode_failures,
            failed = report.failed,
            "Activity batch matched"
        );
        Ok(report)
    }

    /// Store a batch match result under the activity's lock.
    ///
    /// Returns `false` when the activity was deleted or edited after the
    /// batch listed it; the event that changed it already matched it.
    async fn store_rematched(
        &self,
        listed: &Activity,
        result: &MatchResult,
        now: DateTime<Utc>,
        incremental: bool,
    ) -> Result<bool> {
        let activity_id = listed.strava_activity_id;
        let lock = keyed_lock(&self.activity_locks, activity_id);
        let _guard = lock.lock().await;

        let Some(current) = self.store.get_activity(activity_id).await? else {
            tracing::debug!(activity_id, "Activity deleted since it was listed, skipping");
            return Ok(false);
        };
        if current.polyline != listed.polyline || current.last_matched != listed.last_matched {
            tracing::debug!(activity_id, "Activity changed since it was listed, skipping");
            return Ok(false);
        }

        let mut updated = current.clone();
        store_match(&mut updated, result, now);
        if incremental {
            self.leaderboard
                .apply_activity_updated(&current, &updated)
                .await?;
        }
        self.store.upsert_activity(&updated).await?;
        Ok(true)
    }
}

fn store_match(activity: &mut Activity, result: &MatchResult, now: DateTime<Utc>) {
    activity.distance_on_trail_meters = Some(result.distance_on_trail_meters);
    activity.time_on_trail_secs = Some(result.time_on_trail_whole_secs());
    activity.last_matched = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_delete_by_id() {
        let event: ActivityEvent =
            serde_json::from_str(r#"{"aspect_type": "delete", "activity_id": 12}"#).unwrap();
        assert_eq!(event.aspect_type, AspectType::Delete);
        assert_eq!(event.activity_id, Some(12));
        assert!(event.activity.is_none());
    }

    #[test]
    fn test_store_match_sets_metrics() {
        let mut activity: Activity = serde_json::from_str(
            r#"{"strava_activity_id": 1, "athlete_id": 2, "type": "Run"}"#,
        )
        .unwrap();
        let result = MatchResult {
            distance_on_trail_meters: 1234.5,
            time_on_trail_secs: 599.6,
            ..Default::default()
        };
        let now = Utc::now();
        store_match(&mut activity, &result, now);
        assert_eq!(activity.distance_on_trail_meters, Some(1234.5));
        assert_eq!(activity.time_on_trail_secs, Some(600));
        assert_eq!(activity.last_matched, Some(now));
    }
}
