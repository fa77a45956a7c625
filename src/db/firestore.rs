// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile and leaderboard preference)
//! - Activities (stored Strava activities with trail metrics)
//! - Leaderboard aggregates and table-wide leaderboard state

use crate::db::{collections, Datastore};
use crate::error::AppError;
use crate::models::{
    Activity, AggregateKey, LeaderboardAggregate, LeaderboardMeta, Metric, RecalculationReport,
    User, WriteOutcome,
};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};

const MAX_CONCURRENT_DB_OPS: usize = 50;
// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // Emulator gets an unauthenticated connection
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client for testing. Every operation returns an error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn query_activities_since(&self, since: &str) -> Result<Vec<Activity>, AppError> {
        let since = since.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| q.for_all([q.field("start_date").greater_than_or_equal(since.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn query_activities_without_start(&self) -> Result<Vec<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(|q| q.for_all([q.field("start_date").is_null()]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn query_all_aggregates(&self) -> Result<Vec<LeaderboardAggregate>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::LEADERBOARD_AGGREGATES)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Read-modify-write the meta document in one transaction. `apply`
    /// returns `false` to leave the document unchanged; a lost commit race
    /// also reports `false`.
    async fn update_meta<F>(&self, apply: F) -> Result<bool, AppError>
    where
        F: FnOnce(&mut LeaderboardMeta) -> bool + Send,
    {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut meta = self.get_leaderboard_meta().await?;
        if !apply(&mut meta) {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        client
            .fluent()
            .update()
            .in_col(collections::LEADERBOARD_META)
            .document_id(collections::LEADERBOARD_META_DOC)
            .object(&meta)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Failed to add meta to transaction: {}", e)))?;

        match transaction.commit().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "Lost race updating leaderboard meta");
                Ok(false)
            }
        }
    }

    // ─── Helper Methods ────────────────────────────────────────────

    /// Helper to batch delete documents using transactions.
    async fn batch_delete<T, F>(
        &self,
        items: &[T],
        collection: &str,
        id_extractor: F,
    ) -> Result<(), AppError>
    where
        F: Fn(&T) -> String,
    {
        let client = self.get_client()?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(&doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl Datastore for FirestoreDb {
    // ─── Activity Operations ─────────────────────────────────────

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(&activity_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_activity(&self, activity: &Activity) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .document_id(activity.strava_activity_id.to_string())
            .object(activity)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_activity(&self, activity_id: u64) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::ACTIVITIES)
            .document_id(activity_id.to_string())
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_activities_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Activity>, AppError> {
        let since = format_utc_rfc3339(since);
        let (mut dated, undated) = tokio::try_join!(
            self.query_activities_since(&since),
            self.query_activities_without_start(),
        )?;
        dated.extend(undated);
        Ok(dated)
    }

    async fn list_activities_for_athlete(
        &self,
        athlete_id: u64,
    ) -> Result<Vec<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(|q| q.for_all([q.field("athlete_id").eq(athlete_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_unmatched_activities(&self, limit: usize) -> Result<Vec<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(|q| q.for_all([q.field("last_matched").is_null()]))
            .limit(u32::try_from(limit).unwrap_or(u32::MAX))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_all_activities(&self) -> Result<Vec<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── User Operations ─────────────────────────────────────────

    async fn get_user(&self, athlete_id: u64) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(&athlete_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(user.athlete_id.to_string())
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Leaderboard Aggregate Operations ────────────────────────

    async fn read_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<LeaderboardAggregate>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::LEADERBOARD_AGGREGATES)
            .obj()
            .one(&key.doc_id())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Compare-and-swap on `version`. The read is not bound to the
    /// transaction, so cross-process writers are only caught if they
    /// committed before it; a failed commit is reported as a conflict.
    async fn upsert_aggregate(
        &self,
        aggregate: &LeaderboardAggregate,
        expected_version: u64,
    ) -> Result<WriteOutcome, AppError> {
        let client = self.get_client()?;
        let doc_id = aggregate.key().doc_id();

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<LeaderboardAggregate> = client
            .fluent()
            .select()
            .by_id_in(collections::LEADERBOARD_AGGREGATES)
            .obj()
            .one(&doc_id)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to read aggregate in transaction: {}", e))
            })?;

        let current_version = current.map(|a| a.version).unwrap_or(0);
        if current_version != expected_version {
            tracing::debug!(
                doc_id = %doc_id,
                expected_version,
                current_version,
                "Aggregate version moved"
            );
            let _ = transaction.rollback().await;
            return Ok(WriteOutcome::VersionConflict);
        }

        if aggregate.contributions.is_empty() {
            client
                .fluent()
                .delete()
                .from(collections::LEADERBOARD_AGGREGATES)
                .document_id(&doc_id)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add deletion to transaction: {}", e))
                })?;
        } else {
            let mut row = aggregate.clone();
            row.version = expected_version + 1;
            client
                .fluent()
                .update()
                .in_col(collections::LEADERBOARD_AGGREGATES)
                .document_id(&doc_id)
                .object(&row)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add aggregate to transaction: {}", e))
                })?;
        }

        match transaction.commit().await {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(e) => {
                tracing::debug!(doc_id = %doc_id, error = %e, "Aggregate commit failed");
                Ok(WriteOutcome::VersionConflict)
            }
        }
    }

    async fn read_aggregates(
        &self,
        window_key: &str,
        metric: Metric,
        activity_type: &str,
    ) -> Result<Vec<LeaderboardAggregate>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::LEADERBOARD_AGGREGATES)
            .filter(|q| {
                q.for_all([
                    q.field("window_key").eq(window_key),
                    q.field("metric").eq(metric.as_str()),
                    q.field("activity_type").eq(activity_type),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn delete_all_aggregates(&self) -> Result<usize, AppError> {
        let rows = self.query_all_aggregates().await?;
        let count = rows.len();
        self.batch_delete(&rows, collections::LEADERBOARD_AGGREGATES, |row| {
            row.key().doc_id()
        })
        .await?;
        tracing::debug!(count, "Deleted leaderboard aggregates");
        Ok(count)
    }

    /// Not atomic across batches; callers hold the recompute lease while
    /// this runs.
    async fn replace_all_aggregates(
        &self,
        aggregates: Vec<LeaderboardAggregate>,
    ) -> Result<usize, AppError> {
        self.delete_all_aggregates().await?;

        let client = self.get_client()?;
        let rows: Vec<LeaderboardAggregate> = aggregates
            .into_iter()
            .filter(|a| !a.contributions.is_empty())
            .map(|mut a| {
                a.version = 1;
                a
            })
            .collect();
        let count = rows.len();

        let chunks: Vec<Vec<LeaderboardAggregate>> =
            rows.chunks(BATCH_SIZE).map(|c| c.to_vec()).collect();
        stream::iter(chunks)
            .map(|chunk| async move {
                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::Database(format!("Failed to begin transaction: {}", e))
                })?;
                for row in &chunk {
                    client
                        .fluent()
                        .update()
                        .in_col(collections::LEADERBOARD_AGGREGATES)
                        .document_id(row.key().doc_id())
                        .object(row)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            AppError::Database(format!(
                                "Failed to add aggregate to transaction: {}",
                                e
                            ))
                        })?;
                }
                transaction.commit().await.map_err(|e| {
                    AppError::Database(format!("Failed to commit aggregate batch: {}", e))
                })?;
                Ok::<_, AppError>(())
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        Ok(count)
    }

    async fn delete_aggregates_for_athlete(&self, athlete_id: u64) -> Result<usize, AppError> {
        let rows: Vec<LeaderboardAggregate> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::LEADERBOARD_AGGREGATES)
            .filter(|q| q.for_all([q.field("athlete_id").eq(athlete_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let count = rows.len();
        self.batch_delete(&rows, collections::LEADERBOARD_AGGREGATES, |row| {
            row.key().doc_id()
        })
        .await?;
        tracing::debug!(athlete_id, count, "Deleted athlete leaderboard aggregates");
        Ok(count)
    }

    // ─── Leaderboard State Operations ────────────────────────────

    async fn get_leaderboard_meta(&self) -> Result<LeaderboardMeta, AppError> {
        let meta: Option<LeaderboardMeta> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::LEADERBOARD_META)
            .obj()
            .one(collections::LEADERBOARD_META_DOC)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(meta.unwrap_or_default())
    }

    async fn try_begin_recalculation(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, AppError> {
        self.update_meta(|meta| meta.try_take_lease(lease_id, now, lease))
            .await
    }

    async fn renew_recalculation(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<bool, AppError> {
        self.update_meta(|meta| meta.try_renew_lease(lease_id, now, lease))
            .await
    }

    async fn finish_recalculation(
        &self,
        lease_id: &str,
        report: Option<&RecalculationReport>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if !self
            .update_meta(|meta| meta.release_lease(lease_id, report, now))
            .await?
        {
            tracing::warn!(lease_id, "Recalculation lease held by another run, leaving it");
        }
        Ok(())
    }
}
