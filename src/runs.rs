use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use crate::config::{RUN_FAILURE_RATIO, RUN_STALE_AFTER_SECS};
use crate::db::models::PipelineRunRow;
use crate::error::Result;
use crate::types::{now_secs, RunCounters};

/// Lifecycle of `pipeline_runs` rows: one row per run, opened as 'running'
/// and finalized exactly once to 'completed' or 'failed'.
#[derive(Clone)]
pub struct RunTracker {
    pool: SqlitePool,
}

impl RunTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a new run, recording the inference version in the run metadata.
    /// Any earlier run still marked 'running' past the stale window is first
    /// reconciled to 'failed': a crashed process never got to finalize it.
    pub async fn start(&self, geo_version: i64) -> Result<i64> {
        let now = now_secs();
        let reconciled = sqlx::query(
            "UPDATE pipeline_runs
             SET status = 'failed', finished_at = ?, error_message = 'stale run reconciled'
             WHERE status = 'running' AND started_at < ?",
        )
        .bind(now)
        .bind(now - RUN_STALE_AFTER_SECS)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if reconciled > 0 {
            warn!(reconciled, "Reconciled stale pipeline runs to failed");
        }

        let metadata = serde_json::json!({ "geo_version": geo_version }).to_string();
        let run_id = sqlx::query(
            "INSERT INTO pipeline_runs (started_at, status, metadata) VALUES (?, 'running', ?)",
        )
        .bind(now)
        .bind(&metadata)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        info!(run_id, geo_version, "Pipeline run started");
        Ok(run_id)
    }

    /// Finalize a run from its counters. A run whose per-market failure
    /// ratio crosses the threshold is recorded as failed even though the
    /// orchestrator itself completed.
    pub async fn finish(&self, run_id: i64, counters: &RunCounters) -> Result<()> {
        let ratio_exceeded = counters.markets_attempted > 0
            && counters.markets_failed as f64 / counters.markets_attempted as f64
                > RUN_FAILURE_RATIO;
        let (status, error_message) = if ratio_exceeded {
            (
                "failed",
                Some(format!(
                    "{} of {} markets failed",
                    counters.markets_failed, counters.markets_attempted
                )),
            )
        } else {
            ("completed", None)
        };
        self.finalize(run_id, counters, status, error_message.as_deref())
            .await
    }

    /// Finalize a run aborted by an infrastructure failure.
    pub async fn fail(&self, run_id: i64, counters: &RunCounters, error: &str) -> Result<()> {
        self.finalize(run_id, counters, "failed", Some(error)).await
    }

    async fn finalize(
        &self,
        run_id: i64,
        counters: &RunCounters,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE pipeline_runs SET
                finished_at = ?,
                status = ?,
                markets_fetched = ?,
                markets_new = ?,
                markets_updated = ?,
                markets_attempted = ?,
                markets_failed = ?,
                locations_inferred = ?,
                locations_geocoded = ?,
                geocode_cache_hits = ?,
                geocode_cache_misses = ?,
                avg_confidence = ?,
                error_message = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(now_secs())
        .bind(status)
        .bind(counters.markets_fetched)
        .bind(counters.markets_new)
        .bind(counters.markets_updated)
        .bind(counters.markets_attempted)
        .bind(counters.markets_failed)
        .bind(counters.locations_inferred)
        .bind(counters.locations_geocoded)
        .bind(counters.geocode_cache_hits)
        .bind(counters.geocode_cache_misses)
        .bind(counters.avg_confidence())
        .bind(error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        info!(run_id, status, "Pipeline run finished");
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<PipelineRunRow>> {
        let rows = sqlx::query_as::<_, PipelineRunRow>(
            "SELECT id, started_at, finished_at, status, markets_fetched, markets_new,
                    markets_updated, markets_attempted, markets_failed, locations_inferred,
                    locations_geocoded, geocode_cache_hits, geocode_cache_misses,
                    avg_confidence, error_message, metadata
             FROM pipeline_runs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::geocode::tests::test_pool;

    #[tokio::test]
    async fn start_and_finish_completed() {
        let tracker = RunTracker::new(test_pool().await);
        let run_id = tracker.start(1).await.unwrap();

        let counters = RunCounters {
            markets_fetched: 10,
            markets_attempted: 10,
            markets_failed: 1,
            locations_inferred: 12,
            confidence_sum: 6.0,
            confidence_count: 12,
            ..Default::default()
        };
        tracker.finish(run_id, &counters).await.unwrap();

        let runs = tracker.recent(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].markets_attempted, 10);
        assert!((runs[0].avg_confidence.unwrap() - 0.5).abs() < 1e-9);
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn run_metadata_records_inference_version() {
        let tracker = RunTracker::new(test_pool().await);
        tracker.start(3).await.unwrap();

        let runs = tracker.recent(1).await.unwrap();
        let metadata: serde_json::Value =
            serde_json::from_str(runs[0].metadata.as_deref().unwrap()).unwrap();
        assert_eq!(metadata["geo_version"], 3);
    }

    #[tokio::test]
    async fn failure_ratio_marks_run_failed() {
        let tracker = RunTracker::new(test_pool().await);
        let run_id = tracker.start(1).await.unwrap();

        let counters = RunCounters {
            markets_attempted: 10,
            markets_failed: 6,
            ..Default::default()
        };
        tracker.finish(run_id, &counters).await.unwrap();

        let runs = tracker.recent(1).await.unwrap();
        assert_eq!(runs[0].status, "failed");
        assert!(runs[0].error_message.as_deref().unwrap().contains("6 of 10"));
    }

    #[tokio::test]
    async fn infrastructure_failure_recorded() {
        let tracker = RunTracker::new(test_pool().await);
        let run_id = tracker.start(1).await.unwrap();
        tracker
            .fail(run_id, &RunCounters::default(), "place index unavailable")
            .await
            .unwrap();

        let runs = tracker.recent(1).await.unwrap();
        assert_eq!(runs[0].status, "failed");
        assert_eq!(runs[0].error_message.as_deref(), Some("place index unavailable"));
    }

    #[tokio::test]
    async fn stale_running_run_is_reconciled() {
        let pool = test_pool().await;
        let tracker = RunTracker::new(pool.clone());

        // A run opened before the stale window by a process that never finalized.
        sqlx::query("INSERT INTO pipeline_runs (started_at, status) VALUES (?, 'running')")
            .bind(now_secs() - RUN_STALE_AFTER_SECS - 60)
            .execute(&pool)
            .await
            .unwrap();

        tracker.start(1).await.unwrap();
        let runs = tracker.recent(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        // Newest first: the fresh run, then the reconciled one.
        assert_eq!(runs[0].status, "running");
        assert_eq!(runs[1].status, "failed");
        assert_eq!(runs[1].error_message.as_deref(), Some("stale run reconciled"));
    }

    #[tokio::test]
    async fn fresh_running_run_is_left_alone() {
        let tracker = RunTracker::new(test_pool().await);
        let first = tracker.start(1).await.unwrap();
        let _second = tracker.start(1).await.unwrap();

        let runs = tracker.recent(10).await.unwrap();
        let first_row = runs.iter().find(|r| r.id == first).unwrap();
        assert_eq!(first_row.status, "running");
    }

    #[tokio::test]
    async fn double_finalize_keeps_first_outcome() {
        let tracker = RunTracker::new(test_pool().await);
        let run_id = tracker.start(1).await.unwrap();
        tracker.finish(run_id, &RunCounters::default()).await.unwrap();
        tracker.fail(run_id, &RunCounters::default(), "late error").await.unwrap();

        let runs = tracker.recent(1).await.unwrap();
        assert_eq!(runs[0].status, "completed");
        assert!(runs[0].error_message.is_none());
    }
}
