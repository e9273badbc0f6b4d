use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::job::{JobRecord, JobState};
use crate::storage::JobStore;

/// An assigned job must start running within this window.
pub const ASSIGNED_TIMEOUT_SECS: i64 = 5 * 60;
/// A running job must report status within this window.
pub const RUNNING_TIMEOUT_SECS: i64 = 30 * 60;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic reconciliation: promote fail-queue jobs back into the queue
/// (or exhaust them into history), and unwedge stale active assignments.
/// Both passes are idempotent and skip records they cannot decode.
pub struct Reconciler {
    store: JobStore,
    interval: Duration,
}

impl Reconciler {
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(store: JobStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Reconciler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick; reconcile on the cadence, not at startup

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciler stopped");
                    return;
                }
            }
        }
    }

    /// One reconciliation pass. Errors are logged, never fatal to the loop;
    /// the store heals between ticks.
    pub async fn run_once(&self) {
        if let Err(err) = self.promote_failed_retries().await {
            tracing::error!(error = %err, "Retry promotion failed");
        }
        if let Err(err) = self.check_stale_jobs().await {
            tracing::error!(error = %err, "Stale job check failed");
        }
    }

    /// Move each fail-queue job back into the queue with an incremented
    /// retry count, or into history once the retry budget is spent
    /// (`max_retries == 0` means no budget, retry forever).
    pub async fn promote_failed_retries(&self) -> Result<()> {
        let failed = self.store.all_failed().await?;

        for (job_id, mut job) in failed {
            if job.retries_exhausted() {
                tracing::info!(
                    job_id,
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    "Job exceeded max retries, moving to history"
                );

                let now = Utc::now();
                let max_retries = job.max_retries;
                let retry_count = job.retry_count;
                let record = JobRecord {
                    job: Some(job),
                    node_id: String::new(),
                    state: JobState::Failed,
                    detail: format!("Job exceeded maximum retry limit ({max_retries} retries)"),
                    claimed_at: now,
                    updated_at: now,
                };

                if let Err(err) = self.store.put_history(&job_id, &record).await {
                    tracing::error!(job_id, error = %err, "Failed to write exhausted job to history");
                    continue;
                }
                if let Err(err) = self
                    .store
                    .append_event(
                        &job_id,
                        &format!(
                            "Job permanently failed after {retry_count} retries (max: {max_retries})"
                        ),
                    )
                    .await
                {
                    tracing::error!(job_id, error = %err, "Failed to save exhaustion event");
                }
                if let Err(err) = self.store.delete_failed(&job_id).await {
                    tracing::error!(job_id, error = %err, "Failed to delete exhausted job");
                }
                continue;
            }

            job.retry_count += 1;
            job.last_retry_time = Utc::now().timestamp();
            tracing::info!(
                job_id,
                attempt = job.retry_count,
                max_retries = job.max_retries,
                "Retrying failed job"
            );

            if let Err(err) = self.store.enqueue(&job).await {
                tracing::error!(job_id, error = %err, "Failed to re-queue job");
                continue;
            }
            if let Err(err) = self
                .store
                .append_event(&job_id, &format!("Retrying job (attempt {})", job.retry_count))
                .await
            {
                tracing::error!(job_id, error = %err, "Failed to save retry event");
            }
            if let Err(err) = self.store.delete_failed(&job_id).await {
                tracing::error!(job_id, error = %err, "Failed to delete promoted job");
            }
        }

        Ok(())
    }

    /// Detect active jobs stuck in `assigned` or `running` without updates
    /// and move them to the fail-queue. The record is re-read immediately
    /// before acting so a status write that lands between snapshot and
    /// decision wins.
    pub async fn check_stale_jobs(&self) -> Result<()> {
        let active = self.store.all_active().await?;

        for (job_id, _) in active {
            // Fresh read: the snapshot may be stale itself.
            let Some(record) = self.store.get_active(&job_id).await? else {
                continue;
            };

            let Some(reason) = stale_reason(&record) else {
                continue;
            };

            tracing::warn!(job_id, reason, "Detected stale job");

            if let Err(err) = self
                .store
                .append_event(&job_id, &format!("Job detected as stale: {reason}"))
                .await
            {
                tracing::error!(job_id, error = %err, "Failed to save stale job event");
            }

            if let Some(job) = &record.job {
                if let Err(err) = self.store.enqueue_failed(job).await {
                    tracing::error!(job_id, error = %err, "Failed to park stale job for retry");
                    continue;
                }
            }

            if let Err(err) = self.store.delete_active(&job_id).await {
                tracing::error!(job_id, error = %err, "Failed to delete stale active job");
            }
        }

        Ok(())
    }
}

fn stale_reason(record: &JobRecord) -> Option<String> {
    let since_update = (Utc::now() - record.updated_at).num_seconds();
    match record.state {
        JobState::Assigned if since_update > ASSIGNED_TIMEOUT_SECS => Some(format!(
            "Job assigned to node {} but never started running (timeout: 5m)",
            record.node_id
        )),
        JobState::Running if since_update > RUNNING_TIMEOUT_SECS => Some(format!(
            "Job running on node {} with no status updates (timeout: 30m)",
            record.node_id
        )),
        _ => None,
    }
}
