use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::scheduler::job::{InstanceTelemetry, Job, JobRecord};
use crate::storage::kv::{GetOptions, KvStore, SortOrder};
use crate::storage::{
    FAIL_QUEUE_PREFIX, INSTANCE_DATA_PREFIX, JOB_ACTIVE_PREFIX, JOB_EVENTS_PREFIX,
    JOB_HISTORY_PREFIX, JOB_QUEUE_PREFIX,
};

/// The four job collections plus the per-job event log and telemetry, all
/// keyed by job id under the `/centro/jobs/` keyspace.
#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KvStore>,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    // --- queue ---

    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        let key = format!("{JOB_QUEUE_PREFIX}{}", job.job_id);
        self.kv.put(&key, serde_json::to_vec(job)?).await
    }

    /// Remove and return the job under the lexicographically smallest queue
    /// key. The exact key/value pair is removed with a compare-and-delete so
    /// that of two concurrent callers observing the same head, exactly one
    /// wins; the loser moves on to the next head.
    pub async fn dequeue_head(&self) -> Result<Option<Job>> {
        loop {
            let head = self
                .kv
                .get_prefix(
                    JOB_QUEUE_PREFIX,
                    GetOptions::sorted(SortOrder::Ascending).with_limit(1),
                )
                .await?;

            let Some((key, value)) = head.into_iter().next() else {
                return Ok(None);
            };

            let job: Job = match serde_json::from_slice(&value) {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(key, error = %err, "Dropping undecodable queue entry");
                    self.kv.delete(&key).await?;
                    continue;
                }
            };

            if self.kv.compare_and_delete(&key, &value).await? {
                return Ok(Some(job));
            }
            // Lost the race for this head; try the next one.
        }
    }

    pub async fn get_queued(&self, job_id: &str) -> Result<Option<Job>> {
        self.get_job(&format!("{JOB_QUEUE_PREFIX}{job_id}")).await
    }

    pub async fn all_queued(&self) -> Result<Vec<Job>> {
        let entries = self
            .kv
            .get_prefix(JOB_QUEUE_PREFIX, GetOptions::sorted(SortOrder::Ascending))
            .await?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<Job>(&value) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(key, error = %err, "Skipping undecodable queue entry");
                }
            }
        }
        Ok(jobs)
    }

    pub async fn queue_len(&self) -> Result<usize> {
        self.kv.count_prefix(JOB_QUEUE_PREFIX).await
    }

    // --- fail-queue ---

    pub async fn enqueue_failed(&self, job: &Job) -> Result<()> {
        let key = format!("{FAIL_QUEUE_PREFIX}{}", job.job_id);
        self.kv.put(&key, serde_json::to_vec(job)?).await
    }

    pub async fn get_failed(&self, job_id: &str) -> Result<Option<Job>> {
        self.get_job(&format!("{FAIL_QUEUE_PREFIX}{job_id}")).await
    }

    pub async fn all_failed(&self) -> Result<HashMap<String, Job>> {
        let entries = self
            .kv
            .get_prefix(FAIL_QUEUE_PREFIX, GetOptions::default())
            .await?;
        let mut jobs = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<Job>(&value) {
                Ok(job) => {
                    jobs.insert(job.job_id.clone(), job);
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "Skipping undecodable fail-queue entry");
                }
            }
        }
        Ok(jobs)
    }

    pub async fn delete_failed(&self, job_id: &str) -> Result<()> {
        self.kv
            .delete_prefix(&format!("{FAIL_QUEUE_PREFIX}{job_id}"))
            .await
    }

    // --- active ---

    pub async fn put_active(&self, job_id: &str, record: &JobRecord) -> Result<()> {
        let key = format!("{JOB_ACTIVE_PREFIX}{job_id}");
        self.kv.put(&key, serde_json::to_vec(record)?).await
    }

    pub async fn get_active(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.get_record(&format!("{JOB_ACTIVE_PREFIX}{job_id}")).await
    }

    pub async fn all_active(&self) -> Result<HashMap<String, JobRecord>> {
        self.all_records(JOB_ACTIVE_PREFIX).await
    }

    pub async fn delete_active(&self, job_id: &str) -> Result<()> {
        self.kv.delete(&format!("{JOB_ACTIVE_PREFIX}{job_id}")).await
    }

    pub async fn active_len(&self) -> Result<usize> {
        self.kv.count_prefix(JOB_ACTIVE_PREFIX).await
    }

    // --- history ---

    pub async fn put_history(&self, job_id: &str, record: &JobRecord) -> Result<()> {
        let key = format!("{JOB_HISTORY_PREFIX}{job_id}");
        self.kv.put(&key, serde_json::to_vec(record)?).await
    }

    pub async fn get_history(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.get_record(&format!("{JOB_HISTORY_PREFIX}{job_id}")).await
    }

    pub async fn all_history(&self) -> Result<HashMap<String, JobRecord>> {
        self.all_records(JOB_HISTORY_PREFIX).await
    }

    pub async fn history_len(&self) -> Result<usize> {
        self.kv.count_prefix(JOB_HISTORY_PREFIX).await
    }

    // --- events ---

    /// Append `[RFC3339] message` to the job's event log, keyed by a
    /// nanosecond timestamp so events read back in order. The write is
    /// suppressed when the most recent event carries the same message
    /// (timestamp stripped); a failed read of the previous event fails open
    /// and the event is written.
    pub async fn append_event(&self, job_id: &str, message: &str) -> Result<()> {
        let prefix = format!("{JOB_EVENTS_PREFIX}{job_id}/");

        let previous = self
            .kv
            .get_prefix(
                &prefix,
                GetOptions::sorted(SortOrder::Descending).with_limit(1),
            )
            .await;
        if let Ok(entries) = previous {
            if let Some((_, value)) = entries.first() {
                let prev = String::from_utf8_lossy(value);
                if strip_event_timestamp(&prev) == message {
                    return Ok(());
                }
            }
        }

        let now = Utc::now();
        let event = format!("[{}] {message}", now.to_rfc3339());
        let key = format!("{prefix}{}", now.timestamp_nanos_opt().unwrap_or_default());
        self.kv.put(&key, event.into_bytes()).await
    }

    pub async fn events(&self, job_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{JOB_EVENTS_PREFIX}{job_id}/");
        let entries = self
            .kv
            .get_prefix(&prefix, GetOptions::sorted(SortOrder::Ascending))
            .await?;
        Ok(entries
            .into_iter()
            .map(|(_, value)| String::from_utf8_lossy(&value).into_owned())
            .collect())
    }

    // --- telemetry ---

    pub async fn put_telemetry(&self, job_id: &str, data: &InstanceTelemetry) -> Result<()> {
        let key = format!("{INSTANCE_DATA_PREFIX}{job_id}");
        self.kv.put(&key, serde_json::to_vec(data)?).await
    }

    pub async fn get_telemetry(&self, job_id: &str) -> Result<Option<InstanceTelemetry>> {
        match self.kv.get(&format!("{INSTANCE_DATA_PREFIX}{job_id}")).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// All telemetry snapshots, with the job id recovered from the key.
    pub async fn list_telemetry(&self) -> Result<Vec<(String, InstanceTelemetry)>> {
        let entries = self
            .kv
            .get_prefix(INSTANCE_DATA_PREFIX, GetOptions::default())
            .await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<InstanceTelemetry>(&value) {
                Ok(data) => {
                    let job_id = key.trim_start_matches(INSTANCE_DATA_PREFIX).to_string();
                    out.push((job_id, data));
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "Skipping undecodable telemetry record");
                }
            }
        }
        Ok(out)
    }

    // --- helpers ---

    async fn get_job(&self, key: &str) -> Result<Option<Job>> {
        match self.kv.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn get_record(&self, key: &str) -> Result<Option<JobRecord>> {
        match self.kv.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn all_records(&self, prefix: &str) -> Result<HashMap<String, JobRecord>> {
        let entries = self.kv.get_prefix(prefix, GetOptions::default()).await?;
        let mut records = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<JobRecord>(&value) {
                Ok(record) => {
                    let job_id = key.trim_start_matches(prefix).to_string();
                    records.insert(job_id, record);
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "Skipping undecodable job record");
                }
            }
        }
        Ok(records)
    }
}

/// Drop the leading `[timestamp] ` from an event line, leaving the message.
fn strip_event_timestamp(event: &str) -> &str {
    match event.find("] ") {
        Some(idx) => &event[idx + 2..],
        None => event,
    }
}
