use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};

use crate::driver::{
    Driver, LogOptions, INSTANCE_EXITED, INSTANCE_FAILED, INSTANCE_RUNNING, INSTANCE_STOPPED,
    JOB_ID_LABEL, MANAGED_LABEL,
};
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{InstanceTelemetry, Job};

struct ProcessEntry {
    job_id: String,
    pid: i32,
    status: String,
    exit_code: Option<i32>,
    command: String,
    started_at: String,
    finished_at: String,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Raw-process backend: jobs run as child processes of the agent. Instances
/// are keyed by job id; the table survives until cleanup removes terminal
/// entries, so status pushes can observe exits first.
#[derive(Clone, Default)]
pub struct ProcessDriver {
    processes: Arc<Mutex<HashMap<String, ProcessEntry>>>,
}

impl ProcessDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn telemetry(entry: &ProcessEntry) -> InstanceTelemetry {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(JOB_ID_LABEL.to_string(), entry.job_id.clone());

        InstanceTelemetry {
            instance_id: entry.job_id.clone(),
            instance_name: entry.command.clone(),
            image: String::new(),
            status: entry.status.clone(),
            exit_code: entry.exit_code.unwrap_or_default(),
            pid: entry.pid,
            created: entry.started_at.clone(),
            started_at: entry.started_at.clone(),
            finished_at: entry.finished_at.clone(),
            ports: Vec::new(),
            mounts: Vec::new(),
            labels,
        }
    }
}

#[async_trait]
impl Driver for ProcessDriver {
    async fn run(&self, job: &Job) -> Result<String> {
        let spec = job.instance_config.as_ref().ok_or_else(|| {
            SchedulerError::Driver(format!("no instance config for job {}", job.job_name))
        })?;
        let Some((program, rest)) = spec.entrypoint.split_first() else {
            return Err(SchedulerError::Driver(format!(
                "no entrypoint specified for job {}",
                job.job_name
            )));
        };

        let mut command = Command::new(program);
        command
            .args(rest)
            .args(&spec.args)
            .envs(&job.environment_variables)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        tracing::info!(job_id = %job.job_id, program, "Starting process");
        let mut child = command
            .spawn()
            .map_err(|err| SchedulerError::Driver(format!("failed to start command: {err}")))?;

        let pid = child.id().map(|id| id as i32).unwrap_or_default();
        let (kill_tx, mut kill_rx) = oneshot::channel();

        {
            let mut processes = self.processes.lock().await;
            processes.insert(
                job.job_id.clone(),
                ProcessEntry {
                    job_id: job.job_id.clone(),
                    pid,
                    status: INSTANCE_RUNNING.to_string(),
                    exit_code: None,
                    command: program.clone(),
                    started_at: Utc::now().to_rfc3339(),
                    finished_at: String::new(),
                    kill_tx: Some(kill_tx),
                },
            );
        }

        tracing::info!(job_id = %job.job_id, pid, "Process started");

        // Reap the child and record its outcome; enforce the job timeout as
        // a deadline when one is set.
        let processes = self.processes.clone();
        let job_id = job.job_id.clone();
        let timeout_secs = job.timeout_seconds;
        tokio::spawn(async move {
            let deadline = if timeout_secs > 0 {
                Duration::from_secs(timeout_secs as u64)
            } else {
                Duration::MAX
            };

            let (status, exit_code) = tokio::select! {
                result = child.wait() => match result {
                    Ok(exit) if exit.success() => (INSTANCE_EXITED, exit.code()),
                    Ok(exit) => (INSTANCE_FAILED, exit.code()),
                    Err(err) => {
                        tracing::error!(job_id = %job_id, error = %err, "Failed to reap process");
                        (INSTANCE_FAILED, None)
                    }
                },
                _ = &mut kill_rx => {
                    let _ = child.kill().await;
                    (INSTANCE_STOPPED, None)
                }
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(job_id = %job_id, timeout_secs, "Process hit its deadline");
                    let _ = child.kill().await;
                    (INSTANCE_FAILED, None)
                }
            };

            let mut processes = processes.lock().await;
            if let Some(entry) = processes.get_mut(&job_id) {
                entry.status = status.to_string();
                entry.exit_code = exit_code;
                entry.finished_at = Utc::now().to_rfc3339();
                entry.kill_tx = None;
            }
            tracing::info!(job_id = %job_id, status, exit_code, "Process finished");
        });

        Ok(job.job_id.clone())
    }

    async fn stop(&self, instance_id: &str) -> Result<()> {
        let mut processes = self.processes.lock().await;
        // Stopping an unknown instance is a success.
        if let Some(mut entry) = processes.remove(instance_id) {
            if let Some(kill_tx) = entry.kill_tx.take() {
                let _ = kill_tx.send(());
            }
            tracing::info!(instance_id, "Process instance removed");
        }
        Ok(())
    }

    async fn restart(&self, _instance_id: &str) -> Result<()> {
        Err(SchedulerError::Driver(
            "restart is not supported for raw processes".into(),
        ))
    }

    async fn status(&self, instance_id: &str) -> Result<String> {
        let processes = self.processes.lock().await;
        Ok(processes
            .get(instance_id)
            .map(|entry| entry.status.clone())
            .unwrap_or_else(|| "unknown".to_string()))
    }

    async fn inspect(&self, instance_id: &str) -> Result<InstanceTelemetry> {
        let processes = self.processes.lock().await;
        processes
            .get(instance_id)
            .map(Self::telemetry)
            .ok_or_else(|| SchedulerError::Driver(format!("instance not found: {instance_id}")))
    }

    async fn list(&self) -> Result<Vec<InstanceTelemetry>> {
        let processes = self.processes.lock().await;
        Ok(processes.values().map(Self::telemetry).collect())
    }

    async fn logs(&self, _instance_id: &str, _opts: LogOptions) -> Result<String> {
        // Child stdio is discarded; raw processes keep no logs.
        Err(SchedulerError::Driver(
            "logs are not supported for raw processes".into(),
        ))
    }
}
