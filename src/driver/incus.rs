use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::driver::{Driver, LogOptions, INSTANCE_RUNNING, JOB_ID_LABEL, MANAGED_LABEL};
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{InstanceTelemetry, Job};

const START_POLL_ATTEMPTS: u32 = 30;

/// One entry of `incus list --format json`.
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    config: HashMap<String, String>,
}

/// System-container backend driving the `incus` CLI. Scheduler labels are
/// carried as `user.*` config keys; `list` filters on the managed key.
#[derive(Debug, Clone, Default)]
pub struct IncusDriver;

impl IncusDriver {
    pub fn new() -> Self {
        Self
    }

    async fn incus(args: &[String]) -> Result<String> {
        let output = Command::new("incus")
            .args(args)
            .output()
            .await
            .map_err(|err| SchedulerError::Driver(format!("failed to invoke incus: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::Driver(format!(
                "incus {} failed: {}",
                args.first().map(String::as_str).unwrap_or(""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn user_label(key: &str) -> String {
        format!("user.{key}")
    }

    /// Pull the scheduler labels back out of the instance config.
    fn labels_from_config(config: &HashMap<String, String>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        for key in [MANAGED_LABEL, JOB_ID_LABEL] {
            if let Some(value) = config.get(&Self::user_label(key)) {
                labels.insert(key.to_string(), value.clone());
            }
        }
        labels
    }

    async fn list_entries() -> Result<Vec<ListEntry>> {
        let stdout = Self::incus(&[
            "list".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ])
        .await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn launch(&self, job: &Job) -> Result<String> {
        let spec = job.instance_config.as_ref().ok_or_else(|| {
            SchedulerError::Driver(format!("no instance config for job {}", job.job_name))
        })?;
        if spec.image.is_empty() {
            return Err(SchedulerError::Driver(format!(
                "no image specified for job {}",
                job.job_name
            )));
        }

        let instance_name = format!("osched-{}", job.job_id);

        let mut args = vec![
            "launch".to_string(),
            spec.image.clone(),
            instance_name.clone(),
            "--config".to_string(),
            format!("{}=true", Self::user_label(MANAGED_LABEL)),
            "--config".to_string(),
            format!("{}={}", Self::user_label(JOB_ID_LABEL), job.job_id),
        ];

        if let Some(res) = &job.resource_requirements {
            if res.cpu_limit_cores > 0.0 {
                args.push("--config".to_string());
                args.push(format!("limits.cpu={}", res.cpu_limit_cores.ceil() as u64));
            }
            if res.memory_limit_mb > 0.0 {
                args.push("--config".to_string());
                args.push(format!("limits.memory={}MiB", res.memory_limit_mb as u64));
            }
        }

        tracing::info!(job_id = %job.job_id, image = %spec.image, "Creating instance");
        Self::incus(&args).await?;

        if let Err(err) = self.wait_for_running(&instance_name).await {
            // The instance may still be starting; the status command will
            // observe whatever it settles into.
            tracing::warn!(instance_name, error = %err, "Instance slow to start");
        }

        Ok(instance_name)
    }

    async fn wait_for_running(&self, instance_name: &str) -> Result<()> {
        for _ in 0..START_POLL_ATTEMPTS {
            match self.status(instance_name).await {
                Ok(status) if status == INSTANCE_RUNNING => return Ok(()),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(instance_name, error = %err, "Status poll failed");
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(SchedulerError::Driver(format!(
            "timeout waiting for instance {instance_name} to start"
        )))
    }
}

#[async_trait]
impl Driver for IncusDriver {
    async fn run(&self, job: &Job) -> Result<String> {
        if job.timeout_seconds > 0 {
            let deadline = Duration::from_secs(job.timeout_seconds as u64);
            match tokio::time::timeout(deadline, self.launch(job)).await {
                Ok(result) => result,
                Err(_) => Err(SchedulerError::Driver(format!(
                    "launch timed out after {}s for job {}",
                    job.timeout_seconds, job.job_id
                ))),
            }
        } else {
            self.launch(job).await
        }
    }

    async fn stop(&self, instance_id: &str) -> Result<()> {
        let result = Self::incus(&[
            "delete".to_string(),
            instance_id.to_string(),
            "--force".to_string(),
        ])
        .await;

        match result {
            Ok(_) => {
                tracing::info!(instance_id, "Instance deleted");
                Ok(())
            }
            // Deleting a non-existent instance is a success.
            Err(SchedulerError::Driver(msg)) if msg.contains("not found") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn restart(&self, instance_id: &str) -> Result<()> {
        Self::incus(&["restart".to_string(), instance_id.to_string()]).await?;
        Ok(())
    }

    async fn status(&self, instance_id: &str) -> Result<String> {
        let entries = Self::list_entries().await?;
        entries
            .iter()
            .find(|entry| entry.name == instance_id)
            .map(|entry| entry.status.to_lowercase())
            .ok_or_else(|| SchedulerError::Driver(format!("instance not found: {instance_id}")))
    }

    async fn inspect(&self, instance_id: &str) -> Result<InstanceTelemetry> {
        let entries = Self::list_entries().await?;
        let entry = entries
            .into_iter()
            .find(|entry| entry.name == instance_id)
            .ok_or_else(|| SchedulerError::Driver(format!("instance not found: {instance_id}")))?;

        Ok(InstanceTelemetry {
            instance_id: entry.name.clone(),
            instance_name: entry.name,
            image: String::new(),
            status: entry.status.to_lowercase(),
            exit_code: 0,
            pid: 0,
            created: entry.created_at,
            started_at: String::new(),
            finished_at: String::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            labels: Self::labels_from_config(&entry.config),
        })
    }

    async fn logs(&self, instance_id: &str, opts: LogOptions) -> Result<String> {
        let output = Self::incus(&[
            "info".to_string(),
            instance_id.to_string(),
            "--show-log".to_string(),
        ])
        .await?;

        if opts.tail == 0 {
            return Ok(output);
        }
        let lines: Vec<&str> = output.lines().collect();
        let skip = lines.len().saturating_sub(opts.tail as usize);
        Ok(lines[skip..].join("\n"))
    }

    async fn list(&self) -> Result<Vec<InstanceTelemetry>> {
        let entries = Self::list_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| {
                entry
                    .config
                    .get(&Self::user_label(MANAGED_LABEL))
                    .map(|v| v == "true")
                    .unwrap_or(false)
            })
            .map(|entry| InstanceTelemetry {
                instance_id: entry.name.clone(),
                instance_name: entry.name.clone(),
                image: String::new(),
                status: entry.status.to_lowercase(),
                exit_code: 0,
                pid: 0,
                created: entry.created_at.clone(),
                started_at: String::new(),
                finished_at: String::new(),
                ports: Vec::new(),
                mounts: Vec::new(),
                labels: Self::labels_from_config(&entry.config),
            })
            .collect())
    }
}
