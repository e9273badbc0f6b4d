use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::driver::{
    Driver, LogOptions, INSTANCE_EXITED, INSTANCE_FAILED, JOB_ID_LABEL, MANAGED_LABEL,
};
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{InstanceTelemetry, Job};

/// One entry of `podman ps --format json`. Nullable fields stay optional;
/// podman emits `null` rather than omitting them.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Option<Vec<String>>,
    #[serde(rename = "Image", default)]
    image: Option<String>,
    #[serde(rename = "State", default)]
    state: Option<String>,
    #[serde(rename = "ExitCode", default)]
    exit_code: Option<i32>,
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
    #[serde(rename = "CreatedAt", default)]
    created_at: Option<String>,
}

/// Container backend driving the `podman` CLI. Containers carry the
/// scheduler labels; `list` filters on the managed label server-side.
#[derive(Debug, Clone, Default)]
pub struct PodmanDriver;

impl PodmanDriver {
    pub fn new() -> Self {
        Self
    }

    async fn podman(args: &[String]) -> Result<String> {
        let output = Command::new("podman")
            .args(args)
            .output()
            .await
            .map_err(|err| SchedulerError::Driver(format!("failed to invoke podman: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedulerError::Driver(format!(
                "podman {} failed: {}",
                args.first().map(String::as_str).unwrap_or(""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Exited containers with a nonzero code surface as failed.
    fn normalize_state(state: &str, exit_code: i32) -> String {
        if state == INSTANCE_EXITED && exit_code != 0 {
            INSTANCE_FAILED.to_string()
        } else {
            state.to_string()
        }
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

        tracing::info!(job_id = %job.job_id, image = %spec.image, "Pulling image");
        Self::podman(&["pull".to_string(), spec.image.clone()]).await?;

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            format!("osched-{}", job.job_id),
            "--label".to_string(),
            format!("{MANAGED_LABEL}=true"),
            "--label".to_string(),
            format!("{JOB_ID_LABEL}={}", job.job_id),
        ];

        if let Some(res) = &job.resource_requirements {
            if res.memory_limit_mb > 0.0 {
                args.push(format!("--memory={}m", res.memory_limit_mb as u64));
            }
            if res.cpu_limit_cores > 0.0 {
                args.push(format!("--cpus={}", res.cpu_limit_cores));
            }
        }

        for vol in &job.volumes {
            let mut mount = format!("{}:{}", vol.source, vol.target);
            if vol.read_only {
                mount.push_str(":ro");
            }
            args.push("-v".to_string());
            args.push(mount);
        }

        for (key, value) in &job.environment_variables {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(spec.image.clone());
        args.extend(spec.entrypoint.iter().cloned());
        args.extend(spec.args.iter().cloned());

        tracing::info!(job_id = %job.job_id, "Creating container");
        let stdout = Self::podman(&args).await?;
        Ok(stdout.trim().to_string())
    }
}

#[async_trait]
impl Driver for PodmanDriver {
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
        // --ignore makes removal of a missing container a success.
        Self::podman(&[
            "rm".to_string(),
            "--force".to_string(),
            "--ignore".to_string(),
            instance_id.to_string(),
        ])
        .await?;
        tracing::info!(instance_id, "Container removed");
        Ok(())
    }

    async fn restart(&self, instance_id: &str) -> Result<()> {
        Self::podman(&["restart".to_string(), instance_id.to_string()]).await?;
        Ok(())
    }

    async fn status(&self, instance_id: &str) -> Result<String> {
        let telemetry = self.inspect(instance_id).await?;
        Ok(telemetry.status)
    }

    async fn inspect(&self, instance_id: &str) -> Result<InstanceTelemetry> {
        let stdout =
            Self::podman(&["inspect".to_string(), instance_id.to_string()]).await?;
        let parsed: serde_json::Value = serde_json::from_str(&stdout)?;
        let detail = parsed
            .get(0)
            .ok_or_else(|| SchedulerError::Driver(format!("instance not found: {instance_id}")))?;

        let state = &detail["State"];
        let status = state["Status"].as_str().unwrap_or_default();
        let exit_code = state["ExitCode"].as_i64().unwrap_or_default() as i32;

        let labels = detail["Config"]["Labels"]
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let mounts = detail["Mounts"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let source = m["Source"].as_str()?;
                        let dest = m["Destination"].as_str()?;
                        Some(format!("{source}:{dest}"))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(InstanceTelemetry {
            instance_id: detail["Id"].as_str().unwrap_or(instance_id).to_string(),
            instance_name: detail["Name"].as_str().unwrap_or_default().to_string(),
            image: detail["ImageName"].as_str().unwrap_or_default().to_string(),
            status: Self::normalize_state(status, exit_code),
            exit_code,
            pid: state["Pid"].as_i64().unwrap_or_default() as i32,
            created: detail["Created"].as_str().unwrap_or_default().to_string(),
            started_at: state["StartedAt"].as_str().unwrap_or_default().to_string(),
            finished_at: state["FinishedAt"].as_str().unwrap_or_default().to_string(),
            ports: Vec::new(),
            mounts,
            labels,
        })
    }

    async fn logs(&self, instance_id: &str, opts: LogOptions) -> Result<String> {
        let mut args = vec!["logs".to_string()];
        if opts.tail > 0 {
            args.push("--tail".to_string());
            args.push(opts.tail.to_string());
        }
        if opts.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push(instance_id.to_string());
        Self::podman(&args).await
    }

    async fn list(&self) -> Result<Vec<InstanceTelemetry>> {
        let stdout = Self::podman(&[
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={MANAGED_LABEL}=true"),
            "--format".to_string(),
            "json".to_string(),
        ])
        .await?;

        let entries: Vec<PsEntry> = serde_json::from_str(&stdout)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let state = entry.state.unwrap_or_default();
                let exit_code = entry.exit_code.unwrap_or_default();
                InstanceTelemetry {
                    instance_id: entry.id,
                    instance_name: entry
                        .names
                        .unwrap_or_default()
                        .into_iter()
                        .next()
                        .unwrap_or_default(),
                    image: entry.image.unwrap_or_default(),
                    status: Self::normalize_state(&state, exit_code),
                    exit_code,
                    pid: 0,
                    created: entry.created_at.unwrap_or_default(),
                    started_at: String::new(),
                    finished_at: String::new(),
                    ports: Vec::new(),
                    mounts: Vec::new(),
                    labels: entry.labels.unwrap_or_default(),
                }
            })
            .collect())
    }
}
