use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::sysinfo::collect_capacity;
use crate::agent::{AgentContext, Command};
use crate::driver::{
    self, Driver, DriverRegistry, INSTANCE_EXITED, INSTANCE_FAILED, INSTANCE_STOPPED, JOB_ID_LABEL,
};
use crate::error::{Result, SchedulerError};
use crate::grpc::CentroClient;
use crate::scheduler::job::Job;

/// Report liveness and current capacity every 15 seconds.
pub struct HeartbeatCommand {
    client: Arc<CentroClient>,
    metadata: HashMap<String, String>,
}

impl HeartbeatCommand {
    pub fn new(client: Arc<CentroClient>, metadata: HashMap<String, String>) -> Self {
        Self { client, metadata }
    }
}

#[async_trait]
impl Command for HeartbeatCommand {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<()> {
        let capacity = collect_capacity();
        tracing::debug!(
            node_id = %ctx.node_id,
            ram_mb = capacity.ram_mb,
            cpu_cores = capacity.cpu_cores,
            disk_mb = capacity.disk_mb,
            "Sending heartbeat"
        );

        let response = self
            .client
            .heartbeat(
                &ctx.node_id,
                &ctx.cluster_name,
                capacity,
                self.metadata.clone(),
            )
            .await?;

        if !response.acknowledged {
            return Err(SchedulerError::Internal(format!(
                "heartbeat rejected: {}",
                response.response_message
            )));
        }
        Ok(())
    }
}

/// Poll the coordinator for work every 15 seconds and launch whatever comes
/// back through the job's driver.
pub struct PollJobCommand {
    client: Arc<CentroClient>,
    drivers: Arc<DriverRegistry>,
    default_driver_type: String,
}

impl PollJobCommand {
    pub fn new(
        client: Arc<CentroClient>,
        drivers: Arc<DriverRegistry>,
        default_driver_type: impl Into<String>,
    ) -> Self {
        Self {
            client,
            drivers,
            default_driver_type: default_driver_type.into(),
        }
    }

    async fn handle_job(&self, ctx: &AgentContext, job: Job) -> Result<()> {
        tracing::info!(
            job_id = %job.job_id,
            job_name = %job.job_name,
            job_type = %job.job_type,
            clusters = ?job.selected_clusters,
            "Received job"
        );

        let driver_type = if job.driver_type.is_empty() {
            self.default_driver_type.as_str()
        } else {
            job.driver_type.as_str()
        };

        let driver = match self.drivers.get(driver_type).await {
            Ok(driver) => driver,
            Err(err) => {
                self.push_status(
                    ctx,
                    &job.job_id,
                    "failed",
                    &format!("Failed to create driver: {err}"),
                )
                .await;
                return Err(err);
            }
        };

        self.push_status(
            ctx,
            &job.job_id,
            "running",
            &format!("Starting job {} with driver {driver_type}", job.job_name),
        )
        .await;

        match driver.run(&job).await {
            Ok(instance_id) => {
                tracing::info!(job_id = %job.job_id, %instance_id, "Workload started");
                // Terminal transitions come from the status command, which
                // watches the driver.
                Ok(())
            }
            Err(err) => {
                self.push_status(
                    ctx,
                    &job.job_id,
                    "failed",
                    &format!("Job {} failed to start: {err}", job.job_name),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn push_status(&self, ctx: &AgentContext, job_id: &str, status: &str, detail: &str) {
        if let Err(err) = self
            .client
            .update_status(&ctx.node_id, job_id, status, detail)
            .await
        {
            tracing::warn!(job_id, error = %err, "Failed to push job status");
        }
    }
}

#[async_trait]
impl Command for PollJobCommand {
    fn name(&self) -> &'static str {
        "poll_job"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<()> {
        let response = self.client.get_job(&ctx.node_id).await?;

        if !response.job_available {
            tracing::debug!(node_id = %ctx.node_id, message = %response.response_message, "No job available");
            return Ok(());
        }

        let Some(job) = response.job else {
            return Err(SchedulerError::Internal(
                "job_available set but no job payload".into(),
            ));
        };

        self.handle_job(ctx, job.into()).await
    }
}

/// Map every managed instance to a job status and push it, every 15 seconds.
pub struct UpdateStatusCommand {
    client: Arc<CentroClient>,
    driver: Option<Arc<dyn Driver>>,
}

impl UpdateStatusCommand {
    pub fn new(client: Arc<CentroClient>, driver: Option<Arc<dyn Driver>>) -> Self {
        Self { client, driver }
    }
}

#[async_trait]
impl Command for UpdateStatusCommand {
    fn name(&self) -> &'static str {
        "update_status"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<()> {
        let Some(driver) = &self.driver else {
            tracing::debug!("No driver configured, skipping status updates");
            return Ok(());
        };

        let instances = driver.list().await?;
        tracing::debug!(count = instances.len(), "Instances to report");

        for instance in instances {
            let Some(job_id) = instance.labels.get(JOB_ID_LABEL).filter(|id| !id.is_empty())
            else {
                tracing::debug!(instance = %instance.instance_id, "Instance has no job-id label, skipping");
                continue;
            };

            let state = driver::map_instance_status(&instance.status);
            let mut message = format!(
                "Instance {} is {}",
                instance.instance_name, instance.status
            );
            if instance.status == INSTANCE_EXITED || instance.status == INSTANCE_FAILED {
                message.push_str(&format!(" (exit code: {})", instance.exit_code));
            }

            match self
                .client
                .update_status(&ctx.node_id, job_id, &state.to_string(), &message)
                .await
            {
                Ok(response) if !response.acknowledged => {
                    tracing::warn!(
                        job_id,
                        message = %response.response_message,
                        "Status update rejected"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(job_id, error = %err, "Failed to update status");
                }
            }
        }

        Ok(())
    }
}

/// Push instance telemetry for every managed instance, every 30 seconds.
pub struct SetInstanceTelemetryCommand {
    client: Arc<CentroClient>,
    driver: Option<Arc<dyn Driver>>,
}

impl SetInstanceTelemetryCommand {
    pub fn new(client: Arc<CentroClient>, driver: Option<Arc<dyn Driver>>) -> Self {
        Self { client, driver }
    }
}

#[async_trait]
impl Command for SetInstanceTelemetryCommand {
    fn name(&self) -> &'static str {
        "set_instance_data"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<()> {
        let Some(driver) = &self.driver else {
            tracing::debug!("No driver configured, skipping telemetry collection");
            return Ok(());
        };

        let instances = driver.list().await?;

        for instance in instances {
            let Some(job_id) = instance
                .labels
                .get(JOB_ID_LABEL)
                .filter(|id| !id.is_empty())
                .cloned()
            else {
                continue;
            };

            if let Err(err) = self
                .client
                .set_instance_data(&ctx.node_id, &job_id, instance)
                .await
            {
                tracing::warn!(job_id, error = %err, "Failed to push instance telemetry");
            }
        }

        Ok(())
    }
}

/// Stop and remove terminated instances every 60 seconds. Also runs once
/// more, with a bounded deadline, on agent shutdown.
pub struct CleanupInstancesCommand {
    driver: Option<Arc<dyn Driver>>,
}

impl CleanupInstancesCommand {
    pub fn new(driver: Option<Arc<dyn Driver>>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Command for CleanupInstancesCommand {
    fn name(&self) -> &'static str {
        "cleanup_instances"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, _ctx: &AgentContext) -> Result<()> {
        let Some(driver) = &self.driver else {
            tracing::debug!("No driver configured, skipping cleanup");
            return Ok(());
        };

        let instances = driver.list().await?;

        let mut terminated = 0usize;
        let mut cleaned = 0usize;
        for instance in &instances {
            if instance.status != INSTANCE_STOPPED && instance.status != INSTANCE_EXITED {
                continue;
            }
            terminated += 1;

            if let Err(err) = driver.stop(&instance.instance_id).await {
                tracing::warn!(
                    instance = %instance.instance_id,
                    error = %err,
                    "Failed to clean up instance"
                );
                continue;
            }
            cleaned += 1;
        }

        if terminated > 0 {
            tracing::info!(terminated, cleaned, "Cleanup pass complete");
        }
        Ok(())
    }
}
