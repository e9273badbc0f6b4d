//! Driver abstraction: a uniform contract for realizing a job as a concrete
//! running instance on the local node, over a container runtime or a raw
//! process. The coordinator never touches a driver; only the agent does.

pub mod incus;
pub mod podman;
pub mod process;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{InstanceTelemetry, Job, JobState};

/// Label marking an instance as scheduler-managed. `list` only reports
/// instances carrying it.
pub const MANAGED_LABEL: &str = "open-scheduler.managed";
/// Label carrying the job id an instance belongs to.
pub const JOB_ID_LABEL: &str = "open-scheduler.job-id";

pub const INSTANCE_RUNNING: &str = "running";
pub const INSTANCE_STOPPED: &str = "stopped";
pub const INSTANCE_EXITED: &str = "exited";
pub const INSTANCE_FAILED: &str = "failed";

/// Options for fetching instance logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Last N lines; zero means everything.
    pub tail: u32,
    pub timestamps: bool,
}

/// Contract every workload backend implements.
///
/// - `run` enforces `job.timeout_seconds` as a deadline when it is positive.
/// - Every created instance carries the scheduler labels.
/// - `stop` is idempotent: stopping a non-existent instance succeeds.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Launch the job's workload; returns a driver-scoped instance id.
    async fn run(&self, job: &Job) -> Result<String>;

    async fn stop(&self, instance_id: &str) -> Result<()>;

    async fn restart(&self, instance_id: &str) -> Result<()>;

    async fn status(&self, instance_id: &str) -> Result<String>;

    async fn inspect(&self, instance_id: &str) -> Result<InstanceTelemetry>;

    /// All scheduler-managed instances on this node.
    async fn list(&self) -> Result<Vec<InstanceTelemetry>>;

    /// Captured output of an instance. Not every backend keeps logs.
    async fn logs(&self, instance_id: &str, opts: LogOptions) -> Result<String>;
}

/// Construct a driver by its registry name.
pub fn driver_for(name: &str) -> Result<Arc<dyn Driver>> {
    match name {
        "podman" => Ok(Arc::new(podman::PodmanDriver::new())),
        "incus" => Ok(Arc::new(incus::IncusDriver::new())),
        "process" => Ok(Arc::new(process::ProcessDriver::new())),
        other => Err(SchedulerError::UnknownDriver(other.to_string())),
    }
}

/// Driver registry keyed by name. Each backend is constructed once and
/// shared, so drivers that track instances in memory (the process backend)
/// present one view to every command.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: tokio::sync::Mutex<std::collections::HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Driver>> {
        let mut drivers = self.drivers.lock().await;
        if let Some(driver) = drivers.get(name) {
            return Ok(driver.clone());
        }
        let driver = driver_for(name)?;
        drivers.insert(name.to_string(), driver.clone());
        Ok(driver)
    }
}

/// Map a driver-reported instance status onto the job state machine.
pub fn map_instance_status(status: &str) -> JobState {
    match status {
        INSTANCE_RUNNING => JobState::Running,
        INSTANCE_EXITED => JobState::Completed,
        INSTANCE_FAILED => JobState::Failed,
        INSTANCE_STOPPED => JobState::Stopped,
        _ => JobState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_status_maps_to_job_state() {
        assert_eq!(map_instance_status("running"), JobState::Running);
        assert_eq!(map_instance_status("exited"), JobState::Completed);
        assert_eq!(map_instance_status("failed"), JobState::Failed);
        assert_eq!(map_instance_status("stopped"), JobState::Stopped);
        assert_eq!(map_instance_status("paused"), JobState::Unknown);
    }

    #[test]
    fn unknown_driver_is_rejected() {
        assert!(driver_for("podman").is_ok());
        assert!(driver_for("incus").is_ok());
        assert!(driver_for("process").is_ok());
        assert!(matches!(
            driver_for("firecracker"),
            Err(SchedulerError::UnknownDriver(_))
        ));
    }
}
