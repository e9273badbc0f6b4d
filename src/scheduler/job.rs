use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for newly submitted jobs. Zero means unlimited.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[default]
    Single,
    Service,
    Batch,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Single => write!(f, "single"),
            JobType::Service => write!(f, "service"),
            JobType::Batch => write!(f, "batch"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(JobType::Single),
            "service" => Ok(JobType::Service),
            "batch" => Ok(JobType::Batch),
            other => Err(format!("invalid job type: {other}")),
        }
    }
}

/// State label carried by an assignment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Assigned,
    Running,
    Completed,
    Failed,
    Stopped,
    Unknown,
}

impl JobState {
    /// Terminal states move the record from active to history.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Lenient parse for wire strings; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "assigned" => JobState::Assigned,
            "running" => JobState::Running,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "stopped" => JobState::Stopped,
            _ => JobState::Unknown,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Assigned => write!(f, "assigned"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Stopped => write!(f, "stopped"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub memory_limit_mb: f32,
    #[serde(default)]
    pub memory_reserved_mb: f32,
    #[serde(default)]
    pub cpu_limit_cores: f32,
    #[serde(default)]
    pub cpu_reserved_cores: f32,
}

/// Effective demand derived from a job's resource requirements.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceDemand {
    pub cpu_cores: f32,
    pub ram_mb: f32,
    pub disk_mb: f32,
}

impl Resources {
    /// Limit values win when set, otherwise reserved values, otherwise zero.
    /// Disk demand is not part of the job spec today and stays zero.
    pub fn demand(&self) -> ResourceDemand {
        let cpu_cores = if self.cpu_limit_cores > 0.0 {
            self.cpu_limit_cores
        } else if self.cpu_reserved_cores > 0.0 {
            self.cpu_reserved_cores
        } else {
            0.0
        };
        let ram_mb = if self.memory_limit_mb > 0.0 {
            self.memory_limit_mb
        } else if self.memory_reserved_mb > 0.0 {
            self.memory_reserved_mb
        } else {
            0.0
        };
        ResourceDemand {
            cpu_cores,
            ram_mb,
            disk_mb: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub image: String,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub driver_options: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// An immutable workload spec plus mutable scheduling counters. At any
/// instant a job lives in exactly one of queue, active, fail-queue, or
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_name: String,
    #[serde(default)]
    pub job_type: JobType,
    #[serde(default)]
    pub selected_clusters: Vec<String>,
    #[serde(default)]
    pub driver_type: String,
    #[serde(default)]
    pub workload_type: String,
    #[serde(default)]
    pub instance_config: Option<InstanceSpec>,
    #[serde(default)]
    pub resource_requirements: Option<Resources>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    #[serde(default)]
    pub job_metadata: HashMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub last_retry_time: i64,
}

impl Job {
    pub fn new(job_name: impl Into<String>, job_type: JobType) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_name: job_name.into(),
            job_type,
            selected_clusters: Vec::new(),
            driver_type: String::new(),
            workload_type: String::new(),
            instance_config: None,
            resource_requirements: None,
            volumes: Vec::new(),
            environment_variables: HashMap::new(),
            job_metadata: HashMap::new(),
            timeout_seconds: 0,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_retry_time: 0,
        }
    }

    /// Effective resource demand; absent requirements demand nothing.
    pub fn demand(&self) -> ResourceDemand {
        self.resource_requirements
            .as_ref()
            .map(Resources::demand)
            .unwrap_or_default()
    }

    /// Whether the retry budget is spent. A zero budget never exhausts.
    pub fn retries_exhausted(&self) -> bool {
        self.max_retries > 0 && self.retry_count >= self.max_retries
    }
}

/// Assignment record for an active or historical job. History snapshots the
/// embedded job at transition time; historical records are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Option<Job>,
    pub node_id: String,
    pub state: JobState,
    #[serde(default)]
    pub detail: String,
    pub claimed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn assigned(job: Job, node_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job: Some(job),
            node_id: node_id.into(),
            state: JobState::Assigned,
            detail: String::new(),
            claimed_at: now,
            updated_at: now,
        }
    }
}

/// Snapshot of a concrete running workload as reported by a driver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceTelemetry {
    pub instance_id: String,
    pub instance_name: String,
    #[serde(default)]
    pub image: String,
    pub status: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub pid: i32,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub finished_at: String,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}
