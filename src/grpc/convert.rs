//! Conversions between wire messages and the domain model. KV payloads are
//! always the domain types; proto messages exist only at the RPC boundary.

use crate::proto;
use crate::scheduler::job::{
    InstanceSpec, InstanceTelemetry, Job, JobType, Resources, VolumeMount,
};

impl From<Job> for proto::Job {
    fn from(job: Job) -> Self {
        proto::Job {
            job_id: job.job_id,
            job_name: job.job_name,
            job_type: job.job_type.to_string(),
            selected_clusters: job.selected_clusters,
            driver_type: job.driver_type,
            workload_type: job.workload_type,
            instance_config: job.instance_config.map(|spec| proto::InstanceSpec {
                image: spec.image,
                entrypoint: spec.entrypoint,
                args: spec.args,
                driver_options: spec.driver_options,
            }),
            resource_requirements: job.resource_requirements.map(|res| proto::Resources {
                memory_limit_mb: res.memory_limit_mb,
                memory_reserved_mb: res.memory_reserved_mb,
                cpu_limit_cores: res.cpu_limit_cores,
                cpu_reserved_cores: res.cpu_reserved_cores,
            }),
            volumes: job
                .volumes
                .into_iter()
                .map(|vol| proto::VolumeMount {
                    source: vol.source,
                    target: vol.target,
                    read_only: vol.read_only,
                })
                .collect(),
            environment_variables: job.environment_variables,
            job_metadata: job.job_metadata,
            timeout_seconds: job.timeout_seconds,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            last_retry_time: job.last_retry_time,
        }
    }
}

impl From<proto::Job> for Job {
    fn from(job: proto::Job) -> Self {
        Job {
            job_id: job.job_id,
            job_name: job.job_name,
            job_type: job.job_type.parse().unwrap_or(JobType::Single),
            selected_clusters: job.selected_clusters,
            driver_type: job.driver_type,
            workload_type: job.workload_type,
            instance_config: job.instance_config.map(|spec| InstanceSpec {
                image: spec.image,
                entrypoint: spec.entrypoint,
                args: spec.args,
                driver_options: spec.driver_options,
            }),
            resource_requirements: job.resource_requirements.map(|res| Resources {
                memory_limit_mb: res.memory_limit_mb,
                memory_reserved_mb: res.memory_reserved_mb,
                cpu_limit_cores: res.cpu_limit_cores,
                cpu_reserved_cores: res.cpu_reserved_cores,
            }),
            volumes: job
                .volumes
                .into_iter()
                .map(|vol| VolumeMount {
                    source: vol.source,
                    target: vol.target,
                    read_only: vol.read_only,
                })
                .collect(),
            environment_variables: job.environment_variables,
            job_metadata: job.job_metadata,
            timeout_seconds: job.timeout_seconds,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            last_retry_time: job.last_retry_time,
        }
    }
}

impl From<InstanceTelemetry> for proto::InstanceData {
    fn from(data: InstanceTelemetry) -> Self {
        proto::InstanceData {
            instance_id: data.instance_id,
            instance_name: data.instance_name,
            image: data.image,
            status: data.status,
            exit_code: data.exit_code,
            pid: data.pid,
            created: data.created,
            started_at: data.started_at,
            finished_at: data.finished_at,
            ports: data.ports,
            mounts: data.mounts,
            labels: data.labels,
        }
    }
}

impl From<proto::InstanceData> for InstanceTelemetry {
    fn from(data: proto::InstanceData) -> Self {
        InstanceTelemetry {
            instance_id: data.instance_id,
            instance_name: data.instance_name,
            image: data.image,
            status: data.status,
            exit_code: data.exit_code,
            pid: data.pid,
            created: data.created,
            started_at: data.started_at,
            finished_at: data.finished_at,
            ports: data.ports,
            mounts: data.mounts,
            labels: data.labels,
        }
    }
}
