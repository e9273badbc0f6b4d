use std::collections::HashMap;

use chrono::Utc;
use open_scheduler::scheduler::job::{Job, JobType, Resources};
use open_scheduler::scheduler::matcher::{evaluate, Rejection};
use open_scheduler::storage::registry::NodeInfo;

fn node(cluster: &str, cpu_cores: f32, ram_mb: f32, disk_mb: f32) -> NodeInfo {
    NodeInfo {
        node_id: "n1".to_string(),
        cluster_name: cluster.to_string(),
        last_heartbeat: Utc::now(),
        ram_mb,
        cpu_cores,
        disk_mb,
        metadata: HashMap::new(),
    }
}

fn job_with_resources(resources: Resources) -> Job {
    let mut job = Job::new("test", JobType::Batch);
    job.resource_requirements = Some(resources);
    job
}

#[test]
fn test_job_without_requirements_fits_anywhere() {
    let job = Job::new("tiny", JobType::Single);
    assert!(evaluate(&job, &node("default", 0.0, 0.0, 0.0)).is_ok());
}

#[test]
fn test_empty_cluster_selection_means_any_node() {
    let job = Job::new("anywhere", JobType::Batch);
    assert!(evaluate(&job, &node("obscure-cluster", 4.0, 2048.0, 0.0)).is_ok());
}

#[test]
fn test_cluster_mismatch_is_rejected() {
    let mut job = Job::new("pinned", JobType::Batch);
    job.selected_clusters = vec!["prod-a".to_string(), "prod-b".to_string()];

    match evaluate(&job, &node("staging", 4.0, 2048.0, 0.0)) {
        Err(Rejection::ClusterMismatch { node_cluster, .. }) => {
            assert_eq!(node_cluster, "staging");
        }
        other => panic!("expected cluster mismatch, got {other:?}"),
    }

    assert!(evaluate(&job, &node("prod-b", 4.0, 2048.0, 0.0)).is_ok());
}

#[test]
fn test_insufficient_cpu_is_rejected() {
    let job = job_with_resources(Resources {
        cpu_limit_cores: 8.0,
        ..Default::default()
    });

    match evaluate(&job, &node("default", 4.0, 4096.0, 0.0)) {
        Err(Rejection::InsufficientCpu {
            required,
            available,
        }) => {
            assert_eq!(required, 8.0);
            assert_eq!(available, 4.0);
        }
        other => panic!("expected insufficient cpu, got {other:?}"),
    }
}

#[test]
fn test_insufficient_ram_is_rejected() {
    let job = job_with_resources(Resources {
        memory_limit_mb: 4096.0,
        ..Default::default()
    });

    assert!(matches!(
        evaluate(&job, &node("default", 4.0, 2048.0, 0.0)),
        Err(Rejection::InsufficientRam { .. })
    ));
}

#[test]
fn test_reserved_values_used_when_limits_unset() {
    let job = job_with_resources(Resources {
        memory_reserved_mb: 512.0,
        cpu_reserved_cores: 2.0,
        ..Default::default()
    });

    assert!(evaluate(&job, &node("default", 2.0, 512.0, 0.0)).is_ok());
    assert!(matches!(
        evaluate(&job, &node("default", 1.0, 512.0, 0.0)),
        Err(Rejection::InsufficientCpu { .. })
    ));
}

#[test]
fn test_zero_disk_demand_ignores_node_disk() {
    let job = job_with_resources(Resources {
        cpu_limit_cores: 1.0,
        ..Default::default()
    });
    assert!(evaluate(&job, &node("default", 2.0, 1024.0, 0.0)).is_ok());
}

#[test]
fn test_rejection_reason_is_human_readable() {
    let mut job = Job::new("pinned", JobType::Batch);
    job.selected_clusters = vec!["alpha".to_string()];

    let reason = evaluate(&job, &node("beta", 1.0, 64.0, 0.0)).unwrap_err();
    let text = reason.to_string();
    assert!(text.contains("Cluster mismatch"));
    assert!(text.contains("beta"));
}
