use std::collections::HashMap;
use std::sync::Arc;

use tonic::Request;

use open_scheduler::grpc::CentroService;
use open_scheduler::proto::centro_scheduler_server::CentroScheduler;
use open_scheduler::proto::{
    HeartbeatRequest, InstanceData, SetInstanceDataRequest, UpdateStatusRequest,
};
use open_scheduler::scheduler::job::{Job, JobRecord, JobState, JobType};
use open_scheduler::storage::{JobStore, MemoryKv, NodeRegistry};

fn setup() -> (JobStore, NodeRegistry, CentroService) {
    let kv = Arc::new(MemoryKv::new());
    let store = JobStore::new(kv.clone());
    let registry = NodeRegistry::new(kv);
    let service = CentroService::new(store.clone(), registry.clone());
    (store, registry, service)
}

fn status_request(node_id: &str, job_id: &str, status: &str, detail: &str) -> Request<UpdateStatusRequest> {
    Request::new(UpdateStatusRequest {
        node_id: node_id.to_string(),
        job_id: job_id.to_string(),
        job_status: status.to_string(),
        status_message: detail.to_string(),
        timestamp: 0,
    })
}

fn heartbeat_request(node_id: &str, cluster: &str) -> Request<HeartbeatRequest> {
    Request::new(HeartbeatRequest {
        node_id: node_id.to_string(),
        timestamp: 0,
        available_memory_mb: 2048.0,
        available_cpu_cores: 4.0,
        available_disk_mb: 10240.0,
        cluster_name: cluster.to_string(),
        node_metadata: HashMap::new(),
    })
}

#[tokio::test]
async fn test_update_status_requires_node_and_job_ids() {
    let (_store, _registry, service) = setup();

    let resp = service
        .update_status(status_request("", "j1", "running", ""))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.acknowledged);
    assert_eq!(resp.response_message, "node_id is required");

    let resp = service
        .update_status(status_request("n1", "", "running", ""))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.acknowledged);
    assert_eq!(resp.response_message, "job_id is required");
}

#[tokio::test]
async fn test_non_terminal_update_stays_active() {
    let (store, _registry, service) = setup();

    let job = Job::new("svc", JobType::Service);
    let job_id = job.job_id.clone();
    store
        .put_active(&job_id, &JobRecord::assigned(job, "n1"))
        .await
        .unwrap();

    let resp = service
        .update_status(status_request("n1", &job_id, "running", "Instance up"))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.acknowledged);

    let record = store.get_active(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Running);
    assert_eq!(record.detail, "Instance up");
    assert!(store.get_history(&job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminal_update_moves_record_to_history() {
    let (store, _registry, service) = setup();

    let job = Job::new("batch", JobType::Batch);
    let job_id = job.job_id.clone();
    store
        .put_active(&job_id, &JobRecord::assigned(job, "n1"))
        .await
        .unwrap();

    service
        .update_status(status_request("n1", &job_id, "running", "working"))
        .await
        .unwrap();
    service
        .update_status(status_request("n1", &job_id, "completed", "exit 0"))
        .await
        .unwrap();

    assert!(store.get_active(&job_id).await.unwrap().is_none());
    let record = store.get_history(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.detail, "exit 0");
    // History keeps the job snapshot taken at assignment.
    assert!(record.job.is_some());
}

#[tokio::test]
async fn test_duplicate_status_updates_produce_one_event() {
    let (store, _registry, service) = setup();

    let job = Job::new("noisy", JobType::Service);
    let job_id = job.job_id.clone();
    store
        .put_active(&job_id, &JobRecord::assigned(job, "n1"))
        .await
        .unwrap();

    for _ in 0..2 {
        service
            .update_status(status_request("n1", &job_id, "running", "Instance x is running"))
            .await
            .unwrap();
    }

    let status_events: Vec<String> = store
        .events(&job_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.contains("Status: running"))
        .collect();
    assert_eq!(status_events.len(), 1);
}

#[tokio::test]
async fn test_late_status_synthesizes_assignment_record() {
    let (store, _registry, service) = setup();

    let resp = service
        .update_status(status_request("n7", "orphan-job", "running", "late"))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.acknowledged);

    let record = store.get_active("orphan-job").await.unwrap().unwrap();
    assert_eq!(record.node_id, "n7");
    assert_eq!(record.state, JobState::Running);
    assert!(record.job.is_none());
}

#[tokio::test]
async fn test_failed_terminal_status_from_synthesized_record() {
    let (store, _registry, service) = setup();

    service
        .update_status(status_request("n1", "gone-job", "failed", "exit code: 2"))
        .await
        .unwrap();

    assert!(store.get_active("gone-job").await.unwrap().is_none());
    let record = store.get_history("gone-job").await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failed);
}

#[tokio::test]
async fn test_heartbeat_registers_and_refreshes_node() {
    let (_store, registry, service) = setup();

    let resp = service
        .heartbeat(heartbeat_request("n1", "cluster-a"))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.acknowledged);

    let node = registry.get_node("n1").await.unwrap().unwrap();
    assert_eq!(node.cluster_name, "cluster-a");
    assert_eq!(node.cpu_cores, 4.0);
    assert!(node.is_healthy());
    let first_beat = node.last_heartbeat;

    // Heartbeats double as capacity updates; last_heartbeat never regresses.
    let resp = service
        .heartbeat(heartbeat_request("n1", "cluster-b"))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.acknowledged);

    let node = registry.get_node("n1").await.unwrap().unwrap();
    assert_eq!(node.cluster_name, "cluster-b");
    assert!(node.last_heartbeat >= first_beat);
}

#[tokio::test]
async fn test_heartbeat_requires_node_id() {
    let (_store, _registry, service) = setup();

    let resp = service
        .heartbeat(heartbeat_request("", "cluster-a"))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.acknowledged);
    assert_eq!(resp.response_message, "node_id is required");
}

#[tokio::test]
async fn test_set_instance_data_validates_and_persists() {
    let (store, _registry, service) = setup();

    let resp = service
        .set_instance_data(Request::new(SetInstanceDataRequest {
            node_id: "n1".to_string(),
            job_id: "j1".to_string(),
            instance_data: None,
            timestamp: 0,
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.acknowledged);
    assert_eq!(resp.response_message, "instance_data is required");

    let resp = service
        .set_instance_data(Request::new(SetInstanceDataRequest {
            node_id: "n1".to_string(),
            job_id: "j1".to_string(),
            instance_data: Some(InstanceData {
                instance_id: "c-123".to_string(),
                instance_name: "osched-j1".to_string(),
                status: "running".to_string(),
                pid: 42,
                ..Default::default()
            }),
            timestamp: 0,
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.acknowledged);

    let telemetry = store.get_telemetry("j1").await.unwrap().unwrap();
    assert_eq!(telemetry.instance_id, "c-123");
    assert_eq!(telemetry.pid, 42);

    // Telemetry is observational: no active record appears.
    assert!(store.get_active("j1").await.unwrap().is_none());
}
