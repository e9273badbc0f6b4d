use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use open_scheduler::agent::commands::{
    CleanupInstancesCommand, HeartbeatCommand, PollJobCommand, SetInstanceTelemetryCommand,
    UpdateStatusCommand,
};
use open_scheduler::agent::{AgentContext, Command};
use open_scheduler::driver::DriverRegistry;
use open_scheduler::grpc::server::run_server;
use open_scheduler::grpc::{CentroClient, CentroService, TokenValidator};
use open_scheduler::scheduler::job::{InstanceSpec, Job, JobState, JobType};
use open_scheduler::storage::{JobStore, MemoryKv, NodeRegistry};

struct TestServer {
    store: JobStore,
    addr: String,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start(port: u16) -> Self {
        Self::start_with(port, None).await
    }

    async fn start_with(port: u16, validator: Option<Arc<dyn TokenValidator>>) -> Self {
        let kv = Arc::new(MemoryKv::new());
        let store = JobStore::new(kv.clone());
        let registry = NodeRegistry::new(kv);

        let mut service = CentroService::new(store.clone(), registry);
        if let Some(validator) = validator {
            service = service.with_validator(validator);
        }

        let cancel = CancellationToken::new();
        let addr = format!("127.0.0.1:{port}");
        let server_addr = addr.parse().unwrap();
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(server_addr, service, server_cancel).await {
                tracing::error!("gRPC server error: {}", e);
            }
        });

        // Wait briefly for the server to start listening.
        tokio::time::sleep(Duration::from_millis(200)).await;

        Self {
            store,
            addr,
            cancel,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ctx(node_id: &str) -> AgentContext {
    AgentContext {
        node_id: node_id.to_string(),
        cluster_name: "default".to_string(),
    }
}

fn process_job(name: &str, script: &str) -> Job {
    let mut job = Job::new(name, JobType::Single);
    job.driver_type = "process".to_string();
    job.instance_config = Some(InstanceSpec {
        image: String::new(),
        entrypoint: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        args: Vec::new(),
        driver_options: Default::default(),
    });
    job
}

#[tokio::test]
async fn test_full_job_lifecycle_over_grpc() {
    let server = TestServer::start(53261).await;
    let client = Arc::new(
        CentroClient::connect(&server.addr, "test-token")
            .await
            .unwrap(),
    );
    let agent_ctx = ctx("worker-1");

    // Register the node.
    let heartbeat = HeartbeatCommand::new(client.clone(), HashMap::new());
    heartbeat.execute(&agent_ctx).await.unwrap();

    // Submit a quick process job.
    let job = process_job("hello", "exit 0");
    let job_id = job.job_id.clone();
    server.store.enqueue(&job).await.unwrap();

    // Poll: the job is assigned and launched through the process driver.
    let drivers = Arc::new(DriverRegistry::new());
    let poll = PollJobCommand::new(client.clone(), drivers.clone(), "process");
    poll.execute(&agent_ctx).await.unwrap();

    assert_eq!(server.store.queue_len().await.unwrap(), 0);
    let record = server.store.get_active(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Running);

    // Wait for the process to exit, then push driver-observed statuses.
    let driver = drivers.get("process").await.unwrap();
    for _ in 0..100 {
        if driver.status(&job_id).await.unwrap() == "exited" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(driver.status(&job_id).await.unwrap(), "exited");

    let update_status = UpdateStatusCommand::new(client.clone(), Some(driver.clone()));
    update_status.execute(&agent_ctx).await.unwrap();

    // Terminal transition: active is gone, history holds the completion.
    assert!(server.store.get_active(&job_id).await.unwrap().is_none());
    let record = server.store.get_history(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.node_id, "worker-1");

    // Telemetry push lands under the job's telemetry key.
    let telemetry = SetInstanceTelemetryCommand::new(client.clone(), Some(driver.clone()));
    telemetry.execute(&agent_ctx).await.unwrap();
    let data = server.store.get_telemetry(&job_id).await.unwrap().unwrap();
    assert_eq!(data.status, "exited");

    // Cleanup removes the terminated instance.
    let cleanup = CleanupInstancesCommand::new(Some(driver.clone()));
    cleanup.execute(&agent_ctx).await.unwrap();
    assert!(driver.list().await.unwrap().is_empty());

    let events = server.store.events(&job_id).await.unwrap();
    assert!(events.iter().any(|e| e.contains("Job assigned to node worker-1")));
    assert!(events.iter().any(|e| e.contains("Status: running")));
    assert!(events.iter().any(|e| e.contains("Status: completed")));
}

#[tokio::test]
async fn test_poll_without_registration_gets_nothing() {
    let server = TestServer::start(53271).await;
    let client = Arc::new(
        CentroClient::connect(&server.addr, "test-token")
            .await
            .unwrap(),
    );

    server
        .store
        .enqueue(&process_job("waiting", "exit 0"))
        .await
        .unwrap();

    let response = client.get_job("stranger").await.unwrap();
    assert!(!response.job_available);
    assert!(response.response_message.contains("heartbeat first"));

    // The job stays queued.
    assert_eq!(server.store.queue_len().await.unwrap(), 1);
}

struct DenyAll;

impl TokenValidator for DenyAll {
    fn validate(&self, _token: &str) -> bool {
        false
    }
}

#[tokio::test]
async fn test_invalid_token_is_unauthenticated() {
    let server = TestServer::start_with(53281, Some(Arc::new(DenyAll))).await;
    let client = Arc::new(
        CentroClient::connect(&server.addr, "bad-token")
            .await
            .unwrap(),
    );

    let err = client.get_job("worker-1").await.unwrap_err();
    assert!(err.to_string().contains("invalid token"), "got: {err}");
}

#[tokio::test]
async fn test_command_intervals_match_the_schedule() {
    let server = TestServer::start(53291).await;
    let client = Arc::new(
        CentroClient::connect(&server.addr, "test-token")
            .await
            .unwrap(),
    );
    let drivers = Arc::new(DriverRegistry::new());

    let heartbeat = HeartbeatCommand::new(client.clone(), HashMap::new());
    let poll = PollJobCommand::new(client.clone(), drivers.clone(), "process");
    let status = UpdateStatusCommand::new(client.clone(), None);
    let telemetry = SetInstanceTelemetryCommand::new(client.clone(), None);
    let cleanup = CleanupInstancesCommand::new(None);

    assert_eq!(heartbeat.interval(), Duration::from_secs(15));
    assert_eq!(poll.interval(), Duration::from_secs(15));
    assert_eq!(status.interval(), Duration::from_secs(15));
    assert_eq!(telemetry.interval(), Duration::from_secs(30));
    assert_eq!(cleanup.interval(), Duration::from_secs(60));

    assert_eq!(heartbeat.name(), "heartbeat");
    assert_eq!(poll.name(), "poll_job");
    assert_eq!(status.name(), "update_status");
    assert_eq!(telemetry.name(), "set_instance_data");
    assert_eq!(cleanup.name(), "cleanup_instances");
}
