use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::proto::centro_scheduler_server::{CentroScheduler, CentroSchedulerServer};
use crate::proto::{
    GetJobRequest, GetJobResponse, HeartbeatRequest, HeartbeatResponse, SetInstanceDataRequest,
    SetInstanceDataResponse, UpdateStatusRequest, UpdateStatusResponse,
};
use crate::scheduler::dispatcher::{Dispatcher, GetJobOutcome};
use crate::scheduler::job::{JobRecord, JobState};
use crate::storage::registry::NodeCapacity;
use crate::storage::{JobStore, NodeRegistry};

/// Bearer-token check for incoming RPCs. Token issuance and real validation
/// belong to the auth collaborator; the coordinator only holds the seam.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// Accepts every token. The default until an auth collaborator is wired in.
pub struct AllowAllTokens;

impl TokenValidator for AllowAllTokens {
    fn validate(&self, _token: &str) -> bool {
        true
    }
}

/// The node-facing gRPC service: heartbeats, job pulls, status ingest, and
/// telemetry ingest.
pub struct CentroService {
    store: JobStore,
    registry: NodeRegistry,
    dispatcher: Dispatcher,
    validator: Arc<dyn TokenValidator>,
}

impl CentroService {
    pub fn new(store: JobStore, registry: NodeRegistry) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), registry.clone());
        Self {
            store,
            registry,
            dispatcher,
            validator: Arc::new(AllowAllTokens),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = validator;
        self
    }

    fn check_token<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let token = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start_matches("Bearer ").to_string())
            .unwrap_or_default();

        if self.validator.validate(&token) {
            Ok(())
        } else {
            Err(Status::unauthenticated("invalid token"))
        }
    }

    async fn handle_heartbeat(&self, req: HeartbeatRequest) -> HeartbeatResponse {
        if req.node_id.is_empty() {
            return HeartbeatResponse {
                acknowledged: false,
                response_message: "node_id is required".into(),
            };
        }

        let capacity = NodeCapacity {
            ram_mb: req.available_memory_mb,
            cpu_cores: req.available_cpu_cores,
            disk_mb: req.available_disk_mb,
        };

        match self
            .registry
            .upsert_node(&req.node_id, &req.cluster_name, capacity, req.node_metadata)
            .await
        {
            Ok(_) => {
                tracing::debug!(
                    node_id = %req.node_id,
                    cpu = req.available_cpu_cores,
                    ram_mb = req.available_memory_mb,
                    disk_mb = req.available_disk_mb,
                    "Heartbeat received"
                );
                HeartbeatResponse {
                    acknowledged: true,
                    response_message: "Heartbeat received".into(),
                }
            }
            Err(err) => {
                tracing::error!(node_id = %req.node_id, error = %err, "Failed to save node");
                HeartbeatResponse {
                    acknowledged: false,
                    response_message: "Failed to save node info".into(),
                }
            }
        }
    }

    async fn handle_get_job(&self, req: GetJobRequest) -> GetJobResponse {
        match self.dispatcher.get_job(&req.node_id).await {
            Ok(GetJobOutcome::Assigned(job)) => GetJobResponse {
                job_available: true,
                response_message: format!("Job {} assigned", job.job_id),
                job: Some(job.into()),
            },
            Ok(GetJobOutcome::Unavailable(message)) => GetJobResponse {
                job_available: false,
                job: None,
                response_message: message,
            },
            Err(err) => {
                tracing::error!(node_id = %req.node_id, error = %err, "GetJob failed");
                GetJobResponse {
                    job_available: false,
                    job: None,
                    response_message: "Failed to get job from queue".into(),
                }
            }
        }
    }

    async fn handle_update_status(&self, req: UpdateStatusRequest) -> UpdateStatusResponse {
        if req.node_id.is_empty() {
            return not_acknowledged("node_id is required");
        }
        if req.job_id.is_empty() {
            return not_acknowledged("job_id is required");
        }

        let state = JobState::parse(&req.job_status);

        let mut record = match self.store.get_active(&req.job_id).await {
            Ok(Some(record)) => record,
            // A job whose assignment record was lost still gets a late-bound one.
            Ok(None) => JobRecord {
                job: None,
                node_id: req.node_id.clone(),
                state,
                detail: String::new(),
                claimed_at: Utc::now(),
                updated_at: Utc::now(),
            },
            Err(err) => {
                tracing::error!(job_id = %req.job_id, error = %err, "Failed to get active job");
                return not_acknowledged("Failed to get job status");
            }
        };

        record.state = state;
        record.detail = req.status_message.clone();
        record.updated_at = Utc::now();

        if let Err(err) = self
            .store
            .append_event(
                &req.job_id,
                &format!("Status: {} - {}", req.job_status, req.status_message),
            )
            .await
        {
            tracing::error!(job_id = %req.job_id, error = %err, "Failed to save status event");
        }

        tracing::info!(
            job_id = %req.job_id,
            node_id = %req.node_id,
            status = %req.job_status,
            detail = %req.status_message,
            "Job status update"
        );

        if state.is_terminal() {
            if let Err(err) = self.store.put_history(&req.job_id, &record).await {
                tracing::error!(job_id = %req.job_id, error = %err, "Failed to save job history");
                return not_acknowledged("Failed to save job history");
            }
            if let Err(err) = self.store.delete_active(&req.job_id).await {
                tracing::error!(job_id = %req.job_id, error = %err, "Failed to delete active job");
            }
            tracing::info!(job_id = %req.job_id, status = %state, "Job finished");
        } else if let Err(err) = self.store.put_active(&req.job_id, &record).await {
            tracing::error!(job_id = %req.job_id, error = %err, "Failed to save job status");
            return not_acknowledged("Failed to save job status");
        }

        UpdateStatusResponse {
            acknowledged: true,
            response_message: "Status updated successfully".into(),
        }
    }

    async fn handle_set_instance_data(
        &self,
        req: SetInstanceDataRequest,
    ) -> SetInstanceDataResponse {
        if req.node_id.is_empty() {
            return SetInstanceDataResponse {
                acknowledged: false,
                response_message: "node_id is required".into(),
            };
        }
        if req.job_id.is_empty() {
            return SetInstanceDataResponse {
                acknowledged: false,
                response_message: "job_id is required".into(),
            };
        }
        let Some(data) = req.instance_data else {
            return SetInstanceDataResponse {
                acknowledged: false,
                response_message: "instance_data is required".into(),
            };
        };

        tracing::debug!(
            job_id = %req.job_id,
            node_id = %req.node_id,
            instance = %data.instance_id,
            status = %data.status,
            "Instance telemetry received"
        );

        match self.store.put_telemetry(&req.job_id, &data.into()).await {
            Ok(()) => SetInstanceDataResponse {
                acknowledged: true,
                response_message: "Instance data received successfully".into(),
            },
            Err(err) => {
                tracing::error!(job_id = %req.job_id, error = %err, "Failed to save instance data");
                SetInstanceDataResponse {
                    acknowledged: false,
                    response_message: format!("Failed to save instance data: {err}"),
                }
            }
        }
    }
}

fn not_acknowledged(message: &str) -> UpdateStatusResponse {
    UpdateStatusResponse {
        acknowledged: false,
        response_message: message.into(),
    }
}

#[tonic::async_trait]
impl CentroScheduler for CentroService {
    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        self.check_token(&request)?;
        let req = request.into_inner();

        let result = AssertUnwindSafe(self.handle_heartbeat(req)).catch_unwind().await;
        match result {
            Ok(response) => Ok(Response::new(response)),
            Err(_) => {
                tracing::error!("Panic in Heartbeat handler");
                Err(Status::internal("Internal error in Heartbeat handler"))
            }
        }
    }

    async fn get_job(
        &self,
        request: Request<GetJobRequest>,
    ) -> Result<Response<GetJobResponse>, Status> {
        self.check_token(&request)?;
        let req = request.into_inner();

        let result = AssertUnwindSafe(self.handle_get_job(req)).catch_unwind().await;
        match result {
            Ok(response) => Ok(Response::new(response)),
            Err(_) => {
                tracing::error!("Panic in GetJob handler");
                Err(Status::internal("Internal error in GetJob handler"))
            }
        }
    }

    async fn update_status(
        &self,
        request: Request<UpdateStatusRequest>,
    ) -> Result<Response<UpdateStatusResponse>, Status> {
        self.check_token(&request)?;
        let req = request.into_inner();

        let result = AssertUnwindSafe(self.handle_update_status(req))
            .catch_unwind()
            .await;
        match result {
            Ok(response) => Ok(Response::new(response)),
            Err(_) => {
                tracing::error!("Panic in UpdateStatus handler");
                Err(Status::internal("Internal error in UpdateStatus handler"))
            }
        }
    }

    async fn set_instance_data(
        &self,
        request: Request<SetInstanceDataRequest>,
    ) -> Result<Response<SetInstanceDataResponse>, Status> {
        self.check_token(&request)?;
        let req = request.into_inner();

        let result = AssertUnwindSafe(self.handle_set_instance_data(req))
            .catch_unwind()
            .await;
        match result {
            Ok(response) => Ok(Response::new(response)),
            Err(_) => {
                tracing::error!("Panic in SetInstanceData handler");
                Err(Status::internal("Internal error in SetInstanceData handler"))
            }
        }
    }
}

/// Serve the scheduler service until the token is cancelled.
pub async fn run_server(
    addr: SocketAddr,
    service: CentroService,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(addr = %addr, "Starting gRPC server");

    Server::builder()
        .add_service(CentroSchedulerServer::new(service))
        .serve_with_shutdown(addr, cancel.cancelled())
        .await
}
