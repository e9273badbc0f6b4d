use std::collections::HashMap;
use std::time::Duration;

use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::error::{Result, SchedulerError};
use crate::proto::centro_scheduler_client::CentroSchedulerClient;
use crate::proto::{
    GetJobRequest, GetJobResponse, HeartbeatRequest, HeartbeatResponse, SetInstanceDataRequest,
    SetInstanceDataResponse, UpdateStatusRequest, UpdateStatusResponse,
};
use crate::scheduler::job::InstanceTelemetry;
use crate::storage::registry::NodeCapacity;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent-side client for the coordinator. Owns the channel and the bearer
/// token; every call carries `authorization: Bearer <token>` metadata and a
/// per-RPC deadline.
#[derive(Clone)]
pub struct CentroClient {
    client: CentroSchedulerClient<Channel>,
    bearer: MetadataValue<Ascii>,
}

impl CentroClient {
    pub async fn connect(server_addr: &str, token: &str) -> Result<Self> {
        if server_addr.is_empty() {
            return Err(SchedulerError::Config("server address cannot be empty".into()));
        }

        let endpoint = Endpoint::from_shared(format!("http://{server_addr}"))
            .map_err(|err| SchedulerError::Config(format!("invalid server address: {err}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(RPC_TIMEOUT);

        tracing::info!(server_addr, "Connecting to coordinator");
        let channel = endpoint.connect().await?;

        let bearer = format!("Bearer {token}")
            .parse()
            .map_err(|_| SchedulerError::Config("token is not valid metadata".into()))?;

        Ok(Self {
            client: CentroSchedulerClient::new(channel),
            bearer,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert("authorization", self.bearer.clone());
        request
    }

    pub async fn heartbeat(
        &self,
        node_id: &str,
        cluster_name: &str,
        capacity: NodeCapacity,
        metadata: HashMap<String, String>,
    ) -> Result<HeartbeatResponse> {
        let request = self.request(HeartbeatRequest {
            node_id: node_id.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            available_memory_mb: capacity.ram_mb,
            available_cpu_cores: capacity.cpu_cores,
            available_disk_mb: capacity.disk_mb,
            cluster_name: cluster_name.to_string(),
            node_metadata: metadata,
        });

        let response = self.client.clone().heartbeat(request).await?;
        Ok(response.into_inner())
    }

    pub async fn get_job(&self, node_id: &str) -> Result<GetJobResponse> {
        let request = self.request(GetJobRequest {
            node_id: node_id.to_string(),
        });

        let response = self.client.clone().get_job(request).await?;
        Ok(response.into_inner())
    }

    pub async fn update_status(
        &self,
        node_id: &str,
        job_id: &str,
        status: &str,
        detail: &str,
    ) -> Result<UpdateStatusResponse> {
        let request = self.request(UpdateStatusRequest {
            node_id: node_id.to_string(),
            job_id: job_id.to_string(),
            job_status: status.to_string(),
            status_message: detail.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });

        let response = self.client.clone().update_status(request).await?;
        let inner = response.into_inner();
        tracing::debug!(
            job_id,
            acknowledged = inner.acknowledged,
            message = %inner.response_message,
            "UpdateStatus response"
        );
        Ok(inner)
    }

    pub async fn set_instance_data(
        &self,
        node_id: &str,
        job_id: &str,
        data: InstanceTelemetry,
    ) -> Result<SetInstanceDataResponse> {
        let request = self.request(SetInstanceDataRequest {
            node_id: node_id.to_string(),
            job_id: job_id.to_string(),
            instance_data: Some(data.into()),
            timestamp: chrono::Utc::now().timestamp(),
        });

        let response = self.client.clone().set_instance_data(request).await?;
        Ok(response.into_inner())
    }
}
