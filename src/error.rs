use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<etcd_client::Error> for SchedulerError {
    fn from(err: etcd_client::Error) -> Self {
        SchedulerError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
