pub mod agent;
pub mod config;
pub mod driver;
pub mod error;
pub mod grpc;
pub mod scheduler;
pub mod shutdown;
pub mod storage;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("scheduler");
}
