use std::net::SocketAddr;

use crate::error::{Result, SchedulerError};

/// Coordinator process configuration.
#[derive(Debug, Clone)]
pub struct CentroConfig {
    pub listen_addr: SocketAddr,
    /// etcd endpoints; empty means the in-memory store (single-process runs).
    pub etcd_endpoints: Vec<String>,
    pub reconcile_interval_secs: u64,
    pub stats_interval_secs: u64,
}

impl Default for CentroConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:50051".parse().unwrap(),
            etcd_endpoints: Vec::new(),
            reconcile_interval_secs: 60,
            stats_interval_secs: 30,
        }
    }
}

/// Agent process configuration, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_addr: String,
    pub token: String,
    pub node_id: String,
    pub driver_type: String,
    pub cluster_name: String,
}

impl AgentConfig {
    /// Resolve configuration with flag values taking precedence over the
    /// environment: `CENTRO_SERVER_ADDR`, `TOKEN`, `NODE_ID` (defaults to the
    /// hostname), `DRIVER_TYPE` (default `podman`), `CLUSTER_NAME`
    /// (default `default`).
    pub fn from_env(server_flag: Option<String>, token_flag: Option<String>) -> Result<Self> {
        let server_addr = server_flag
            .or_else(|| env_nonempty("CENTRO_SERVER_ADDR"))
            .ok_or_else(|| {
                SchedulerError::Config(
                    "server address not provided; use --server or CENTRO_SERVER_ADDR".into(),
                )
            })?;

        let token = token_flag
            .or_else(|| env_nonempty("TOKEN"))
            .ok_or_else(|| {
                SchedulerError::Config("token not provided; use --token or TOKEN".into())
            })?;

        let node_id = match env_nonempty("NODE_ID") {
            Some(id) => id,
            None => sysinfo::System::host_name()
                .ok_or_else(|| SchedulerError::Config("failed to determine hostname".into()))?,
        };

        let driver_type = env_nonempty("DRIVER_TYPE").unwrap_or_else(|| "podman".to_string());
        let cluster_name = env_nonempty("CLUSTER_NAME").unwrap_or_else(|| "default".to_string());

        Ok(Self {
            server_addr,
            token,
            node_id,
            driver_type,
            cluster_name,
        })
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
