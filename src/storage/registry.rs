use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::kv::{GetOptions, KvStore};
use crate::storage::NODES_PREFIX;

/// A node is healthy while its last heartbeat is younger than this.
pub const HEARTBEAT_LIVENESS_SECS: i64 = 60;

/// Last-known worker state, created on first heartbeat and updated on every
/// one after that. Stale nodes are never deleted; they simply stop being
/// healthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub cluster_name: String,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub ram_mb: f32,
    #[serde(default)]
    pub cpu_cores: f32,
    #[serde(default)]
    pub disk_mb: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NodeInfo {
    pub fn is_healthy(&self) -> bool {
        Utc::now() - self.last_heartbeat < Duration::seconds(HEARTBEAT_LIVENESS_SECS)
    }
}

/// Available capacity reported with a heartbeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCapacity {
    pub ram_mb: f32,
    pub cpu_cores: f32,
    pub disk_mb: f32,
}

/// Registry of worker nodes keyed under `/centro/nodes/`. Reads always go to
/// the store; the registry is the ground truth at each scheduling decision.
#[derive(Clone)]
pub struct NodeRegistry {
    kv: Arc<dyn KvStore>,
}

impl NodeRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn node_key(node_id: &str) -> String {
        format!("{NODES_PREFIX}{node_id}")
    }

    /// Merge a heartbeat onto the stored node, refreshing capacity, cluster
    /// membership, metadata, and `last_heartbeat`. First heartbeat registers
    /// the node.
    pub async fn upsert_node(
        &self,
        node_id: &str,
        cluster_name: &str,
        capacity: NodeCapacity,
        metadata: HashMap<String, String>,
    ) -> Result<NodeInfo> {
        let mut node = match self.get_node(node_id).await? {
            Some(existing) => existing,
            None => {
                tracing::info!(node_id, cluster_name, "New node registered");
                NodeInfo {
                    node_id: node_id.to_string(),
                    cluster_name: cluster_name.to_string(),
                    last_heartbeat: Utc::now(),
                    ram_mb: 0.0,
                    cpu_cores: 0.0,
                    disk_mb: 0.0,
                    metadata: HashMap::new(),
                }
            }
        };

        node.last_heartbeat = Utc::now();
        node.cluster_name = cluster_name.to_string();
        node.ram_mb = capacity.ram_mb;
        node.cpu_cores = capacity.cpu_cores;
        node.disk_mb = capacity.disk_mb;
        node.metadata = metadata;

        let data = serde_json::to_vec(&node)?;
        self.kv.put(&Self::node_key(node_id), data).await?;
        Ok(node)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>> {
        match self.kv.get(&Self::node_key(node_id)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn all_nodes(&self) -> Result<HashMap<String, NodeInfo>> {
        let entries = self.kv.get_prefix(NODES_PREFIX, GetOptions::default()).await?;
        let mut nodes = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<NodeInfo>(&value) {
                Ok(node) => {
                    nodes.insert(node.node_id.clone(), node);
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "Skipping undecodable node record");
                }
            }
        }
        Ok(nodes)
    }

    pub async fn count(&self) -> Result<usize> {
        self.kv.count_prefix(NODES_PREFIX).await
    }
}
