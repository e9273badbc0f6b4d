use crate::scheduler::job::Job;
use crate::storage::registry::NodeInfo;

/// Why a node cannot take a job. The Display form is used verbatim in RPC
/// responses and diagnostic events.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    ClusterMismatch {
        required: Vec<String>,
        node_cluster: String,
    },
    InsufficientCpu {
        required: f32,
        available: f32,
    },
    InsufficientRam {
        required: f32,
        available: f32,
    },
    InsufficientDisk {
        required: f32,
        available: f32,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::ClusterMismatch {
                required,
                node_cluster,
            } => write!(
                f,
                "Cluster mismatch: job requires {required:?}, node is in '{node_cluster}'"
            ),
            Rejection::InsufficientCpu {
                required,
                available,
            } => write!(
                f,
                "Insufficient CPU: required {required:.2} cores, available {available:.2} cores"
            ),
            Rejection::InsufficientRam {
                required,
                available,
            } => write!(
                f,
                "Insufficient RAM: required {required:.2}MB, available {available:.2}MB"
            ),
            Rejection::InsufficientDisk {
                required,
                available,
            } => write!(
                f,
                "Insufficient Disk: required {required:.2}MB, available {available:.2}MB"
            ),
        }
    }
}

/// Decide whether `node` can take `job`. Pure; capacity numbers come from
/// the node's last heartbeat. An empty cluster selection means any node.
pub fn evaluate(job: &Job, node: &NodeInfo) -> Result<(), Rejection> {
    if !job.selected_clusters.is_empty()
        && !job.selected_clusters.contains(&node.cluster_name)
    {
        return Err(Rejection::ClusterMismatch {
            required: job.selected_clusters.clone(),
            node_cluster: node.cluster_name.clone(),
        });
    }

    let demand = job.demand();

    if demand.cpu_cores > node.cpu_cores {
        return Err(Rejection::InsufficientCpu {
            required: demand.cpu_cores,
            available: node.cpu_cores,
        });
    }
    if demand.ram_mb > node.ram_mb {
        return Err(Rejection::InsufficientRam {
            required: demand.ram_mb,
            available: node.ram_mb,
        });
    }
    if demand.disk_mb > 0.0 && demand.disk_mb > node.disk_mb {
        return Err(Rejection::InsufficientDisk {
            required: demand.disk_mb,
            available: node.disk_mb,
        });
    }

    Ok(())
}
