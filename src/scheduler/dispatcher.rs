use crate::error::Result;
use crate::scheduler::job::{Job, JobRecord};
use crate::scheduler::matcher::{self, Rejection};
use crate::storage::{JobStore, NodeRegistry};

/// Result of a node's job-pull request.
#[derive(Debug, Clone, PartialEq)]
pub enum GetJobOutcome {
    /// The head-of-queue job fits this node and was moved to active.
    Assigned(Job),
    /// No job was handed out; the message says why.
    Unavailable(String),
}

/// Admission and matching for the GetJob RPC: dequeue the head, match it
/// against the requesting node, and on a miss decide between re-queueing and
/// parking the job for retry.
#[derive(Clone)]
pub struct Dispatcher {
    store: JobStore,
    registry: NodeRegistry,
}

impl Dispatcher {
    pub fn new(store: JobStore, registry: NodeRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn get_job(&self, node_id: &str) -> Result<GetJobOutcome> {
        if node_id.is_empty() {
            return Ok(GetJobOutcome::Unavailable("node_id is required".into()));
        }

        let Some(node) = self.registry.get_node(node_id).await? else {
            return Ok(GetJobOutcome::Unavailable(
                "Node not registered. Send a heartbeat first.".into(),
            ));
        };

        if !node.is_healthy() {
            tracing::warn!(
                node_id,
                last_heartbeat = %node.last_heartbeat,
                "Unhealthy node asked for work"
            );
            return Ok(GetJobOutcome::Unavailable(format!(
                "Node is not healthy. Last heartbeat: {}",
                node.last_heartbeat.to_rfc3339()
            )));
        }

        let Some(job) = self.store.dequeue_head().await? else {
            return Ok(GetJobOutcome::Unavailable("No jobs available".into()));
        };

        match matcher::evaluate(&job, &node) {
            Ok(()) => {
                let demand = job.demand();
                tracing::info!(
                    job_id = %job.job_id,
                    node_id,
                    cluster = %node.cluster_name,
                    cpu = demand.cpu_cores,
                    ram_mb = demand.ram_mb,
                    "Assigning job"
                );

                let record = JobRecord::assigned(job.clone(), node_id);
                self.store.put_active(&job.job_id, &record).await?;
                self.store
                    .append_event(&job.job_id, &format!("Job assigned to node {node_id}"))
                    .await?;

                Ok(GetJobOutcome::Assigned(job))
            }
            Err(rejection) => {
                tracing::info!(
                    job_id = %job.job_id,
                    node_id,
                    reason = %rejection,
                    "Job rejected by polling node"
                );

                self.handle_rejection(&job, node_id, &rejection).await?;

                let message = match rejection {
                    Rejection::ClusterMismatch { .. } => {
                        format!("No matching jobs for cluster: {}", node.cluster_name)
                    }
                    _ => "Insufficient resources on node for available jobs".to_string(),
                };
                Ok(GetJobOutcome::Unavailable(message))
            }
        }
    }

    /// A single unsuitable poller must not drop a job. Enumerate the fleet:
    /// if any other healthy node would fit, re-queue; otherwise record a
    /// per-node diagnostic event and park the job in the fail-queue for the
    /// reconciler. The retry count is not touched here.
    async fn handle_rejection(
        &self,
        job: &Job,
        rejecting_node: &str,
        reason: &Rejection,
    ) -> Result<()> {
        let all_nodes = match self.registry.all_nodes().await {
            Ok(nodes) => nodes,
            Err(err) => {
                // Can't inspect the fleet; re-queue rather than lose the job.
                tracing::warn!(job_id = %job.job_id, error = %err, "Failed to enumerate nodes");
                return self.store.enqueue(job).await;
            }
        };

        let mut rejection_reasons: Vec<(String, String)> =
            vec![(rejecting_node.to_string(), reason.to_string())];
        let mut has_candidate = false;

        for (node_id, node) in &all_nodes {
            if node_id == rejecting_node {
                continue;
            }
            if !node.is_healthy() {
                rejection_reasons.push((
                    node_id.clone(),
                    format!(
                        "Node unhealthy (last heartbeat: {})",
                        node.last_heartbeat.to_rfc3339()
                    ),
                ));
                continue;
            }
            match matcher::evaluate(job, node) {
                Ok(()) => {
                    has_candidate = true;
                    break;
                }
                Err(rejection) => {
                    rejection_reasons.push((node_id.clone(), rejection.to_string()));
                }
            }
        }

        if has_candidate {
            return self.store.enqueue(job).await;
        }

        let demand = job.demand();
        let mut event = format!(
            "No matching nodes available for job {}\nJob requirements: CPU={:.2} cores, RAM={:.2}MB, Disk={:.2}MB",
            job.job_id, demand.cpu_cores, demand.ram_mb, demand.disk_mb
        );
        if !job.selected_clusters.is_empty() {
            event.push_str(&format!(", Clusters={:?}", job.selected_clusters));
        }
        event.push_str("\n\nRejection reasons by node:\n");
        for (node_id, node_reason) in &rejection_reasons {
            event.push_str(&format!("  - Node '{node_id}': {node_reason}\n"));
        }

        tracing::warn!(job_id = %job.job_id, "No matching nodes; parking job for retry");
        self.store.append_event(&job.job_id, &event).await?;
        self.store.enqueue_failed(job).await
    }
}
