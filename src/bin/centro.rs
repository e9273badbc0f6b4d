use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use open_scheduler::config::CentroConfig;
use open_scheduler::grpc::server::{run_server, CentroService};
use open_scheduler::scheduler::Reconciler;
use open_scheduler::shutdown::install_shutdown_handler;
use open_scheduler::storage::etcd::EtcdKv;
use open_scheduler::storage::{JobStore, KvStore, MemoryKv, NodeRegistry};

#[derive(Parser, Debug)]
#[command(name = "centro")]
#[command(about = "Coordinator for the open-scheduler control plane")]
struct Args {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Comma-separated etcd endpoints; omit to run on the in-memory store
    #[arg(long, default_value = "")]
    etcd_endpoints: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = CentroConfig {
        listen_addr: format!("0.0.0.0:{}", args.port).parse::<SocketAddr>()?,
        etcd_endpoints: args
            .etcd_endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect(),
        ..CentroConfig::default()
    };

    // An unreachable store at startup is fatal; runtime store errors only
    // surface per-RPC and heal when the store comes back.
    let kv: Arc<dyn KvStore> = if config.etcd_endpoints.is_empty() {
        tracing::warn!("No etcd endpoints configured, using the in-memory store");
        Arc::new(MemoryKv::new())
    } else {
        tracing::info!(endpoints = ?config.etcd_endpoints, "Connecting to etcd");
        Arc::new(EtcdKv::connect(&config.etcd_endpoints).await?)
    };

    let store = JobStore::new(kv.clone());
    let registry = NodeRegistry::new(kv);
    let cancel = install_shutdown_handler();

    let reconciler = Reconciler::with_interval(
        store.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
    );
    let reconciler_cancel = cancel.clone();
    tokio::spawn(async move {
        reconciler.run(reconciler_cancel).await;
    });

    tokio::spawn(run_stats_monitor(
        store.clone(),
        registry.clone(),
        Duration::from_secs(config.stats_interval_secs),
        cancel.clone(),
    ));

    let service = CentroService::new(store, registry);
    run_server(config.listen_addr, service, cancel).await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

/// Periodically log fleet and queue statistics, flagging nodes that have
/// stopped heartbeating.
async fn run_stats_monitor(
    store: JobStore,
    registry: NodeRegistry,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let nodes = match registry.all_nodes().await {
                    Ok(nodes) => nodes,
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to read nodes for monitoring");
                        continue;
                    }
                };

                for (node_id, node) in &nodes {
                    if !node.is_healthy() {
                        tracing::warn!(
                            node_id,
                            last_heartbeat = %node.last_heartbeat,
                            "Node appears to be offline"
                        );
                    }
                }

                let queued = store.queue_len().await.unwrap_or_default();
                let active = store.active_len().await.unwrap_or_default();
                let completed = store.history_len().await.unwrap_or_default();
                tracing::info!(
                    nodes = nodes.len(),
                    queued,
                    active,
                    completed,
                    "Coordinator status"
                );
            }
            _ = cancel.cancelled() => return,
        }
    }
}
