use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use open_scheduler::agent::commands::{
    CleanupInstancesCommand, HeartbeatCommand, PollJobCommand, SetInstanceTelemetryCommand,
    UpdateStatusCommand,
};
use open_scheduler::agent::{AgentContext, Command, CommandScheduler};
use open_scheduler::config::AgentConfig;
use open_scheduler::driver::DriverRegistry;
use open_scheduler::grpc::CentroClient;
use open_scheduler::shutdown::{install_shutdown_handler, FINAL_CLEANUP_DEADLINE};

#[derive(Parser, Debug)]
#[command(name = "agent")]
#[command(about = "Worker node agent for the open-scheduler control plane")]
struct Args {
    /// Coordinator address (overrides CENTRO_SERVER_ADDR)
    #[arg(long)]
    server: Option<String>,

    /// Authentication token (overrides TOKEN)
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AgentConfig::from_env(args.server, args.token)?;

    tracing::info!(
        node_id = %config.node_id,
        cluster = %config.cluster_name,
        driver = %config.driver_type,
        server = %config.server_addr,
        "Starting agent"
    );

    let client = Arc::new(CentroClient::connect(&config.server_addr, &config.token).await?);
    tracing::info!("Connected to coordinator");

    // A broken driver disables instance-facing commands but not heartbeats
    // or polling; the node keeps reporting in.
    let drivers = Arc::new(DriverRegistry::new());
    let driver = match drivers.get(&config.driver_type).await {
        Ok(driver) => Some(driver),
        Err(err) => {
            tracing::warn!(driver = %config.driver_type, error = %err, "Failed to initialize driver");
            tracing::warn!("Status updates and cleanup will be disabled");
            None
        }
    };

    let ctx = AgentContext {
        node_id: config.node_id.clone(),
        cluster_name: config.cluster_name.clone(),
    };

    let metadata = HashMap::from([
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("driver".to_string(), config.driver_type.clone()),
    ]);

    let cleanup = Arc::new(CleanupInstancesCommand::new(driver.clone()));

    let mut scheduler = CommandScheduler::new(ctx.clone());
    scheduler.register(Arc::new(HeartbeatCommand::new(client.clone(), metadata)));
    scheduler.register(Arc::new(PollJobCommand::new(
        client.clone(),
        drivers.clone(),
        config.driver_type.clone(),
    )));
    scheduler.register(Arc::new(UpdateStatusCommand::new(
        client.clone(),
        driver.clone(),
    )));
    scheduler.register(Arc::new(SetInstanceTelemetryCommand::new(
        client.clone(),
        driver.clone(),
    )));
    scheduler.register(cleanup.clone());

    let cancel = install_shutdown_handler();
    scheduler.run(cancel).await;

    // Best-effort final cleanup with a bounded deadline before exit.
    tracing::info!("Running final cleanup before exit");
    match tokio::time::timeout(FINAL_CLEANUP_DEADLINE, cleanup.execute(&ctx)).await {
        Ok(Ok(())) => tracing::info!("Final cleanup complete"),
        Ok(Err(err)) => tracing::warn!(error = %err, "Final cleanup failed"),
        Err(_) => tracing::warn!("Final cleanup hit its deadline"),
    }

    tracing::info!("Agent stopped");
    Ok(())
}
