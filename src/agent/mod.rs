//! The worker-side command loop. Each periodic concern (heartbeat, job
//! polling, status push, telemetry push, cleanup) is a [`Command`] scheduled
//! on its own tick; commands run sequentially per tick but independently of
//! each other.

pub mod commands;
pub mod sysinfo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Per-node identity shared by every command. The bearer token lives inside
/// the gRPC client, so commands cannot mix up identity and credentials.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub node_id: String,
    pub cluster_name: String,
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: &AgentContext) -> Result<()>;
}

/// Schedules registered commands, one periodic task per command, all bound
/// to a shared cancellation token.
pub struct CommandScheduler {
    ctx: AgentContext,
    commands: Vec<Arc<dyn Command>>,
}

impl CommandScheduler {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            commands: Vec::new(),
        }
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    /// Run all commands until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(self.commands.len());

        for command in &self.commands {
            let command = command.clone();
            let ctx = self.ctx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                tracing::info!(
                    command = command.name(),
                    interval_secs = command.interval().as_secs(),
                    "Command scheduled"
                );

                let mut ticker = tokio::time::interval(command.interval());
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(err) = command.execute(&ctx).await {
                                tracing::error!(
                                    command = command.name(),
                                    error = %err,
                                    "Command execution failed"
                                );
                            }
                        }
                        _ = cancel.cancelled() => {
                            tracing::info!(command = command.name(), "Command stopped");
                            return;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
