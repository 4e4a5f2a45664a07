//! Consumes plan preview commands

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use controlplane_api::CommandStatus;

use crate::cache::ttl::TtlCache;
use crate::errors::AgentError;
use crate::planpreview::builder::Builder;
use crate::store::{CommandStore, ReportableCommand};

#[derive(Debug, Clone)]
pub struct Options {
    pub workers: usize,
    pub check_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 3,
            check_interval: Duration::from_secs(5),
        }
    }
}

pub struct Handler {
    builder: Arc<Builder>,
    commands: Arc<CommandStore>,
    options: Options,
    /// Commands already picked up
    accepted: TtlCache<String, ()>,
}

impl Handler {
    pub fn new(builder: Arc<Builder>, commands: Arc<CommandStore>, options: Options) -> Self {
        Self {
            builder,
            commands,
            options,
            accepted: TtlCache::new(Duration::from_secs(60 * 60)),
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Plan preview handler starting with {} workers...", self.options.workers);
        let permits = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut ticker = tokio::time::interval(self.options.check_interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    self.accepted.evict_expired();
                    for command in self.commands.list_build_plan_preview_commands() {
                        if self.accepted.contains(&command.command.id) {
                            continue;
                        }
                        self.accepted.insert(command.command.id.clone(), ());
                        let builder = self.builder.clone();
                        let permits = permits.clone();
                        tasks.spawn(async move {
                            let Ok(_permit) = permits.acquire().await else {
                                return;
                            };
                            handle(&builder, command).await;
                        });
                    }
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!("Plan preview task failed: {}", e);
                    }
                }
            }
        }

        info!("Plan preview handler shutting down...");
        tasks.shutdown().await;
        Ok(())
    }
}

/// Build the plan preview of one command and report the outcome
pub async fn handle(builder: &Builder, command: ReportableCommand) {
    let c = &command.command;
    let Some(req) = c.build_plan_preview.clone() else {
        warn!(command_id = %c.id, "Plan preview command has no payload");
        report(&command, CommandStatus::CommandFailed, b"missing buildPlanPreview payload".to_vec()).await;
        return;
    };

    info!(command_id = %c.id, repo_id = %req.repository_id, head = %req.head_branch, "Building plan preview");
    let outcome = builder
        .build(&c.id, &req)
        .await
        .and_then(|result| Ok(serde_json::to_vec(&result)?));
    match outcome {
        Ok(output) => report(&command, CommandStatus::CommandSucceeded, output).await,
        Err(e) => {
            warn!(command_id = %c.id, "Failed to build plan preview: {}", e);
            report(&command, CommandStatus::CommandFailed, e.to_string().into_bytes()).await;
        }
    }
}

async fn report(command: &ReportableCommand, status: CommandStatus, output: Vec<u8>) {
    if let Err(e) = command.report(status, BTreeMap::new(), output).await {
        error!(command_id = %command.command.id, "Failed to report plan preview command: {}", e);
    }
}
