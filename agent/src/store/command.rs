//! Command store
//!
//! Buckets the unhandled commands of this piped by their target and hands
//! them out as [`ReportableCommand`]s. Once a command has been reported it is
//! remembered for ten minutes so stale list responses cannot hand it out again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controlplane_api::service::ReportCommandHandledRequest;
use controlplane_api::{Command, CommandStatus, CommandType};

use crate::cache::ttl::TtlCache;
use crate::errors::AgentError;
use crate::rpc::ControlPlane;
use crate::utils::now_unix;

/// Command store options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sync interval
    pub interval: Duration,

    /// How long a reported command stays suppressed
    pub handled_ttl: Duration,

    /// Interval to sweep expired handled commands
    pub sweep_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            handled_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// Reports the outcome of a command upstream
#[async_trait]
pub trait CommandReporter: Send + Sync {
    async fn report_command_handled(
        &self,
        command: &Command,
        status: CommandStatus,
        metadata: BTreeMap<String, String>,
        output: Vec<u8>,
    ) -> Result<(), AgentError>;
}

/// A command bundled with the means to acknowledge it
#[derive(Clone)]
pub struct ReportableCommand {
    pub command: Command,
    reporter: Arc<dyn CommandReporter>,
}

impl std::fmt::Debug for ReportableCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportableCommand")
            .field("command", &self.command)
            .finish()
    }
}

impl ReportableCommand {
    pub fn new(command: Command, reporter: Arc<dyn CommandReporter>) -> Self {
        Self { command, reporter }
    }

    /// Report the command as handled with `status`
    pub async fn report(
        &self,
        status: CommandStatus,
        metadata: BTreeMap<String, String>,
        output: Vec<u8>,
    ) -> Result<(), AgentError> {
        self.reporter
            .report_command_handled(&self.command, status, metadata, output)
            .await
    }
}

/// Upstream reporter which remembers what it has reported
struct HandledCommands {
    control_plane: Arc<dyn ControlPlane>,
    /// command id -> handled at
    handled: TtlCache<String, i64>,
}

#[async_trait]
impl CommandReporter for HandledCommands {
    async fn report_command_handled(
        &self,
        command: &Command,
        status: CommandStatus,
        metadata: BTreeMap<String, String>,
        output: Vec<u8>,
    ) -> Result<(), AgentError> {
        if self.handled.contains(&command.id) {
            debug!(command_id = %command.id, "Command was already reported as handled");
            return Ok(());
        }
        let handled_at = now_unix();
        self.control_plane
            .report_command_handled(ReportCommandHandledRequest {
                command_id: command.id.clone(),
                status,
                metadata,
                handled_at,
                output,
            })
            .await?;
        self.handled.insert(command.id.clone(), handled_at);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct Snapshot {
    application_commands: Vec<Command>,
    deployment_commands: Vec<Command>,
    build_plan_preview_commands: Vec<Command>,
    piped_commands: Vec<Command>,
    /// deployment id -> stage id -> approve and skip commands
    stage_commands: HashMap<String, HashMap<String, Vec<Command>>>,
}

impl Snapshot {
    fn build(commands: Vec<Command>) -> Self {
        let mut snapshot = Snapshot::default();
        for cmd in commands {
            match cmd.command_type {
                CommandType::SyncApplication
                | CommandType::UpdateApplicationConfig
                | CommandType::ChainSyncApplication => snapshot.application_commands.push(cmd),
                CommandType::CancelDeployment => snapshot.deployment_commands.push(cmd),
                CommandType::BuildPlanPreview => snapshot.build_plan_preview_commands.push(cmd),
                CommandType::RestartPiped => snapshot.piped_commands.push(cmd),
                CommandType::ApproveStage | CommandType::SkipStage => {
                    snapshot
                        .stage_commands
                        .entry(cmd.deployment_id.clone())
                        .or_default()
                        .entry(cmd.stage_id.clone())
                        .or_default()
                        .push(cmd);
                }
            }
        }
        snapshot
    }

    fn remove_stage_command(&mut self, deployment_id: &str, stage_id: &str, command_id: &str) {
        if let Some(stages) = self.stage_commands.get_mut(deployment_id) {
            if let Some(bucket) = stages.get_mut(stage_id) {
                bucket.retain(|c| c.id != command_id);
                if bucket.is_empty() {
                    stages.remove(stage_id);
                }
            }
            if stages.is_empty() {
                self.stage_commands.remove(deployment_id);
            }
        }
    }
}

/// Read-only view over the unhandled commands of this piped
pub struct CommandStore {
    control_plane: Arc<dyn ControlPlane>,
    options: Options,
    snapshot: RwLock<Arc<Snapshot>>,
    reporter: Arc<HandledCommands>,
}

impl CommandStore {
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: Options) -> Self {
        let reporter = Arc::new(HandledCommands {
            control_plane: control_plane.clone(),
            handled: TtlCache::new(options.handled_ttl),
        });
        Self {
            control_plane,
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            reporter,
        }
    }

    /// Sync every interval and sweep the handled set until `ctx` is cancelled
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Command store starting...");
        let mut sync_ticker = tokio::time::interval(self.options.interval);
        let mut sweep_ticker = tokio::time::interval(self.options.sweep_interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Command store shutting down...");
                    return Ok(());
                }
                _ = sync_ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Failed to sync commands: {}", e);
                    }
                }
                _ = sweep_ticker.tick() => {
                    let evicted = self.reporter.handled.evict_expired();
                    debug!("Evicted {} handled commands", evicted);
                }
            }
        }
    }

    /// Fetch the unhandled commands and publish a new snapshot
    pub async fn sync(&self) -> Result<(), AgentError> {
        let commands = self.control_plane.list_unhandled_commands().await?;
        debug!("Synced {} commands", commands.len());
        *self.snapshot.write() = Arc::new(Snapshot::build(commands));
        Ok(())
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    fn reportable(&self, commands: &[Command]) -> Vec<ReportableCommand> {
        commands
            .iter()
            .filter(|c| !self.reporter.handled.contains(&c.id))
            .map(|c| ReportableCommand::new(c.clone(), self.reporter.clone()))
            .collect()
    }

    /// The reporter used by every command handed out by this store
    pub fn reporter(&self) -> Arc<dyn CommandReporter> {
        self.reporter.clone()
    }

    /// Whether the command was reported in the last ten minutes
    pub fn is_handled(&self, command_id: &str) -> bool {
        self.reporter.handled.contains(&command_id.to_string())
    }

    /// Sync, update-config and chain-sync commands
    pub fn list_application_commands(&self) -> Vec<ReportableCommand> {
        self.reportable(&self.snapshot().application_commands)
    }

    /// Cancel commands
    pub fn list_deployment_commands(&self) -> Vec<ReportableCommand> {
        self.reportable(&self.snapshot().deployment_commands)
    }

    pub fn list_build_plan_preview_commands(&self) -> Vec<ReportableCommand> {
        self.reportable(&self.snapshot().build_plan_preview_commands)
    }

    /// Commands targeting piped itself
    pub fn list_piped_commands(&self) -> Vec<ReportableCommand> {
        self.reportable(&self.snapshot().piped_commands)
    }

    /// Approve and skip commands targeting a single stage
    pub fn list_stage_commands(&self, deployment_id: &str, stage_id: &str) -> Vec<Command> {
        let snapshot = self.snapshot();
        snapshot
            .stage_commands
            .get(deployment_id)
            .and_then(|stages| stages.get(stage_id))
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|c| !self.reporter.handled.contains(&c.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Report every stage command of the stage as succeeded.
    ///
    /// Each command leaves the bucket once its report went through, so a
    /// failing call keeps the remaining commands for the next attempt.
    pub async fn report_commands_handled(
        &self,
        deployment_id: &str,
        stage_id: &str,
    ) -> Result<(), AgentError> {
        for cmd in self.list_stage_commands(deployment_id, stage_id) {
            self.reporter
                .report_command_handled(
                    &cmd,
                    CommandStatus::CommandSucceeded,
                    BTreeMap::new(),
                    Vec::new(),
                )
                .await?;

            let mut guard = self.snapshot.write();
            let mut next = (**guard).clone();
            next.remove_stage_command(deployment_id, stage_id, &cmd.id);
            *guard = Arc::new(next);
        }
        Ok(())
    }
}
