//! Scheduler: drives a planned deployment through its stages

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use controlplane_api::service as api;
use controlplane_api::{
    ApplicationDeploymentReference, Deployment, DeploymentStatus, PipelineStage, StageStatus,
};
use plugin_api::deployment::ExecuteStageInput;

use crate::config::ApplicationSpec;
use crate::controller::controller::catch_panic;
use crate::controller::reporter::DeploymentReporter;
use crate::controller::signal::{new_stop_signal, StopSignal, StopSignalHandler, StopSignalType};
use crate::deploysource::{DeploySource, Provider, ProviderFactory};
use crate::filesys::dir::Dir;
use crate::plugin::PluginRegistry;
use crate::store::{CommandStore, ReportableCommand};
use crate::utils::now_unix;

/// Final status of a stage given the stop signal observed while it ran
pub fn determine_stage_status(
    signal: StopSignalType,
    original: StageStatus,
    result: StageStatus,
) -> StageStatus {
    match signal {
        StopSignalType::None => result,
        StopSignalType::Terminate => original,
        StopSignalType::Cancel => StageStatus::Cancelled,
        StopSignalType::Timeout => StageStatus::Failure,
    }
}

/// Whether a rollback stage has nothing to undo
fn should_skip_rollback(stage: &PipelineStage, statuses: &BTreeMap<String, StageStatus>) -> bool {
    if !stage.rollback {
        return false;
    }
    match stage.base_stage_id().and_then(|id| statuses.get(id)) {
        Some(StageStatus::NotStarted) | Some(StageStatus::Skipped) => true,
        _ => false,
    }
}

pub struct SchedulerDeps {
    pub plugins: Arc<PluginRegistry>,
    pub sources: Arc<ProviderFactory>,
    pub commands: Arc<CommandStore>,
    pub reporter: DeploymentReporter,
}

/// Executes the stages of one deployment, then exits
pub struct Scheduler {
    deployment: Deployment,
    workspace: Dir,
    deps: SchedulerDeps,
    signal: StopSignal,
    handler: StopSignalHandler,
    rollback_signal: StopSignal,
    rollback_handler: StopSignalHandler,
    cancel_tx: Mutex<Option<oneshot::Sender<ReportableCommand>>>,
    cancel_rx: Mutex<Option<oneshot::Receiver<ReportableCommand>>>,
    cancel_command: Mutex<Option<ReportableCommand>>,
    status: Mutex<DeploymentStatus>,
    stage_statuses: Mutex<BTreeMap<String, StageStatus>>,
}

struct Sources {
    target: Provider,
    running: Option<Provider>,
    spec: ApplicationSpec,
}

impl Scheduler {
    pub fn new(deployment: Deployment, workspace: Dir, deps: SchedulerDeps) -> Self {
        let (signal, handler) = new_stop_signal();
        let (rollback_signal, rollback_handler) = new_stop_signal();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let stage_statuses = deployment
            .stages
            .iter()
            .map(|s| (s.id.clone(), s.status))
            .collect();
        let status = deployment.status;
        Self {
            deployment,
            workspace,
            deps,
            signal,
            handler,
            rollback_signal,
            rollback_handler,
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx: Mutex::new(Some(cancel_rx)),
            cancel_command: Mutex::new(None),
            status: Mutex::new(status),
            stage_statuses: Mutex::new(stage_statuses),
        }
    }

    pub fn id(&self) -> &str {
        &self.deployment.id
    }

    pub fn commit_hash(&self) -> &str {
        &self.deployment.trigger.commit.hash
    }

    pub fn config_filename(&self) -> &str {
        self.deployment.git_path.config_filename_or_default()
    }

    pub fn status(&self) -> DeploymentStatus {
        *self.status.lock()
    }

    pub fn stage_statuses(&self) -> BTreeMap<String, StageStatus> {
        self.stage_statuses.lock().clone()
    }

    /// Deliver a cancel command. Only the first delivery has an effect.
    pub fn cancel(&self, command: ReportableCommand) {
        if let Some(tx) = self.cancel_tx.lock().take() {
            let _ = tx.send(command);
            self.handler.cancel();
        }
    }

    /// Stop both the forward and the rollback pass for a restart
    pub fn terminate(&self) {
        self.handler.terminate();
        self.rollback_handler.terminate();
    }

    fn set_stage_status(&self, stage_id: &str, status: StageStatus) {
        self.stage_statuses.lock().insert(stage_id.to_string(), status);
    }

    fn take_cancel_command(&self) -> Option<ReportableCommand> {
        let received = self
            .cancel_rx
            .lock()
            .take()
            .and_then(|mut rx| rx.try_recv().ok());
        let mut held = self.cancel_command.lock();
        if received.is_some() {
            *held = received;
        }
        held.clone()
    }

    fn cancel_commander(&self) -> String {
        self.take_cancel_command()
            .map(|c| c.command.commander)
            .unwrap_or_default()
    }

    pub async fn run(&self) {
        info!(deployment_id = %self.deployment.id, "Start running scheduler");
        if let Err(message) = catch_panic(self.execute()).await {
            error!(deployment_id = %self.deployment.id, "Scheduler panicked: {}", message);
            let reason = format!("Unexpected error occurred: {}", message);
            self.complete(DeploymentStatus::Failure, &reason).await;
        }
        // A cancel command is acknowledged whenever the deployment ended here
        if self.status().is_completed() {
            if let Some(command) = self.take_cancel_command() {
                self.deps.reporter.ack_cancel(&command).await;
            }
        }
        if let Err(e) = self.workspace.delete().await {
            warn!(deployment_id = %self.deployment.id, "Failed to clean scheduler workspace: {}", e);
        }
    }

    async fn execute(&self) {
        let deployment = &self.deployment;

        if deployment.status == DeploymentStatus::Planned {
            if let Err(e) = self
                .deps
                .reporter
                .status_changed(DeploymentStatus::Running, "The deployment is running")
                .await
            {
                error!(deployment_id = %deployment.id, "Failed to report deployment running: {}", e);
                return;
            }
            *self.status.lock() = DeploymentStatus::Running;
        }

        let sources = match self.prepare_sources().await {
            Ok(sources) => sources,
            Err(reason) => {
                self.complete(DeploymentStatus::Failure, &reason).await;
                return;
            }
        };

        let timeout = self.start_timeout(sources.spec.timeout);
        let outcome = self.run_stages(&sources).await;
        timeout.abort();

        let Some((status, reason)) = outcome else {
            info!(deployment_id = %deployment.id, "Scheduler was terminated, the deployment resumes after restart");
            return;
        };

        self.complete(status, &reason).await;
        if status == DeploymentStatus::Success {
            self.report_most_recent_success().await;
        }
    }

    fn start_timeout(&self, timeout: std::time::Duration) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let deployment_id = self.deployment.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if handler.timeout() {
                info!(deployment_id = %deployment_id, "Deployment timed out");
            }
        })
    }

    async fn prepare_sources(&self) -> Result<Sources, String> {
        let deployment = &self.deployment;
        let target = self
            .deps
            .sources
            .provider(
                self.workspace.subdir("target"),
                &deployment.git_path,
                &deployment.trigger.commit.hash,
            )
            .map_err(|e| format!("Failed to prepare target deploy source data ({})", e))?;
        let spec = target
            .get()
            .await
            .map_err(|e| format!("Failed to prepare target deploy source data ({})", e))?
            .application_spec;

        let running = if deployment.running_commit_hash.is_empty() {
            None
        } else {
            let mut git_path = deployment.git_path.clone();
            if !deployment.running_config_filename.is_empty() {
                git_path.config_filename = deployment.running_config_filename.clone();
            }
            let provider = self
                .deps
                .sources
                .provider(
                    self.workspace.subdir("running"),
                    &git_path,
                    &deployment.running_commit_hash,
                )
                .map_err(|e| format!("Failed to prepare running deploy source data ({})", e))?;
            Some(provider)
        };

        Ok(Sources {
            target,
            running,
            spec,
        })
    }

    /// Run the forward stages, then the rollback stages when needed.
    ///
    /// Returns `None` when the scheduler was terminated.
    async fn run_stages(&self, sources: &Sources) -> Option<(DeploymentStatus, String)> {
        let mut status = DeploymentStatus::Success;
        let mut reason = "The deployment was completed successfully".to_string();
        let mut last_stage: Option<PipelineStage> = None;

        for stage in self.deployment.stages.iter().filter(|s| !s.rollback) {
            match stage.status {
                StageStatus::Success | StageStatus::Skipped => {
                    last_stage = Some(stage.clone());
                    continue;
                }
                StageStatus::Exited => {
                    last_stage = Some(stage.clone());
                    break;
                }
                StageStatus::Failure => {
                    last_stage = Some(stage.clone());
                    status = DeploymentStatus::Failure;
                    reason = format!("Failed while executing stage {}", stage.id);
                    break;
                }
                StageStatus::Cancelled => {
                    last_stage = Some(stage.clone());
                    status = DeploymentStatus::Cancelled;
                    reason = format!(
                        "Cancelled by {} while executing stage {}",
                        self.cancel_commander(),
                        stage.id
                    );
                    break;
                }
                StageStatus::NotStarted | StageStatus::Running => {}
            }

            last_stage = Some(stage.clone());
            let result = self.execute_stage(&self.signal, stage, sources).await;

            if let Err(e) = self
                .deps
                .commands
                .report_commands_handled(&self.deployment.id, &stage.id)
                .await
            {
                warn!(deployment_id = %self.deployment.id, stage_id = %stage.id, "Failed to report stage commands handled: {}", e);
            }

            match self.signal.signal() {
                StopSignalType::Terminate => return None,
                StopSignalType::Timeout => {
                    status = DeploymentStatus::Failure;
                    reason = format!("Timed out while executing stage {}", stage.id);
                    break;
                }
                StopSignalType::Cancel => {
                    status = DeploymentStatus::Cancelled;
                    reason = format!(
                        "Cancelled by {} while executing stage {}",
                        self.cancel_commander(),
                        stage.id
                    );
                    break;
                }
                StopSignalType::None => {}
            }

            match result {
                StageStatus::Success | StageStatus::Skipped => {}
                StageStatus::Exited => break,
                StageStatus::Cancelled => {
                    status = DeploymentStatus::Cancelled;
                    reason = format!(
                        "Cancelled by {} while executing stage {}",
                        self.cancel_commander(),
                        stage.id
                    );
                    break;
                }
                _ => {
                    status = DeploymentStatus::Failure;
                    reason = format!("Failed while executing stage {}", stage.id);
                    break;
                }
            }
        }

        if status != DeploymentStatus::Success && self.should_rollback() {
            let mut rollback_stages: Vec<PipelineStage> = self
                .deployment
                .stages
                .iter()
                .filter(|s| s.rollback)
                .cloned()
                .collect();
            rollback_stages.sort_by_key(|s| s.index);

            if !rollback_stages.is_empty() {
                self.rollback(rollback_stages, last_stage.as_ref(), sources)
                    .await?;
            }
        }

        Some((status, reason))
    }

    fn should_rollback(&self) -> bool {
        let held = self.cancel_command.lock();
        !held
            .as_ref()
            .and_then(|c| c.command.cancel_deployment.as_ref())
            .map(|c| c.force_no_rollback)
            .unwrap_or(false)
    }

    async fn rollback(
        &self,
        stages: Vec<PipelineStage>,
        last_stage: Option<&PipelineStage>,
        sources: &Sources,
    ) -> Option<()> {
        info!(deployment_id = %self.deployment.id, "Start rolling back the deployment");
        if let Err(e) = self
            .deps
            .reporter
            .status_changed(DeploymentStatus::RollingBack, "Rolling back the deployment")
            .await
        {
            error!(deployment_id = %self.deployment.id, "Failed to report rolling back: {}", e);
        }
        *self.status.lock() = DeploymentStatus::RollingBack;

        for mut stage in stages {
            if let Some(last) = last_stage {
                stage.requires = vec![last.id.clone()];
            }
            self.execute_stage(&self.rollback_signal, &stage, sources)
                .await;
            if self.rollback_signal.terminated() {
                return None;
            }
        }
        Some(())
    }

    /// Execute one stage and report its status.
    ///
    /// Returns the final status, which is the original status when the
    /// scheduler was terminated.
    async fn execute_stage(
        &self,
        signal: &StopSignal,
        stage: &PipelineStage,
        sources: &Sources,
    ) -> StageStatus {
        let original = stage.status;

        let skip = should_skip_rollback(stage, &self.stage_statuses.lock());
        if skip {
            debug!(deployment_id = %self.deployment.id, stage_id = %stage.id, "Skipped rollback stage since its base stage did not run");
            self.report_stage(stage, StageStatus::Skipped, "The base stage was not executed")
                .await;
            return StageStatus::Skipped;
        }

        let target = match sources.target.get().await {
            Ok(ds) => ds,
            Err(e) => {
                let reason = format!("Failed to prepare target deploy source data ({})", e);
                self.report_stage(stage, StageStatus::Failure, &reason).await;
                return StageStatus::Failure;
            }
        };
        let running = match &sources.running {
            Some(provider) => match provider.get().await {
                Ok(ds) => Some(ds),
                Err(e) => {
                    let reason = format!("Failed to prepare running deploy source data ({})", e);
                    self.report_stage(stage, StageStatus::Failure, &reason).await;
                    return StageStatus::Failure;
                }
            },
            None => None,
        };

        let plugin = match self.deps.plugins.get_by_stage(&stage.name) {
            Ok(plugin) => plugin,
            Err(e) => {
                self.report_stage(stage, StageStatus::Failure, &e.to_string())
                    .await;
                return StageStatus::Failure;
            }
        };

        if original == StageStatus::NotStarted {
            self.report_stage(stage, StageStatus::Running, "").await;
        }

        let input = ExecuteStageInput {
            deployment: self.deployment.clone(),
            stage: stage.clone(),
            stage_config: stage_config(&sources.spec, stage),
            running_deployment_source: running.as_ref().map(DeploySource::to_plugin_source),
            target_deployment_source: target.to_plugin_source(),
        };

        let result = tokio::select! {
            r = plugin.execute_stage(input) => match r {
                Ok(status) => status,
                Err(e) => {
                    error!(deployment_id = %self.deployment.id, stage_id = %stage.id, plugin = plugin.name(), "Failed to execute stage: {}", e);
                    StageStatus::Failure
                }
            },
            kind = signal.wait() => {
                debug!(deployment_id = %self.deployment.id, stage_id = %stage.id, ?kind, "Stage interrupted by stop signal");
                original
            }
        };

        let kind = signal.signal();
        let status = determine_stage_status(kind, original, result);
        if kind == StopSignalType::Terminate {
            return status;
        }

        self.report_stage(stage, status, "").await;
        status
    }

    async fn report_stage(&self, stage: &PipelineStage, status: StageStatus, reason: &str) {
        self.set_stage_status(&stage.id, status);
        if let Err(e) = self.deps.reporter.stage_changed(stage, status, reason).await {
            error!(deployment_id = %self.deployment.id, stage_id = %stage.id, "Failed to report stage status: {}", e);
        }
    }

    async fn complete(&self, status: DeploymentStatus, reason: &str) {
        *self.status.lock() = status;
        info!(deployment_id = %self.deployment.id, ?status, "Deployment completed: {}", reason);
        if let Err(e) = self
            .deps
            .reporter
            .completed(status, reason, self.stage_statuses())
            .await
        {
            error!(deployment_id = %self.deployment.id, "Failed to report deployment completion: {}", e);
        }
    }

    async fn report_most_recent_success(&self) {
        let d = &self.deployment;
        let req = api::ReportApplicationMostRecentDeploymentRequest {
            application_id: d.application_id.clone(),
            status: DeploymentStatus::Success,
            deployment: ApplicationDeploymentReference {
                deployment_id: d.id.clone(),
                trigger: d.trigger.clone(),
                summary: d.summary.clone(),
                version: d.version.clone(),
                versions: d.versions.clone(),
                config_filename: d.git_path.config_filename_or_default().to_string(),
                started_at: d.created_at,
                completed_at: now_unix(),
            },
        };
        let result = self.deps.reporter.most_recent_successful(req).await;
        if let Err(e) = result {
            error!(deployment_id = %d.id, "Failed to report most recent successful deployment: {}", e);
        }
    }
}

/// Raw configuration of the pipeline stage a planned stage was built from
fn stage_config(spec: &ApplicationSpec, stage: &PipelineStage) -> Vec<u8> {
    let Ok(index) = usize::try_from(stage.index) else {
        return Vec::new();
    };
    match spec.pipeline_stages().get(index) {
        Some(config) if config.name == stage.name => {
            spec.stage_config_bytes(index).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}
