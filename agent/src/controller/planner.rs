//! Planner: turns a pending deployment into a plan

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use controlplane_api::service as api;
use controlplane_api::{
    ArtifactVersion, Deployment, DeploymentStatus, GitPath, PipelineStage, SyncStrategy,
};
use plugin_api::deployment::PlanPluginInput;

use crate::config::ApplicationSpec;
use crate::controller::controller::catch_panic;
use crate::controller::reporter::DeploymentReporter;
use crate::controller::signal::{new_stop_signal, StopSignal, StopSignalHandler, StopSignalType};
use crate::deploysource::{DeploySource, ProviderFactory};
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::plugin::{PluginClient, PluginRegistry};
use crate::stageplan;
use crate::store::ReportableCommand;

/// Commit and configuration of the last successful deployment of an application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastSuccessful {
    pub commit_hash: String,
    pub config_filename: String,
}

/// A chosen sync strategy with the reason shown to users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    pub strategy: SyncStrategy,
    pub summary: String,
}

/// Decide how a deployment syncs.
///
/// Plugins are consulted in order; a plugin asking for a pipeline sync wins
/// over every quick sync verdict.
pub async fn determine_strategy(
    deployment: &Deployment,
    spec: &ApplicationSpec,
    has_last_successful: bool,
    plugins: &[Arc<dyn PluginClient>],
    input: &PlanPluginInput,
) -> StrategyDecision {
    let trigger = &deployment.trigger;
    if matches!(trigger.sync_strategy, SyncStrategy::QuickSync | SyncStrategy::Pipeline) {
        return StrategyDecision {
            strategy: trigger.sync_strategy,
            summary: trigger.strategy_summary.clone(),
        };
    }
    if !spec.has_pipeline() {
        return StrategyDecision {
            strategy: SyncStrategy::QuickSync,
            summary: "Quick sync due to the pipeline was not configured".to_string(),
        };
    }
    if spec.planner.always_use_pipeline {
        return StrategyDecision {
            strategy: SyncStrategy::Pipeline,
            summary: "Sync with the specified pipeline (alwaysUsePipeline was set)".to_string(),
        };
    }
    if !has_last_successful {
        return StrategyDecision {
            strategy: SyncStrategy::QuickSync,
            summary: "Quick sync, it seems this is the first deployment of the application"
                .to_string(),
        };
    }

    let mut quick = None;
    for plugin in plugins {
        match plugin.determine_strategy(input.clone()).await {
            Ok(Some(resp)) if resp.sync_strategy == SyncStrategy::Pipeline => {
                return StrategyDecision {
                    strategy: SyncStrategy::Pipeline,
                    summary: resp.summary,
                };
            }
            Ok(Some(resp)) if resp.sync_strategy == SyncStrategy::QuickSync => {
                quick.get_or_insert(StrategyDecision {
                    strategy: SyncStrategy::QuickSync,
                    summary: resp.summary,
                });
            }
            Ok(_) => {}
            Err(e) if e.is_unimplemented() => {}
            Err(e) => warn!(plugin = plugin.name(), "Failed to determine strategy: {}", e),
        }
    }

    quick.unwrap_or_else(|| StrategyDecision {
        strategy: SyncStrategy::Pipeline,
        summary: "Sync with the specified pipeline".to_string(),
    })
}

/// Versions reported by every plugin, or a single unknown version
pub async fn determine_versions(
    plugins: &[Arc<dyn PluginClient>],
    input: &PlanPluginInput,
) -> Vec<ArtifactVersion> {
    let mut versions = Vec::new();
    for plugin in plugins {
        match plugin.determine_versions(input.clone()).await {
            Ok(v) => versions.extend(v),
            Err(e) if e.is_unimplemented() => {}
            Err(e) => warn!(plugin = plugin.name(), "Failed to determine versions: {}", e),
        }
    }
    if versions.is_empty() {
        versions.push(ArtifactVersion::unknown());
    }
    versions
}

/// Build the stages of `strategy` for an application
pub async fn build_stages(
    strategy: SyncStrategy,
    spec: &ApplicationSpec,
    registry: &PluginRegistry,
    plugins: &[Arc<dyn PluginClient>],
) -> Result<Vec<PipelineStage>, AgentError> {
    let auto_rollback = spec.planner.auto_rollback;
    match strategy {
        SyncStrategy::Pipeline => {
            stageplan::build_pipeline_sync_stages(registry, spec, auto_rollback).await
        }
        _ => stageplan::build_quick_sync_stages(plugins, auto_rollback).await,
    }
}

pub fn versions_summary(versions: &[ArtifactVersion]) -> String {
    versions
        .iter()
        .map(|v| v.version.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct PlannerDeps {
    pub plugins: Arc<PluginRegistry>,
    pub sources: Arc<ProviderFactory>,
    pub reporter: DeploymentReporter,
}

/// Plans one deployment, then exits
pub struct Planner {
    deployment: Deployment,
    last_successful: Option<LastSuccessful>,
    workspace: Dir,
    deps: PlannerDeps,
    signal: StopSignal,
    handler: StopSignalHandler,
    cancel_tx: Mutex<Option<oneshot::Sender<ReportableCommand>>>,
    cancel_rx: Mutex<Option<oneshot::Receiver<ReportableCommand>>>,
    status: Mutex<DeploymentStatus>,
}

enum Outcome {
    Planned,
    Failed(String),
}

impl Planner {
    pub fn new(
        deployment: Deployment,
        last_successful: Option<LastSuccessful>,
        workspace: Dir,
        deps: PlannerDeps,
    ) -> Self {
        let (signal, handler) = new_stop_signal();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let status = deployment.status;
        Self {
            deployment,
            last_successful,
            workspace,
            deps,
            signal,
            handler,
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx: Mutex::new(Some(cancel_rx)),
            status: Mutex::new(status),
        }
    }

    pub fn id(&self) -> &str {
        &self.deployment.id
    }

    pub fn status(&self) -> DeploymentStatus {
        *self.status.lock()
    }

    /// Deliver a cancel command. Only the first delivery has an effect.
    pub fn cancel(&self, command: ReportableCommand) {
        if let Some(tx) = self.cancel_tx.lock().take() {
            let _ = tx.send(command);
            self.handler.cancel();
        }
    }

    pub fn terminate(&self) {
        self.handler.terminate();
    }

    pub async fn run(&self) {
        info!(deployment_id = %self.deployment.id, "Start planning deployment");

        let planning = catch_panic(async {
            tokio::select! {
                outcome = self.plan() => match outcome {
                    Outcome::Planned => {
                        *self.status.lock() = DeploymentStatus::Planned;
                        info!(deployment_id = %self.deployment.id, "Planned deployment");
                    }
                    Outcome::Failed(reason) => {
                        self.complete(DeploymentStatus::Failure, &reason).await;
                    }
                },
                kind = self.signal.wait() => self.handle_signal(kind).await,
            }
        })
        .await;
        if let Err(message) = planning {
            error!(deployment_id = %self.deployment.id, "Planner panicked: {}", message);
            let reason = format!("Unexpected error occurred: {}", message);
            self.complete(DeploymentStatus::Failure, &reason).await;
        }

        if let Err(e) = self.workspace.delete().await {
            warn!(deployment_id = %self.deployment.id, "Failed to clean planner workspace: {}", e);
        }
    }

    async fn handle_signal(&self, kind: StopSignalType) {
        match kind {
            StopSignalType::Cancel => {
                let command = self.cancel_rx.lock().take().and_then(|mut rx| rx.try_recv().ok());
                let commander = command
                    .as_ref()
                    .map(|c| c.command.commander.clone())
                    .unwrap_or_default();
                self.complete(
                    DeploymentStatus::Cancelled,
                    &format!("Cancelled by {}", commander),
                )
                .await;
                if let Some(command) = command {
                    self.deps.reporter.ack_cancel(&command).await;
                }
            }
            StopSignalType::Timeout => {
                self.complete(DeploymentStatus::Failure, "Timed out while planning")
                    .await;
            }
            StopSignalType::Terminate | StopSignalType::None => {
                info!(deployment_id = %self.deployment.id, "Planner was terminated");
            }
        }
    }

    async fn complete(&self, status: DeploymentStatus, reason: &str) {
        *self.status.lock() = status;
        info!(deployment_id = %self.deployment.id, ?status, "Planner completed deployment: {}", reason);
        if let Err(e) = self
            .deps
            .reporter
            .completed(status, reason, BTreeMap::new())
            .await
        {
            error!(deployment_id = %self.deployment.id, "Failed to report deployment completion: {}", e);
        }
    }

    async fn source(&self, name: &str, git_path: &GitPath, revision: &str) -> Result<DeploySource, String> {
        let provider = self
            .deps
            .sources
            .provider(self.workspace.subdir(name), git_path, revision)
            .map_err(|e| e.to_string())?;
        provider.get().await.map_err(|e| e.to_string())
    }

    async fn plan(&self) -> Outcome {
        let deployment = &self.deployment;

        let target = match self
            .source("target", &deployment.git_path, &deployment.trigger.commit.hash)
            .await
        {
            Ok(ds) => ds,
            Err(e) => {
                return Outcome::Failed(format!(
                    "Unable to prepare application configuration source data at target commit ({})",
                    e
                ))
            }
        };

        let running = match &self.last_successful {
            Some(last) => {
                let mut git_path = deployment.git_path.clone();
                git_path.config_filename = last.config_filename.clone();
                match self.source("running", &git_path, &last.commit_hash).await {
                    Ok(ds) => Some(ds),
                    Err(e) => {
                        return Outcome::Failed(format!(
                            "Unable to prepare application configuration source data at running commit ({})",
                            e
                        ))
                    }
                }
            }
            None => None,
        };

        let spec = &target.application_spec;
        let plugins = match self.deps.plugins.plugins_for(spec) {
            Ok(p) => p,
            Err(e) => return Outcome::Failed(format!("Unable to find plugins for the application ({})", e)),
        };

        let input = PlanPluginInput {
            deployment: deployment.clone(),
            running_deployment_source: running.as_ref().map(DeploySource::to_plugin_source),
            target_deployment_source: target.to_plugin_source(),
        };

        let decision = determine_strategy(
            deployment,
            spec,
            self.last_successful.is_some(),
            &plugins,
            &input,
        )
        .await;

        let stages = match build_stages(decision.strategy, spec, &self.deps.plugins, &plugins).await {
            Ok(stages) => stages,
            Err(e) => return Outcome::Failed(format!("Unable to build deployment stages ({})", e)),
        };

        let versions = determine_versions(&plugins, &input).await;
        let last = self.last_successful.clone().unwrap_or_default();

        let req = api::ReportDeploymentPlannedRequest {
            deployment_id: deployment.id.clone(),
            summary: decision.summary.clone(),
            status_reason: "The deployment has been planned".to_string(),
            running_commit_hash: last.commit_hash,
            running_config_filename: last.config_filename,
            version: versions_summary(&versions),
            versions,
            stages,
        };
        match self.deps.reporter.planned(req).await {
            Ok(()) => Outcome::Planned,
            Err(e) => {
                error!(deployment_id = %deployment.id, "Failed to report planned deployment: {}", e);
                Outcome::Failed(format!("Unable to report the planned deployment ({})", e))
            }
        }
    }
}
