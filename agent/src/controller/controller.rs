//! Deployment controller
//!
//! Scans the deployment store every tick and keeps at most one planner and
//! one scheduler per application. Each worker runs in its own task and owns
//! a fresh directory under the workspace root.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use controlplane_api::service as api;
use controlplane_api::{Deployment, DeploymentStatus};

use crate::cache::ttl::TtlCache;
use crate::controller::planner::{LastSuccessful, Planner, PlannerDeps};
use crate::controller::reporter::DeploymentReporter;
use crate::controller::scheduler::{Scheduler, SchedulerDeps};
use crate::deploysource::ProviderFactory;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::metadata::Registry as MetadataRegistry;
use crate::plugin::PluginRegistry;
use crate::rpc::{ControlPlane, Retry};
use crate::store::{CommandStore, DeploymentStore};

/// Controller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between two ticks
    pub sync_interval: Duration,
    /// How long finished deployment ids are remembered
    pub done_ttl: Duration,
    /// Attempts for most recent deployment lookups
    pub lookup_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(10),
            done_ttl: Duration::from_secs(3600),
            lookup_attempts: 3,
        }
    }
}

/// Collaborators shared by every worker
pub struct ControllerDeps {
    pub control_plane: Arc<dyn ControlPlane>,
    pub deployments: Arc<DeploymentStore>,
    pub commands: Arc<CommandStore>,
    pub plugins: Arc<PluginRegistry>,
    pub sources: Arc<ProviderFactory>,
    pub metadata: Arc<MetadataRegistry>,
    /// Root of the per-deployment working directories
    pub workspace: Dir,
}

struct Worker<T> {
    worker: Arc<T>,
    handle: JoinHandle<()>,
}

/// A live planner or scheduler
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub application_id: String,
    pub deployment_id: String,
    pub status: DeploymentStatus,
}

/// Point-in-time view of the controller, served on the admin port
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub planners: Vec<WorkerInfo>,
    pub schedulers: Vec<WorkerInfo>,
    pub done_planners: usize,
    pub done_schedulers: usize,
}

pub struct Controller {
    deps: ControllerDeps,
    options: Options,
    /// Keyed by application id
    planners: Mutex<HashMap<String, Worker<Planner>>>,
    /// Keyed by application id
    schedulers: Mutex<HashMap<String, Worker<Scheduler>>>,
    done_planners: TtlCache<String, DeploymentStatus>,
    done_schedulers: TtlCache<String, DeploymentStatus>,
    /// Keyed by application id
    last_successful: TtlCache<String, LastSuccessful>,
    /// Bounds the retries of every report made by the workers
    reports: CancellationToken,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `fut`, turning a panic into its message.
///
/// Workers wrap their body with this so status and workspace cleanup still
/// happen after a panic.
pub(crate) async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(panic.as_ref()))
}

impl Controller {
    pub fn new(deps: ControllerDeps, options: Options) -> Self {
        let ttl = options.done_ttl;
        Self {
            deps,
            options,
            planners: Mutex::new(HashMap::new()),
            schedulers: Mutex::new(HashMap::new()),
            done_planners: TtlCache::new(ttl),
            done_schedulers: TtlCache::new(ttl),
            last_successful: TtlCache::new(ttl),
            reports: CancellationToken::new(),
        }
    }

    /// Tick until `ctx` is cancelled, then terminate and wait for every worker
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Controller starting...");
        let mut ticker = tokio::time::interval(self.options.sync_interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => self.sync().await,
            }
        }

        info!("Controller shutting down, waiting for workers...");
        self.shutdown().await;
        self.reports.cancel();
        info!("Controller stopped");
        Ok(())
    }

    async fn shutdown(&self) {
        let mut handles = Vec::new();
        for (_, w) in self.planners.lock().drain() {
            w.worker.terminate();
            handles.push(w.handle);
        }
        for (_, w) in self.schedulers.lock().drain() {
            w.worker.terminate();
            handles.push(w.handle);
        }
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker ended abnormally: {}", e);
            }
        }
    }

    /// One controller tick
    pub async fn sync(&self) {
        self.done_planners.evict_expired();
        self.done_schedulers.evict_expired();
        self.last_successful.evict_expired();

        self.sync_schedulers().await;
        self.sync_planners().await;
        self.check_commands();
    }

    /// Whether no planner or scheduler is alive
    pub fn is_idle(&self) -> bool {
        self.planners.lock().values().all(|w| w.handle.is_finished())
            && self.schedulers.lock().values().all(|w| w.handle.is_finished())
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let info = |app: &String, id: &str, status| WorkerInfo {
            application_id: app.clone(),
            deployment_id: id.to_string(),
            status,
        };
        ControllerSnapshot {
            planners: self
                .planners
                .lock()
                .iter()
                .map(|(app, w)| info(app, w.worker.id(), w.worker.status()))
                .collect(),
            schedulers: self
                .schedulers
                .lock()
                .iter()
                .map(|(app, w)| info(app, w.worker.id(), w.worker.status()))
                .collect(),
            done_planners: self.done_planners.len(),
            done_schedulers: self.done_schedulers.len(),
        }
    }

    fn reporter(&self, deployment_id: &str) -> DeploymentReporter {
        DeploymentReporter::new(
            self.deps.control_plane.clone(),
            deployment_id,
            self.reports.clone(),
        )
    }

    async fn sync_schedulers(&self) {
        let finished: Vec<(String, Arc<Scheduler>)> = {
            let mut schedulers = self.schedulers.lock();
            let done: Vec<String> = schedulers
                .iter()
                .filter(|(_, w)| w.handle.is_finished())
                .map(|(app, _)| app.clone())
                .collect();
            done.into_iter()
                .filter_map(|app| schedulers.remove(&app).map(|w| (app, w.worker)))
                .collect()
        };

        for (app_id, scheduler) in finished {
            let status = scheduler.status();
            debug!(deployment_id = %scheduler.id(), ?status, "Harvested scheduler");
            self.done_schedulers.insert(scheduler.id().to_string(), status);
            self.deps.metadata.delete(scheduler.id());
            if status == DeploymentStatus::Success {
                self.last_successful.insert(
                    app_id.clone(),
                    LastSuccessful {
                        commit_hash: scheduler.commit_hash().to_string(),
                        config_filename: scheduler.config_filename().to_string(),
                    },
                );
            }
            if status.is_completed() {
                self.report_deploying(&app_id, false).await;
            }
        }

        let mut candidates = self.deps.deployments.list_planneds();
        candidates.extend(self.deps.deployments.list_runnings());

        for deployment in candidates {
            if self.done_schedulers.contains(&deployment.id) {
                continue;
            }
            if self.schedulers.lock().contains_key(&deployment.application_id) {
                continue;
            }
            if let Err(e) = self.start_scheduler(deployment.clone()).await {
                error!(deployment_id = %deployment.id, "Failed to start scheduler: {}", e);
            }
        }
    }

    async fn start_scheduler(&self, deployment: Deployment) -> Result<(), AgentError> {
        let workspace = self
            .deps
            .workspace
            .create_temp_dir(&format!("{}-scheduler", deployment.id))
            .await?;
        self.deps.metadata.register(&deployment);

        let reporter = self.reporter(&deployment.id);
        let scheduler = Arc::new(Scheduler::new(
            deployment.clone(),
            workspace,
            SchedulerDeps {
                plugins: self.deps.plugins.clone(),
                sources: self.deps.sources.clone(),
                commands: self.deps.commands.clone(),
                reporter,
            },
        ));

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };
        info!(deployment_id = %deployment.id, application_id = %deployment.application_id, "Started scheduler");
        self.schedulers.lock().insert(
            deployment.application_id.clone(),
            Worker {
                worker: scheduler,
                handle,
            },
        );
        Ok(())
    }

    async fn sync_planners(&self) {
        let finished: Vec<(String, Arc<Planner>)> = {
            let mut planners = self.planners.lock();
            let done: Vec<String> = planners
                .iter()
                .filter(|(_, w)| w.handle.is_finished())
                .map(|(app, _)| app.clone())
                .collect();
            done.into_iter()
                .filter_map(|app| planners.remove(&app).map(|w| (app, w.worker)))
                .collect()
        };

        for (app_id, planner) in finished {
            let status = planner.status();
            debug!(deployment_id = %planner.id(), ?status, "Harvested planner");
            self.done_planners.insert(planner.id().to_string(), status);
            self.deps.metadata.delete(planner.id());
            if status.is_completed() {
                self.report_deploying(&app_id, false).await;
            }
        }

        // Oldest pending deployment of each application
        let mut pending_by_app: Vec<Deployment> = Vec::new();
        for deployment in self.deps.deployments.list_pendings() {
            if self.done_planners.contains(&deployment.id) {
                continue;
            }
            match pending_by_app
                .iter_mut()
                .find(|d| d.application_id == deployment.application_id)
            {
                Some(existing) if existing.trigger.timestamp > deployment.trigger.timestamp => {
                    *existing = deployment;
                }
                Some(_) => {}
                None => pending_by_app.push(deployment),
            }
        }

        for deployment in pending_by_app {
            let app_id = deployment.application_id.clone();
            if self.planners.lock().contains_key(&app_id) {
                debug!(application_id = %app_id, "Skipped planning since a planner is running");
                continue;
            }
            if self.schedulers.lock().contains_key(&app_id) {
                debug!(application_id = %app_id, "Skipped planning since a scheduler is running");
                continue;
            }

            match self.should_start_planning(&deployment).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(deployment_id = %deployment.id, "Failed to check whether the deployment is plannable: {}", e);
                    continue;
                }
            }

            let last_successful = match self.last_successful_of(&app_id).await {
                Ok(last) => last,
                Err(e) => {
                    warn!(application_id = %app_id, "Failed to get the most recent successful deployment: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.start_planner(deployment.clone(), last_successful).await {
                error!(deployment_id = %deployment.id, "Failed to start planner: {}", e);
                continue;
            }
            self.report_deploying(&app_id, true).await;
        }
    }

    /// Whether planning may start now. A chain can also cancel the deployment.
    async fn should_start_planning(&self, deployment: &Deployment) -> Result<bool, AgentError> {
        if !deployment.is_in_chain() {
            return Ok(true);
        }
        let resp = self
            .deps
            .control_plane
            .in_chain_deployment_plannable(api::InChainDeploymentPlannableRequest {
                deployment_id: deployment.id.clone(),
                deployment_chain_id: deployment.deployment_chain_id.clone(),
                deployment_chain_block_index: deployment.deployment_chain_block_index,
            })
            .await?;

        if resp.cancel {
            info!(deployment_id = %deployment.id, "Cancelling deployment in chain: {}", resp.cancel_reason);
            self.reporter(&deployment.id)
                .completed(DeploymentStatus::Cancelled, &resp.cancel_reason, Default::default())
                .await?;
            self.done_planners
                .insert(deployment.id.clone(), DeploymentStatus::Cancelled);
            return Ok(false);
        }
        Ok(resp.plannable)
    }

    async fn last_successful_of(&self, app_id: &str) -> Result<Option<LastSuccessful>, AgentError> {
        if let Some(last) = self.last_successful.get(&app_id.to_string()) {
            return Ok(Some(last));
        }

        let req = api::GetApplicationMostRecentDeploymentRequest {
            application_id: app_id.to_string(),
            status: DeploymentStatus::Success,
        };
        let result = Retry::new(self.options.lookup_attempts)
            .run(&self.reports, "GetApplicationMostRecentDeployment", || {
                self.deps
                    .control_plane
                    .get_application_most_recent_deployment(req.clone())
            })
            .await;

        match result {
            Ok(reference) => {
                let last = LastSuccessful {
                    commit_hash: reference.trigger.commit.hash,
                    config_filename: reference.config_filename,
                };
                self.last_successful.insert(app_id.to_string(), last.clone());
                Ok(Some(last))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn start_planner(
        &self,
        deployment: Deployment,
        last_successful: Option<LastSuccessful>,
    ) -> Result<(), AgentError> {
        let workspace = self
            .deps
            .workspace
            .create_temp_dir(&format!("{}-planner", deployment.id))
            .await?;
        self.deps.metadata.register(&deployment);

        let reporter = self.reporter(&deployment.id);
        let planner = Arc::new(Planner::new(
            deployment.clone(),
            last_successful,
            workspace,
            PlannerDeps {
                plugins: self.deps.plugins.clone(),
                sources: self.deps.sources.clone(),
                reporter,
            },
        ));

        let handle = {
            let planner = planner.clone();
            tokio::spawn(async move { planner.run().await })
        };
        info!(deployment_id = %deployment.id, application_id = %deployment.application_id, "Started planner");
        self.planners.lock().insert(
            deployment.application_id.clone(),
            Worker {
                worker: planner,
                handle,
            },
        );
        Ok(())
    }

    /// Forward cancel commands to the worker holding the deployment
    fn check_commands(&self) {
        for command in self.deps.commands.list_deployment_commands() {
            if !command.command.is_cancel_deployment() {
                continue;
            }
            let deployment_id = command
                .command
                .cancel_deployment
                .as_ref()
                .map(|c| c.deployment_id.clone())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| command.command.deployment_id.clone());

            if let Some(w) = self
                .planners
                .lock()
                .values()
                .find(|w| w.worker.id() == deployment_id)
            {
                info!(deployment_id = %deployment_id, "Forwarding cancel command to planner");
                w.worker.cancel(command);
                continue;
            }
            if let Some(w) = self
                .schedulers
                .lock()
                .values()
                .find(|w| w.worker.id() == deployment_id)
            {
                info!(deployment_id = %deployment_id, "Forwarding cancel command to scheduler");
                w.worker.cancel(command);
            }
        }
    }

    async fn report_deploying(&self, app_id: &str, deploying: bool) {
        let req = api::ReportApplicationDeployingStatusRequest {
            application_id: app_id.to_string(),
            deploying,
        };
        let result = Retry::new(self.options.lookup_attempts)
            .run(&self.reports, "ReportApplicationDeployingStatus", || {
                self.deps
                    .control_plane
                    .report_application_deploying_status(req.clone())
            })
            .await;
        if let Err(e) = result {
            warn!(application_id = %app_id, deploying, "Failed to report application deploying status: {}", e);
        }
    }
}
