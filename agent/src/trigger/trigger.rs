//! Creates deployments for new commits and sync commands

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use controlplane_api::service as api;
use controlplane_api::{Application, CommandStatus, Deployment, SyncStrategy};

use crate::config::{ApplicationConfig, ApplicationSpec};
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::git::{CommitInfo, Repo, RepoSet};
use crate::rpc::ControlPlane;
use crate::store::{ApplicationStore, CommandStore, ReportableCommand};
use crate::trigger::deployment::{build_deployment, chain_matchers, TriggerRequest};
use crate::trigger::determiner::{out_of_sync_for_long, strategy_by_commit, touched_by_changes};
use crate::utils::now_unix;

/// Metadata key carrying the id of the deployment created for a command
pub const TRIGGERED_DEPLOYMENT_ID_KEY: &str = "TriggeredDeploymentID";

/// Trigger options
#[derive(Debug, Clone)]
pub struct Options {
    /// How often repositories are checked for new commits
    pub commit_interval: Duration,
    /// How often sync commands are handled
    pub command_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            commit_interval: Duration::from_secs(60),
            command_interval: Duration::from_secs(10),
        }
    }
}

pub struct Trigger {
    control_plane: Arc<dyn ControlPlane>,
    applications: Arc<ApplicationStore>,
    commands: Arc<CommandStore>,
    repos: RepoSet,
    options: Options,
    /// application id -> last triggered commit hash
    last_triggered: Mutex<HashMap<String, String>>,
}

impl Trigger {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        applications: Arc<ApplicationStore>,
        commands: Arc<CommandStore>,
        repos: RepoSet,
        options: Options,
    ) -> Self {
        Self {
            control_plane,
            applications,
            commands,
            repos,
            options,
            last_triggered: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Trigger starting...");
        self.repos.prepare().await;

        let mut commit_ticker = tokio::time::interval(self.options.commit_interval);
        let mut command_ticker = tokio::time::interval(self.options.command_interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Trigger shutting down...");
                    return Ok(());
                }
                _ = command_ticker.tick() => self.check_commands().await,
                _ = commit_ticker.tick() => self.check_commits().await,
            }
        }
    }

    /// Create a deployment for every sync command
    pub async fn check_commands(&self) {
        for command in self.commands.list_application_commands() {
            let c = &command.command;
            if !c.is_sync_application() && !c.is_chain_sync_application() {
                continue;
            }
            match self.trigger_by_command(&command).await {
                Ok(deployment_id) => {
                    let mut metadata = BTreeMap::new();
                    metadata.insert(TRIGGERED_DEPLOYMENT_ID_KEY.to_string(), deployment_id);
                    if let Err(e) = command
                        .report(CommandStatus::CommandSucceeded, metadata, Vec::new())
                        .await
                    {
                        error!(command_id = %c.id, "Failed to report sync command: {}", e);
                    }
                }
                Err(e) => {
                    warn!(command_id = %c.id, application_id = %c.application_id, "Failed to trigger deployment by command: {}", e);
                    if let Err(err) = command
                        .report(
                            CommandStatus::CommandFailed,
                            BTreeMap::new(),
                            e.to_string().into_bytes(),
                        )
                        .await
                    {
                        error!(command_id = %c.id, "Failed to report sync command: {}", err);
                    }
                }
            }
        }
    }

    async fn trigger_by_command(&self, command: &ReportableCommand) -> Result<String, AgentError> {
        let c = &command.command;
        let app_id = match (&c.sync_application, &c.chain_sync_application) {
            (Some(s), _) if !s.application_id.is_empty() => s.application_id.as_str(),
            (_, Some(s)) if !s.application_id.is_empty() => s.application_id.as_str(),
            _ => c.application_id.as_str(),
        };
        let app = self.applications.get(app_id).ok_or_else(|| {
            AgentError::NotFound(format!("application {} was not found", app_id))
        })?;
        let (repo, head) = self.repos.pull(&app.git_path.repo_id).await?;
        let spec = load_spec(&repo, &app).await?;

        let mut req = TriggerRequest {
            commit: head,
            branch: repo.branch().to_string(),
            commander: c.commander.clone(),
            ..Default::default()
        };
        if let Some(sync) = &c.sync_application {
            req.sync_strategy = sync.sync_strategy;
        }
        if let Some(chain) = &c.chain_sync_application {
            req.sync_strategy = chain.sync_strategy;
            req.deployment_chain_id = chain.deployment_chain_id.clone();
            req.deployment_chain_block_index = chain.block_index;
        }
        if req.sync_strategy != SyncStrategy::Auto {
            req.strategy_summary = format!(
                "Sync with the {} strategy requested by {}",
                strategy_name(req.sync_strategy),
                c.commander
            );
        }

        let deployment = build_deployment(&app, &req);
        self.create(&deployment, &spec).await?;
        Ok(deployment.id)
    }

    /// Check every repository for commits worth deploying
    pub async fn check_commits(&self) {
        for setting in self.repos.settings().to_vec() {
            if let Err(e) = self.check_repository(&setting.repo_id).await {
                error!(repo_id = %setting.repo_id, "Failed to check repository for new commits: {}", e);
            }
        }
    }

    async fn check_repository(&self, repo_id: &str) -> Result<(), AgentError> {
        let apps: Vec<Application> = self
            .applications
            .list_by_repo_id(repo_id)
            .into_iter()
            .filter(|a| !a.disabled)
            .collect();
        if apps.is_empty() {
            return Ok(());
        }

        let (repo, head) = self.repos.pull(repo_id).await?;
        debug!(repo_id, commit = %head.hash, "Checking applications for new commits");

        for app in apps {
            let spec = match load_spec(&repo, &app).await {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(application_id = %app.id, "Failed to load application config: {}", e);
                    continue;
                }
            };
            match self.should_trigger(&repo, &head, &app, &spec).await {
                Ok(Some(reason)) => {
                    info!(application_id = %app.id, commit = %head.hash, "Triggering deployment: {}", reason);
                    let (sync_strategy, strategy_summary) =
                        strategy_by_commit(&spec.commit_matcher, &head.message);
                    let req = TriggerRequest {
                        commit: head.clone(),
                        branch: repo.branch().to_string(),
                        sync_strategy,
                        strategy_summary,
                        ..Default::default()
                    };
                    let deployment = build_deployment(&app, &req);
                    if let Err(e) = self.create(&deployment, &spec).await {
                        error!(application_id = %app.id, "Failed to create deployment: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(application_id = %app.id, "Failed to determine whether to trigger: {}", e),
            }
        }
        Ok(())
    }

    fn last_triggered_commit(&self, app: &Application) -> Option<String> {
        if let Some(hash) = self.last_triggered.lock().get(&app.id) {
            return Some(hash.clone());
        }
        app.most_recently_triggered_deployment
            .as_ref()
            .map(|d| d.trigger.commit.hash.clone())
            .filter(|h| !h.is_empty())
    }

    /// The reason to deploy `app` at `head`, if there is one
    async fn should_trigger(
        &self,
        repo: &Repo,
        head: &CommitInfo,
        app: &Application,
        spec: &ApplicationSpec,
    ) -> Result<Option<&'static str>, AgentError> {
        let on_commit = &spec.trigger.on_commit;
        let last = self.last_triggered_commit(app);

        if !on_commit.disabled {
            match &last {
                None => return Ok(Some("first deployment of the application")),
                Some(last) if last != &head.hash => {
                    let changed = repo.changed_files(last, &head.hash).await?;
                    if touched_by_changes(&app.git_path.path, on_commit, &changed) {
                        return Ok(Some("new commit touched the application"));
                    }
                }
                Some(_) => {}
            }
        }

        if out_of_sync_for_long(app, &spec.trigger.on_out_of_sync, now_unix()) {
            return Ok(Some("application has been out of sync"));
        }

        // Commits that were considered do not need to be considered again
        if last.as_deref() != Some(head.hash.as_str()) && !on_commit.disabled {
            self.last_triggered.lock().insert(app.id.clone(), head.hash.clone());
        }
        Ok(None)
    }

    async fn create(&self, deployment: &Deployment, spec: &ApplicationSpec) -> Result<(), AgentError> {
        let chain = spec.chain_applications();
        if chain.is_empty() || deployment.is_in_chain() {
            self.control_plane
                .create_deployment(api::CreateDeploymentRequest {
                    deployment: deployment.clone(),
                })
                .await?;
        } else {
            self.control_plane
                .create_deployment_chain(api::CreateDeploymentChainRequest {
                    first_deployment: deployment.clone(),
                    matchers: chain_matchers(&chain),
                })
                .await?;
        }
        info!(deployment_id = %deployment.id, application_id = %deployment.application_id, "Created deployment");
        self.last_triggered.lock().insert(
            deployment.application_id.clone(),
            deployment.trigger.commit.hash.clone(),
        );
        Ok(())
    }
}

fn strategy_name(strategy: SyncStrategy) -> &'static str {
    match strategy {
        SyncStrategy::Auto => "auto",
        SyncStrategy::QuickSync => "quick sync",
        SyncStrategy::Pipeline => "pipeline",
    }
}

/// Load the application configuration from a working copy
pub async fn load_spec(repo: &Repo, app: &Application) -> Result<ApplicationSpec, AgentError> {
    let file = File::new(repo.path().join(app.git_path.config_file_path()));
    let data = file.read_bytes().await?;
    Ok(ApplicationConfig::from_bytes(&data)?.spec)
}
