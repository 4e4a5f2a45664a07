//! Builds plan previews for a pull request like change

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use controlplane_api::{Application, BuildPlanPreview, SyncStrategy};
use plugin_api::deployment::PlanPluginInput;

use crate::controller::planner::{build_stages, determine_strategy};
use crate::deploysource::{DeploySource, LocalCloner, ProviderFactory};
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::git::{GitClient, Repo};
use crate::plugin::PluginRegistry;
use crate::storage::settings::RepositorySettings;
use crate::store::ApplicationStore;
use crate::trigger::determiner::touched_by_changes;
use crate::trigger::{build_deployment, load_spec, TriggerRequest};

/// Applications planned by one worker
const APPS_PER_WORKER: usize = 3;
const MAX_WORKERS: usize = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Output of a plan preview command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanPreviewCommandResult {
    pub command_id: String,
    pub piped_id: String,
    pub results: Vec<ApplicationPlanPreviewResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationPlanPreviewResult {
    pub application_id: String,
    pub application_name: String,
    pub application_kind: String,
    pub labels: BTreeMap<String, String>,
    pub sync_strategy: SyncStrategy,
    pub plan_summary: String,
    pub plan_details: String,
    pub plugin_names: Vec<String>,
    pub error: String,
}

/// Number of workers planning `apps` applications
pub fn worker_count(apps: usize) -> usize {
    apps.div_ceil(APPS_PER_WORKER).clamp(1, MAX_WORKERS)
}

pub struct Builder {
    piped_id: String,
    git: Arc<dyn GitClient>,
    repositories: Vec<RepositorySettings>,
    applications: Arc<ApplicationStore>,
    plugins: Arc<PluginRegistry>,
    sources: Arc<ProviderFactory>,
    workspace: Dir,
}

impl Builder {
    pub fn new(
        piped_id: &str,
        git: Arc<dyn GitClient>,
        repositories: Vec<RepositorySettings>,
        applications: Arc<ApplicationStore>,
        plugins: Arc<PluginRegistry>,
        sources: Arc<ProviderFactory>,
        workspace: Dir,
    ) -> Self {
        Self {
            piped_id: piped_id.to_string(),
            git,
            repositories,
            applications,
            plugins,
            sources,
            workspace,
        }
    }

    /// Plan every application touched by merging the head into the base
    pub async fn build(&self, command_id: &str, req: &BuildPlanPreview) -> Result<PlanPreviewCommandResult, AgentError> {
        let timeout = match req.timeout {
            t if t > 0 => Duration::from_secs(t as u64),
            _ => DEFAULT_TIMEOUT,
        };
        let dir = self.workspace.create_temp_dir("planpreview").await?;
        let result = tokio::time::timeout(timeout, self.build_in(&dir, req))
            .await
            .unwrap_or_else(|_| Err(AgentError::Cancelled("timed out while building plan preview".to_string())));
        if let Err(e) = dir.delete().await {
            warn!(command_id, "Failed to clean plan preview workspace: {}", e);
        }

        Ok(PlanPreviewCommandResult {
            command_id: command_id.to_string(),
            piped_id: self.piped_id.clone(),
            results: result?,
        })
    }

    async fn build_in(&self, dir: &Dir, req: &BuildPlanPreview) -> Result<Vec<ApplicationPlanPreviewResult>, AgentError> {
        let setting = self
            .repositories
            .iter()
            .find(|r| r.repo_id == req.repository_id)
            .ok_or_else(|| AgentError::NotFound(format!("repository {} is not configured", req.repository_id)))?;

        let repo = self
            .git
            .clone_repo(&setting.repo_id, &setting.remote, &req.head_branch, dir.subdir("repo"))
            .await?;
        if !req.head_commit.is_empty() {
            repo.checkout(&req.head_commit).await?;
        }
        let message = format!("Merge {} into {}", req.base_branch, req.head_branch);
        repo.merge_remote_branch(&req.base_branch, &message).await?;
        let changed = repo.changed_files("FETCH_HEAD", "HEAD").await?;

        let mut apps = Vec::new();
        for app in self.applications.list_by_repo_id(&req.repository_id) {
            if app.disabled {
                continue;
            }
            let on_commit = match load_spec(&repo, &app).await {
                Ok(spec) => spec.trigger.on_commit,
                Err(_) => Default::default(),
            };
            if touched_by_changes(&app.git_path.path, &on_commit, &changed) {
                apps.push(app);
            }
        }
        info!(repo_id = %req.repository_id, "Building plan preview for {} applications", apps.len());

        let workers = worker_count(apps.len());
        let results = stream::iter(apps)
            .map(|app| {
                let repo = repo.clone();
                let branch = req.head_branch.clone();
                async move { self.plan(dir, repo, &branch, app).await }
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }

    async fn plan(&self, dir: &Dir, repo: Repo, branch: &str, app: Application) -> ApplicationPlanPreviewResult {
        let mut result = ApplicationPlanPreviewResult {
            application_id: app.id.clone(),
            application_name: app.name.clone(),
            application_kind: app.kind.clone(),
            labels: app.labels.clone(),
            ..Default::default()
        };
        if let Err(e) = self.plan_into(dir, repo, branch, &app, &mut result).await {
            result.error = e.to_string();
        }
        result
    }

    async fn plan_into(
        &self,
        dir: &Dir,
        repo: Repo,
        branch: &str,
        app: &Application,
        result: &mut ApplicationPlanPreviewResult,
    ) -> Result<(), AgentError> {
        let head = repo.latest_commit().await?;
        let target = self
            .sources
            .provider_with(
                dir.subdir(format!("{}-target", app.id)),
                &app.git_path,
                Arc::new(LocalCloner::new(repo, &head.hash)),
            )
            .get()
            .await?;

        let running = match &app.most_recently_successful_deployment {
            Some(last) if !last.trigger.commit.hash.is_empty() => {
                let mut git_path = app.git_path.clone();
                git_path.config_filename = last.config_filename.clone();
                let provider = self.sources.provider(
                    dir.subdir(format!("{}-running", app.id)),
                    &git_path,
                    &last.trigger.commit.hash,
                )?;
                Some(provider.get().await?)
            }
            _ => None,
        };

        let spec = &target.application_spec;
        let plugins = self.plugins.plugins_for(spec)?;
        result.plugin_names = plugins.iter().map(|p| p.name().to_string()).collect();

        let req = TriggerRequest {
            commit: head,
            branch: branch.to_string(),
            ..Default::default()
        };
        let deployment = build_deployment(app, &req);
        let input = PlanPluginInput {
            deployment: deployment.clone(),
            running_deployment_source: running.as_ref().map(DeploySource::to_plugin_source),
            target_deployment_source: target.to_plugin_source(),
        };

        let decision = determine_strategy(&deployment, spec, running.is_some(), &plugins, &input).await;
        let stages = build_stages(decision.strategy, spec, &self.plugins, &plugins).await?;
        result.sync_strategy = decision.strategy;
        result.plan_summary = decision.summary;

        let mut details = Vec::new();
        for plugin in &plugins {
            match plugin.get_plan_preview(input.clone()).await {
                Ok(previews) => {
                    for p in previews {
                        let body = if p.no_change {
                            "No changes".to_string()
                        } else {
                            String::from_utf8_lossy(&p.details).into_owned()
                        };
                        details.push(format!("# {} ({})\n{}", p.deploy_target, p.summary, body));
                    }
                }
                Err(e) if e.is_unimplemented() => {}
                Err(e) => return Err(e),
            }
        }
        if details.is_empty() {
            let names: Vec<&str> = stages.iter().filter(|s| !s.rollback).map(|s| s.name.as_str()).collect();
            details.push(format!("Stages: {}", names.join(" -> ")));
        }
        result.plan_details = details.join("\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(0), 1);
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(3), 1);
        assert_eq!(worker_count(4), 2);
        assert_eq!(worker_count(10), 4);
        assert_eq!(worker_count(1000), 100);
    }

    #[test]
    fn test_result_json() {
        let result = PlanPreviewCommandResult {
            command_id: "cmd-1".to_string(),
            piped_id: "piped-1".to_string(),
            results: vec![ApplicationPlanPreviewResult {
                application_id: "app-1".to_string(),
                sync_strategy: SyncStrategy::QuickSync,
                ..Default::default()
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["commandId"], "cmd-1");
        assert_eq!(json["results"][0]["applicationId"], "app-1");
        assert_eq!(json["results"][0]["syncStrategy"], "QUICK_SYNC");
    }
}
