//! Reconciles application configurations in Git with the registered ones

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use controlplane_api::service::{
    ReportUnregisteredApplicationConfigurationsRequest, UpdateApplicationConfigurationsRequest,
};
use controlplane_api::{Application, ApplicationInfo};

use crate::config::{ApplicationConfig, ApplicationSpec};
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::git::{Repo, RepoSet};
use crate::rpc::ControlPlane;
use crate::store::ApplicationStore;

const CONFIG_SUFFIX: &str = ".pipecd.yaml";

#[derive(Debug, Clone)]
pub struct Options {
    pub sync_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
        }
    }
}

pub struct AppConfigReporter {
    piped_id: String,
    control_plane: Arc<dyn ControlPlane>,
    applications: Arc<ApplicationStore>,
    repos: RepoSet,
    options: Options,
    /// repo id -> last scanned commit hash
    last_scanned: Mutex<HashMap<String, String>>,
}

impl AppConfigReporter {
    pub fn new(
        piped_id: &str,
        control_plane: Arc<dyn ControlPlane>,
        applications: Arc<ApplicationStore>,
        repos: RepoSet,
        options: Options,
    ) -> Self {
        Self {
            piped_id: piped_id.to_string(),
            control_plane,
            applications,
            repos,
            options,
            last_scanned: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Application config reporter starting...");
        let mut ticker = tokio::time::interval(self.options.sync_interval);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Application config reporter shutting down...");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!("Failed to report application configurations: {}", e);
                    }
                }
            }
        }
    }

    pub fn last_scanned_commit(&self, repo_id: &str) -> Option<String> {
        self.last_scanned.lock().get(repo_id).cloned()
    }

    /// Scan every repository whose head moved since the last scan
    pub async fn scan(&self) -> Result<(), AgentError> {
        let mut heads = HashMap::new();
        for setting in self.repos.settings().to_vec() {
            match self.repos.pull(&setting.repo_id).await {
                Ok((repo, head)) => {
                    heads.insert(setting.repo_id.clone(), (repo, head.hash));
                }
                Err(e) => warn!(repo_id = %setting.repo_id, "Failed to pull repository: {}", e),
            }
        }

        let changed: Vec<(String, Repo, String)> = {
            let last = self.last_scanned.lock();
            heads
                .into_iter()
                .filter(|(id, (_, hash))| last.get(id) != Some(hash))
                .map(|(id, (repo, hash))| (id, repo, hash))
                .collect()
        };
        if changed.is_empty() {
            debug!("No repository changed since the last scan");
            return Ok(());
        }

        let registered = self.applications.list();
        let mut updated = Vec::new();
        let mut unregistered = Vec::new();
        for (repo_id, repo, _) in &changed {
            let apps: Vec<&Application> = registered
                .iter()
                .filter(|a| &a.git_path.repo_id == repo_id)
                .collect();
            updated.extend(self.find_updated(repo, &apps).await);
            unregistered.extend(self.find_unregistered(repo_id, repo, &apps).await);
        }

        if !updated.is_empty() {
            info!("Reporting {} updated application configurations", updated.len());
            self.control_plane
                .update_application_configurations(UpdateApplicationConfigurationsRequest {
                    applications: updated,
                })
                .await?;
        }
        self.control_plane
            .report_unregistered_application_configurations(
                ReportUnregisteredApplicationConfigurationsRequest {
                    applications: unregistered,
                },
            )
            .await?;

        let mut last = self.last_scanned.lock();
        for (repo_id, _, hash) in changed {
            last.insert(repo_id, hash);
        }
        Ok(())
    }

    /// Registered applications whose configuration drifted from the registry
    async fn find_updated(&self, repo: &Repo, apps: &[&Application]) -> Vec<ApplicationInfo> {
        let mut out = Vec::new();
        for app in apps {
            let path = repo.path().join(app.git_path.config_file_path());
            let spec = match read_spec(&path).await {
                Ok(spec) => spec,
                Err(e) => {
                    debug!(application_id = %app.id, "Skipping unreadable application config: {}", e);
                    continue;
                }
            };
            if !drifted(app, &spec) {
                continue;
            }
            out.push(ApplicationInfo {
                id: app.id.clone(),
                name: spec.name,
                kind: app.kind.clone(),
                labels: spec.labels,
                repo_id: app.git_path.repo_id.clone(),
                path: app.git_path.path.clone(),
                config_filename: app.git_path.config_filename_or_default().to_string(),
                piped_id: self.piped_id.clone(),
                description: spec.description,
            });
        }
        out
    }

    /// Application configurations in the repository no application refers to
    async fn find_unregistered(
        &self,
        repo_id: &str,
        repo: &Repo,
        apps: &[&Application],
    ) -> Vec<ApplicationInfo> {
        let registered: HashSet<String> = apps.iter().map(|a| a.git_path.config_file_path()).collect();

        let mut out = Vec::new();
        for rel in config_files(repo.path()) {
            if registered.contains(&rel) {
                continue;
            }
            let spec = match read_spec(&repo.path().join(&rel)).await {
                Ok(spec) => spec,
                Err(_) => continue,
            };
            let (dir, filename) = split_config_path(&rel);
            out.push(ApplicationInfo {
                id: String::new(),
                name: spec.name,
                kind: String::new(),
                labels: spec.labels,
                repo_id: repo_id.to_string(),
                path: dir,
                config_filename: filename,
                piped_id: self.piped_id.clone(),
                description: spec.description,
            });
        }
        out
    }
}

fn drifted(app: &Application, spec: &ApplicationSpec) -> bool {
    app.name != spec.name || app.labels != spec.labels || app.description != spec.description
}

async fn read_spec(path: &Path) -> Result<ApplicationSpec, AgentError> {
    let data = File::new(path).read_bytes().await?;
    Ok(ApplicationConfig::from_bytes(&data)?.spec)
}

/// Repository relative paths of every application configuration file
pub fn config_files(root: &Path) -> Vec<String> {
    let mut out: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(CONFIG_SUFFIX))
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    out.sort();
    out
}

/// Split a repository relative config path into the directory and filename
fn split_config_path(rel: &str) -> (String, String) {
    match rel.rsplit_once('/') {
        Some((dir, file)) => (dir.to_string(), file.to_string()),
        None => (String::new(), rel.to_string()),
    }
}
