//! Working copies of the configured repositories, one per repository

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::git::client::GitClient;
use crate::git::repo::{CommitInfo, Repo};
use crate::storage::settings::RepositorySettings;

/// Clones each configured repository once into `dir` and keeps it on its
/// base branch. Components owning a `RepoSet` must not share its `dir`.
pub struct RepoSet {
    client: Arc<dyn GitClient>,
    settings: Vec<RepositorySettings>,
    dir: Dir,
    repos: Mutex<HashMap<String, Repo>>,
}

impl RepoSet {
    pub fn new(client: Arc<dyn GitClient>, settings: Vec<RepositorySettings>, dir: Dir) -> Self {
        Self {
            client,
            settings,
            dir,
            repos: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &[RepositorySettings] {
        &self.settings
    }

    pub fn setting(&self, repo_id: &str) -> Option<&RepositorySettings> {
        self.settings.iter().find(|r| r.repo_id == repo_id)
    }

    /// Clone every repository that is not cloned yet
    pub async fn prepare(&self) {
        for setting in &self.settings {
            if let Err(e) = self.repo(&setting.repo_id).await {
                warn!(repo_id = %setting.repo_id, "Failed to clone repository: {}", e);
            }
        }
    }

    /// The working copy of `repo_id`, cloned on first use
    pub async fn repo(&self, repo_id: &str) -> Result<Repo, AgentError> {
        let mut repos = self.repos.lock().await;
        if let Some(repo) = repos.get(repo_id) {
            return Ok(repo.clone());
        }

        let setting = self.setting(repo_id).ok_or_else(|| {
            AgentError::NotFound(format!("repository {} is not configured", repo_id))
        })?;
        info!(repo_id, "Cloning repository");
        let repo = self
            .client
            .clone_repo(
                &setting.repo_id,
                &setting.remote,
                &setting.branch,
                self.dir.subdir(&setting.repo_id),
            )
            .await?;
        repos.insert(repo_id.to_string(), repo.clone());
        Ok(repo)
    }

    /// Pull the base branch of `repo_id` and return its head commit
    pub async fn pull(&self, repo_id: &str) -> Result<(Repo, CommitInfo), AgentError> {
        let repo = self.repo(repo_id).await?;
        repo.pull().await?;
        let head = repo.latest_commit().await?;
        Ok((repo, head))
    }

    /// Drop the working copy so the next use clones afresh
    pub async fn discard(&self, repo_id: &str) {
        if let Some(repo) = self.repos.lock().await.remove(repo_id) {
            if let Err(e) = repo.clean().await {
                warn!(repo_id, "Failed to remove repository working copy: {}", e);
            }
        }
    }
}
