//! Git client backed by the `git` executable

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::git::repo::{run_git, GitEnv, Repo};

/// Clones repositories into caller owned directories
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone `remote` at `branch` into `dest`
    async fn clone_repo(
        &self,
        repo_id: &str,
        remote: &str,
        branch: &str,
        dest: Dir,
    ) -> Result<Repo, AgentError>;
}

/// Client keeping one bare cache per repository so that later clones are
/// local copies plus a fetch.
pub struct Client {
    env: GitEnv,
    cache_dir: Dir,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Client {
    pub fn new(env: GitEnv, cache_dir: Dir) -> Self {
        Self {
            env,
            cache_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn repo_lock(&self, repo_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(repo_id.to_string())
            .or_default()
            .clone()
    }

    /// Create or refresh the bare cache of a repository
    async fn refresh_cache(&self, repo_id: &str, remote: &str) -> Result<Dir, AgentError> {
        let lock = self.repo_lock(repo_id);
        let _guard = lock.lock().await;

        let cache = self.cache_dir.subdir(format!("{}.git", repo_id));
        if cache.exists().await {
            run_git(
                &self.env,
                Some(cache.path()),
                &["fetch", "-q", "--prune", "origin", "+refs/heads/*:refs/heads/*"],
            )
            .await?;
        } else {
            info!(repo_id, "Cloning repository {} into cache", remote);
            self.cache_dir.create().await?;
            let dest = cache.path().to_string_lossy().to_string();
            run_git(&self.env, None, &["clone", "-q", "--mirror", remote, &dest]).await?;
        }
        Ok(cache)
    }
}

#[async_trait]
impl GitClient for Client {
    async fn clone_repo(
        &self,
        repo_id: &str,
        remote: &str,
        branch: &str,
        dest: Dir,
    ) -> Result<Repo, AgentError> {
        let cache = self.refresh_cache(repo_id, remote).await?;

        let src = cache.path().to_string_lossy().to_string();
        let target = dest.path().to_string_lossy().to_string();
        run_git(&self.env, None, &["clone", "-q", "-b", branch, &src, &target]).await?;
        run_git(
            &self.env,
            Some(dest.path()),
            &["remote", "set-url", "origin", remote],
        )
        .await?;

        Ok(Repo::new(dest, remote, branch, self.env.clone()))
    }
}
