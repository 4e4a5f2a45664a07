//! Materialise a repository revision into a directory

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::git::{GitClient, Repo};
use crate::storage::settings::RepositorySettings;

/// Produces a checkout of one repository at one revision
#[async_trait]
pub trait Cloner: Send + Sync {
    /// The revision every clone is checked out at
    fn revision(&self) -> &str;

    /// Clone into `dest`, returning the resolved commit hash
    async fn clone_to(&self, dest: &Dir) -> Result<String, AgentError>;
}

/// Cloner backed by a [`GitClient`]
pub struct GitCloner {
    client: Arc<dyn GitClient>,
    repo_id: String,
    remote: String,
    branch: String,
    revision: String,
}

impl GitCloner {
    pub fn new(
        client: Arc<dyn GitClient>,
        repo_id: &str,
        remote: &str,
        branch: &str,
        revision: &str,
    ) -> Self {
        Self {
            client,
            repo_id: repo_id.to_string(),
            remote: remote.to_string(),
            branch: branch.to_string(),
            revision: revision.to_string(),
        }
    }
}

#[async_trait]
impl Cloner for GitCloner {
    fn revision(&self) -> &str {
        &self.revision
    }

    async fn clone_to(&self, dest: &Dir) -> Result<String, AgentError> {
        let repo = self
            .client
            .clone_repo(&self.repo_id, &self.remote, &self.branch, dest.clone())
            .await?;
        repo.checkout(&self.revision).await?;
        Ok(repo.latest_commit().await?.hash)
    }
}

/// Cloner copying a local working copy as it is, uncommitted merges included
pub struct LocalCloner {
    repo: Repo,
    revision: String,
}

impl LocalCloner {
    pub fn new(repo: Repo, revision: &str) -> Self {
        Self {
            repo,
            revision: revision.to_string(),
        }
    }
}

#[async_trait]
impl Cloner for LocalCloner {
    fn revision(&self) -> &str {
        &self.revision
    }

    async fn clone_to(&self, dest: &Dir) -> Result<String, AgentError> {
        let copy = self.repo.copy(dest.clone()).await?;
        Ok(copy.latest_commit().await?.hash)
    }
}

/// Builds cloners for application sources
pub trait ClonerFactory: Send + Sync {
    fn cloner(&self, repo_id: &str, revision: &str) -> Result<Arc<dyn Cloner>, AgentError>;
}

/// [`ClonerFactory`] for the repositories configured on this piped
pub struct GitClonerFactory {
    client: Arc<dyn GitClient>,
    repositories: Vec<RepositorySettings>,
}

impl GitClonerFactory {
    pub fn new(client: Arc<dyn GitClient>, repositories: Vec<RepositorySettings>) -> Self {
        Self {
            client,
            repositories,
        }
    }
}

impl ClonerFactory for GitClonerFactory {
    fn cloner(&self, repo_id: &str, revision: &str) -> Result<Arc<dyn Cloner>, AgentError> {
        let repo = self
            .repositories
            .iter()
            .find(|r| r.repo_id == repo_id)
            .ok_or_else(|| {
                AgentError::DeploySourceError(format!(
                    "repository {} is not configured on this piped",
                    repo_id
                ))
            })?;
        Ok(Arc::new(GitCloner::new(
            self.client.clone(),
            &repo.repo_id,
            &repo.remote,
            &repo.branch,
            revision,
        )))
    }
}
