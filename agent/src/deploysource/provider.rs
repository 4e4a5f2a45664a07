//! Per-deployment provider of independent source trees

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use controlplane_api::GitPath;
use plugin_api::deployment::DeploymentSource;

use crate::config::{ApplicationConfig, ApplicationSpec};
use crate::deploysource::cloner::{Cloner, ClonerFactory};
use crate::deploysource::processor::SourceProcessor;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;

/// A tree of the repository at one revision plus its decoded configuration
#[derive(Debug, Clone)]
pub struct DeploySource {
    pub repo_dir: Dir,
    pub app_dir: Dir,
    pub commit_hash: String,
    pub application_config: Vec<u8>,
    pub application_config_filename: String,
    pub application_spec: ApplicationSpec,
}

impl DeploySource {
    /// Wire form handed to plugins
    pub fn to_plugin_source(&self) -> DeploymentSource {
        DeploymentSource {
            application_directory: self.app_dir.path().to_string_lossy().to_string(),
            commit_hash: self.commit_hash.clone(),
            application_config: self.application_config.clone(),
            application_config_filename: self.application_config_filename.clone(),
        }
    }

    /// The same source rooted at another copy of the repository
    fn relocate(&self, repo_dir: Dir, git_path: &GitPath) -> DeploySource {
        DeploySource {
            app_dir: app_dir(&repo_dir, git_path),
            repo_dir,
            ..self.clone()
        }
    }
}

fn app_dir(repo_dir: &Dir, git_path: &GitPath) -> Dir {
    let path = git_path.path.trim_matches('/');
    if path.is_empty() || path == "." {
        repo_dir.clone()
    } else {
        repo_dir.subdir(path)
    }
}

/// Hands out independent copies of one application source.
///
/// The first successful `get` builds a canonical tree; every call returns a
/// fresh copy of it so callers can mutate their tree freely.
pub struct Provider {
    workspace: Dir,
    cloner: Arc<dyn Cloner>,
    git_path: GitPath,
    processors: Vec<Arc<dyn SourceProcessor>>,
    canonical: Mutex<Option<DeploySource>>,
}

impl Provider {
    /// `workspace` is owned by the provider and holds the canonical tree and
    /// every copy.
    pub fn new(
        workspace: Dir,
        cloner: Arc<dyn Cloner>,
        git_path: GitPath,
        processors: Vec<Arc<dyn SourceProcessor>>,
    ) -> Self {
        Self {
            workspace,
            cloner,
            git_path,
            processors,
            canonical: Mutex::new(None),
        }
    }

    pub fn revision(&self) -> &str {
        self.cloner.revision()
    }

    pub async fn get(&self) -> Result<DeploySource, AgentError> {
        let mut canonical = self.canonical.lock().await;
        if canonical.is_none() {
            let prepared = self.prepare().await?;
            *canonical = Some(prepared);
        }
        let Some(source) = canonical.as_ref() else {
            return Err(AgentError::Internal("canonical source missing".to_string()));
        };

        let copy = self.workspace.create_temp_dir("copy").await?;
        source.repo_dir.copy_to(&copy).await?;
        Ok(source.relocate(copy, &self.git_path))
    }

    async fn prepare(&self) -> Result<DeploySource, AgentError> {
        let repo_dir = self.workspace.subdir("canonical");
        if repo_dir.exists().await {
            repo_dir.delete().await?;
        }

        match self.build(&repo_dir).await {
            Ok(source) => Ok(source),
            Err(e) => {
                if let Err(err) = repo_dir.delete().await {
                    warn!("Failed to discard source tree {}: {}", repo_dir.path().display(), err);
                }
                Err(e)
            }
        }
    }

    async fn build(&self, repo_dir: &Dir) -> Result<DeploySource, AgentError> {
        info!(
            revision = self.cloner.revision(),
            repo_id = %self.git_path.repo_id,
            "Preparing deploy source"
        );
        let commit_hash = self.cloner.clone_to(repo_dir).await.map_err(|e| {
            AgentError::DeploySourceError(format!("unable to clone the repository: {}", e))
        })?;

        let app_dir = app_dir(repo_dir, &self.git_path);
        let filename = self.git_path.config_filename_or_default().to_string();
        let application_config = app_dir.file(&filename).read_bytes().await.map_err(|e| {
            AgentError::DeploySourceError(format!(
                "unable to read application config {}: {}",
                filename, e
            ))
        })?;
        let config = ApplicationConfig::from_bytes(&application_config).map_err(|e| {
            AgentError::DeploySourceError(format!(
                "unable to load application config {}: {}",
                filename, e
            ))
        })?;

        for processor in &self.processors {
            processor
                .process(repo_dir, &app_dir, &config.spec)
                .await
                .map_err(|e| {
                    AgentError::DeploySourceError(format!(
                        "{} processor failed: {}",
                        processor.name(),
                        e
                    ))
                })?;
        }

        Ok(DeploySource {
            repo_dir: repo_dir.clone(),
            app_dir,
            commit_hash,
            application_config,
            application_config_filename: filename,
            application_spec: config.spec,
        })
    }
}

/// Creates providers sharing one set of cloners and processors
pub struct ProviderFactory {
    cloners: Arc<dyn ClonerFactory>,
    processors: Vec<Arc<dyn SourceProcessor>>,
}

impl ProviderFactory {
    pub fn new(cloners: Arc<dyn ClonerFactory>, processors: Vec<Arc<dyn SourceProcessor>>) -> Self {
        Self {
            cloners,
            processors,
        }
    }

    /// A provider of `git_path` at `revision` working inside `workspace`
    pub fn provider(
        &self,
        workspace: Dir,
        git_path: &GitPath,
        revision: &str,
    ) -> Result<Provider, AgentError> {
        let cloner = self.cloners.cloner(&git_path.repo_id, revision)?;
        Ok(Provider::new(
            workspace,
            cloner,
            git_path.clone(),
            self.processors.clone(),
        ))
    }

    /// A provider of `git_path` backed by an explicit cloner
    pub fn provider_with(&self, workspace: Dir, git_path: &GitPath, cloner: Arc<dyn Cloner>) -> Provider {
        Provider::new(workspace, cloner, git_path.clone(), self.processors.clone())
    }
}
