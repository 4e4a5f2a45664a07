//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;

/// Storage layout for piped
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory, `$HOME/.piped` by default
    pub base_dir: PathBuf,

    /// Root of the per-worker working directories
    pub workspace_dir: PathBuf,

    /// Overrides `<base>/tools`
    pub tools_dir: Option<PathBuf>,

    /// Overrides `<base>/plugins`
    pub plugins_dir: Option<PathBuf>,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            workspace_dir: workspace_dir.into(),
            tools_dir: None,
            plugins_dir: None,
        }
    }

    /// Installed tool binaries, `<name>-<version>`
    pub fn tools_dir(&self) -> Dir {
        match &self.tools_dir {
            Some(dir) => Dir::new(dir),
            None => Dir::new(self.base_dir.join("tools")),
        }
    }

    /// Downloaded plugin binaries
    pub fn plugins_dir(&self) -> Dir {
        match &self.plugins_dir {
            Some(dir) => Dir::new(dir),
            None => Dir::new(self.base_dir.join("plugins")),
        }
    }

    /// Scratch space for tool installs
    pub fn tmp_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Repositories cloned once at startup
    pub fn repos_dir(&self) -> Dir {
        Dir::new(self.workspace_dir.join("repos"))
    }

    /// Per-worker working directories
    pub fn workspace(&self) -> Dir {
        Dir::new(&self.workspace_dir)
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AgentError> {
        self.tools_dir().create().await?;
        self.plugins_dir().create().await?;
        self.tmp_dir().create().await?;
        self.repos_dir().create().await?;
        self.workspace().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".piped");
        let workspace_dir = std::env::temp_dir().join("piped-workspace");

        Self::new(base_dir, workspace_dir)
    }
}
