//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::AgentError;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, AgentError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file contents as bytes
    pub async fn read_bytes(&self) -> Result<Vec<u8>, AgentError> {
        Ok(fs::read(&self.path).await?)
    }

    /// Read file as YAML (JSON documents parse too)
    pub async fn read_yaml<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let contents = self.read_bytes().await?;
        Ok(serde_yaml::from_slice(&contents)?)
    }

    /// Write string to file
    pub async fn write_string(&self, contents: &str) -> Result<(), AgentError> {
        self.write_bytes(contents.as_bytes()).await
    }

    /// Write bytes to file
    pub async fn write_bytes(&self, contents: &[u8]) -> Result<(), AgentError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Set the Unix permission bits. A no-op on non-Unix platforms.
    pub async fn set_mode(&self, mode: u32) -> Result<(), AgentError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    /// Move the file to `dest`, replacing it if present
    pub async fn rename(&self, dest: &File) -> Result<(), AgentError> {
        if let Some(parent) = dest.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&self.path, &dest.path).await?;
        Ok(())
    }
}
