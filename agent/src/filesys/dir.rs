//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AgentError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List files in the directory
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, AgentError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        Ok(files)
    }

    /// List subdirectories
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, AgentError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                dirs.push(path);
            }
        }

        Ok(dirs)
    }

    /// Get a file within this directory
    pub fn file(&self, name: impl AsRef<Path>) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: impl AsRef<Path>) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Create a uniquely named directory `<prefix>-<uuid>` inside this one
    pub async fn create_temp_dir(&self, prefix: &str) -> Result<Dir, AgentError> {
        let temp_dir = self
            .path
            .join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir).await?;
        Ok(Dir::new(temp_dir))
    }

    /// Recursively copy the directory contents into `dest`, creating it.
    ///
    /// Symlinks are copied as the files they point to.
    pub async fn copy_to(&self, dest: &Dir) -> Result<(), AgentError> {
        let src = self.path.clone();
        let dst = dest.path.clone();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| AgentError::Internal(e.to_string()))?
    }

    /// Move the directory to `dest`
    pub async fn rename(&self, dest: &Dir) -> Result<(), AgentError> {
        fs::rename(&self.path, &dest.path).await?;
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), AgentError> {
    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| AgentError::IoError(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_to_is_independent() {
        let root = tempfile::tempdir().unwrap();
        let src = Dir::new(root.path().join("src"));
        src.subdir("nested").create().await.unwrap();
        src.file("nested/a.txt").write_string("a").await.unwrap();
        src.file("b.txt").write_string("b").await.unwrap();

        let dst = Dir::new(root.path().join("dst"));
        src.copy_to(&dst).await.unwrap();
        assert_eq!(dst.file("nested/a.txt").read_string().await.unwrap(), "a");

        dst.file("b.txt").write_string("changed").await.unwrap();
        assert_eq!(src.file("b.txt").read_string().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_create_temp_dir_is_unique() {
        let root = tempfile::tempdir().unwrap();
        let parent = Dir::new(root.path());
        let a = parent.create_temp_dir("d1-planner").await.unwrap();
        let b = parent.create_temp_dir("d1-planner").await.unwrap();
        assert_ne!(a, b);
        assert!(a.exists().await);
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("d1-planner-"));
    }
}
