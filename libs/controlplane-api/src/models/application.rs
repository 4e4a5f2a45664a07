//! Application models

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::deployment::{ArtifactVersion, DeploymentTrigger};

/// Location of an application definition inside a Git repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitPath {
    pub repo_id: String,
    /// Application directory relative to the repository root
    pub path: String,
    pub config_filename: String,
}

impl GitPath {
    /// Default application configuration file name.
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "app.pipecd.yaml";

    /// The configuration file name, falling back to the default one.
    pub fn config_filename_or_default(&self) -> &str {
        if self.config_filename.is_empty() {
            Self::DEFAULT_CONFIG_FILENAME
        } else {
            &self.config_filename
        }
    }

    /// Path of the configuration file relative to the repository root.
    pub fn config_file_path(&self) -> String {
        let filename = self.config_filename_or_default();
        let dir = self.path.trim_matches('/');
        if dir.is_empty() || dir == "." {
            filename.to_string()
        } else {
            format!("{}/{}", dir, filename)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationSyncStatus {
    #[default]
    Unknown,
    Synced,
    Deploying,
    OutOfSync,
    InvalidConfig,
}

/// Sync state reported for an application by its livestate reporter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationSyncState {
    pub status: ApplicationSyncStatus,
    pub short_reason: String,
    pub reason: String,
    /// Unix seconds of the last status change
    pub timestamp: i64,
}

/// A reference to a deployment recorded on the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationDeploymentReference {
    pub deployment_id: String,
    pub trigger: DeploymentTrigger,
    pub summary: String,
    pub version: String,
    pub versions: Vec<ArtifactVersion>,
    pub config_filename: String,
    pub started_at: i64,
    pub completed_at: i64,
}

/// Application registered on the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub piped_id: String,
    pub project_id: String,
    pub kind: String,
    pub platform_provider: String,
    pub description: String,
    pub labels: BTreeMap<String, String>,
    pub plugins: BTreeSet<String>,
    pub git_path: GitPath,
    pub disabled: bool,
    pub deleted: bool,
    pub deploying: bool,
    pub sync_state: Option<ApplicationSyncState>,
    pub most_recently_triggered_deployment: Option<ApplicationDeploymentReference>,
    pub most_recently_successful_deployment: Option<ApplicationDeploymentReference>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Application metadata discovered from a Git repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationInfo {
    /// Empty for unregistered applications
    pub id: String,
    pub name: String,
    pub kind: String,
    pub labels: BTreeMap<String, String>,
    pub repo_id: String,
    pub path: String,
    pub config_filename: String,
    pub piped_id: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_path() {
        let mut git_path = GitPath {
            repo_id: "repo".to_string(),
            path: "apps/app-1".to_string(),
            config_filename: String::new(),
        };
        assert_eq!(git_path.config_file_path(), "apps/app-1/app.pipecd.yaml");

        git_path.config_filename = "service.pipecd.yaml".to_string();
        git_path.path = "/".to_string();
        assert_eq!(git_path.config_file_path(), "service.pipecd.yaml");
    }

    #[test]
    fn test_application_decodes_camel_case() {
        let app: Application = serde_json::from_str(
            r#"{"id":"app-1","name":"app","plugins":["k8s"],"gitPath":{"repoId":"r","path":"a","configFilename":"app.pipecd.yaml"}}"#,
        )
        .unwrap();
        assert_eq!(app.git_path.repo_id, "r");
        assert!(app.plugins.contains("k8s"));
        assert!(app.sync_state.is_none());
    }
}
