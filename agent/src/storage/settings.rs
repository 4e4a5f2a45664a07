//! Piped configuration file

use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use controlplane_api::service::{PipedPlugin, PipedRepository};

use crate::errors::AgentError;
use crate::logs::LogLevel;

pub const PIPED_KIND: &str = "Piped";

/// Top-level configuration document, `kind: Piped`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedConfig {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub spec: PipedSpec,
}

/// Piped settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedSpec {
    /// Project this piped belongs to
    #[serde(rename = "projectID")]
    pub project_id: String,

    /// Identifier of this piped
    #[serde(rename = "pipedID")]
    pub piped_id: String,

    /// File holding the piped key
    #[serde(default)]
    pub piped_key_file: Option<PathBuf>,

    /// Base64 encoded piped key, never serialized back
    #[serde(default, skip_serializing)]
    pub piped_key_data: Option<String>,

    /// Control plane address, `host:port`
    pub api_address: String,

    /// How often the trigger checks repositories for new commits
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub sync_interval: Duration,

    /// How often application configurations are reported
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub app_config_sync_interval: Duration,

    /// Git identity used for commits made by piped
    #[serde(default)]
    pub git: GitSettings,

    /// Repositories watched by this piped
    #[serde(default)]
    pub repositories: Vec<RepositorySettings>,

    /// Plugins run by this piped
    #[serde(default)]
    pub plugins: Vec<PluginSettings>,

    /// Platform providers, only reported as metadata
    #[serde(default)]
    pub platform_providers: Vec<PlatformProviderSettings>,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// `text` or `json`
    #[serde(default)]
    pub log_format: String,
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(60)
}

/// Git settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSettings {
    #[serde(default = "default_git_username")]
    pub username: String,

    #[serde(default = "default_git_email")]
    pub email: String,

    /// Private key used to access remotes over SSH
    #[serde(default)]
    pub ssh_key_file: Option<PathBuf>,
}

fn default_git_username() -> String {
    "piped".to_string()
}

fn default_git_email() -> String {
    "pipecd.dev@gmail.com".to_string()
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            username: default_git_username(),
            email: default_git_email(),
            ssh_key_file: None,
        }
    }
}

/// A repository watched by piped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    pub repo_id: String,
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// A plugin run by piped
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSettings {
    pub name: String,
    /// `file://`, `http://` or `https://` location of the binary
    pub url: String,
    /// Port the plugin listens on
    pub port: u16,
    /// Plugin specific configuration, passed through as JSON
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProviderSettings {
    pub name: String,
    #[serde(default, rename = "type")]
    pub provider_type: String,
}

impl PipedSpec {
    /// Decode a YAML or JSON configuration document
    pub fn from_bytes(data: &[u8]) -> Result<Self, AgentError> {
        let config: PipedConfig = serde_yaml::from_slice(data)?;
        if config.kind != PIPED_KIND {
            return Err(AgentError::ConfigError(format!(
                "wrong configuration kind: expected {}, got {}",
                PIPED_KIND, config.kind
            )));
        }
        config.spec.validate()?;
        Ok(config.spec)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.project_id.is_empty() {
            return Err(AgentError::ConfigError("projectID must be set".to_string()));
        }
        if self.piped_id.is_empty() {
            return Err(AgentError::ConfigError("pipedID must be set".to_string()));
        }
        if self.api_address.is_empty() {
            return Err(AgentError::ConfigError("apiAddress must be set".to_string()));
        }
        if self.piped_key_file.is_none() && self.piped_key_data.is_none() {
            return Err(AgentError::ConfigError(
                "either pipedKeyFile or pipedKeyData must be set".to_string(),
            ));
        }
        for (i, plugin) in self.plugins.iter().enumerate() {
            if plugin.name.is_empty() || plugin.port == 0 {
                return Err(AgentError::ConfigError(format!(
                    "plugins[{}] must have a name and a port",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Load the piped key from `pipedKeyData` or `pipedKeyFile`
    pub async fn load_piped_key(&self) -> Result<SecretString, AgentError> {
        let raw = match (&self.piped_key_data, &self.piped_key_file) {
            (Some(data), _) => BASE64
                .decode(data.trim())
                .map_err(|e| AgentError::ConfigError(format!("invalid pipedKeyData: {}", e)))?,
            (None, Some(file)) => tokio::fs::read(file).await?,
            (None, None) => {
                return Err(AgentError::ConfigError("no piped key configured".to_string()))
            }
        };
        let key = String::from_utf8(raw)
            .map_err(|e| AgentError::ConfigError(format!("invalid piped key: {}", e)))?;
        Ok(SecretString::from(key.trim().to_string()))
    }

    pub fn repository(&self, repo_id: &str) -> Option<&RepositorySettings> {
        self.repositories.iter().find(|r| r.repo_id == repo_id)
    }

    /// The configuration as reported upstream, secrets excluded
    pub fn redacted(&self) -> Result<String, AgentError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn piped_repositories(&self) -> Vec<PipedRepository> {
        self.repositories
            .iter()
            .map(|r| PipedRepository {
                id: r.repo_id.clone(),
                remote: r.remote.clone(),
                branch: r.branch.clone(),
            })
            .collect()
    }

    pub fn piped_plugins(&self) -> Vec<PipedPlugin> {
        self.plugins
            .iter()
            .map(|p| PipedPlugin {
                name: p.name.clone(),
                url: p.url.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Piped
spec:
  projectID: demo
  pipedID: piped-1
  pipedKeyData: c2VjcmV0Cg==
  apiAddress: cp.example.com:443
  syncInterval: 2m
  repositories:
    - repoId: examples
      remote: https://github.com/pipe-cd/examples.git
  plugins:
    - name: kubernetes
      url: file:///tmp/kubernetes
      port: 7001
      config:
        kubectlVersion: 1.32.2
"#;

    #[tokio::test]
    async fn test_from_bytes() {
        let spec = PipedSpec::from_bytes(CONFIG.as_bytes()).unwrap();
        assert_eq!(spec.project_id, "demo");
        assert_eq!(spec.sync_interval, Duration::from_secs(120));
        assert_eq!(spec.app_config_sync_interval, Duration::from_secs(60));
        assert_eq!(spec.repositories[0].branch, "main");
        assert_eq!(spec.plugins[0].config["kubectlVersion"], "1.32.2");

        use secrecy::ExposeSecret;
        assert_eq!(spec.load_piped_key().await.unwrap().expose_secret(), "secret");
    }

    #[test]
    fn test_redacted_has_no_key() {
        let spec = PipedSpec::from_bytes(CONFIG.as_bytes()).unwrap();
        let redacted = spec.redacted().unwrap();
        assert!(!redacted.contains("c2VjcmV0"));
        assert!(redacted.contains("piped-1"));
    }

    #[test]
    fn test_wrong_kind() {
        let err = PipedSpec::from_bytes(b"kind: Application\nspec: {}\n").unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_) | AgentError::YamlError(_)));
    }
}
