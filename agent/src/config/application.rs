//! Application configuration file, `kind: Application`

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

pub const APPLICATION_KIND: &str = "Application";

/// A decoded application configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: ApplicationSpec,
}

impl ApplicationConfig {
    /// Decode and validate an application configuration
    pub fn from_bytes(data: &[u8]) -> Result<Self, AgentError> {
        let config: ApplicationConfig = serde_yaml::from_slice(data)?;
        if config.kind != APPLICATION_KIND {
            return Err(AgentError::ConfigError(format!(
                "wrong configuration kind: expected {}, got {}",
                APPLICATION_KIND, config.kind
            )));
        }
        config.spec.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationSpec {
    pub name: String,
    pub description: String,
    pub labels: BTreeMap<String, String>,
    /// Plugin name -> plugin specific configuration
    pub plugins: BTreeMap<String, serde_json::Value>,
    pub pipeline: Option<PipelineConfig>,
    pub planner: PlannerConfig,
    pub commit_matcher: CommitMatcherConfig,
    pub encryption: Option<EncryptionConfig>,
    pub attachment: Option<AttachmentConfig>,
    /// Maximum duration of a deployment
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub trigger: TriggerConfig,
    pub post_sync: Option<PostSyncConfig>,
    pub event_watcher: Vec<EventWatcherConfig>,
}

impl Default for ApplicationSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            labels: BTreeMap::new(),
            plugins: BTreeMap::new(),
            pipeline: None,
            planner: PlannerConfig::default(),
            commit_matcher: CommitMatcherConfig::default(),
            encryption: None,
            attachment: None,
            timeout: Duration::from_secs(6 * 60 * 60),
            trigger: TriggerConfig::default(),
            post_sync: None,
            event_watcher: Vec::new(),
        }
    }
}

impl ApplicationSpec {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.name.is_empty() {
            return Err(AgentError::ConfigError(
                "application name must be set".to_string(),
            ));
        }
        for (i, stage) in self.pipeline_stages().iter().enumerate() {
            if stage.name.is_empty() {
                return Err(AgentError::ConfigError(format!(
                    "pipeline.stages[{}] must have a name",
                    i
                )));
            }
        }
        for watcher in &self.event_watcher {
            if watcher.matcher.name.is_empty() {
                return Err(AgentError::ConfigError(
                    "eventWatcher matcher name must be set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The configured pipeline stages, in declaration order
    pub fn pipeline_stages(&self) -> &[PipelineStageConfig] {
        self.pipeline
            .as_ref()
            .map(|p| p.stages.as_slice())
            .unwrap_or_default()
    }

    pub fn has_pipeline(&self) -> bool {
        !self.pipeline_stages().is_empty()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    /// Raw JSON of the pipeline stage at `index`, as handed to plugins
    pub fn stage_config_bytes(&self, index: usize) -> Result<Vec<u8>, AgentError> {
        let stage = self.pipeline_stages().get(index).ok_or_else(|| {
            AgentError::ConfigError(format!("no pipeline stage at index {}", index))
        })?;
        Ok(serde_json::to_vec(stage)?)
    }

    /// Applications to deploy after this one completes
    pub fn chain_applications(&self) -> Vec<ChainApplicationConfig> {
        self.post_sync
            .as_ref()
            .and_then(|p| p.chain.as_ref())
            .map(|c| c.applications.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub stages: Vec<PipelineStageConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineStageConfig {
    /// Unique within the pipeline, `stage-<index>` when omitted
    pub id: String,
    pub name: String,
    pub desc: String,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Stage options, interpreted by the plugin
    pub with: serde_json::Value,
}

impl PipelineStageConfig {
    pub fn id_or_default(&self, index: usize) -> String {
        if self.id.is_empty() {
            format!("stage-{}", index)
        } else {
            self.id.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerConfig {
    /// Always use the pipeline instead of letting plugins decide
    pub always_use_pipeline: bool,
    /// Run rollback stages when a deployment fails
    pub auto_rollback: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            always_use_pipeline: false,
            auto_rollback: true,
        }
    }
}

/// Regular expressions matched against the commit message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitMatcherConfig {
    pub quick_sync: String,
    pub pipeline: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionConfig {
    /// Secret name -> encrypted value
    pub encrypted_secrets: BTreeMap<String, String>,
    /// Files, relative to the application directory, rendered with the secrets
    pub decryption_targets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentConfig {
    /// Attachment name -> file path relative to the repository root
    pub sources: BTreeMap<String, String>,
    /// Files, relative to the application directory, rendered with the attachments
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerConfig {
    pub on_commit: OnCommitConfig,
    pub on_command: OnCommandConfig,
    pub on_out_of_sync: OnOutOfSyncConfig,
    pub on_chain: OnChainConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnCommitConfig {
    pub disabled: bool,
    /// Extra paths whose changes trigger a deployment
    pub paths: Vec<String>,
    /// Paths whose changes never trigger a deployment
    pub ignores: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnCommandConfig {
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnOutOfSyncConfig {
    pub disabled: bool,
    /// How long the application must stay out of sync
    #[serde(with = "humantime_serde")]
    pub min_window: Duration,
}

impl Default for OnOutOfSyncConfig {
    fn default() -> Self {
        Self {
            disabled: true,
            min_window: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnChainConfig {
    pub disabled: bool,
}

impl Default for OnChainConfig {
    fn default() -> Self {
        Self { disabled: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostSyncConfig {
    pub chain: Option<DeploymentChainConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentChainConfig {
    pub applications: Vec<ChainApplicationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainApplicationConfig {
    pub name: String,
    pub kind: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventWatcherConfig {
    pub matcher: EventMatcherConfig,
    pub handler: EventHandlerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventMatcherConfig {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventHandlerType {
    #[default]
    GitUpdate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventHandlerConfig {
    #[serde(rename = "type")]
    pub handler_type: EventHandlerType,
    pub config: EventHandlerOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventHandlerOptions {
    pub commit_message: String,
    pub replacements: Vec<EventReplacement>,
}

/// One edit applied to a file when an event is handled.
///
/// Exactly one of `yaml_field` and `regex` is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventReplacement {
    /// Path relative to the application directory
    pub file: String,
    /// Field path such as `$.spec.template.spec.containers[0].image`
    pub yaml_field: String,
    /// Expression whose first capture group is replaced
    pub regex: String,
}
