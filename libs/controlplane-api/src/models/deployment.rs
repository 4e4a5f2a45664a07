//! Deployment and pipeline stage models

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::application::GitPath;

/// Deployment status, owned by the control plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Planned,
    Running,
    RollingBack,
    Success,
    Failure,
    Cancelled,
}

impl DeploymentStatus {
    /// Whether the status is terminal.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failure | DeploymentStatus::Cancelled
        )
    }

    /// Whether a deployment may move from `self` to `next`.
    pub fn can_update_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (from, _) if from.is_completed() => false,
            (Pending, Planned | Failure | Cancelled) => true,
            (Planned, Running | Failure | Cancelled) => true,
            (Running, RollingBack | Success | Failure | Cancelled) => true,
            (RollingBack, Failure | Cancelled) => true,
            _ => false,
        }
    }
}

/// Stage status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Running,
    Success,
    Failure,
    Cancelled,
    Skipped,
    /// The stage finished and asked the pipeline to stop successfully
    Exited,
}

impl StageStatus {
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            StageStatus::Success
                | StageStatus::Failure
                | StageStatus::Cancelled
                | StageStatus::Skipped
                | StageStatus::Exited
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStrategy {
    #[default]
    Auto,
    QuickSync,
    Pipeline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    #[default]
    Unknown,
    ContainerImage,
    S3Object,
    LambdaZip,
    GitSource,
    TerraformModule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactVersion {
    pub kind: ArtifactKind,
    pub version: String,
    pub name: String,
    pub url: String,
}

impl ArtifactVersion {
    /// Placeholder used when no plugin could determine a version.
    pub fn unknown() -> Self {
        Self {
            kind: ArtifactKind::Unknown,
            version: "unknown".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Commit {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub branch: String,
    pub url: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentTrigger {
    pub commit: Commit,
    /// Empty when triggered automatically
    pub commander: String,
    pub timestamp: i64,
    pub sync_strategy: SyncStrategy,
    pub strategy_summary: String,
}

/// Metadata attached to a deployment, split by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentMetadata {
    pub shared: BTreeMap<String, String>,
    pub plugins: BTreeMap<String, BTreeMap<String, String>>,
}

/// A single step in a deployment pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineStage {
    pub id: String,
    pub name: String,
    pub desc: String,
    /// Dense within a deployment; rollback stages reuse the index of their base stage
    pub index: i32,
    pub requires: Vec<String>,
    pub rollback: bool,
    pub status: StageStatus,
    pub status_reason: String,
    pub metadata: BTreeMap<String, String>,
    pub retried_count: i32,
    pub visible: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: i64,
}

impl PipelineStage {
    /// Metadata key linking a rollback stage to the forward stage it undoes.
    pub const BASE_STAGE_ID_KEY: &'static str = "baseStageID";

    pub fn base_stage_id(&self) -> Option<&str> {
        self.metadata.get(Self::BASE_STAGE_ID_KEY).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Deployment {
    pub id: String,
    pub application_id: String,
    pub application_name: String,
    pub piped_id: String,
    pub project_id: String,
    pub kind: String,
    pub platform_provider: String,
    pub labels: BTreeMap<String, String>,
    pub plugins: BTreeSet<String>,
    pub git_path: GitPath,
    pub trigger: DeploymentTrigger,
    pub summary: String,
    pub version: String,
    pub versions: Vec<ArtifactVersion>,
    pub running_commit_hash: String,
    pub running_config_filename: String,
    pub status: DeploymentStatus,
    pub status_reason: String,
    pub stages: Vec<PipelineStage>,
    pub metadata_v2: DeploymentMetadata,
    pub deployment_chain_id: String,
    pub deployment_chain_block_index: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: i64,
}

impl Deployment {
    pub fn is_in_chain(&self) -> bool {
        !self.deployment_chain_id.is_empty()
    }

    pub fn stage(&self, stage_id: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// The commander of the trigger, or "anonymous" when triggered automatically.
    pub fn commander_or_anonymous(&self) -> &str {
        if self.trigger.commander.is_empty() {
            "anonymous"
        } else {
            &self.trigger.commander
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(DeploymentStatus::Pending.can_update_to(DeploymentStatus::Planned));
        assert!(DeploymentStatus::Running.can_update_to(DeploymentStatus::RollingBack));
        assert!(!DeploymentStatus::Success.can_update_to(DeploymentStatus::Running));
        assert!(!DeploymentStatus::Planned.can_update_to(DeploymentStatus::Pending));
    }

    #[test]
    fn test_status_wire_names() {
        let s = serde_json::to_string(&DeploymentStatus::RollingBack).unwrap();
        assert_eq!(s, "\"ROLLING_BACK\"");
        let s = serde_json::to_string(&SyncStrategy::QuickSync).unwrap();
        assert_eq!(s, "\"QUICK_SYNC\"");
    }
}
