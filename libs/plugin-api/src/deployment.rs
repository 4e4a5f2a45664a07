//! Deployment service exposed by every plugin

use serde::{Deserialize, Serialize};

use controlplane_api::{ArtifactVersion, Deployment, PipelineStage, StageStatus, SyncStrategy};

use crate::base64_bytes;

pub const SERVICE_NAME: &str = "grpc.plugin.deploymentapi.v1alpha1.DeploymentService";

pub mod methods {
    pub const FETCH_DEFINED_STAGES: &str = "FetchDefinedStages";
    pub const DETERMINE_STRATEGY: &str = "DetermineStrategy";
    pub const DETERMINE_VERSIONS: &str = "DetermineVersions";
    pub const BUILD_QUICK_SYNC_STAGES: &str = "BuildQuickSyncStages";
    pub const BUILD_PIPELINE_SYNC_STAGES: &str = "BuildPipelineSyncStages";
    pub const EXECUTE_STAGE: &str = "ExecuteStage";
}

/// A checked-out tree handed to a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentSource {
    pub application_directory: String,
    pub commit_hash: String,
    #[serde(with = "base64_bytes")]
    pub application_config: Vec<u8>,
    pub application_config_filename: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanPluginInput {
    pub deployment: Deployment,
    pub running_deployment_source: Option<DeploymentSource>,
    pub target_deployment_source: DeploymentSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchDefinedStagesRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchDefinedStagesResponse {
    pub stages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetermineStrategyRequest {
    pub input: PlanPluginInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetermineStrategyResponse {
    pub sync_strategy: SyncStrategy,
    pub summary: String,
    /// Set when the plugin has no opinion for this deployment
    pub unsupported: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetermineVersionsRequest {
    pub input: PlanPluginInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetermineVersionsResponse {
    pub versions: Vec<ArtifactVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildQuickSyncStagesRequest {
    pub rollback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildQuickSyncStagesResponse {
    pub stages: Vec<PipelineStage>,
}

/// A configured pipeline stage with its assigned identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageConfig {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub index: i32,
    #[serde(with = "base64_bytes")]
    pub config: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildPipelineSyncStagesRequest {
    pub stages: Vec<StageConfig>,
    pub rollback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildPipelineSyncStagesResponse {
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteStageInput {
    pub deployment: Deployment,
    pub stage: PipelineStage,
    #[serde(with = "base64_bytes")]
    pub stage_config: Vec<u8>,
    pub running_deployment_source: Option<DeploymentSource>,
    pub target_deployment_source: DeploymentSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteStageRequest {
    pub input: ExecuteStageInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteStageResponse {
    pub status: StageStatus,
}
