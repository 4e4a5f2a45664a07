//! Plugin service exposed by piped for its plugins

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use controlplane_api::service::{AnalysisResult, LogBlock};
use controlplane_api::Command;

use crate::base64_bytes;

pub const SERVICE_NAME: &str = "grpc.piped.service.v1alpha1.PluginService";

pub mod methods {
    pub const INSTALL_TOOL: &str = "InstallTool";
    pub const REPORT_STAGE_LOGS: &str = "ReportStageLogs";
    pub const REPORT_STAGE_LOGS_FROM_LAST_CHECKPOINT: &str = "ReportStageLogsFromLastCheckpoint";
    pub const GET_STAGE_METADATA: &str = "GetStageMetadata";
    pub const PUT_STAGE_METADATA: &str = "PutStageMetadata";
    pub const PUT_STAGE_METADATA_MULTI: &str = "PutStageMetadataMulti";
    pub const GET_DEPLOYMENT_PLUGIN_METADATA: &str = "GetDeploymentPluginMetadata";
    pub const PUT_DEPLOYMENT_PLUGIN_METADATA: &str = "PutDeploymentPluginMetadata";
    pub const PUT_DEPLOYMENT_PLUGIN_METADATA_MULTI: &str = "PutDeploymentPluginMetadataMulti";
    pub const GET_DEPLOYMENT_SHARED_METADATA: &str = "GetDeploymentSharedMetadata";
    pub const LIST_STAGE_COMMANDS: &str = "ListStageCommands";
    pub const GET_APPLICATION_SHARED_OBJECT: &str = "GetApplicationSharedObject";
    pub const PUT_APPLICATION_SHARED_OBJECT: &str = "PutApplicationSharedObject";
    pub const GET_LATEST_ANALYSIS_RESULT: &str = "GetLatestAnalysisResult";
    pub const PUT_LATEST_ANALYSIS_RESULT: &str = "PutLatestAnalysisResult";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallToolRequest {
    pub name: String,
    pub version: String,
    pub install_script: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallToolResponse {
    pub installed_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportStageLogsRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub retried_count: i32,
    pub blocks: Vec<LogBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportStageLogsFromLastCheckpointRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub retried_count: i32,
    pub blocks: Vec<LogBlock>,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetStageMetadataRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutStageMetadataRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutStageMetadataMultiRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetDeploymentPluginMetadataRequest {
    pub deployment_id: String,
    pub plugin_name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutDeploymentPluginMetadataRequest {
    pub deployment_id: String,
    pub plugin_name: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutDeploymentPluginMetadataMultiRequest {
    pub deployment_id: String,
    pub plugin_name: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetDeploymentSharedMetadataRequest {
    pub deployment_id: String,
    pub key: String,
}

/// Response of every metadata read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetMetadataResponse {
    pub value: String,
    pub found: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListStageCommandsRequest {
    pub deployment_id: String,
    pub stage_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListStageCommandsResponse {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetApplicationSharedObjectRequest {
    pub application_id: String,
    pub plugin_name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetApplicationSharedObjectResponse {
    #[serde(with = "base64_bytes")]
    pub object: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutApplicationSharedObjectRequest {
    pub application_id: String,
    pub plugin_name: String,
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub object: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetLatestAnalysisResultRequest {
    pub application_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetLatestAnalysisResultResponse {
    pub analysis_result: AnalysisResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutLatestAnalysisResultRequest {
    pub application_id: String,
    pub analysis_result: AnalysisResult,
}
