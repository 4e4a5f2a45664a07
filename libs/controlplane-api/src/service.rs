//! `PipedService` request and response messages

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    base64_bytes, Application, ApplicationDeploymentReference, ApplicationInfo, ArtifactVersion,
    Command, CommandStatus, Deployment, DeploymentStatus, Event, EventStatus, PipelineStage,
    StageStatus,
};

/// Fully qualified service name used to build call paths.
pub const SERVICE_NAME: &str = "pipedservice.PipedService";

/// Method names of the piped service.
pub mod methods {
    pub const LIST_APPLICATIONS: &str = "ListApplications";
    pub const LIST_NOT_COMPLETED_DEPLOYMENTS: &str = "ListNotCompletedDeployments";
    pub const LIST_UNHANDLED_COMMANDS: &str = "ListUnhandledCommands";
    pub const REPORT_COMMAND_HANDLED: &str = "ReportCommandHandled";
    pub const LIST_EVENTS: &str = "ListEvents";
    pub const REPORT_EVENT_STATUSES: &str = "ReportEventStatuses";
    pub const GET_APPLICATION_MOST_RECENT_DEPLOYMENT: &str = "GetApplicationMostRecentDeployment";
    pub const REPORT_APPLICATION_DEPLOYING_STATUS: &str = "ReportApplicationDeployingStatus";
    pub const REPORT_APPLICATION_MOST_RECENT_DEPLOYMENT: &str =
        "ReportApplicationMostRecentDeployment";
    pub const CREATE_DEPLOYMENT: &str = "CreateDeployment";
    pub const REPORT_DEPLOYMENT_PLANNED: &str = "ReportDeploymentPlanned";
    pub const REPORT_DEPLOYMENT_STATUS_CHANGED: &str = "ReportDeploymentStatusChanged";
    pub const REPORT_DEPLOYMENT_COMPLETED: &str = "ReportDeploymentCompleted";
    pub const REPORT_STAGE_STATUS_CHANGED: &str = "ReportStageStatusChanged";
    pub const SAVE_DEPLOYMENT_SHARED_METADATA: &str = "SaveDeploymentSharedMetadata";
    pub const SAVE_DEPLOYMENT_PLUGIN_METADATA: &str = "SaveDeploymentPluginMetadata";
    pub const SAVE_STAGE_METADATA: &str = "SaveStageMetadata";
    pub const UPDATE_APPLICATION_CONFIGURATIONS: &str = "UpdateApplicationConfigurations";
    pub const REPORT_UNREGISTERED_APPLICATION_CONFIGURATIONS: &str =
        "ReportUnregisteredApplicationConfigurations";
    pub const IN_CHAIN_DEPLOYMENT_PLANNABLE: &str = "InChainDeploymentPlannable";
    pub const CREATE_DEPLOYMENT_CHAIN: &str = "CreateDeploymentChain";
    pub const REPORT_STAGE_LOGS: &str = "ReportStageLogs";
    pub const REPORT_STAGE_LOGS_FROM_LAST_CHECKPOINT: &str = "ReportStageLogsFromLastCheckpoint";
    pub const GET_LATEST_ANALYSIS_RESULT: &str = "GetLatestAnalysisResult";
    pub const PUT_LATEST_ANALYSIS_RESULT: &str = "PutLatestAnalysisResult";
    pub const GET_APPLICATION_SHARED_OBJECT: &str = "GetApplicationSharedObject";
    pub const PUT_APPLICATION_SHARED_OBJECT: &str = "PutApplicationSharedObject";
    pub const REPORT_STAT: &str = "ReportStat";
    pub const REPORT_PIPED_META: &str = "ReportPipedMeta";
}

/// Response for calls that carry no payload back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListApplicationsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListApplicationsResponse {
    pub applications: Vec<Application>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListNotCompletedDeploymentsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListNotCompletedDeploymentsResponse {
    pub deployments: Vec<Deployment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListUnhandledCommandsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListUnhandledCommandsResponse {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportCommandHandledRequest {
    pub command_id: String,
    pub status: CommandStatus,
    pub metadata: BTreeMap<String, String>,
    pub handled_at: i64,
    #[serde(with = "base64_bytes")]
    pub output: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListEventsRequest {
    /// Unix seconds, inclusive lower bound on `updatedAt`
    pub from: i64,
    /// Unix seconds, exclusive upper bound; zero means unbounded
    pub to: i64,
    pub order: ListOrder,
    pub status: Option<EventStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListEventsResponse {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventStatusReport {
    pub id: String,
    pub status: EventStatus,
    pub status_description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportEventStatusesRequest {
    pub events: Vec<EventStatusReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetApplicationMostRecentDeploymentRequest {
    pub application_id: String,
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetApplicationMostRecentDeploymentResponse {
    pub deployment: ApplicationDeploymentReference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportApplicationDeployingStatusRequest {
    pub application_id: String,
    pub deploying: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportApplicationMostRecentDeploymentRequest {
    pub application_id: String,
    pub status: DeploymentStatus,
    pub deployment: ApplicationDeploymentReference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateDeploymentRequest {
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportDeploymentPlannedRequest {
    pub deployment_id: String,
    pub summary: String,
    pub status_reason: String,
    pub running_commit_hash: String,
    pub running_config_filename: String,
    pub version: String,
    pub versions: Vec<ArtifactVersion>,
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportDeploymentStatusChangedRequest {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub status_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportDeploymentCompletedRequest {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub status_reason: String,
    pub stage_statuses: BTreeMap<String, StageStatus>,
    pub completed_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportStageStatusChangedRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub status: StageStatus,
    pub status_reason: String,
    pub requires: Vec<String>,
    pub visible: bool,
    pub retried_count: i32,
    pub completed_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveDeploymentSharedMetadataRequest {
    pub deployment_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveDeploymentPluginMetadataRequest {
    pub deployment_id: String,
    pub plugin_name: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveStageMetadataRequest {
    pub deployment_id: String,
    pub stage_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateApplicationConfigurationsRequest {
    pub applications: Vec<ApplicationInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportUnregisteredApplicationConfigurationsRequest {
    pub applications: Vec<ApplicationInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InChainDeploymentPlannableRequest {
    pub deployment_id: String,
    pub deployment_chain_id: String,
    pub deployment_chain_block_index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InChainDeploymentPlannableResponse {
    pub plannable: bool,
    pub cancel: bool,
    pub cancel_reason: String,
}

/// Selects the applications that make up the following blocks of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainApplicationMatcher {
    pub name: String,
    pub kind: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateDeploymentChainRequest {
    pub first_deployment: Deployment,
    pub matchers: Vec<ChainApplicationMatcher>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSeverity {
    #[default]
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogBlock {
    pub index: i64,
    pub log: String,
    pub severity: LogSeverity,
    pub created_at: i64,
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResult {
    /// Unix seconds at which the last analysis started
    pub start_time: i64,
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
pub struct ReportStatRequest {
    #[serde(with = "base64_bytes")]
    pub piped_stats: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipedRepository {
    pub id: String,
    pub remote: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipedPlugin {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportPipedMetaRequest {
    pub version: String,
    /// Agent configuration with secrets redacted
    pub config: String,
    pub repositories: Vec<PipedRepository>,
    pub plugins: Vec<PipedPlugin>,
    pub platform_providers: Vec<String>,
}
