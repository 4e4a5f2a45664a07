//! Plugin service: the API piped serves to its plugins

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use controlplane_api::service as api;
use controlplane_api::ErrorResponse;
use plugin_api::pipedservice::{self as svc, methods, Empty, SERVICE_NAME};

use crate::errors::AgentError;
use crate::metadata::Registry as MetadataRegistry;
use crate::rpc::ControlPlane;
use crate::store::CommandStore;
use crate::toolregistry::ToolRegistry;

/// Collaborators the plugin service delegates to
pub struct PluginServiceState {
    pub control_plane: Arc<dyn ControlPlane>,
    pub tool_registry: Arc<ToolRegistry>,
    pub metadata: Arc<MetadataRegistry>,
    pub commands: Arc<CommandStore>,
}

/// Error returned to plugins as `{code, message}` with the matching status
pub struct ServiceError(AgentError);

impl From<AgentError> for ServiceError {
    fn from(err: AgentError) -> Self {
        ServiceError(err)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = code.http_status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Plugin service call failed: {}", self.0);
        }
        let body = ErrorResponse {
            code: code.as_str().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ServiceResult<T> = Result<Json<T>, ServiceError>;

fn route(method: &str) -> String {
    format!("/{}/{}", SERVICE_NAME, method)
}

pub fn router(state: Arc<PluginServiceState>) -> Router {
    Router::new()
        .route(&route(methods::INSTALL_TOOL), post(install_tool))
        .route(&route(methods::REPORT_STAGE_LOGS), post(report_stage_logs))
        .route(
            &route(methods::REPORT_STAGE_LOGS_FROM_LAST_CHECKPOINT),
            post(report_stage_logs_from_last_checkpoint),
        )
        .route(&route(methods::GET_STAGE_METADATA), post(get_stage_metadata))
        .route(&route(methods::PUT_STAGE_METADATA), post(put_stage_metadata))
        .route(&route(methods::PUT_STAGE_METADATA_MULTI), post(put_stage_metadata_multi))
        .route(
            &route(methods::GET_DEPLOYMENT_PLUGIN_METADATA),
            post(get_deployment_plugin_metadata),
        )
        .route(
            &route(methods::PUT_DEPLOYMENT_PLUGIN_METADATA),
            post(put_deployment_plugin_metadata),
        )
        .route(
            &route(methods::PUT_DEPLOYMENT_PLUGIN_METADATA_MULTI),
            post(put_deployment_plugin_metadata_multi),
        )
        .route(
            &route(methods::GET_DEPLOYMENT_SHARED_METADATA),
            post(get_deployment_shared_metadata),
        )
        .route(&route(methods::LIST_STAGE_COMMANDS), post(list_stage_commands))
        .route(
            &route(methods::GET_APPLICATION_SHARED_OBJECT),
            post(get_application_shared_object),
        )
        .route(
            &route(methods::PUT_APPLICATION_SHARED_OBJECT),
            post(put_application_shared_object),
        )
        .route(
            &route(methods::GET_LATEST_ANALYSIS_RESULT),
            post(get_latest_analysis_result),
        )
        .route(
            &route(methods::PUT_LATEST_ANALYSIS_RESULT),
            post(put_latest_analysis_result),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the plugin service on `addr`
pub async fn serve(
    addr: &str,
    state: Arc<PluginServiceState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    info!("Starting plugin service on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}

pub async fn install_tool(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::InstallToolRequest>,
) -> ServiceResult<svc::InstallToolResponse> {
    let installed_path = state
        .tool_registry
        .install(&req.name, &req.version, &req.install_script)
        .await?;
    Ok(Json(svc::InstallToolResponse { installed_path }))
}

pub async fn report_stage_logs(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::ReportStageLogsRequest>,
) -> ServiceResult<Empty> {
    state
        .control_plane
        .report_stage_logs(api::ReportStageLogsRequest {
            deployment_id: req.deployment_id,
            stage_id: req.stage_id,
            retried_count: req.retried_count,
            blocks: req.blocks,
        })
        .await?;
    Ok(Json(Empty {}))
}

pub async fn report_stage_logs_from_last_checkpoint(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::ReportStageLogsFromLastCheckpointRequest>,
) -> ServiceResult<Empty> {
    state
        .control_plane
        .report_stage_logs_from_last_checkpoint(api::ReportStageLogsFromLastCheckpointRequest {
            deployment_id: req.deployment_id,
            stage_id: req.stage_id,
            retried_count: req.retried_count,
            blocks: req.blocks,
            completed: req.completed,
        })
        .await?;
    Ok(Json(Empty {}))
}

fn metadata_response(value: Option<String>) -> Json<svc::GetMetadataResponse> {
    Json(svc::GetMetadataResponse {
        found: value.is_some(),
        value: value.unwrap_or_default(),
    })
}

pub async fn get_stage_metadata(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::GetStageMetadataRequest>,
) -> ServiceResult<svc::GetMetadataResponse> {
    let store = state.metadata.get(&req.deployment_id)?;
    Ok(metadata_response(store.stage_get(&req.stage_id, &req.key).await))
}

pub async fn put_stage_metadata(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::PutStageMetadataRequest>,
) -> ServiceResult<Empty> {
    let store = state.metadata.get(&req.deployment_id)?;
    store.stage_put(&req.stage_id, &req.key, &req.value).await?;
    Ok(Json(Empty {}))
}

pub async fn put_stage_metadata_multi(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::PutStageMetadataMultiRequest>,
) -> ServiceResult<Empty> {
    let store = state.metadata.get(&req.deployment_id)?;
    store.stage_put_multi(&req.stage_id, req.metadata).await?;
    Ok(Json(Empty {}))
}

pub async fn get_deployment_plugin_metadata(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::GetDeploymentPluginMetadataRequest>,
) -> ServiceResult<svc::GetMetadataResponse> {
    let store = state.metadata.get(&req.deployment_id)?;
    Ok(metadata_response(store.plugin_get(&req.plugin_name, &req.key).await))
}

pub async fn put_deployment_plugin_metadata(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::PutDeploymentPluginMetadataRequest>,
) -> ServiceResult<Empty> {
    let store = state.metadata.get(&req.deployment_id)?;
    store.plugin_put(&req.plugin_name, &req.key, &req.value).await?;
    Ok(Json(Empty {}))
}

pub async fn put_deployment_plugin_metadata_multi(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::PutDeploymentPluginMetadataMultiRequest>,
) -> ServiceResult<Empty> {
    let store = state.metadata.get(&req.deployment_id)?;
    store.plugin_put_multi(&req.plugin_name, req.metadata).await?;
    Ok(Json(Empty {}))
}

pub async fn get_deployment_shared_metadata(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::GetDeploymentSharedMetadataRequest>,
) -> ServiceResult<svc::GetMetadataResponse> {
    let store = state.metadata.get(&req.deployment_id)?;
    Ok(metadata_response(store.shared_get(&req.key).await))
}

pub async fn list_stage_commands(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::ListStageCommandsRequest>,
) -> ServiceResult<svc::ListStageCommandsResponse> {
    let commands = state
        .commands
        .list_stage_commands(&req.deployment_id, &req.stage_id);
    Ok(Json(svc::ListStageCommandsResponse { commands }))
}

pub async fn get_application_shared_object(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::GetApplicationSharedObjectRequest>,
) -> ServiceResult<svc::GetApplicationSharedObjectResponse> {
    let object = state
        .control_plane
        .get_application_shared_object(api::GetApplicationSharedObjectRequest {
            application_id: req.application_id,
            plugin_name: req.plugin_name,
            key: req.key,
        })
        .await?;
    Ok(Json(svc::GetApplicationSharedObjectResponse { object }))
}

pub async fn put_application_shared_object(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::PutApplicationSharedObjectRequest>,
) -> ServiceResult<Empty> {
    state
        .control_plane
        .put_application_shared_object(api::PutApplicationSharedObjectRequest {
            application_id: req.application_id,
            plugin_name: req.plugin_name,
            key: req.key,
            object: req.object,
        })
        .await?;
    Ok(Json(Empty {}))
}

pub async fn get_latest_analysis_result(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::GetLatestAnalysisResultRequest>,
) -> ServiceResult<svc::GetLatestAnalysisResultResponse> {
    let analysis_result = state
        .control_plane
        .get_latest_analysis_result(api::GetLatestAnalysisResultRequest {
            application_id: req.application_id,
        })
        .await?;
    Ok(Json(svc::GetLatestAnalysisResultResponse { analysis_result }))
}

pub async fn put_latest_analysis_result(
    State(state): State<Arc<PluginServiceState>>,
    Json(req): Json<svc::PutLatestAnalysisResultRequest>,
) -> ServiceResult<Empty> {
    state
        .control_plane
        .put_latest_analysis_result(api::PutLatestAnalysisResultRequest {
            application_id: req.application_id,
            analysis_result: req.analysis_result,
        })
        .await?;
    Ok(Json(Empty {}))
}
