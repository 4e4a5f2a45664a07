//! Upstream control plane API

use async_trait::async_trait;
use secrecy::SecretString;

use controlplane_api::service::{self as api, methods, Empty, SERVICE_NAME};
use controlplane_api::{Application, ApplicationDeploymentReference, Command, Deployment, Event};

use crate::errors::AgentError;
use crate::rpc::client::{RpcClient, RpcClientOptions};

/// Every call piped makes to the control plane.
///
/// Implemented by [`ControlPlaneClient`] over the wire and by in-memory fakes
/// in tests.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_applications(&self) -> Result<Vec<Application>, AgentError>;

    async fn list_not_completed_deployments(&self) -> Result<Vec<Deployment>, AgentError>;

    async fn list_unhandled_commands(&self) -> Result<Vec<Command>, AgentError>;

    async fn report_command_handled(
        &self,
        req: api::ReportCommandHandledRequest,
    ) -> Result<(), AgentError>;

    async fn list_events(&self, req: api::ListEventsRequest) -> Result<Vec<Event>, AgentError>;

    async fn report_event_statuses(
        &self,
        req: api::ReportEventStatusesRequest,
    ) -> Result<(), AgentError>;

    /// Fails with `NotFound` when the application never reached `status`.
    async fn get_application_most_recent_deployment(
        &self,
        req: api::GetApplicationMostRecentDeploymentRequest,
    ) -> Result<ApplicationDeploymentReference, AgentError>;

    async fn report_application_deploying_status(
        &self,
        req: api::ReportApplicationDeployingStatusRequest,
    ) -> Result<(), AgentError>;

    async fn report_application_most_recent_deployment(
        &self,
        req: api::ReportApplicationMostRecentDeploymentRequest,
    ) -> Result<(), AgentError>;

    async fn create_deployment(&self, req: api::CreateDeploymentRequest) -> Result<(), AgentError>;

    async fn report_deployment_planned(
        &self,
        req: api::ReportDeploymentPlannedRequest,
    ) -> Result<(), AgentError>;

    async fn report_deployment_status_changed(
        &self,
        req: api::ReportDeploymentStatusChangedRequest,
    ) -> Result<(), AgentError>;

    async fn report_deployment_completed(
        &self,
        req: api::ReportDeploymentCompletedRequest,
    ) -> Result<(), AgentError>;

    async fn report_stage_status_changed(
        &self,
        req: api::ReportStageStatusChangedRequest,
    ) -> Result<(), AgentError>;

    async fn save_deployment_shared_metadata(
        &self,
        req: api::SaveDeploymentSharedMetadataRequest,
    ) -> Result<(), AgentError>;

    async fn save_deployment_plugin_metadata(
        &self,
        req: api::SaveDeploymentPluginMetadataRequest,
    ) -> Result<(), AgentError>;

    async fn save_stage_metadata(&self, req: api::SaveStageMetadataRequest)
        -> Result<(), AgentError>;

    async fn update_application_configurations(
        &self,
        req: api::UpdateApplicationConfigurationsRequest,
    ) -> Result<(), AgentError>;

    async fn report_unregistered_application_configurations(
        &self,
        req: api::ReportUnregisteredApplicationConfigurationsRequest,
    ) -> Result<(), AgentError>;

    async fn in_chain_deployment_plannable(
        &self,
        req: api::InChainDeploymentPlannableRequest,
    ) -> Result<api::InChainDeploymentPlannableResponse, AgentError>;

    async fn create_deployment_chain(
        &self,
        req: api::CreateDeploymentChainRequest,
    ) -> Result<(), AgentError>;

    async fn report_stage_logs(&self, req: api::ReportStageLogsRequest) -> Result<(), AgentError>;

    async fn report_stage_logs_from_last_checkpoint(
        &self,
        req: api::ReportStageLogsFromLastCheckpointRequest,
    ) -> Result<(), AgentError>;

    async fn get_latest_analysis_result(
        &self,
        req: api::GetLatestAnalysisResultRequest,
    ) -> Result<api::AnalysisResult, AgentError>;

    async fn put_latest_analysis_result(
        &self,
        req: api::PutLatestAnalysisResultRequest,
    ) -> Result<(), AgentError>;

    /// Fails with `NotFound` when nothing was stored under the key.
    async fn get_application_shared_object(
        &self,
        req: api::GetApplicationSharedObjectRequest,
    ) -> Result<Vec<u8>, AgentError>;

    async fn put_application_shared_object(
        &self,
        req: api::PutApplicationSharedObjectRequest,
    ) -> Result<(), AgentError>;

    async fn report_stat(&self, req: api::ReportStatRequest) -> Result<(), AgentError>;

    async fn report_piped_meta(&self, req: api::ReportPipedMetaRequest) -> Result<(), AgentError>;
}

/// Wire implementation of [`ControlPlane`]
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    rpc: RpcClient,
}

impl ControlPlaneClient {
    /// Build a client authenticated as `piped_id` of `project_id`
    pub fn new(
        options: &RpcClientOptions,
        project_id: &str,
        piped_id: &str,
        piped_key: &str,
    ) -> Result<Self, AgentError> {
        let credentials = format!("PIPED {},{},{}", project_id, piped_id, piped_key);
        let rpc = RpcClient::new(options)?.with_authorization(SecretString::from(credentials));
        Ok(Self { rpc })
    }

    async fn call<Req, Resp>(&self, method: &str, req: &Req) -> Result<Resp, AgentError>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        self.rpc.call(SERVICE_NAME, method, req).await
    }

    async fn send<Req>(&self, method: &str, req: &Req) -> Result<(), AgentError>
    where
        Req: serde::Serialize + Sync,
    {
        let _: Empty = self.call(method, req).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn list_applications(&self) -> Result<Vec<Application>, AgentError> {
        let resp: api::ListApplicationsResponse = self
            .call(methods::LIST_APPLICATIONS, &api::ListApplicationsRequest {})
            .await?;
        Ok(resp.applications)
    }

    async fn list_not_completed_deployments(&self) -> Result<Vec<Deployment>, AgentError> {
        let resp: api::ListNotCompletedDeploymentsResponse = self
            .call(
                methods::LIST_NOT_COMPLETED_DEPLOYMENTS,
                &api::ListNotCompletedDeploymentsRequest {},
            )
            .await?;
        Ok(resp.deployments)
    }

    async fn list_unhandled_commands(&self) -> Result<Vec<Command>, AgentError> {
        let resp: api::ListUnhandledCommandsResponse = self
            .call(
                methods::LIST_UNHANDLED_COMMANDS,
                &api::ListUnhandledCommandsRequest {},
            )
            .await?;
        Ok(resp.commands)
    }

    async fn report_command_handled(
        &self,
        req: api::ReportCommandHandledRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_COMMAND_HANDLED, &req).await
    }

    async fn list_events(&self, req: api::ListEventsRequest) -> Result<Vec<Event>, AgentError> {
        let resp: api::ListEventsResponse = self.call(methods::LIST_EVENTS, &req).await?;
        Ok(resp.events)
    }

    async fn report_event_statuses(
        &self,
        req: api::ReportEventStatusesRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_EVENT_STATUSES, &req).await
    }

    async fn get_application_most_recent_deployment(
        &self,
        req: api::GetApplicationMostRecentDeploymentRequest,
    ) -> Result<ApplicationDeploymentReference, AgentError> {
        let resp: api::GetApplicationMostRecentDeploymentResponse = self
            .call(methods::GET_APPLICATION_MOST_RECENT_DEPLOYMENT, &req)
            .await?;
        Ok(resp.deployment)
    }

    async fn report_application_deploying_status(
        &self,
        req: api::ReportApplicationDeployingStatusRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_APPLICATION_DEPLOYING_STATUS, &req)
            .await
    }

    async fn report_application_most_recent_deployment(
        &self,
        req: api::ReportApplicationMostRecentDeploymentRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_APPLICATION_MOST_RECENT_DEPLOYMENT, &req)
            .await
    }

    async fn create_deployment(&self, req: api::CreateDeploymentRequest) -> Result<(), AgentError> {
        self.send(methods::CREATE_DEPLOYMENT, &req).await
    }

    async fn report_deployment_planned(
        &self,
        req: api::ReportDeploymentPlannedRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_DEPLOYMENT_PLANNED, &req).await
    }

    async fn report_deployment_status_changed(
        &self,
        req: api::ReportDeploymentStatusChangedRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_DEPLOYMENT_STATUS_CHANGED, &req)
            .await
    }

    async fn report_deployment_completed(
        &self,
        req: api::ReportDeploymentCompletedRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_DEPLOYMENT_COMPLETED, &req).await
    }

    async fn report_stage_status_changed(
        &self,
        req: api::ReportStageStatusChangedRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_STAGE_STATUS_CHANGED, &req).await
    }

    async fn save_deployment_shared_metadata(
        &self,
        req: api::SaveDeploymentSharedMetadataRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::SAVE_DEPLOYMENT_SHARED_METADATA, &req)
            .await
    }

    async fn save_deployment_plugin_metadata(
        &self,
        req: api::SaveDeploymentPluginMetadataRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::SAVE_DEPLOYMENT_PLUGIN_METADATA, &req)
            .await
    }

    async fn save_stage_metadata(
        &self,
        req: api::SaveStageMetadataRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::SAVE_STAGE_METADATA, &req).await
    }

    async fn update_application_configurations(
        &self,
        req: api::UpdateApplicationConfigurationsRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::UPDATE_APPLICATION_CONFIGURATIONS, &req)
            .await
    }

    async fn report_unregistered_application_configurations(
        &self,
        req: api::ReportUnregisteredApplicationConfigurationsRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_UNREGISTERED_APPLICATION_CONFIGURATIONS, &req)
            .await
    }

    async fn in_chain_deployment_plannable(
        &self,
        req: api::InChainDeploymentPlannableRequest,
    ) -> Result<api::InChainDeploymentPlannableResponse, AgentError> {
        self.call(methods::IN_CHAIN_DEPLOYMENT_PLANNABLE, &req).await
    }

    async fn create_deployment_chain(
        &self,
        req: api::CreateDeploymentChainRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::CREATE_DEPLOYMENT_CHAIN, &req).await
    }

    async fn report_stage_logs(&self, req: api::ReportStageLogsRequest) -> Result<(), AgentError> {
        self.send(methods::REPORT_STAGE_LOGS, &req).await
    }

    async fn report_stage_logs_from_last_checkpoint(
        &self,
        req: api::ReportStageLogsFromLastCheckpointRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::REPORT_STAGE_LOGS_FROM_LAST_CHECKPOINT, &req)
            .await
    }

    async fn get_latest_analysis_result(
        &self,
        req: api::GetLatestAnalysisResultRequest,
    ) -> Result<api::AnalysisResult, AgentError> {
        let resp: api::GetLatestAnalysisResultResponse =
            self.call(methods::GET_LATEST_ANALYSIS_RESULT, &req).await?;
        Ok(resp.analysis_result)
    }

    async fn put_latest_analysis_result(
        &self,
        req: api::PutLatestAnalysisResultRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::PUT_LATEST_ANALYSIS_RESULT, &req).await
    }

    async fn get_application_shared_object(
        &self,
        req: api::GetApplicationSharedObjectRequest,
    ) -> Result<Vec<u8>, AgentError> {
        let resp: api::GetApplicationSharedObjectResponse = self
            .call(methods::GET_APPLICATION_SHARED_OBJECT, &req)
            .await?;
        Ok(resp.object)
    }

    async fn put_application_shared_object(
        &self,
        req: api::PutApplicationSharedObjectRequest,
    ) -> Result<(), AgentError> {
        self.send(methods::PUT_APPLICATION_SHARED_OBJECT, &req)
            .await
    }

    async fn report_stat(&self, req: api::ReportStatRequest) -> Result<(), AgentError> {
        self.send(methods::REPORT_STAT, &req).await
    }

    async fn report_piped_meta(&self, req: api::ReportPipedMetaRequest) -> Result<(), AgentError> {
        self.send(methods::REPORT_PIPED_META, &req).await
    }
}
