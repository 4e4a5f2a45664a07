//! Client for the services a plugin exposes

use async_trait::async_trait;

use controlplane_api::{ArtifactVersion, PipelineStage, StageStatus};
use plugin_api::deployment::{self, ExecuteStageInput, PlanPluginInput, StageConfig};
use plugin_api::livestate::{self, GetLivestateRequest, GetLivestateResponse};
use plugin_api::planpreview::{self, PlanPreviewResult};
use plugin_api::reflection;

use crate::errors::AgentError;
use crate::rpc::{RpcClient, RpcClientOptions};

/// Capabilities of a running plugin.
///
/// Optional capabilities fail with an `Unimplemented` error when the plugin
/// does not serve them; see [`AgentError::is_unimplemented`].
#[async_trait]
pub trait PluginClient: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the stages this plugin can execute
    async fn fetch_defined_stages(&self) -> Result<Vec<String>, AgentError>;

    /// `None` when the plugin has no opinion for the deployment
    async fn determine_strategy(
        &self,
        input: PlanPluginInput,
    ) -> Result<Option<deployment::DetermineStrategyResponse>, AgentError>;

    async fn determine_versions(
        &self,
        input: PlanPluginInput,
    ) -> Result<Vec<ArtifactVersion>, AgentError>;

    async fn build_quick_sync_stages(&self, rollback: bool)
        -> Result<Vec<PipelineStage>, AgentError>;

    async fn build_pipeline_sync_stages(
        &self,
        stages: Vec<StageConfig>,
        rollback: bool,
    ) -> Result<Vec<PipelineStage>, AgentError>;

    async fn execute_stage(&self, input: ExecuteStageInput) -> Result<StageStatus, AgentError>;

    async fn get_livestate(
        &self,
        req: GetLivestateRequest,
    ) -> Result<GetLivestateResponse, AgentError>;

    async fn get_plan_preview(
        &self,
        input: PlanPluginInput,
    ) -> Result<Vec<PlanPreviewResult>, AgentError>;

    /// Fully qualified names of the services the plugin serves
    async fn list_services(&self) -> Result<Vec<String>, AgentError>;
}

/// [`PluginClient`] speaking JSON RPC to `localhost:<port>`
#[derive(Debug, Clone)]
pub struct RpcPluginClient {
    name: String,
    rpc: RpcClient,
}

impl RpcPluginClient {
    pub fn new(name: &str, port: u16) -> Result<Self, AgentError> {
        let options = RpcClientOptions {
            address: format!("localhost:{}", port),
            insecure: true,
            cert_file: None,
            // Stage executions last as long as the plugin needs
            timeout: None,
        };
        Ok(Self {
            name: name.to_string(),
            rpc: RpcClient::new(&options)?,
        })
    }
}

#[async_trait]
impl PluginClient for RpcPluginClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_defined_stages(&self) -> Result<Vec<String>, AgentError> {
        let resp: deployment::FetchDefinedStagesResponse = self
            .rpc
            .call(
                deployment::SERVICE_NAME,
                deployment::methods::FETCH_DEFINED_STAGES,
                &deployment::FetchDefinedStagesRequest {},
            )
            .await?;
        Ok(resp.stages)
    }

    async fn determine_strategy(
        &self,
        input: PlanPluginInput,
    ) -> Result<Option<deployment::DetermineStrategyResponse>, AgentError> {
        let resp: deployment::DetermineStrategyResponse = self
            .rpc
            .call(
                deployment::SERVICE_NAME,
                deployment::methods::DETERMINE_STRATEGY,
                &deployment::DetermineStrategyRequest { input },
            )
            .await?;
        Ok((!resp.unsupported).then_some(resp))
    }

    async fn determine_versions(
        &self,
        input: PlanPluginInput,
    ) -> Result<Vec<ArtifactVersion>, AgentError> {
        let resp: deployment::DetermineVersionsResponse = self
            .rpc
            .call(
                deployment::SERVICE_NAME,
                deployment::methods::DETERMINE_VERSIONS,
                &deployment::DetermineVersionsRequest { input },
            )
            .await?;
        Ok(resp.versions)
    }

    async fn build_quick_sync_stages(
        &self,
        rollback: bool,
    ) -> Result<Vec<PipelineStage>, AgentError> {
        let resp: deployment::BuildQuickSyncStagesResponse = self
            .rpc
            .call(
                deployment::SERVICE_NAME,
                deployment::methods::BUILD_QUICK_SYNC_STAGES,
                &deployment::BuildQuickSyncStagesRequest { rollback },
            )
            .await?;
        Ok(resp.stages)
    }

    async fn build_pipeline_sync_stages(
        &self,
        stages: Vec<StageConfig>,
        rollback: bool,
    ) -> Result<Vec<PipelineStage>, AgentError> {
        let resp: deployment::BuildPipelineSyncStagesResponse = self
            .rpc
            .call(
                deployment::SERVICE_NAME,
                deployment::methods::BUILD_PIPELINE_SYNC_STAGES,
                &deployment::BuildPipelineSyncStagesRequest { stages, rollback },
            )
            .await?;
        Ok(resp.stages)
    }

    async fn execute_stage(&self, input: ExecuteStageInput) -> Result<StageStatus, AgentError> {
        let resp: deployment::ExecuteStageResponse = self
            .rpc
            .call(
                deployment::SERVICE_NAME,
                deployment::methods::EXECUTE_STAGE,
                &deployment::ExecuteStageRequest { input },
            )
            .await?;
        Ok(resp.status)
    }

    async fn get_livestate(
        &self,
        req: GetLivestateRequest,
    ) -> Result<GetLivestateResponse, AgentError> {
        self.rpc
            .call(livestate::SERVICE_NAME, livestate::methods::GET_LIVESTATE, &req)
            .await
    }

    async fn get_plan_preview(
        &self,
        input: PlanPluginInput,
    ) -> Result<Vec<PlanPreviewResult>, AgentError> {
        let resp: planpreview::GetPlanPreviewResponse = self
            .rpc
            .call(
                planpreview::SERVICE_NAME,
                planpreview::methods::GET_PLAN_PREVIEW,
                &planpreview::GetPlanPreviewRequest { input },
            )
            .await?;
        Ok(resp.results)
    }

    async fn list_services(&self) -> Result<Vec<String>, AgentError> {
        let resp: reflection::ListServicesResponse = self
            .rpc
            .call(
                reflection::SERVICE_NAME,
                reflection::methods::LIST_SERVICES,
                &reflection::ListServicesRequest {},
            )
            .await?;
        Ok(resp.services)
    }
}
