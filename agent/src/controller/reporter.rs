//! Deployment status reports shared by planners and schedulers

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use controlplane_api::service as api;
use controlplane_api::{CommandStatus, DeploymentStatus, PipelineStage, StageStatus};

use crate::errors::AgentError;
use crate::rpc::{ControlPlane, Retry};
use crate::store::ReportableCommand;
use crate::utils::now_unix;

/// Reports the progress of one deployment, retrying each report
#[derive(Clone)]
pub struct DeploymentReporter {
    control_plane: Arc<dyn ControlPlane>,
    deployment_id: String,
    ctx: CancellationToken,
    retry: Retry,
}

impl DeploymentReporter {
    pub fn new(control_plane: Arc<dyn ControlPlane>, deployment_id: &str, ctx: CancellationToken) -> Self {
        Self {
            control_plane,
            deployment_id: deployment_id.to_string(),
            ctx,
            retry: Retry::new(Retry::DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub async fn status_changed(
        &self,
        status: DeploymentStatus,
        reason: &str,
    ) -> Result<(), AgentError> {
        let req = api::ReportDeploymentStatusChangedRequest {
            deployment_id: self.deployment_id.clone(),
            status,
            status_reason: reason.to_string(),
        };
        self.retry
            .run(&self.ctx, "ReportDeploymentStatusChanged", || {
                self.control_plane.report_deployment_status_changed(req.clone())
            })
            .await
    }

    pub async fn planned(&self, req: api::ReportDeploymentPlannedRequest) -> Result<(), AgentError> {
        self.retry
            .run(&self.ctx, "ReportDeploymentPlanned", || {
                self.control_plane.report_deployment_planned(req.clone())
            })
            .await
    }

    pub async fn completed(
        &self,
        status: DeploymentStatus,
        reason: &str,
        stage_statuses: BTreeMap<String, StageStatus>,
    ) -> Result<(), AgentError> {
        let req = api::ReportDeploymentCompletedRequest {
            deployment_id: self.deployment_id.clone(),
            status,
            status_reason: reason.to_string(),
            stage_statuses,
            completed_at: now_unix(),
        };
        self.retry
            .run(&self.ctx, "ReportDeploymentCompleted", || {
                self.control_plane.report_deployment_completed(req.clone())
            })
            .await
    }

    pub async fn stage_changed(
        &self,
        stage: &PipelineStage,
        status: StageStatus,
        reason: &str,
    ) -> Result<(), AgentError> {
        let req = api::ReportStageStatusChangedRequest {
            deployment_id: self.deployment_id.clone(),
            stage_id: stage.id.clone(),
            status,
            status_reason: reason.to_string(),
            requires: stage.requires.clone(),
            visible: stage.visible,
            retried_count: stage.retried_count,
            completed_at: if status.is_completed() { now_unix() } else { 0 },
        };
        self.retry
            .run(&self.ctx, "ReportStageStatusChanged", || {
                self.control_plane.report_stage_status_changed(req.clone())
            })
            .await
    }

    pub async fn most_recent_successful(
        &self,
        req: api::ReportApplicationMostRecentDeploymentRequest,
    ) -> Result<(), AgentError> {
        self.retry
            .run(&self.ctx, "ReportApplicationMostRecentDeployment", || {
                self.control_plane
                    .report_application_most_recent_deployment(req.clone())
            })
            .await
    }

    /// Acknowledge a cancel command with the deployment id as output
    pub async fn ack_cancel(&self, command: &ReportableCommand) {
        if let Err(e) = command
            .report(
                CommandStatus::CommandSucceeded,
                BTreeMap::new(),
                self.deployment_id.as_bytes().to_vec(),
            )
            .await
        {
            error!(deployment_id = %self.deployment_id, "Failed to report cancel command: {}", e);
        }
    }
}
