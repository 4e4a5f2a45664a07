//! Optional plan-preview service exposed by some plugins

use serde::{Deserialize, Serialize};

use crate::base64_bytes;
use crate::deployment::PlanPluginInput;

pub const SERVICE_NAME: &str = "grpc.plugin.planpreviewapi.v1alpha1.PlanPreviewService";

pub mod methods {
    pub const GET_PLAN_PREVIEW: &str = "GetPlanPreview";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetPlanPreviewRequest {
    pub input: PlanPluginInput,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanPreviewResult {
    pub deploy_target: String,
    pub summary: String,
    pub no_change: bool,
    #[serde(with = "base64_bytes")]
    pub details: Vec<u8>,
    pub diff_language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetPlanPreviewResponse {
    pub results: Vec<PlanPreviewResult>,
}
