//! Optional livestate service exposed by some plugins

use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentSource;

pub const SERVICE_NAME: &str = "grpc.plugin.livestateapi.v1alpha1.LivestateService";

pub mod methods {
    pub const GET_LIVESTATE: &str = "GetLivestate";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetLivestateRequest {
    pub application_id: String,
    pub deploy_source: DeploymentSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetLivestateResponse {
    /// Plugin specific resource state, opaque to piped
    pub application_live_state: serde_json::Value,
    pub sync_state: serde_json::Value,
}
