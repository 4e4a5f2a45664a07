//! Server reflection, used to discover which optional services a plugin serves

use serde::{Deserialize, Serialize};

pub const SERVICE_NAME: &str = "grpc.reflection.v1.ServerReflection";

pub mod methods {
    pub const LIST_SERVICES: &str = "ListServices";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListServicesRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListServicesResponse {
    /// Fully qualified service names
    pub services: Vec<String>,
}
