//! Per-deployment key/value metadata

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use controlplane_api::service as api;
use controlplane_api::Deployment;

use crate::errors::AgentError;
use crate::rpc::ControlPlane;

type Metadata = BTreeMap<String, String>;

/// Metadata of one deployment, split into shared, plugin and stage scopes.
///
/// Every write sends the whole updated scope upstream while holding that
/// scope's write lock, so upstream snapshots arrive in write order. The local
/// scope only changes once the upstream save succeeded.
pub struct MetadataStore {
    deployment_id: String,
    control_plane: Arc<dyn ControlPlane>,
    shared: RwLock<Metadata>,
    plugins: RwLock<BTreeMap<String, Metadata>>,
    stages: RwLock<BTreeMap<String, Metadata>>,
}

impl MetadataStore {
    /// Seed the store with the metadata already recorded on the deployment
    pub fn new(deployment: &Deployment, control_plane: Arc<dyn ControlPlane>) -> Self {
        let stages = deployment
            .stages
            .iter()
            .filter(|s| !s.metadata.is_empty())
            .map(|s| (s.id.clone(), s.metadata.clone()))
            .collect();

        Self {
            deployment_id: deployment.id.clone(),
            control_plane,
            shared: RwLock::new(deployment.metadata_v2.shared.clone()),
            plugins: RwLock::new(deployment.metadata_v2.plugins.clone()),
            stages: RwLock::new(stages),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub async fn shared_get(&self, key: &str) -> Option<String> {
        self.shared.read().await.get(key).cloned()
    }

    pub async fn shared_put(&self, key: &str, value: &str) -> Result<(), AgentError> {
        self.shared_put_multi(BTreeMap::from([(key.to_string(), value.to_string())]))
            .await
    }

    pub async fn shared_put_multi(&self, metadata: Metadata) -> Result<(), AgentError> {
        let mut shared = self.shared.write().await;
        let mut next = shared.clone();
        next.extend(metadata);
        self.control_plane
            .save_deployment_shared_metadata(api::SaveDeploymentSharedMetadataRequest {
                deployment_id: self.deployment_id.clone(),
                metadata: next.clone(),
            })
            .await?;
        *shared = next;
        Ok(())
    }

    pub async fn plugin_get(&self, plugin_name: &str, key: &str) -> Option<String> {
        self.plugins
            .read()
            .await
            .get(plugin_name)
            .and_then(|m| m.get(key))
            .cloned()
    }

    pub async fn plugin_put(
        &self,
        plugin_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), AgentError> {
        self.plugin_put_multi(
            plugin_name,
            BTreeMap::from([(key.to_string(), value.to_string())]),
        )
        .await
    }

    pub async fn plugin_put_multi(
        &self,
        plugin_name: &str,
        metadata: Metadata,
    ) -> Result<(), AgentError> {
        let mut plugins = self.plugins.write().await;
        let mut next = plugins.get(plugin_name).cloned().unwrap_or_default();
        next.extend(metadata);
        self.control_plane
            .save_deployment_plugin_metadata(api::SaveDeploymentPluginMetadataRequest {
                deployment_id: self.deployment_id.clone(),
                plugin_name: plugin_name.to_string(),
                metadata: next.clone(),
            })
            .await?;
        plugins.insert(plugin_name.to_string(), next);
        Ok(())
    }

    pub async fn stage_get(&self, stage_id: &str, key: &str) -> Option<String> {
        self.stages
            .read()
            .await
            .get(stage_id)
            .and_then(|m| m.get(key))
            .cloned()
    }

    pub async fn stage_put(&self, stage_id: &str, key: &str, value: &str) -> Result<(), AgentError> {
        self.stage_put_multi(stage_id, BTreeMap::from([(key.to_string(), value.to_string())]))
            .await
    }

    pub async fn stage_put_multi(
        &self,
        stage_id: &str,
        metadata: Metadata,
    ) -> Result<(), AgentError> {
        let mut stages = self.stages.write().await;
        let mut next = stages.get(stage_id).cloned().unwrap_or_default();
        next.extend(metadata);
        self.control_plane
            .save_stage_metadata(api::SaveStageMetadataRequest {
                deployment_id: self.deployment_id.clone(),
                stage_id: stage_id.to_string(),
                metadata: next.clone(),
            })
            .await?;
        stages.insert(stage_id.to_string(), next);
        Ok(())
    }
}
