//! Metadata stores of the deployments currently handled by this piped

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use controlplane_api::Deployment;

use crate::errors::AgentError;
use crate::metadata::store::MetadataStore;
use crate::rpc::ControlPlane;

pub struct Registry {
    control_plane: Arc<dyn ControlPlane>,
    stores: RwLock<HashMap<String, Arc<MetadataStore>>>,
}

impl Registry {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Register the deployment, keeping the existing store if there is one
    pub fn register(&self, deployment: &Deployment) -> Arc<MetadataStore> {
        let mut stores = self.stores.write();
        stores
            .entry(deployment.id.clone())
            .or_insert_with(|| {
                debug!(deployment_id = %deployment.id, "Registered metadata store");
                Arc::new(MetadataStore::new(deployment, self.control_plane.clone()))
            })
            .clone()
    }

    pub fn get(&self, deployment_id: &str) -> Result<Arc<MetadataStore>, AgentError> {
        self.stores.read().get(deployment_id).cloned().ok_or_else(|| {
            AgentError::NotFound(format!(
                "no metadata store registered for deployment {}",
                deployment_id
            ))
        })
    }

    pub fn delete(&self, deployment_id: &str) {
        self.stores.write().remove(deployment_id);
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
