//! Index of the running plugins

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use plugin_api::livestate;

use crate::config::ApplicationSpec;
use crate::errors::AgentError;
use crate::plugin::client::PluginClient;
use crate::rpc::Retry;

/// Running plugins indexed by name, by the stages they define and by
/// livestate support.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn PluginClient>>,
    name_based: HashMap<String, Arc<dyn PluginClient>>,
    stage_based: HashMap<String, Arc<dyn PluginClient>>,
    livestate_supported: HashSet<String>,
}

impl PluginRegistry {
    /// Query every plugin for its stages and services.
    ///
    /// Plugins may still be starting, so the queries are retried.
    pub async fn build(
        ctx: &CancellationToken,
        plugins: Vec<Arc<dyn PluginClient>>,
        retry: Retry,
    ) -> Result<Self, AgentError> {
        let mut registry = PluginRegistry::default();
        for plugin in plugins {
            let name = plugin.name().to_string();
            let stages = retry
                .run(ctx, "FetchDefinedStages", || plugin.fetch_defined_stages())
                .await
                .map_err(|e| {
                    AgentError::PluginError(format!(
                        "failed to fetch the stages defined by plugin {}: {}",
                        name, e
                    ))
                })?;

            for stage in &stages {
                if let Some(existing) = registry.stage_based.get(stage) {
                    return Err(AgentError::PluginError(format!(
                        "stage {} is defined by both {} and {}",
                        stage,
                        existing.name(),
                        name
                    )));
                }
                registry.stage_based.insert(stage.clone(), plugin.clone());
            }

            match plugin.list_services().await {
                Ok(services) if services.iter().any(|s| s == livestate::SERVICE_NAME) => {
                    registry.livestate_supported.insert(name.clone());
                }
                Ok(_) => {}
                Err(e) if e.is_unimplemented() => {}
                Err(e) => warn!(plugin = %name, "Failed to list plugin services: {}", e),
            }

            info!(plugin = %name, ?stages, "Registered plugin");
            registry.name_based.insert(name, plugin.clone());
            registry.plugins.push(plugin);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginClient>> {
        self.name_based.get(name).cloned()
    }

    /// The plugin executing stages named `stage_name`
    pub fn get_by_stage(&self, stage_name: &str) -> Result<Arc<dyn PluginClient>, AgentError> {
        self.stage_based.get(stage_name).cloned().ok_or_else(|| {
            AgentError::PluginError(format!("no plugin found for stage {}", stage_name))
        })
    }

    pub fn all(&self) -> &[Arc<dyn PluginClient>] {
        &self.plugins
    }

    /// Plugins responsible for an application.
    ///
    /// With a pipeline these are the owners of its stages in declaration
    /// order, otherwise the plugins listed by name. Each plugin appears once.
    pub fn plugins_for(
        &self,
        spec: &ApplicationSpec,
    ) -> Result<Vec<Arc<dyn PluginClient>>, AgentError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        if spec.has_pipeline() {
            for stage in spec.pipeline_stages() {
                let plugin = self.get_by_stage(&stage.name)?;
                if seen.insert(plugin.name().to_string()) {
                    out.push(plugin);
                }
            }
            return Ok(out);
        }

        if !spec.plugins.is_empty() {
            for name in spec.plugins.keys() {
                let plugin = self
                    .get(name)
                    .ok_or_else(|| AgentError::PluginError(format!("plugin {} not found", name)))?;
                if seen.insert(name.clone()) {
                    out.push(plugin);
                }
            }
            return Ok(out);
        }

        Err(AgentError::PluginError("no plugin specified".to_string()))
    }

    /// The plugins of an application which serve the livestate service
    pub fn livestate_plugins_for(
        &self,
        spec: &ApplicationSpec,
    ) -> Result<Vec<Arc<dyn PluginClient>>, AgentError> {
        Ok(self
            .plugins_for(spec)?
            .into_iter()
            .filter(|p| self.livestate_supported.contains(p.name()))
            .collect())
    }
}
