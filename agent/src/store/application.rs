//! Application store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controlplane_api::Application;

use crate::errors::AgentError;
use crate::rpc::ControlPlane;

/// Application store options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sync interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    /// Ordered by name
    list: Vec<Application>,
    by_id: HashMap<String, Application>,
}

/// Read-only view over the applications managed by this piped
pub struct ApplicationStore {
    control_plane: Arc<dyn ControlPlane>,
    options: Options,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ApplicationStore {
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: Options) -> Self {
        Self {
            control_plane,
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Sync every interval until `ctx` is cancelled
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Application store starting...");
        let mut ticker = tokio::time::interval(self.options.interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Application store shutting down...");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Failed to sync applications: {}", e);
                    }
                }
            }
        }
    }

    /// Fetch the latest applications and publish a new snapshot.
    ///
    /// The previous snapshot is kept when the call fails.
    pub async fn sync(&self) -> Result<(), AgentError> {
        let mut list = self.control_plane.list_applications().await?;
        list.sort_by(|a, b| a.name.cmp(&b.name));
        let by_id = list.iter().map(|a| (a.id.clone(), a.clone())).collect();

        debug!("Synced {} applications", list.len());
        *self.snapshot.write() = Arc::new(Snapshot { list, by_id });
        Ok(())
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// List all applications ordered by name
    pub fn list(&self) -> Vec<Application> {
        self.snapshot().list.clone()
    }

    /// Get an application by id
    pub fn get(&self, id: &str) -> Option<Application> {
        self.snapshot().by_id.get(id).cloned()
    }

    /// List applications which use the given plugin
    pub fn list_by_plugin_name(&self, name: &str) -> Vec<Application> {
        self.snapshot()
            .list
            .iter()
            .filter(|a| a.plugins.contains(name))
            .cloned()
            .collect()
    }

    /// List applications whose definition lives in the given repository
    pub fn list_by_repo_id(&self, repo_id: &str) -> Vec<Application> {
        self.snapshot()
            .list
            .iter()
            .filter(|a| a.git_path.repo_id == repo_id)
            .cloned()
            .collect()
    }
}
