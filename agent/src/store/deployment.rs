//! Deployment store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controlplane_api::{Deployment, DeploymentStatus};

use crate::errors::AgentError;
use crate::rpc::ControlPlane;

/// Deployment store options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sync interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    pendings: Vec<Deployment>,
    planneds: Vec<Deployment>,
    runnings: Vec<Deployment>,
    head_deployments: HashMap<String, Deployment>,
}

impl Snapshot {
    fn build(mut deployments: Vec<Deployment>) -> Self {
        // Oldest first, so every bucket below is ordered by trigger time.
        deployments.sort_by_key(|d| (d.trigger.timestamp, d.created_at));

        let mut snapshot = Snapshot::default();
        for d in deployments {
            match d.status {
                DeploymentStatus::Pending => snapshot.pendings.push(d),
                DeploymentStatus::Planned => snapshot.planneds.push(d),
                DeploymentStatus::Running | DeploymentStatus::RollingBack => {
                    snapshot.runnings.push(d)
                }
                _ => {}
            }
        }

        // Later buckets overwrite earlier ones. Within a bucket the oldest is
        // written last so it wins.
        let mut heads = HashMap::new();
        for bucket in [&snapshot.pendings, &snapshot.planneds, &snapshot.runnings] {
            for d in bucket.iter().rev() {
                heads.insert(d.application_id.clone(), d.clone());
            }
        }
        snapshot.head_deployments = heads;
        snapshot
    }
}

/// Read-only view over the not completed deployments of this piped
pub struct DeploymentStore {
    control_plane: Arc<dyn ControlPlane>,
    options: Options,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl DeploymentStore {
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: Options) -> Self {
        Self {
            control_plane,
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Sync every interval until `ctx` is cancelled
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Deployment store starting...");
        let mut ticker = tokio::time::interval(self.options.interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Deployment store shutting down...");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Failed to sync deployments: {}", e);
                    }
                }
            }
        }
    }

    /// Fetch the not completed deployments and publish a new snapshot
    pub async fn sync(&self) -> Result<(), AgentError> {
        let deployments = self.control_plane.list_not_completed_deployments().await?;
        let snapshot = Snapshot::build(deployments);

        debug!(
            pendings = snapshot.pendings.len(),
            planneds = snapshot.planneds.len(),
            runnings = snapshot.runnings.len(),
            "Synced deployments"
        );
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Pending deployments, oldest first
    pub fn list_pendings(&self) -> Vec<Deployment> {
        self.snapshot().pendings.clone()
    }

    /// Planned deployments, oldest first
    pub fn list_planneds(&self) -> Vec<Deployment> {
        self.snapshot().planneds.clone()
    }

    /// Running and rolling back deployments, oldest first
    pub fn list_runnings(&self) -> Vec<Deployment> {
        self.snapshot().runnings.clone()
    }

    /// The deployment each application is working on, keyed by application id.
    ///
    /// Running beats planned beats pending; within a status the oldest wins.
    pub fn list_app_head_deployments(&self) -> HashMap<String, Deployment> {
        self.snapshot().head_deployments.clone()
    }
}
