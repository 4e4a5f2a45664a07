//! Event store

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controlplane_api::service::{ListEventsRequest, ListOrder};
use controlplane_api::{make_event_key, Event, EventStatus};

use crate::errors::AgentError;
use crate::rpc::ControlPlane;
use crate::utils::now_unix;

/// Event store options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sync interval
    pub interval: Duration,

    /// Events created before `now - retention` are dropped
    pub retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    /// event key -> events, newest first
    by_key: HashMap<String, Vec<Event>>,
}

#[derive(Debug, Default)]
struct SyncState {
    /// event id -> latest known event
    events: HashMap<String, Event>,
    /// Largest `updated_at` seen, the lower bound of the next list call
    milestone: i64,
}

/// Read-only view over the recent events of the project
pub struct EventStore {
    control_plane: Arc<dyn ControlPlane>,
    options: Options,
    state: Mutex<SyncState>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl EventStore {
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: Options) -> Self {
        Self {
            control_plane,
            options,
            state: Mutex::new(SyncState::default()),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Sync every interval until `ctx` is cancelled
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Event store starting...");
        let mut ticker = tokio::time::interval(self.options.interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Event store shutting down...");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Failed to sync events: {}", e);
                    }
                }
            }
        }
    }

    /// Fetch events updated since the last sync and publish a new snapshot
    pub async fn sync(&self) -> Result<(), AgentError> {
        let oldest = now_unix() - self.options.retention.as_secs() as i64;
        let from = self.state.lock().milestone.max(oldest);

        let events = self
            .control_plane
            .list_events(ListEventsRequest {
                from,
                to: 0,
                order: ListOrder::Asc,
                status: None,
            })
            .await?;

        let mut state = self.state.lock();
        for event in events {
            state.milestone = state.milestone.max(event.updated_at);
            state.events.insert(event.id.clone(), event);
        }
        state.events.retain(|_, e| e.created_at >= oldest);

        let mut by_key: HashMap<String, Vec<Event>> = HashMap::new();
        for event in state.events.values() {
            by_key.entry(event.key()).or_default().push(event.clone());
        }
        for bucket in by_key.values_mut() {
            bucket.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }

        debug!("Synced {} events", state.events.len());
        *self.snapshot.write() = Arc::new(Snapshot { by_key });
        Ok(())
    }

    /// List the not yet handled events matching `name` and `labels`, newest
    /// first, created at or after `min_created_at`, at most `limit` of them.
    pub fn list_not_handled(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        min_created_at: i64,
        limit: usize,
    ) -> Vec<Event> {
        if limit == 0 {
            return Vec::new();
        }
        let snapshot = self.snapshot.read().clone();
        let Some(bucket) = snapshot.by_key.get(&make_event_key(name, labels)) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for event in bucket {
            if event.created_at < min_created_at {
                break;
            }
            if event.status != EventStatus::NotHandled {
                continue;
            }
            out.push(event.clone());
            if out.len() >= limit {
                break;
            }
        }
        out
    }
}
