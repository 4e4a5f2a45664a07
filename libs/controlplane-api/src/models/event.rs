//! Event models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    NotHandled,
    Handled,
    Failure,
}

/// An external event registered through the control plane, e.g. an image push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub data: String,
    pub labels: BTreeMap<String, String>,
    pub event_key: String,
    pub status: EventStatus,
    pub status_description: String,
    pub handled_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Event {
    /// The event key, computing it when the control plane left it empty.
    pub fn key(&self) -> String {
        if self.event_key.is_empty() {
            make_event_key(&self.name, &self.labels)
        } else {
            self.event_key.clone()
        }
    }
}

/// Compose the deterministic key for an event name and its labels.
///
/// Labels are visited in key order, so the same set always yields the same key.
pub fn make_event_key(name: &str, labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    for (k, v) in labels {
        hasher.update(b"\n");
        hasher.update(k.as_bytes());
        hasher.update(b":");
        hasher.update(v.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
