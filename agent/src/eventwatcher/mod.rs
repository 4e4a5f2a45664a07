//! Event watcher
//!
//! Updates manifests in Git when events registered through the control
//! plane match an application's `eventWatcher` configuration.

pub mod replace;
pub mod watcher;

pub use watcher::{EventWatcher, Options};
