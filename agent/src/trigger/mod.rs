//! Deployment trigger
//!
//! Watches the configured repositories and the sync commands and creates
//! deployments on the control plane.

pub mod deployment;
pub mod determiner;
#[allow(clippy::module_inception)]
pub mod trigger;

pub use deployment::{build_deployment, TriggerRequest};
pub use trigger::{load_spec, Options, Trigger, TRIGGERED_DEPLOYMENT_ID_KEY};
