//! Deployment metadata stores persisted on the control plane

pub mod registry;
pub mod store;

pub use registry::Registry;
pub use store::MetadataStore;
