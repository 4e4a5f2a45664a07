//! Plugin wire models
//!
//! Messages for both directions of the plugin RPC: the services every plugin
//! exposes to piped (`deployment`, `livestate`, `planpreview`, `reflection`)
//! and the plugin service piped exposes back to its plugins (`pipedservice`).

pub mod deployment;
pub mod livestate;
pub mod pipedservice;
pub mod planpreview;
pub mod reflection;

pub use controlplane_api::base64_bytes;
