//! Control plane wire models
//!
//! Types exchanged between piped and the control plane `PipedService`.
//! Every message is JSON encoded with camelCase field names.

pub mod models;
pub mod service;

pub use models::*;
