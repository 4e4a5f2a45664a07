//! Plugin host, registry, clients and the plugin-facing service

pub mod client;
pub mod host;
pub mod registry;
pub mod service;

pub use client::{PluginClient, RpcPluginClient};
pub use host::{HostOptions, PluginHost};
pub use registry::PluginRegistry;
pub use service::PluginServiceState;
