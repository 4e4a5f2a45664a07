//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::controller;
use crate::planpreview;
use crate::storage::layout::StorageLayout;
use crate::store;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Control plane connection
    pub control_plane: ControlPlaneOptions,

    /// Admin server configuration
    pub admin_server: ServerOptions,

    /// Plugin-facing service configuration
    pub plugin_service: ServerOptions,

    /// Store sync intervals
    pub stores: StoreOptions,

    /// Controller options
    pub controller: controller::Options,

    /// Plan preview options
    pub plan_preview: planpreview::Options,

    /// How often stats are reported
    pub stats_interval: Duration,

    /// How long plugins get to exit on shutdown
    pub plugin_grace_period: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            control_plane: ControlPlaneOptions::default(),
            admin_server: ServerOptions {
                host: "0.0.0.0".to_string(),
                port: 9085,
            },
            plugin_service: ServerOptions {
                host: "127.0.0.1".to_string(),
                port: 9087,
            },
            stores: StoreOptions::default(),
            controller: controller::Options::default(),
            plan_preview: planpreview::Options::default(),
            stats_interval: Duration::from_secs(60),
            plugin_grace_period: Duration::from_secs(30),
        }
    }
}

/// Lifecycle options for piped
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// Control plane connection options
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneOptions {
    /// Talk plain HTTP instead of TLS
    pub insecure: bool,

    /// Extra PEM root certificate
    pub cert_file: Option<PathBuf>,
}

/// Sync intervals of the control plane caches
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub applications: store::application::Options,
    pub deployments: store::deployment::Options,
    pub commands: store::command::Options,
    pub events: store::event::Options,
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl ServerOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9085,
        }
    }
}
