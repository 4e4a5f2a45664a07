//! Application state management

use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::options::AppOptions;
use crate::controller::{Controller, ControllerDeps, Options as ControllerOptions};
use crate::deploysource::{AttachmentProcessor, GitClonerFactory, ProviderFactory, SourceProcessor};
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::git::{Client, GitClient, GitEnv};
use crate::metadata::Registry as MetadataRegistry;
use crate::plugin::{PluginClient, PluginRegistry, RpcPluginClient};
use crate::rpc::{ControlPlane, ControlPlaneClient, Retry, RpcClientOptions};
use crate::storage::settings::PipedSpec;
use crate::store::{ApplicationStore, CommandStore, DeploymentStore, EventStore};
use crate::toolregistry::ToolRegistry;

/// Control plane caches
pub struct Stores {
    pub applications: Arc<ApplicationStore>,
    pub deployments: Arc<DeploymentStore>,
    pub commands: Arc<CommandStore>,
    pub events: Arc<EventStore>,
}

/// Main application state
pub struct AppState {
    pub spec: PipedSpec,
    pub control_plane: Arc<dyn ControlPlane>,
    pub stores: Stores,
    pub git: Arc<dyn GitClient>,
    pub tool_registry: Arc<ToolRegistry>,
    pub metadata: Arc<MetadataRegistry>,
    pub sources: Arc<ProviderFactory>,
}

impl AppState {
    /// Connect to the control plane and build the shared components
    pub async fn init(spec: PipedSpec, options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");
        let layout = &options.storage.layout;
        layout.setup().await?;

        let piped_key = spec.load_piped_key().await?;
        let rpc_options = RpcClientOptions {
            address: spec.api_address.clone(),
            insecure: options.control_plane.insecure,
            cert_file: options.control_plane.cert_file.clone(),
            timeout: None,
        };
        let control_plane: Arc<dyn ControlPlane> = Arc::new(ControlPlaneClient::new(
            &rpc_options,
            &spec.project_id,
            &spec.piped_id,
            piped_key.expose_secret(),
        )?);

        let stores = Stores {
            applications: Arc::new(ApplicationStore::new(
                control_plane.clone(),
                options.stores.applications.clone(),
            )),
            deployments: Arc::new(DeploymentStore::new(
                control_plane.clone(),
                options.stores.deployments.clone(),
            )),
            commands: Arc::new(CommandStore::new(
                control_plane.clone(),
                options.stores.commands.clone(),
            )),
            events: Arc::new(EventStore::new(
                control_plane.clone(),
                options.stores.events.clone(),
            )),
        };

        let git_env = GitEnv {
            username: spec.git.username.clone(),
            email: spec.git.email.clone(),
            ssh_key_file: spec.git.ssh_key_file.clone(),
        };
        let git: Arc<dyn GitClient> = Arc::new(Client::new(git_env, layout.repos_dir().subdir("cache")));

        let processors: Vec<Arc<dyn SourceProcessor>> = vec![Arc::new(AttachmentProcessor)];
        let sources = Arc::new(ProviderFactory::new(
            Arc::new(GitClonerFactory::new(git.clone(), spec.repositories.clone())),
            processors,
        ));

        Ok(Self {
            tool_registry: Arc::new(ToolRegistry::new(layout.tools_dir(), layout.tmp_dir())),
            metadata: Arc::new(MetadataRegistry::new(control_plane.clone())),
            spec,
            control_plane,
            stores,
            git,
            sources,
        })
    }

    /// Wait until every store holds its first snapshot
    pub async fn sync_stores(&self) -> Result<(), AgentError> {
        self.stores.applications.sync().await?;
        self.stores.deployments.sync().await?;
        self.stores.commands.sync().await?;
        self.stores.events.sync().await?;
        Ok(())
    }

    /// Register every running plugin, retrying until it answers
    pub async fn build_plugin_registry(&self, ctx: &CancellationToken) -> Result<Arc<PluginRegistry>, AgentError> {
        let mut plugins: Vec<Arc<dyn PluginClient>> = Vec::new();
        for settings in &self.spec.plugins {
            plugins.push(Arc::new(RpcPluginClient::new(&settings.name, settings.port)?));
        }
        let registry = PluginRegistry::build(ctx, plugins, Retry::default()).await?;
        Ok(Arc::new(registry))
    }

    pub fn controller(
        &self,
        plugins: Arc<PluginRegistry>,
        options: ControllerOptions,
        workspace: Dir,
    ) -> Controller {
        Controller::new(
            ControllerDeps {
                control_plane: self.control_plane.clone(),
                deployments: self.stores.deployments.clone(),
                commands: self.stores.commands.clone(),
                plugins,
                sources: self.sources.clone(),
                metadata: self.metadata.clone(),
                workspace,
            },
            options,
        )
    }
}
