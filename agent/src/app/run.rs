//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use controlplane_api::service::ReportPipedMetaRequest;

use crate::app::options::AppOptions;
use crate::app::restart::watch_restart_commands;
use crate::app::state::AppState;
use crate::appconfigreporter::{self, AppConfigReporter};
use crate::controller::Controller;
use crate::errors::AgentError;
use crate::eventwatcher::{self, EventWatcher};
use crate::git::RepoSet;
use crate::planpreview::{self, Builder as PlanPreviewBuilder};
use crate::plugin::service as plugin_service;
use crate::plugin::{HostOptions, PluginHost, PluginServiceState};
use crate::rpc::Retry;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::statsreporter::StatsReporter;
use crate::storage::settings::PipedSpec;
use crate::trigger::{self, Trigger};

type TaskHandle = JoinHandle<Result<(), AgentError>>;

/// Run piped until `shutdown_signal` resolves or a restart is requested
pub async fn run(
    version: String,
    spec: PipedSpec,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!(version = %version, piped_id = %spec.piped_id, "Initializing piped...");

    let root = CancellationToken::new();
    let mut shutdown_manager = ShutdownManager::new(root.clone(), options.lifecycle.max_shutdown_delay);

    if let Err(e) = init(version, spec, &options, &root, &mut shutdown_manager).await {
        error!("Failed to start piped: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
        _ = root.cancelled() => {
            info!("Piped was asked to stop, shutting down...");
        }
    }

    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    version: String,
    spec: PipedSpec,
    options: &AppOptions,
    root: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    let state = Arc::new(AppState::init(spec, options).await?);

    init_stores(&state, root, shutdown_manager).await;
    report_piped_meta(&state, &version).await;

    // Plugins outlive the workers calling them, so they stop on their own token
    let plugins_ctx = shutdown_manager.plugins_ctx();
    init_plugin_service(&state, options, plugins_ctx.clone(), shutdown_manager).await?;
    init_plugin_host(&state, options, plugins_ctx, shutdown_manager).await?;

    let plugins = state.build_plugin_registry(root).await?;
    let controller = Arc::new(state.controller(
        plugins.clone(),
        options.controller.clone(),
        options.storage.layout.workspace(),
    ));
    spawn(shutdown_manager, "controller", root, {
        let controller = controller.clone();
        move |ctx| async move { controller.run(ctx).await }
    });

    init_trigger(&state, options, root, shutdown_manager);
    init_event_watcher(&state, options, root, shutdown_manager);
    init_app_config_reporter(&state, options, root, shutdown_manager);

    let builder = Arc::new(PlanPreviewBuilder::new(
        &state.spec.piped_id,
        state.git.clone(),
        state.spec.repositories.clone(),
        state.stores.applications.clone(),
        plugins,
        state.sources.clone(),
        options.storage.layout.workspace(),
    ));
    let handler = Arc::new(planpreview::Handler::new(
        builder,
        state.stores.commands.clone(),
        options.plan_preview.clone(),
    ));
    spawn(shutdown_manager, "plan preview handler", root, move |ctx| async move {
        handler.run(ctx).await
    });

    let stats = Arc::new(StatsReporter::new(
        state.control_plane.clone(),
        controller.clone(),
        options.stats_interval,
    ));
    spawn(shutdown_manager, "stats reporter", root, move |ctx| async move {
        stats.run(ctx).await
    });

    let commands = state.stores.commands.clone();
    let restart_root = root.clone();
    shutdown_manager.add(
        "restart watcher",
        tokio::spawn(async move {
            watch_restart_commands(commands, Duration::from_secs(10), restart_root).await;
            Ok(())
        }),
    );

    init_admin_server(options, controller, root, shutdown_manager).await
}

/// Spawn `f` with a child of `root` and hand its handle to the shutdown manager
fn spawn<F, Fut>(shutdown_manager: &mut ShutdownManager, name: &'static str, root: &CancellationToken, f: F)
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
{
    let handle = tokio::spawn(f(root.child_token()));
    shutdown_manager.add(name, handle);
}

async fn init_stores(state: &Arc<AppState>, root: &CancellationToken, shutdown_manager: &mut ShutdownManager) {
    info!("Initializing control plane stores...");
    if let Err(e) = state.sync_stores().await {
        warn!("Initial store sync failed, stores will retry in the background: {}", e);
    }

    let stores = &state.stores;
    let applications = stores.applications.clone();
    spawn(shutdown_manager, "application store", root, move |ctx| async move {
        applications.run(ctx).await
    });
    let deployments = stores.deployments.clone();
    spawn(shutdown_manager, "deployment store", root, move |ctx| async move {
        deployments.run(ctx).await
    });
    let commands = stores.commands.clone();
    spawn(shutdown_manager, "command store", root, move |ctx| async move {
        commands.run(ctx).await
    });
    let events = stores.events.clone();
    spawn(shutdown_manager, "event store", root, move |ctx| async move {
        events.run(ctx).await
    });
}

async fn report_piped_meta(state: &AppState, version: &str) {
    let config = match state.spec.redacted() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to redact piped configuration: {}", e);
            String::new()
        }
    };
    let req = ReportPipedMetaRequest {
        version: version.to_string(),
        config,
        repositories: state.spec.piped_repositories(),
        plugins: state.spec.piped_plugins(),
        platform_providers: state
            .spec
            .platform_providers
            .iter()
            .map(|p| p.name.clone())
            .collect(),
    };
    let ctx = CancellationToken::new();
    let control_plane = state.control_plane.clone();
    let result = Retry::new(3)
        .run(&ctx, "ReportPipedMeta", || control_plane.report_piped_meta(req.clone()))
        .await;
    if let Err(e) = result {
        warn!("Failed to report piped meta: {}", e);
    }
}

async fn init_plugin_service(
    state: &Arc<AppState>,
    options: &AppOptions,
    ctx: CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    let service_state = Arc::new(PluginServiceState {
        control_plane: state.control_plane.clone(),
        tool_registry: state.tool_registry.clone(),
        metadata: state.metadata.clone(),
        commands: state.stores.commands.clone(),
    });
    let handle = plugin_service::serve(&options.plugin_service.address(), service_state, async move {
        ctx.cancelled().await;
    })
    .await?;
    shutdown_manager.add_plugin_task("plugin service", handle);
    Ok(())
}

async fn init_plugin_host(
    state: &Arc<AppState>,
    options: &AppOptions,
    ctx: CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    info!("Launching {} plugins...", state.spec.plugins.len());
    let host_options = HostOptions {
        plugins_dir: options.storage.layout.plugins_dir(),
        plugin_service_address: options.plugin_service.address(),
        grace_period: options.plugin_grace_period,
    };
    let host = PluginHost::start(host_options, &state.spec.plugins).await?;
    shutdown_manager.add_plugin_task("plugin host", tokio::spawn(host.run(ctx)));
    Ok(())
}

fn init_trigger(
    state: &Arc<AppState>,
    options: &AppOptions,
    root: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) {
    let repos = RepoSet::new(
        state.git.clone(),
        state.spec.repositories.clone(),
        options.storage.layout.repos_dir().subdir("trigger"),
    );
    let trigger = Arc::new(Trigger::new(
        state.control_plane.clone(),
        state.stores.applications.clone(),
        state.stores.commands.clone(),
        repos,
        trigger::Options {
            commit_interval: state.spec.sync_interval,
            ..Default::default()
        },
    ));
    spawn(shutdown_manager, "trigger", root, move |ctx| async move {
        trigger.run(ctx).await
    });
}

fn init_event_watcher(
    state: &Arc<AppState>,
    options: &AppOptions,
    root: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) {
    let repos = RepoSet::new(
        state.git.clone(),
        state.spec.repositories.clone(),
        options.storage.layout.repos_dir().subdir("eventwatcher"),
    );
    let watcher = Arc::new(EventWatcher::new(
        state.control_plane.clone(),
        state.stores.applications.clone(),
        state.stores.events.clone(),
        repos,
        eventwatcher::Options::default(),
    ));
    spawn(shutdown_manager, "event watcher", root, move |ctx| async move {
        watcher.run(ctx).await
    });
}

fn init_app_config_reporter(
    state: &Arc<AppState>,
    options: &AppOptions,
    root: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) {
    let repos = RepoSet::new(
        state.git.clone(),
        state.spec.repositories.clone(),
        options.storage.layout.repos_dir().subdir("appconfigreporter"),
    );
    let reporter = Arc::new(AppConfigReporter::new(
        &state.spec.piped_id,
        state.control_plane.clone(),
        state.stores.applications.clone(),
        repos,
        appconfigreporter::Options {
            sync_interval: state.spec.app_config_sync_interval,
        },
    ));
    spawn(shutdown_manager, "app config reporter", root, move |ctx| async move {
        reporter.run(ctx).await
    });
}

async fn init_admin_server(
    options: &AppOptions,
    controller: Arc<Controller>,
    root: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    let ctx = root.child_token();
    let handle = serve(&options.admin_server, Arc::new(ServerState::new(controller)), async move {
        ctx.cancelled().await;
    })
    .await?;
    shutdown_manager.add("admin server", handle);
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    root: CancellationToken,
    plugins: CancellationToken,
    max_shutdown_delay: Duration,
    /// Joined in insertion order once `root` is cancelled
    tasks: Vec<(&'static str, TaskHandle)>,
    /// Joined after every task, once `plugins` is cancelled
    plugin_tasks: Vec<(&'static str, TaskHandle)>,
}

impl ShutdownManager {
    fn new(root: CancellationToken, max_shutdown_delay: Duration) -> Self {
        Self {
            root,
            plugins: CancellationToken::new(),
            max_shutdown_delay,
            tasks: Vec::new(),
            plugin_tasks: Vec::new(),
        }
    }

    fn plugins_ctx(&self) -> CancellationToken {
        self.plugins.clone()
    }

    fn add(&mut self, name: &'static str, handle: TaskHandle) {
        self.tasks.push((name, handle));
    }

    fn add_plugin_task(&mut self, name: &'static str, handle: TaskHandle) {
        self.plugin_tasks.push((name, handle));
    }

    async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.root.cancel();

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}", self.max_shutdown_delay);
                Err(AgentError::ShutdownError(format!(
                    "shutdown timed out after {:?}",
                    self.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down piped...");

        for (name, handle) in self.tasks.drain(..) {
            join(name, handle).await;
        }

        self.plugins.cancel();
        for (name, handle) in self.plugin_tasks.drain(..) {
            join(name, handle).await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn join(name: &str, handle: TaskHandle) {
    match handle.await {
        Ok(Ok(())) => info!("{} stopped", name),
        Ok(Err(e)) => error!("{} stopped with error: {}", name, e),
        Err(e) => error!("{} panicked: {}", name, e),
    }
}
