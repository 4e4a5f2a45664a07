//! Controller scenarios against an in-memory control plane

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use controlplane_api::{
    ApplicationDeploymentReference, CancelDeployment, Command, CommandStatus, CommandType, Commit,
    Deployment, DeploymentStatus, DeploymentTrigger, GitPath, StageStatus, SyncStrategy,
};
use controlplane_api::service::InChainDeploymentPlannableResponse;
use plugin_api::deployment::DetermineStrategyResponse;

use piped::controller::{Controller, ControllerDeps, Options};
use piped::deploysource::ProviderFactory;
use piped::filesys::dir::Dir;
use piped::metadata::Registry as MetadataRegistry;
use piped::plugin::{PluginClient, PluginRegistry};
use piped::rpc::Retry;
use piped::store::{deployment, command, CommandStore, DeploymentStore};

use crate::common::{FakeClonerFactory, FakeControlPlane, FakePlugin, ANALYSIS_STAGE, SYNC_STAGE};

const CONFIG_PATH: &str = "apps/web/app.pipecd.yaml";

const QUICK_SYNC_CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  plugins:
    fake: {}
"#;

const PIPELINE_CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  pipeline:
    stages:
      - name: FAKE_SYNC
      - name: FAKE_ANALYSIS
"#;

struct Harness {
    cp: Arc<FakeControlPlane>,
    deployments: Arc<DeploymentStore>,
    commands: Arc<CommandStore>,
    controller: Controller,
    workspace: tempfile::TempDir,
}

impl Harness {
    async fn new(plugin: Arc<FakePlugin>, config: &str) -> Self {
        let cp = FakeControlPlane::new();
        let deployments = Arc::new(DeploymentStore::new(cp.clone(), deployment::Options::default()));
        let commands = Arc::new(CommandStore::new(cp.clone(), command::Options::default()));

        let client: Arc<dyn PluginClient> = plugin;
        let plugins = PluginRegistry::build(&CancellationToken::new(), vec![client], Retry::new(1))
            .await
            .unwrap();

        let sources = ProviderFactory::new(FakeClonerFactory::with_file(CONFIG_PATH, config), Vec::new());
        let workspace = tempfile::tempdir().unwrap();

        let controller = Controller::new(
            ControllerDeps {
                control_plane: cp.clone(),
                deployments: deployments.clone(),
                commands: commands.clone(),
                plugins: Arc::new(plugins),
                sources: Arc::new(sources),
                metadata: Arc::new(MetadataRegistry::new(cp.clone())),
                workspace: Dir::new(workspace.path()),
            },
            Options {
                sync_interval: Duration::from_millis(20),
                lookup_attempts: 1,
                ..Default::default()
            },
        );

        Self {
            cp,
            deployments,
            commands,
            controller,
            workspace,
        }
    }

    /// Run controller ticks until `done` holds
    async fn drive_until(&self, mut done: impl FnMut(&FakeControlPlane) -> bool) -> bool {
        for _ in 0..250 {
            self.deployments.sync().await.unwrap();
            self.commands.sync().await.unwrap();
            self.controller.sync().await;
            if done(&self.cp) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn drive_until_idle(&self) -> bool {
        for _ in 0..250 {
            self.controller.sync().await;
            if self.controller.is_idle() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

fn pending(id: &str, strategy: SyncStrategy) -> Deployment {
    Deployment {
        id: id.to_string(),
        application_id: "app-1".to_string(),
        application_name: "web".to_string(),
        piped_id: "piped-1".to_string(),
        git_path: GitPath {
            repo_id: "repo-1".to_string(),
            path: "apps/web".to_string(),
            config_filename: "app.pipecd.yaml".to_string(),
        },
        trigger: DeploymentTrigger {
            commit: Commit {
                hash: "abc123".to_string(),
                message: "bump image".to_string(),
                ..Default::default()
            },
            timestamp: 100,
            sync_strategy: strategy,
            ..Default::default()
        },
        status: DeploymentStatus::Pending,
        ..Default::default()
    }
}

fn cancel_command(id: &str, deployment_id: &str, force_no_rollback: bool) -> Command {
    Command {
        id: id.to_string(),
        deployment_id: deployment_id.to_string(),
        commander: "alice".to_string(),
        command_type: CommandType::CancelDeployment,
        cancel_deployment: Some(CancelDeployment {
            deployment_id: deployment_id.to_string(),
            force_no_rollback,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_quick_sync_deployment_succeeds() {
    let plugin = Arc::new(FakePlugin::new("fake"));
    let h = Harness::new(plugin.clone(), QUICK_SYNC_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let planned = h.cp.state.lock().planned[0].clone();
    assert_eq!(planned.summary, "Quick sync due to the pipeline was not configured");
    assert_eq!(planned.version, "v1.0.0");
    assert!(planned.running_commit_hash.is_empty());
    assert_eq!(planned.stages.len(), 2);
    assert!(planned.stages[1].rollback);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Success);
    assert_eq!(completion.status_reason, "The deployment was completed successfully");
    assert_eq!(completion.stage_statuses.get("fake-sync"), Some(&StageStatus::Success));

    assert_eq!(plugin.executed(), vec!["fake-sync".to_string()]);
    assert_eq!(h.cp.stage_status("d-1", "fake-rollback"), Some(StageStatus::NotStarted));
    assert_eq!(
        h.cp.state.lock().most_recent.get("app-1").map(|r| r.deployment_id.clone()),
        Some("d-1".to_string())
    );

    assert!(h.drive_until_idle().await);
    assert!(h.drive_until(|cp| cp.state.lock().deploying.contains(&("app-1".to_string(), false))).await);
    assert!(h.cp.state.lock().deploying.contains(&("app-1".to_string(), true)));
}

#[tokio::test]
async fn test_failed_stage_rolls_back() {
    let plugin = Arc::new(FakePlugin::new("fake").with_result(ANALYSIS_STAGE, StageStatus::Failure));
    let h = Harness::new(plugin.clone(), PIPELINE_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Pipeline));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Failure);
    assert_eq!(completion.status_reason, "Failed while executing stage stage-1");
    assert_eq!(
        plugin.executed(),
        vec!["stage-0".to_string(), "stage-1".to_string(), "fake-rollback".to_string()]
    );
    assert_eq!(h.cp.stage_status("d-1", "stage-0"), Some(StageStatus::Success));
    assert_eq!(h.cp.stage_status("d-1", "stage-1"), Some(StageStatus::Failure));
    assert_eq!(h.cp.stage_status("d-1", "fake-rollback"), Some(StageStatus::Success));

    // The rollback stage runs after the stage that failed
    let state = h.cp.state.lock();
    let rollback = state
        .stage_changes
        .iter()
        .find(|c| c.stage_id == "fake-rollback")
        .unwrap();
    assert_eq!(rollback.requires, vec!["stage-1".to_string()]);
    assert!(!state.most_recent.contains_key("app-1"));
}

#[tokio::test]
async fn test_cancel_running_deployment() {
    let plugin = Arc::new(FakePlugin::new("fake").with_hanging(SYNC_STAGE));
    let h = Harness::new(plugin.clone(), QUICK_SYNC_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(
        h.drive_until(|cp| cp.stage_status("d-1", "fake-sync") == Some(StageStatus::Running))
            .await
    );
    h.cp.add_command(cancel_command("cmd-1", "d-1", false));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Cancelled);
    assert!(completion.status_reason.starts_with("Cancelled by alice"));
    assert_eq!(h.cp.stage_status("d-1", "fake-sync"), Some(StageStatus::Cancelled));
    assert_eq!(
        plugin.executed(),
        vec!["fake-sync".to_string(), "fake-rollback".to_string()]
    );

    assert!(h.drive_until(|cp| !cp.state.lock().handled_commands.is_empty()).await);
    let handled = h.cp.state.lock().handled_commands[0].clone();
    assert_eq!(handled.command_id, "cmd-1");
    assert_eq!(handled.status, CommandStatus::CommandSucceeded);
    assert_eq!(handled.output, b"d-1".to_vec());
}

#[tokio::test]
async fn test_cancel_without_rollback() {
    let plugin = Arc::new(FakePlugin::new("fake").with_hanging(SYNC_STAGE));
    let h = Harness::new(plugin.clone(), QUICK_SYNC_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(
        h.drive_until(|cp| cp.stage_status("d-1", "fake-sync") == Some(StageStatus::Running))
            .await
    );
    h.cp.add_command(cancel_command("cmd-1", "d-1", true));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);
    assert_eq!(h.cp.completion("d-1").unwrap().status, DeploymentStatus::Cancelled);
    assert_eq!(plugin.executed(), vec!["fake-sync".to_string()]);
    assert_eq!(h.cp.stage_status("d-1", "fake-rollback"), Some(StageStatus::NotStarted));
}

#[tokio::test]
async fn test_chain_cancels_deployment_before_planning() {
    let plugin = Arc::new(FakePlugin::new("fake"));
    let h = Harness::new(plugin.clone(), QUICK_SYNC_CONFIG).await;
    h.cp.state.lock().plannable = Some(InChainDeploymentPlannableResponse {
        plannable: false,
        cancel: true,
        cancel_reason: "A previous block of the chain failed".to_string(),
    });
    let mut d = pending("d-1", SyncStrategy::Auto);
    d.deployment_chain_id = "chain-1".to_string();
    d.deployment_chain_block_index = 1;
    h.cp.add_deployment(d);

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Cancelled);
    assert_eq!(completion.status_reason, "A previous block of the chain failed");
    assert!(h.cp.state.lock().planned.is_empty());
    assert!(plugin.executed().is_empty());
}

#[tokio::test]
async fn test_unreadable_source_fails_planning() {
    let plugin = Arc::new(FakePlugin::new("fake"));
    let h = Harness::new(plugin.clone(), "kind: NotAnApplication").await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Failure);
    assert!(completion
        .status_reason
        .starts_with("Unable to prepare application configuration source data at target commit"));
    assert!(h.cp.state.lock().planned.is_empty());
}

#[tokio::test]
async fn test_plugin_decides_strategy_after_first_deployment() {
    let plugin = Arc::new(FakePlugin::new("fake").with_strategy(DetermineStrategyResponse {
        sync_strategy: SyncStrategy::QuickSync,
        summary: "Quick sync because only the replicas changed".to_string(),
        ..Default::default()
    }));
    let h = Harness::new(plugin.clone(), PIPELINE_CONFIG).await;
    h.cp.state.lock().most_recent.insert(
        "app-1".to_string(),
        ApplicationDeploymentReference {
            deployment_id: "d-0".to_string(),
            trigger: DeploymentTrigger {
                commit: Commit {
                    hash: "old456".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            config_filename: "app.pipecd.yaml".to_string(),
            ..Default::default()
        },
    );
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(h.drive_until(|cp| !cp.state.lock().planned.is_empty()).await);

    let planned = h.cp.state.lock().planned[0].clone();
    assert_eq!(planned.summary, "Quick sync because only the replicas changed");
    assert_eq!(planned.running_commit_hash, "old456");
    assert_eq!(planned.running_config_filename, "app.pipecd.yaml");
    assert_eq!(planned.stages[0].name, SYNC_STAGE);
    assert!(planned.stages.iter().all(|s| s.name != ANALYSIS_STAGE));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);
    assert_eq!(h.cp.completion("d-1").unwrap().status, DeploymentStatus::Success);
}

const TIMEOUT_CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  timeout: 200ms
  plugins:
    fake: {}
"#;

const NO_ROLLBACK_CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  planner:
    autoRollback: false
  plugins:
    fake: {}
"#;

fn planned(id: &str) -> Deployment {
    let mut d = pending(id, SyncStrategy::QuickSync);
    d.status = DeploymentStatus::Planned;
    d.stages = vec![controlplane_api::PipelineStage {
        id: "fake-sync".to_string(),
        name: SYNC_STAGE.to_string(),
        ..Default::default()
    }];
    d
}

#[tokio::test]
async fn test_panicking_plugin_fails_deployment() {
    let plugin = Arc::new(FakePlugin::new("fake").with_panic(SYNC_STAGE));
    let h = Harness::new(plugin.clone(), QUICK_SYNC_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Failure);
    assert!(completion.status_reason.starts_with("Unexpected error occurred"));
    assert!(completion.status_reason.contains("plugin crashed while executing fake-sync"));

    assert!(h.drive_until(|cp| cp.state.lock().deploying.contains(&("app-1".to_string(), false))).await);
    assert!(h.controller.is_idle());
    assert_eq!(std::fs::read_dir(h.workspace.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancel_is_acked_when_sources_are_unreadable() {
    let plugin = Arc::new(FakePlugin::new("fake"));
    let h = Harness::new(plugin.clone(), "kind: NotAnApplication").await;
    h.cp.add_deployment(planned("d-1"));
    h.cp.add_command(cancel_command("cmd-1", "d-1", false));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Failure);
    assert!(completion
        .status_reason
        .starts_with("Failed to prepare target deploy source data"));
    assert!(plugin.executed().is_empty());

    assert!(h.drive_until(|cp| !cp.state.lock().handled_commands.is_empty()).await);
    let handled = h.cp.state.lock().handled_commands[0].clone();
    assert_eq!(handled.command_id, "cmd-1");
    assert_eq!(handled.status, CommandStatus::CommandSucceeded);
}

#[tokio::test]
async fn test_deployment_times_out() {
    let plugin = Arc::new(FakePlugin::new("fake").with_hanging(SYNC_STAGE));
    let h = Harness::new(plugin.clone(), TIMEOUT_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Failure);
    assert_eq!(completion.status_reason, "Timed out while executing stage fake-sync");
    assert_eq!(
        plugin.executed(),
        vec!["fake-sync".to_string(), "fake-rollback".to_string()]
    );
}

#[tokio::test]
async fn test_quick_sync_without_auto_rollback() {
    let plugin = Arc::new(FakePlugin::new("fake").with_result(SYNC_STAGE, StageStatus::Failure));
    let h = Harness::new(plugin.clone(), NO_ROLLBACK_CONFIG).await;
    h.cp.add_deployment(pending("d-1", SyncStrategy::Auto));

    assert!(h.drive_until(|cp| cp.completion("d-1").is_some()).await);

    let planned = h.cp.state.lock().planned[0].clone();
    assert_eq!(planned.stages.len(), 1);
    assert!(planned.stages.iter().all(|s| !s.rollback));

    let completion = h.cp.completion("d-1").unwrap();
    assert_eq!(completion.status, DeploymentStatus::Failure);
    assert_eq!(plugin.executed(), vec!["fake-sync".to_string()]);
}
