//! Application, event and metadata stores

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use controlplane_api::{
    Application, Command, CommandStatus, CommandType, Deployment, DeploymentStatus, Event,
    EventStatus, GitPath,
};

use piped::metadata::Registry as MetadataRegistry;
use piped::store::{
    application, command, deployment, event, ApplicationStore, CommandStore, DeploymentStore,
    EventStore,
};
use piped::utils::now_unix;

use crate::common::FakeControlPlane;

fn app(id: &str, name: &str, repo: &str, plugins: &[&str]) -> Application {
    Application {
        id: id.to_string(),
        name: name.to_string(),
        plugins: plugins.iter().map(|p| p.to_string()).collect::<BTreeSet<_>>(),
        git_path: GitPath {
            repo_id: repo.to_string(),
            path: name.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn event(id: &str, name: &str, created_at: i64, status: EventStatus) -> Event {
    Event {
        id: id.to_string(),
        name: name.to_string(),
        data: format!("data-{}", id),
        labels: BTreeMap::from([("env".to_string(), "prod".to_string())]),
        status,
        created_at,
        updated_at: created_at,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_application_store_indexes() {
    let cp = FakeControlPlane::new();
    cp.add_application(app("a-2", "worker", "repo-1", &["k8s"]));
    cp.add_application(app("a-1", "api", "repo-2", &["k8s", "terraform"]));
    cp.add_application(app("a-3", "batch", "repo-1", &["ecs"]));

    let store = ApplicationStore::new(cp.clone(), application::Options::default());
    assert!(store.list().is_empty());
    store.sync().await.unwrap();

    let names: Vec<String> = store.list().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["api", "batch", "worker"]);
    assert_eq!(store.get("a-3").map(|a| a.name), Some("batch".to_string()));
    assert!(store.get("missing").is_none());
    assert_eq!(store.list_by_plugin_name("k8s").len(), 2);
    assert_eq!(store.list_by_plugin_name("terraform")[0].id, "a-1");

    let ids: Vec<String> = store.list_by_repo_id("repo-1").into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["a-3", "a-2"]);
}

#[tokio::test]
async fn test_event_store_lists_newest_unhandled_first() {
    let cp = FakeControlPlane::new();
    let now = now_unix();
    {
        let mut state = cp.state.lock();
        state.events.push(event("e-1", "image-update", now - 30, EventStatus::NotHandled));
        state.events.push(event("e-2", "image-update", now - 20, EventStatus::Handled));
        state.events.push(event("e-3", "image-update", now - 10, EventStatus::NotHandled));
        state.events.push(event("e-4", "other", now - 5, EventStatus::NotHandled));
    }

    let store = EventStore::new(cp.clone(), event::Options::default());
    store.sync().await.unwrap();

    let labels = BTreeMap::from([("env".to_string(), "prod".to_string())]);
    let ids: Vec<String> = store
        .list_not_handled("image-update", &labels, 0, 10)
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["e-3", "e-1"]);

    let latest = store.list_not_handled("image-update", &labels, 0, 1);
    assert_eq!(latest[0].id, "e-3");
    assert!(store.list_not_handled("image-update", &labels, now - 15, 10).len() == 1);
    assert!(store.list_not_handled("image-update", &BTreeMap::new(), 0, 10).is_empty());
    assert!(store.list_not_handled("image-update", &labels, 0, 0).is_empty());
}

#[tokio::test]
async fn test_event_store_drops_expired_events() {
    let cp = FakeControlPlane::new();
    let now = now_unix();
    cp.state
        .lock()
        .events
        .push(event("old", "image-update", now - 7200, EventStatus::NotHandled));

    let store = EventStore::new(
        cp.clone(),
        event::Options {
            interval: Duration::from_secs(60),
            retention: Duration::from_secs(3600),
        },
    );
    store.sync().await.unwrap();

    let labels = BTreeMap::from([("env".to_string(), "prod".to_string())]);
    assert!(store.list_not_handled("image-update", &labels, 0, 10).is_empty());
}

#[tokio::test]
async fn test_metadata_registry_writes_through() {
    let cp = FakeControlPlane::new();
    let registry = MetadataRegistry::new(cp.clone());
    let deployment = Deployment {
        id: "d-1".to_string(),
        ..Default::default()
    };

    let store = registry.register(&deployment);
    assert_eq!(registry.len(), 1);
    assert_eq!(store.deployment_id(), "d-1");

    store.shared_put("owner", "team-a").await.unwrap();
    store.shared_put("tier", "gold").await.unwrap();
    assert_eq!(store.shared_get("owner").await.as_deref(), Some("team-a"));

    let again = registry.register(&deployment);
    assert_eq!(again.shared_get("tier").await.as_deref(), Some("gold"));

    let saved = cp.state.lock().shared_metadata.clone();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[1].metadata.len(), 2);

    registry.delete("d-1");
    assert!(registry.get("d-1").is_err());
    assert!(registry.is_empty());
}

fn stage_command(id: &str, command_type: CommandType) -> Command {
    Command {
        id: id.to_string(),
        deployment_id: "d-1".to_string(),
        stage_id: "s-1".to_string(),
        command_type,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stage_commands_reported_handled() {
    let cp = FakeControlPlane::new();
    cp.add_command(stage_command("c-1", CommandType::ApproveStage));
    cp.add_command(stage_command("c-2", CommandType::SkipStage));
    let store = CommandStore::new(cp.clone(), command::Options::default());
    store.sync().await.unwrap();
    assert_eq!(store.list_stage_commands("d-1", "s-1").len(), 2);

    store.report_commands_handled("d-1", "s-1").await.unwrap();

    assert!(store.list_stage_commands("d-1", "s-1").is_empty());
    assert!(store.is_handled("c-1"));
    assert!(store.is_handled("c-2"));
    let handled = cp.state.lock().handled_commands.clone();
    assert_eq!(handled.len(), 2);
    assert!(handled.iter().all(|h| h.status == CommandStatus::CommandSucceeded));
}

#[tokio::test]
async fn test_stage_commands_kept_when_report_fails() {
    let cp = FakeControlPlane::new();
    cp.add_command(stage_command("c-1", CommandType::ApproveStage));
    let store = CommandStore::new(cp.clone(), command::Options::default());
    store.sync().await.unwrap();

    cp.fail("ReportCommandHandled", true);
    assert!(store.report_commands_handled("d-1", "s-1").await.is_err());
    assert_eq!(store.list_stage_commands("d-1", "s-1").len(), 1);
    assert!(!store.is_handled("c-1"));

    cp.fail("ReportCommandHandled", false);
    store.report_commands_handled("d-1", "s-1").await.unwrap();
    assert!(store.list_stage_commands("d-1", "s-1").is_empty());
    assert!(store.is_handled("c-1"));
}

#[tokio::test]
async fn test_handled_commands_suppressed_after_resync() {
    let cp = FakeControlPlane::new();
    cp.add_command(Command {
        id: "c-1".to_string(),
        deployment_id: "d-1".to_string(),
        command_type: CommandType::CancelDeployment,
        ..Default::default()
    });
    cp.add_command(stage_command("c-2", CommandType::ApproveStage));
    let store = CommandStore::new(cp.clone(), command::Options::default());
    store.sync().await.unwrap();

    let cancel = store.list_deployment_commands().remove(0);
    cancel
        .report(CommandStatus::CommandSucceeded, BTreeMap::new(), Vec::new())
        .await
        .unwrap();
    store.report_commands_handled("d-1", "s-1").await.unwrap();

    // A stale list response still carries both commands
    cp.state.lock().handled_commands.clear();
    store.sync().await.unwrap();

    assert!(store.is_handled("c-1"));
    assert!(store.list_deployment_commands().is_empty());
    assert!(store.list_stage_commands("d-1", "s-1").is_empty());
}

#[tokio::test]
async fn test_command_reported_once() {
    let cp = FakeControlPlane::new();
    cp.add_command(Command {
        id: "c-1".to_string(),
        deployment_id: "d-1".to_string(),
        command_type: CommandType::CancelDeployment,
        ..Default::default()
    });
    let store = CommandStore::new(cp.clone(), command::Options::default());
    store.sync().await.unwrap();

    let cancel = store.list_deployment_commands().remove(0);
    for _ in 0..2 {
        cancel
            .report(CommandStatus::CommandSucceeded, BTreeMap::new(), Vec::new())
            .await
            .unwrap();
    }

    assert_eq!(cp.calls("ReportCommandHandled"), 1);
    assert_eq!(cp.state.lock().handled_commands.len(), 1);
}

#[tokio::test]
async fn test_metadata_unchanged_when_save_fails() {
    let cp = FakeControlPlane::new();
    let registry = MetadataRegistry::new(cp.clone());
    let store = registry.register(&Deployment {
        id: "d-1".to_string(),
        ..Default::default()
    });

    cp.fail("SaveDeploymentSharedMetadata", true);
    cp.fail("SaveDeploymentPluginMetadata", true);
    cp.fail("SaveStageMetadata", true);
    assert!(store.shared_put("owner", "team-a").await.is_err());
    assert!(store.plugin_put("kubernetes", "replicas", "3").await.is_err());
    assert!(store.stage_put("s-1", "approver", "alice").await.is_err());

    assert_eq!(store.shared_get("owner").await, None);
    assert_eq!(store.plugin_get("kubernetes", "replicas").await, None);
    assert_eq!(store.stage_get("s-1", "approver").await, None);

    cp.fail("SaveStageMetadata", false);
    store.stage_put("s-1", "approver", "alice").await.unwrap();
    store.stage_put("s-1", "approved", "true").await.unwrap();
    assert_eq!(store.stage_get("s-1", "approver").await.as_deref(), Some("alice"));
    let saved = cp.state.lock().stage_metadata.clone();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[1].metadata.len(), 2);
}

fn deployment(id: &str, app: &str, status: DeploymentStatus, created_at: i64) -> Deployment {
    let mut d = Deployment {
        id: id.to_string(),
        application_id: app.to_string(),
        status,
        created_at,
        ..Default::default()
    };
    d.trigger.timestamp = created_at;
    d
}

#[tokio::test]
async fn test_deployment_store_app_heads() {
    let cp = FakeControlPlane::new();
    cp.add_deployment(deployment("d-1", "app-1", DeploymentStatus::Planned, 10));
    cp.add_deployment(deployment("d-2", "app-1", DeploymentStatus::Running, 20));
    cp.add_deployment(deployment("d-3", "app-1", DeploymentStatus::Pending, 30));
    cp.add_deployment(deployment("d-4", "app-2", DeploymentStatus::Pending, 40));
    cp.add_deployment(deployment("d-5", "app-3", DeploymentStatus::Success, 50));
    let store = DeploymentStore::new(cp.clone(), deployment::Options::default());
    store.sync().await.unwrap();

    let heads = store.list_app_head_deployments();
    assert_eq!(heads.len(), 2);
    assert_eq!(heads["app-1"].id, "d-2");
    assert_eq!(heads["app-2"].id, "d-4");
    assert_eq!(store.list_planneds().len(), 1);
    assert_eq!(store.list_runnings().len(), 1);
    assert_eq!(store.list_pendings().len(), 2);
}
