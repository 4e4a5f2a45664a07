//! Plugin service routes

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use controlplane_api::{Command, CommandType, Deployment};
use plugin_api::pipedservice::{methods, SERVICE_NAME};

use piped::filesys::dir::Dir;
use piped::metadata::Registry as MetadataRegistry;
use piped::plugin::service::router;
use piped::plugin::PluginServiceState;
use piped::store::{command, CommandStore};
use piped::toolregistry::ToolRegistry;

use crate::common::FakeControlPlane;

struct Service {
    cp: Arc<FakeControlPlane>,
    metadata: Arc<MetadataRegistry>,
    commands: Arc<CommandStore>,
    router: Router,
    _dir: tempfile::TempDir,
}

fn service() -> Service {
    let cp = FakeControlPlane::new();
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(MetadataRegistry::new(cp.clone()));
    let commands = Arc::new(CommandStore::new(cp.clone(), command::Options::default()));
    let state = Arc::new(PluginServiceState {
        control_plane: cp.clone(),
        tool_registry: Arc::new(ToolRegistry::new(
            Dir::new(dir.path().join("tools")),
            Dir::new(dir.path().join("tmp")),
        )),
        metadata: metadata.clone(),
        commands: commands.clone(),
    });
    Service {
        cp,
        metadata,
        commands,
        router: router(state),
        _dir: dir,
    }
}

async fn call(router: &Router, method: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/{}/{}", SERVICE_NAME, method))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn deployment(id: &str) -> Deployment {
    Deployment {
        id: id.to_string(),
        application_id: "app-1".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stage_metadata_is_written_through() {
    let s = service();
    s.metadata.register(&deployment("d-1"));

    let (status, _) = call(
        &s.router,
        methods::PUT_STAGE_METADATA,
        json!({"deploymentId": "d-1", "stageId": "stage-0", "key": "replicas", "value": "3"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &s.router,
        methods::GET_STAGE_METADATA,
        json!({"deploymentId": "d-1", "stageId": "stage-0", "key": "replicas"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "3");
    assert_eq!(body["found"], true);

    let (_, body) = call(
        &s.router,
        methods::GET_STAGE_METADATA,
        json!({"deploymentId": "d-1", "stageId": "stage-0", "key": "missing"}),
    )
    .await;
    assert_eq!(body["found"], false);

    let saved = s.cp.state.lock().stage_metadata.clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].stage_id, "stage-0");
    assert_eq!(saved[0].metadata.get("replicas").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn test_plugin_metadata_sends_whole_scope() {
    let s = service();
    s.metadata.register(&deployment("d-1"));

    call(
        &s.router,
        methods::PUT_DEPLOYMENT_PLUGIN_METADATA,
        json!({"deploymentId": "d-1", "pluginName": "k8s", "key": "a", "value": "1"}),
    )
    .await;
    call(
        &s.router,
        methods::PUT_DEPLOYMENT_PLUGIN_METADATA_MULTI,
        json!({"deploymentId": "d-1", "pluginName": "k8s", "metadata": {"b": "2"}}),
    )
    .await;

    let saved = s.cp.state.lock().plugin_metadata.clone();
    assert_eq!(saved.len(), 2);
    let expected: BTreeMap<String, String> =
        [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())].into();
    assert_eq!(saved[1].metadata, expected);

    let (_, body) = call(
        &s.router,
        methods::GET_DEPLOYMENT_PLUGIN_METADATA,
        json!({"deploymentId": "d-1", "pluginName": "k8s", "key": "b"}),
    )
    .await;
    assert_eq!(body["value"], "2");
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let s = service();
    let (status, body) = call(
        &s.router,
        methods::GET_DEPLOYMENT_SHARED_METADATA,
        json!({"deploymentId": "nope", "key": "a"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NotFound");
}

#[tokio::test]
async fn test_list_stage_commands() {
    let s = service();
    s.cp.add_command(Command {
        id: "cmd-1".to_string(),
        deployment_id: "d-1".to_string(),
        stage_id: "stage-1".to_string(),
        command_type: CommandType::ApproveStage,
        commander: "bob".to_string(),
        ..Default::default()
    });
    s.commands.sync().await.unwrap();

    let (status, body) = call(
        &s.router,
        methods::LIST_STAGE_COMMANDS,
        json!({"deploymentId": "d-1", "stageId": "stage-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["commands"][0]["id"], "cmd-1");

    let (_, body) = call(
        &s.router,
        methods::LIST_STAGE_COMMANDS,
        json!({"deploymentId": "d-1", "stageId": "stage-0"}),
    )
    .await;
    assert_eq!(body["commands"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_application_shared_object_round_trip() {
    let s = service();
    let (status, _) = call(
        &s.router,
        methods::PUT_APPLICATION_SHARED_OBJECT,
        json!({"applicationId": "app-1", "pluginName": "k8s", "key": "manifest", "object": "aGVsbG8="}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &s.router,
        methods::GET_APPLICATION_SHARED_OBJECT,
        json!({"applicationId": "app-1", "pluginName": "k8s", "key": "manifest"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "aGVsbG8=");
}
