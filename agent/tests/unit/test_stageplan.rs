//! Stage plans spanning several plugins

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use piped::config::{ApplicationConfig, ApplicationSpec};
use piped::plugin::{PluginClient, PluginRegistry};
use piped::rpc::Retry;
use piped::stageplan::{build_pipeline_sync_stages, build_quick_sync_stages};

use crate::common::{FakePlugin, ANALYSIS_STAGE, ROLLBACK_STAGE, SYNC_STAGE};

async fn registry(plugins: Vec<FakePlugin>) -> PluginRegistry {
    let clients: Vec<Arc<dyn PluginClient>> = plugins
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn PluginClient>)
        .collect();
    PluginRegistry::build(&CancellationToken::new(), clients, Retry::new(1))
        .await
        .unwrap()
}

fn two_plugins() -> Vec<FakePlugin> {
    vec![
        FakePlugin::new("alpha").with_stages(&[SYNC_STAGE]),
        FakePlugin::new("beta").with_stages(&[ANALYSIS_STAGE]),
    ]
}

fn spec(yaml: &str) -> ApplicationSpec {
    ApplicationConfig::from_bytes(yaml.as_bytes()).unwrap().spec
}

const MIXED_PIPELINE: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  pipeline:
    stages:
      - name: FAKE_SYNC
      - name: FAKE_ANALYSIS
      - name: FAKE_SYNC
        id: final-sync
"#;

#[tokio::test]
async fn test_pipeline_stages_follow_declaration_order() {
    let registry = registry(two_plugins()).await;
    let stages = build_pipeline_sync_stages(&registry, &spec(MIXED_PIPELINE), false)
        .await
        .unwrap();

    let ids: Vec<&str> = stages.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["stage-0", "stage-1", "final-sync"]);
    let indexes: Vec<i32> = stages.iter().map(|s| s.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);

    assert!(stages[0].requires.is_empty());
    assert_eq!(stages[1].requires, vec!["stage-0".to_string()]);
    assert_eq!(stages[2].requires, vec!["stage-1".to_string()]);
    assert!(stages.iter().all(|s| s.visible && !s.rollback));
}

#[tokio::test]
async fn test_pipeline_rollback_stages_take_lowest_owned_index() {
    let registry = registry(two_plugins()).await;
    let stages = build_pipeline_sync_stages(&registry, &spec(MIXED_PIPELINE), true)
        .await
        .unwrap();

    let rollbacks: Vec<_> = stages.iter().filter(|s| s.rollback).collect();
    assert_eq!(rollbacks.len(), 2);
    assert_eq!(rollbacks[0].id, "alpha-rollback");
    assert_eq!(rollbacks[0].index, 0);
    assert_eq!(rollbacks[1].id, "beta-rollback");
    assert_eq!(rollbacks[1].index, 1);
    assert!(rollbacks.iter().all(|s| !s.visible && s.name == ROLLBACK_STAGE));
    assert!(stages[..3].iter().all(|s| !s.rollback));
}

#[tokio::test]
async fn test_quick_sync_chains_plugins_in_order() {
    let registry = registry(two_plugins()).await;
    let plugins = registry.all().to_vec();
    let stages = build_quick_sync_stages(&plugins, true).await.unwrap();

    let ids: Vec<&str> = stages.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha-sync", "beta-sync", "alpha-rollback", "beta-rollback"]);
    assert_eq!(stages[1].requires, vec!["alpha-sync".to_string()]);
    assert_eq!(stages[1].index, 1);
    assert_eq!(stages[3].index, 1);

    let without = build_quick_sync_stages(&plugins, false).await.unwrap();
    assert_eq!(without.len(), 2);
}

#[tokio::test]
async fn test_unknown_stage_fails_planning() {
    let registry = registry(vec![FakePlugin::new("alpha").with_stages(&[SYNC_STAGE])]).await;
    let result = build_pipeline_sync_stages(&registry, &spec(MIXED_PIPELINE), false).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_stage_defined_twice_is_rejected() {
    let clients: Vec<Arc<dyn PluginClient>> = vec![
        Arc::new(FakePlugin::new("alpha").with_stages(&[SYNC_STAGE])),
        Arc::new(FakePlugin::new("beta").with_stages(&[SYNC_STAGE])),
    ];
    let result = PluginRegistry::build(&CancellationToken::new(), clients, Retry::new(1)).await;
    let err = result.err().unwrap().to_string();
    assert!(err.contains("FAKE_SYNC"), "{}", err);
}

#[tokio::test]
async fn test_plugins_for_application() {
    let registry = registry(two_plugins()).await;

    let names: Vec<String> = registry
        .plugins_for(&spec(MIXED_PIPELINE))
        .unwrap()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let by_name = spec(
        r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  plugins:
    beta: {}
"#,
    );
    let names: Vec<String> = registry
        .plugins_for(&by_name)
        .unwrap()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names, vec!["beta"]);

    let none = spec(
        r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
"#,
    );
    assert!(registry.plugins_for(&none).is_err());
    assert!(registry.livestate_plugins_for(&by_name).unwrap().is_empty());
}
