//! Deploy source providers

use std::sync::Arc;

use controlplane_api::GitPath;

use piped::deploysource::ProviderFactory;
use piped::filesys::dir::Dir;

use crate::common::FakeClonerFactory;

const CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  plugins:
    fake: {}
"#;

fn git_path() -> GitPath {
    GitPath {
        repo_id: "repo-1".to_string(),
        path: "apps/web".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_provider_hands_out_independent_copies() {
    let cloners = FakeClonerFactory::with_file("apps/web/app.pipecd.yaml", CONFIG);
    cloners.put("apps/web/deployment.yaml", "replicas: 1");
    let factory = ProviderFactory::new(cloners.clone(), Vec::new());
    let workspace = tempfile::tempdir().unwrap();

    let provider = factory
        .provider(Dir::new(workspace.path()), &git_path(), "abc123")
        .unwrap();
    assert_eq!(provider.revision(), "abc123");

    let first = provider.get().await.unwrap();
    let second = provider.get().await.unwrap();
    assert_eq!(first.commit_hash, "abc123");
    assert_eq!(first.application_spec.name, "web");
    assert_eq!(first.application_config_filename, "app.pipecd.yaml");
    assert_ne!(first.repo_dir.path(), second.repo_dir.path());
    assert!(first.app_dir.path().ends_with("apps/web"));

    first
        .app_dir
        .file("deployment.yaml")
        .write_string("replicas: 5")
        .await
        .unwrap();
    let untouched = second.app_dir.file("deployment.yaml").read_string().await.unwrap();
    assert_eq!(untouched, "replicas: 1");

    assert_eq!(
        cloners.requested.lock().clone(),
        vec![("repo-1".to_string(), "abc123".to_string())]
    );

    let plugin_source = first.to_plugin_source();
    assert_eq!(plugin_source.commit_hash, "abc123");
    assert_eq!(plugin_source.application_config, CONFIG.as_bytes());
}

#[tokio::test]
async fn test_missing_config_fails_and_leaves_no_tree() {
    let cloners = Arc::new(FakeClonerFactory::default());
    cloners.put("apps/web/deployment.yaml", "replicas: 1");
    let factory = ProviderFactory::new(cloners, Vec::new());
    let workspace = tempfile::tempdir().unwrap();

    let provider = factory
        .provider(Dir::new(workspace.path()), &git_path(), "abc123")
        .unwrap();
    let err = provider.get().await.unwrap_err();
    assert!(err.to_string().contains("app.pipecd.yaml"), "{}", err);
    assert!(!Dir::new(workspace.path()).subdir("canonical").exists().await);
}
