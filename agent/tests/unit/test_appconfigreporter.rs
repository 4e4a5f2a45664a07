//! Application config reporter against a local git remote

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use controlplane_api::{Application, GitPath};

use piped::appconfigreporter::{AppConfigReporter, Options};
use piped::filesys::dir::Dir;
use piped::git::{Client, GitEnv, RepoSet};
use piped::storage::settings::RepositorySettings;
use piped::store::{application, ApplicationStore};

use crate::common::FakeControlPlane;

const WEB_CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: web
  labels:
    env: prod
"#;

const WORKER_CONFIG: &str = r#"
apiVersion: pipecd.dev/v1beta1
kind: Application
spec:
  name: worker
"#;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=tester", "-c", "user.email=tester@example.com"])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

fn commit_file(repo: &Path, rel: &str, content: &str) {
    let path = repo.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", &format!("update {}", rel)]);
}

#[tokio::test]
async fn test_reports_drift_once_per_commit() {
    let root = tempfile::tempdir().unwrap();
    let origin = root.path().join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "-q"]);
    git(&origin, &["checkout", "-q", "-b", "main"]);
    commit_file(&origin, "apps/web/app.pipecd.yaml", WEB_CONFIG);
    commit_file(&origin, "apps/worker/app.pipecd.yaml", WORKER_CONFIG);

    let cp = FakeControlPlane::new();
    cp.add_application(Application {
        id: "app-1".to_string(),
        name: "web".to_string(),
        git_path: GitPath {
            repo_id: "repo-1".to_string(),
            path: "apps/web".to_string(),
            ..Default::default()
        },
        ..Default::default()
    });
    let applications = Arc::new(ApplicationStore::new(cp.clone(), application::Options::default()));
    applications.sync().await.unwrap();

    let repos = RepoSet::new(
        Arc::new(Client::new(GitEnv::default(), Dir::new(root.path().join("cache")))),
        vec![RepositorySettings {
            repo_id: "repo-1".to_string(),
            remote: origin.to_string_lossy().to_string(),
            branch: "main".to_string(),
        }],
        Dir::new(root.path().join("repos")),
    );
    let reporter = AppConfigReporter::new("piped-1", cp.clone(), applications, repos, Options::default());

    reporter.scan().await.unwrap();

    {
        let state = cp.state.lock();
        assert_eq!(state.updated_configs.len(), 1);
        let updated = &state.updated_configs[0].applications;
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "app-1");
        assert_eq!(
            updated[0].labels,
            BTreeMap::from([("env".to_string(), "prod".to_string())])
        );

        assert_eq!(state.unregistered_configs.len(), 1);
        let unregistered = &state.unregistered_configs[0].applications;
        assert_eq!(unregistered.len(), 1);
        assert_eq!(unregistered[0].name, "worker");
        assert_eq!(unregistered[0].path, "apps/worker");
        assert_eq!(unregistered[0].config_filename, "app.pipecd.yaml");
    }
    assert!(reporter.last_scanned_commit("repo-1").is_some());

    // Nothing is reported while the head stays the same
    reporter.scan().await.unwrap();
    assert_eq!(cp.calls("UpdateApplicationConfigurations"), 1);
    assert_eq!(cp.calls("ReportUnregisteredApplicationConfigurations"), 1);

    commit_file(&origin, "README.md", "docs");
    reporter.scan().await.unwrap();
    assert_eq!(cp.calls("ReportUnregisteredApplicationConfigurations"), 2);
}
