//! Applies external events to the manifests in Git

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use controlplane_api::service::{EventStatusReport, ReportEventStatusesRequest};
use controlplane_api::{make_event_key, Application, Event, EventStatus};

use crate::config::application::{EventReplacement, EventWatcherConfig};
use crate::errors::AgentError;
use crate::eventwatcher::replace::{replace_regex, replace_yaml_field};
use crate::filesys::file::File;
use crate::git::{Repo, RepoSet};
use crate::rpc::ControlPlane;
use crate::store::{ApplicationStore, EventStore};
use crate::trigger::load_spec;

#[derive(Debug, Clone)]
pub struct Options {
    pub check_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
        }
    }
}

pub struct EventWatcher {
    control_plane: Arc<dyn ControlPlane>,
    applications: Arc<ApplicationStore>,
    events: Arc<EventStore>,
    repos: RepoSet,
    options: Options,
    /// event key -> created_at bound for the next lookup
    milestones: Mutex<HashMap<String, i64>>,
}

impl EventWatcher {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        applications: Arc<ApplicationStore>,
        events: Arc<EventStore>,
        repos: RepoSet,
        options: Options,
    ) -> Self {
        Self {
            control_plane,
            applications,
            events,
            repos,
            options,
            milestones: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Event watcher starting...");
        let mut ticker = tokio::time::interval(self.options.check_interval);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Event watcher shutting down...");
                    return Ok(());
                }
                _ = ticker.tick() => self.check().await,
            }
        }
    }

    pub async fn check(&self) {
        for setting in self.repos.settings().to_vec() {
            if let Err(e) = self.check_repository(&setting.repo_id).await {
                error!(repo_id = %setting.repo_id, "Failed to handle events: {}", e);
            }
        }
    }

    async fn check_repository(&self, repo_id: &str) -> Result<(), AgentError> {
        let apps: Vec<Application> = self
            .applications
            .list_by_repo_id(repo_id)
            .into_iter()
            .filter(|a| !a.disabled)
            .collect();
        if apps.is_empty() {
            return Ok(());
        }

        let (repo, _) = self.repos.pull(repo_id).await?;
        for app in apps {
            let spec = match load_spec(&repo, &app).await {
                Ok(spec) => spec,
                Err(e) => {
                    debug!(application_id = %app.id, "Skipping event watching: {}", e);
                    continue;
                }
            };
            for watcher in &spec.event_watcher {
                let key = make_event_key(&watcher.matcher.name, &watcher.matcher.labels);
                let milestone = self.milestones.lock().get(&key).copied().unwrap_or(0);
                let Some(event) = self
                    .events
                    .list_not_handled(&watcher.matcher.name, &watcher.matcher.labels, milestone, 1)
                    .into_iter()
                    .next()
                else {
                    continue;
                };

                let (status, description) = match self.handle(&repo, &app, watcher, &event).await {
                    Ok(Some(hash)) => (
                        EventStatus::Handled,
                        format!("Successfully updated {} files at commit {}", watcher.handler.config.replacements.len(), hash),
                    ),
                    Ok(None) => (EventStatus::Handled, "The value is already up to date".to_string()),
                    Err(e) => {
                        warn!(application_id = %app.id, event = %event.name, "Failed to handle event: {}", e);
                        self.repos.discard(repo_id).await;
                        (EventStatus::Failure, format!("Failed to update files: {}", e))
                    }
                };
                self.report(&event, status, description).await;
                self.milestones.lock().insert(key, event.created_at + 1);

                if status == EventStatus::Failure {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Apply `event` to the application files, commit and push.
    ///
    /// Returns the commit hash, or `None` when nothing changed.
    async fn handle(
        &self,
        repo: &Repo,
        app: &Application,
        watcher: &EventWatcherConfig,
        event: &Event,
    ) -> Result<Option<String>, AgentError> {
        let app_dir = Path::new(&app.git_path.path);
        let mut changes = BTreeMap::new();
        for replacement in &watcher.handler.config.replacements {
            let rel = app_dir.join(&replacement.file).to_string_lossy().to_string();
            let content = File::new(repo.path().join(&rel)).read_string().await?;
            if let Some(updated) = apply(&content, replacement, &event.data)? {
                changes.insert(rel, updated.into_bytes());
            }
        }
        if changes.is_empty() {
            return Ok(None);
        }

        let message = commit_message(&watcher.handler.config.commit_message, event);
        let hash = repo.commit_changes(&message, &changes).await?;
        repo.push(repo.branch()).await?;
        info!(application_id = %app.id, event = %event.name, commit = %hash, "Pushed event changes");
        Ok(Some(hash))
    }

    async fn report(&self, event: &Event, status: EventStatus, description: String) {
        let req = ReportEventStatusesRequest {
            events: vec![EventStatusReport {
                id: event.id.clone(),
                status,
                status_description: description,
            }],
        };
        if let Err(e) = self.control_plane.report_event_statuses(req).await {
            error!(event_id = %event.id, "Failed to report event status: {}", e);
        }
    }
}

fn apply(content: &str, replacement: &EventReplacement, value: &str) -> Result<Option<String>, AgentError> {
    match (replacement.yaml_field.is_empty(), replacement.regex.is_empty()) {
        (false, _) => replace_yaml_field(content, &replacement.yaml_field, value),
        (true, false) => replace_regex(content, &replacement.regex, value),
        (true, true) => Err(AgentError::ValidationError(format!(
            "replacement for {} has neither yamlField nor regex",
            replacement.file
        ))),
    }
}

pub fn commit_message(configured: &str, event: &Event) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    format!(
        "Replace values with {:?} set by Event {:?}",
        event.data, event.name
    )
}
