//! Decides whether an application should be deployed

use regex::Regex;

use controlplane_api::{Application, ApplicationSyncStatus, SyncStrategy};

use crate::config::application::{CommitMatcherConfig, OnCommitConfig, OnOutOfSyncConfig};

/// Whether `file` matches `pattern`.
///
/// Patterns without `*` match by prefix. `**` spans directories, `*` does not.
pub fn path_matches(pattern: &str, file: &str) -> bool {
    let pattern = pattern.trim_start_matches("./").trim_start_matches('/');
    if !pattern.contains('*') {
        let dir = pattern.trim_end_matches('/');
        return dir.is_empty() || dir == "." || file == dir || file.starts_with(&format!("{}/", dir));
    }

    let mut expr = String::from("^");
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix("**") {
            expr.push_str(".*");
            rest = r;
        } else if let Some(r) = rest.strip_prefix('*') {
            expr.push_str("[^/]*");
            rest = r;
        } else {
            let end = rest.find('*').unwrap_or(rest.len());
            expr.push_str(&regex::escape(&rest[..end]));
            rest = &rest[end..];
        }
    }
    expr.push('$');
    Regex::new(&expr).map(|re| re.is_match(file)).unwrap_or(false)
}

/// Whether the changed files touch an application living in `app_dir`
pub fn touched_by_changes(app_dir: &str, config: &OnCommitConfig, changed_files: &[String]) -> bool {
    changed_files
        .iter()
        .filter(|f| !config.ignores.iter().any(|p| path_matches(p, f)))
        .any(|f| path_matches(app_dir, f) || config.paths.iter().any(|p| path_matches(p, f)))
}

/// Whether the application stayed out of sync for at least the window
pub fn out_of_sync_for_long(app: &Application, config: &OnOutOfSyncConfig, now: i64) -> bool {
    if config.disabled || app.deploying {
        return false;
    }
    let Some(state) = &app.sync_state else {
        return false;
    };
    if state.status != ApplicationSyncStatus::OutOfSync {
        return false;
    }
    now - state.timestamp >= config.min_window.as_secs() as i64
}

/// Sync strategy requested by the commit message, with its summary
pub fn strategy_by_commit(matcher: &CommitMatcherConfig, message: &str) -> (SyncStrategy, String) {
    let matches = |pattern: &str| {
        !pattern.is_empty()
            && Regex::new(pattern)
                .map(|re| re.is_match(message))
                .unwrap_or(false)
    };
    if matches(&matcher.pipeline) {
        return (
            SyncStrategy::Pipeline,
            format!(
                "Sync with the specified pipeline because the commit message was matching {:?}",
                matcher.pipeline
            ),
        );
    }
    if matches(&matcher.quick_sync) {
        return (
            SyncStrategy::QuickSync,
            format!(
                "Quick sync because the commit message was matching {:?}",
                matcher.quick_sync
            ),
        );
    }
    (SyncStrategy::Auto, String::new())
}
