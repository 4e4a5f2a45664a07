//! Construction of new deployments

use controlplane_api::service::ChainApplicationMatcher;
use controlplane_api::{Application, Commit, Deployment, DeploymentStatus, DeploymentTrigger, SyncStrategy};

use crate::config::application::ChainApplicationConfig;
use crate::git::CommitInfo;
use crate::utils::{generate_uuid, now_unix};

/// What triggered a deployment
#[derive(Debug, Clone, Default)]
pub struct TriggerRequest {
    pub commit: CommitInfo,
    pub branch: String,
    /// Empty when triggered automatically
    pub commander: String,
    pub sync_strategy: SyncStrategy,
    pub strategy_summary: String,
    pub deployment_chain_id: String,
    pub deployment_chain_block_index: u32,
}

/// A pending deployment of `app` at the requested commit
pub fn build_deployment(app: &Application, req: &TriggerRequest) -> Deployment {
    let now = now_unix();
    Deployment {
        id: generate_uuid(),
        application_id: app.id.clone(),
        application_name: app.name.clone(),
        piped_id: app.piped_id.clone(),
        project_id: app.project_id.clone(),
        kind: app.kind.clone(),
        platform_provider: app.platform_provider.clone(),
        labels: app.labels.clone(),
        plugins: app.plugins.clone(),
        git_path: app.git_path.clone(),
        trigger: DeploymentTrigger {
            commit: Commit {
                hash: req.commit.hash.clone(),
                message: req.commit.message.clone(),
                author: req.commit.author.clone(),
                branch: req.branch.clone(),
                url: String::new(),
                created_at: req.commit.created_at,
            },
            commander: req.commander.clone(),
            timestamp: now,
            sync_strategy: req.sync_strategy,
            strategy_summary: req.strategy_summary.clone(),
        },
        status: DeploymentStatus::Pending,
        status_reason: "The deployment is waiting to be planned".to_string(),
        deployment_chain_id: req.deployment_chain_id.clone(),
        deployment_chain_block_index: req.deployment_chain_block_index,
        created_at: now,
        updated_at: now,
        ..Default::default()
    }
}

pub fn chain_matchers(apps: &[ChainApplicationConfig]) -> Vec<ChainApplicationMatcher> {
    apps.iter()
        .map(|a| ChainApplicationMatcher {
            name: a.name.clone(),
            kind: a.kind.clone(),
            labels: a.labels.clone(),
        })
        .collect()
}
