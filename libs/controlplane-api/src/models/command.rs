//! Command models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::deployment::SyncStrategy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    #[default]
    SyncApplication,
    UpdateApplicationConfig,
    ChainSyncApplication,
    CancelDeployment,
    ApproveStage,
    SkipStage,
    BuildPlanPreview,
    RestartPiped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    #[default]
    CommandNotHandledYet,
    CommandSucceeded,
    CommandFailed,
    CommandTimeout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncApplication {
    pub application_id: String,
    pub sync_strategy: SyncStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainSyncApplication {
    pub deployment_chain_id: String,
    pub block_index: u32,
    pub application_id: String,
    pub sync_strategy: SyncStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelDeployment {
    pub deployment_id: String,
    pub force_rollback: bool,
    pub force_no_rollback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildPlanPreview {
    pub repository_id: String,
    pub head_branch: String,
    pub head_commit: String,
    pub base_branch: String,
    /// Seconds
    pub timeout: i64,
}

/// A command issued by a user or the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Command {
    pub id: String,
    pub piped_id: String,
    pub application_id: String,
    pub deployment_id: String,
    pub stage_id: String,
    pub commander: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub status: CommandStatus,
    pub metadata: BTreeMap<String, String>,
    pub handled_at: i64,
    pub sync_application: Option<SyncApplication>,
    pub chain_sync_application: Option<ChainSyncApplication>,
    pub cancel_deployment: Option<CancelDeployment>,
    pub build_plan_preview: Option<BuildPlanPreview>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Command {
    pub fn is_sync_application(&self) -> bool {
        self.command_type == CommandType::SyncApplication
    }

    pub fn is_chain_sync_application(&self) -> bool {
        self.command_type == CommandType::ChainSyncApplication
    }

    pub fn is_cancel_deployment(&self) -> bool {
        self.command_type == CommandType::CancelDeployment
    }

    pub fn is_stage_command(&self) -> bool {
        matches!(self.command_type, CommandType::ApproveStage | CommandType::SkipStage)
    }
}
