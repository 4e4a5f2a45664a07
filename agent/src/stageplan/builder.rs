//! Merge the stages built by each plugin into one pipeline

use std::collections::HashMap;
use std::sync::Arc;

use controlplane_api::{PipelineStage, StageStatus};
use plugin_api::deployment::StageConfig;

use crate::config::ApplicationSpec;
use crate::errors::AgentError;
use crate::plugin::{PluginClient, PluginRegistry};
use crate::utils::now_unix;

fn plugin_error(plugin: &dyn PluginClient, what: &str, err: AgentError) -> AgentError {
    AgentError::PluginError(format!(
        "plugin {} failed to build {} stages: {}",
        plugin.name(),
        what,
        err
    ))
}

fn mark_forward(stage: &mut PipelineStage, now: i64) {
    stage.rollback = false;
    stage.visible = true;
    stage.status = StageStatus::NotStarted;
    stage.created_at = now;
    stage.updated_at = now;
}

fn mark_rollback(stage: &mut PipelineStage, index: i32, now: i64) {
    stage.rollback = true;
    stage.visible = false;
    stage.index = index;
    stage.status = StageStatus::NotStarted;
    stage.created_at = now;
    stage.updated_at = now;
}

/// Chain stages so each one requires the stage before it
fn chain(stages: &mut [PipelineStage]) {
    for i in 1..stages.len() {
        let prev = stages[i - 1].id.clone();
        stages[i].requires = vec![prev];
    }
}

/// Stages of a quick sync: every plugin's stages in plugin order, followed
/// by their rollback stages when `auto_rollback` is set.
pub async fn build_quick_sync_stages(
    plugins: &[Arc<dyn PluginClient>],
    auto_rollback: bool,
) -> Result<Vec<PipelineStage>, AgentError> {
    let now = now_unix();
    let mut stages = Vec::new();
    let mut first_index = HashMap::new();

    for plugin in plugins {
        let built = plugin
            .build_quick_sync_stages(false)
            .await
            .map_err(|e| plugin_error(plugin.as_ref(), "quick sync", e))?;
        first_index.insert(plugin.name().to_string(), stages.len() as i32);
        for mut stage in built.into_iter().filter(|s| !s.rollback) {
            stage.index = stages.len() as i32;
            mark_forward(&mut stage, now);
            stages.push(stage);
        }
    }
    chain(&mut stages);

    if !auto_rollback {
        return Ok(stages);
    }

    for plugin in plugins {
        let index = first_index.get(plugin.name()).copied().unwrap_or_default();
        let built = plugin
            .build_quick_sync_stages(true)
            .await
            .map_err(|e| plugin_error(plugin.as_ref(), "quick sync rollback", e))?;
        for mut stage in built.into_iter().filter(|s| s.rollback) {
            mark_rollback(&mut stage, index, now);
            stages.push(stage);
        }
    }
    Ok(stages)
}

/// The configured pipeline stages with their ids and dense indexes
pub fn stage_configs(spec: &ApplicationSpec) -> Result<Vec<StageConfig>, AgentError> {
    spec.pipeline_stages()
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            Ok(StageConfig {
                id: stage.id_or_default(i),
                name: stage.name.clone(),
                desc: stage.desc.clone(),
                index: i as i32,
                config: spec.stage_config_bytes(i)?,
            })
        })
        .collect()
}

/// Stages of a pipeline sync.
///
/// Each plugin builds the configured stages it owns; the results are ordered
/// by declaration and run one after another. Rollback stages of a plugin
/// take the lowest index among the stages it owns.
pub async fn build_pipeline_sync_stages(
    registry: &PluginRegistry,
    spec: &ApplicationSpec,
    auto_rollback: bool,
) -> Result<Vec<PipelineStage>, AgentError> {
    let now = now_unix();
    let configs = stage_configs(spec)?;

    let mut order: Vec<Arc<dyn PluginClient>> = Vec::new();
    let mut owned: HashMap<String, Vec<StageConfig>> = HashMap::new();
    for config in &configs {
        let plugin = registry.get_by_stage(&config.name)?;
        let name = plugin.name().to_string();
        if !owned.contains_key(&name) {
            order.push(plugin);
        }
        owned.entry(name).or_default().push(config.clone());
    }

    let mut stages = Vec::new();
    let mut owners = HashMap::new();
    for plugin in &order {
        let own = owned.get(plugin.name()).cloned().unwrap_or_default();
        let built = plugin
            .build_pipeline_sync_stages(own, false)
            .await
            .map_err(|e| plugin_error(plugin.as_ref(), "pipeline sync", e))?;
        for mut stage in built.into_iter().filter(|s| !s.rollback) {
            mark_forward(&mut stage, now);
            owners.insert(stage.id.clone(), plugin.name().to_string());
            stages.push(stage);
        }
    }
    stages.sort_by_key(|s| s.index);

    for i in 1..stages.len() {
        let prev = stages[i - 1].id.clone();
        let crosses = owners.get(&prev) != owners.get(&stages[i].id);
        if crosses || stages[i].requires.is_empty() {
            stages[i].requires = vec![prev];
        }
    }

    if !auto_rollback {
        return Ok(stages);
    }

    let mut rollbacks = Vec::new();
    for plugin in &order {
        let own = owned.get(plugin.name()).cloned().unwrap_or_default();
        let index = own.iter().map(|c| c.index).min().unwrap_or_default();
        let built = plugin
            .build_pipeline_sync_stages(own, true)
            .await
            .map_err(|e| plugin_error(plugin.as_ref(), "pipeline sync rollback", e))?;
        for mut stage in built.into_iter().filter(|s| s.rollback) {
            mark_rollback(&mut stage, index, now);
            rollbacks.push(stage);
        }
    }
    rollbacks.sort_by_key(|s| s.index);
    stages.extend(rollbacks);
    Ok(stages)
}
