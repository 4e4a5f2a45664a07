//! In-memory control plane, plugin and cloner shared by the unit tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use controlplane_api::service as api;
use controlplane_api::{
    Application, ApplicationDeploymentReference, ArtifactVersion, Command, Deployment,
    DeploymentStatus, Event, PipelineStage, StageStatus,
};
use plugin_api::deployment::{DetermineStrategyResponse, ExecuteStageInput, PlanPluginInput, StageConfig};
use plugin_api::livestate::{GetLivestateRequest, GetLivestateResponse};
use plugin_api::planpreview::PlanPreviewResult;

use piped::deploysource::{Cloner, ClonerFactory};
use piped::errors::AgentError;
use piped::filesys::dir::Dir;
use piped::plugin::PluginClient;
use piped::rpc::{ControlPlane, RpcCode, RpcError};

pub fn unimplemented(what: &str) -> AgentError {
    AgentError::Rpc(RpcError::new(RpcCode::Unimplemented, format!("{} is not implemented", what)))
}

/// Everything the fake control plane holds and everything it was sent
#[derive(Default)]
pub struct State {
    pub applications: Vec<Application>,
    pub deployments: Vec<Deployment>,
    pub commands: Vec<Command>,
    pub events: Vec<Event>,
    pub most_recent: HashMap<String, ApplicationDeploymentReference>,
    pub plannable: Option<api::InChainDeploymentPlannableResponse>,

    pub calls: Vec<&'static str>,
    pub planned: Vec<api::ReportDeploymentPlannedRequest>,
    pub completed: Vec<api::ReportDeploymentCompletedRequest>,
    pub stage_changes: Vec<api::ReportStageStatusChangedRequest>,
    pub handled_commands: Vec<api::ReportCommandHandledRequest>,
    pub created: Vec<Deployment>,
    pub created_chains: Vec<api::CreateDeploymentChainRequest>,
    pub deploying: Vec<(String, bool)>,
    pub event_statuses: Vec<api::EventStatusReport>,
    pub updated_configs: Vec<api::UpdateApplicationConfigurationsRequest>,
    pub unregistered_configs: Vec<api::ReportUnregisteredApplicationConfigurationsRequest>,
    pub shared_metadata: Vec<api::SaveDeploymentSharedMetadataRequest>,
    pub plugin_metadata: Vec<api::SaveDeploymentPluginMetadataRequest>,
    pub stage_metadata: Vec<api::SaveStageMetadataRequest>,
    pub stats: Vec<api::ReportStatRequest>,
    pub metas: Vec<api::ReportPipedMetaRequest>,
    pub shared_objects: HashMap<(String, String, String), Vec<u8>>,

    /// Methods answering with `Unavailable`
    pub failing: HashSet<&'static str>,
}

/// Control plane keeping deployments in memory and applying every report
#[derive(Default)]
pub struct FakeControlPlane {
    pub state: Mutex<State>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_application(&self, app: Application) {
        self.state.lock().applications.push(app);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        self.state.lock().deployments.push(deployment);
    }

    pub fn add_command(&self, command: Command) {
        self.state.lock().commands.push(command);
    }

    pub fn deployment(&self, id: &str) -> Option<Deployment> {
        self.state.lock().deployments.iter().find(|d| d.id == id).cloned()
    }

    pub fn completion(&self, id: &str) -> Option<api::ReportDeploymentCompletedRequest> {
        self.state
            .lock()
            .completed
            .iter()
            .find(|c| c.deployment_id == id)
            .cloned()
    }

    pub fn stage_status(&self, deployment_id: &str, stage_id: &str) -> Option<StageStatus> {
        self.deployment(deployment_id)
            .and_then(|d| d.stage(stage_id).map(|s| s.status))
    }

    pub fn called(&self, method: &str) -> bool {
        self.state.lock().calls.iter().any(|c| *c == method)
    }

    fn record(&self, method: &'static str) {
        self.state.lock().calls.push(method);
    }

    pub fn fail(&self, method: &'static str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(method);
        } else {
            state.failing.remove(method);
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == method).count()
    }

    /// Record the call and fail it when `method` is marked failing
    fn check(&self, method: &'static str) -> Result<(), AgentError> {
        self.record(method);
        if self.state.lock().failing.contains(method) {
            return Err(AgentError::Rpc(RpcError::new(
                RpcCode::Unavailable,
                format!("{} is unavailable", method),
            )));
        }
        Ok(())
    }

    fn update_deployment(&self, id: &str, f: impl FnOnce(&mut Deployment)) -> Result<(), AgentError> {
        let mut state = self.state.lock();
        let d = state
            .deployments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AgentError::NotFound(format!("deployment {} not found", id)))?;
        f(d);
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_applications(&self) -> Result<Vec<Application>, AgentError> {
        self.record("ListApplications");
        Ok(self.state.lock().applications.clone())
    }

    async fn list_not_completed_deployments(&self) -> Result<Vec<Deployment>, AgentError> {
        self.record("ListNotCompletedDeployments");
        Ok(self
            .state
            .lock()
            .deployments
            .iter()
            .filter(|d| !d.status.is_completed())
            .cloned()
            .collect())
    }

    async fn list_unhandled_commands(&self) -> Result<Vec<Command>, AgentError> {
        self.record("ListUnhandledCommands");
        let state = self.state.lock();
        let handled: HashSet<&str> = state
            .handled_commands
            .iter()
            .map(|r| r.command_id.as_str())
            .collect();
        Ok(state
            .commands
            .iter()
            .filter(|c| !handled.contains(c.id.as_str()))
            .cloned()
            .collect())
    }

    async fn report_command_handled(&self, req: api::ReportCommandHandledRequest) -> Result<(), AgentError> {
        self.check("ReportCommandHandled")?;
        self.state.lock().handled_commands.push(req);
        Ok(())
    }

    async fn list_events(&self, req: api::ListEventsRequest) -> Result<Vec<Event>, AgentError> {
        self.record("ListEvents");
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .filter(|e| e.updated_at >= req.from && (req.to == 0 || e.updated_at < req.to))
            .cloned()
            .collect())
    }

    async fn report_event_statuses(&self, req: api::ReportEventStatusesRequest) -> Result<(), AgentError> {
        self.record("ReportEventStatuses");
        self.state.lock().event_statuses.extend(req.events);
        Ok(())
    }

    async fn get_application_most_recent_deployment(
        &self,
        req: api::GetApplicationMostRecentDeploymentRequest,
    ) -> Result<ApplicationDeploymentReference, AgentError> {
        self.record("GetApplicationMostRecentDeployment");
        self.state
            .lock()
            .most_recent
            .get(&req.application_id)
            .cloned()
            .ok_or_else(|| AgentError::Rpc(RpcError::new(RpcCode::NotFound, "no deployment")))
    }

    async fn report_application_deploying_status(
        &self,
        req: api::ReportApplicationDeployingStatusRequest,
    ) -> Result<(), AgentError> {
        self.record("ReportApplicationDeployingStatus");
        self.state.lock().deploying.push((req.application_id, req.deploying));
        Ok(())
    }

    async fn report_application_most_recent_deployment(
        &self,
        req: api::ReportApplicationMostRecentDeploymentRequest,
    ) -> Result<(), AgentError> {
        self.record("ReportApplicationMostRecentDeployment");
        self.state
            .lock()
            .most_recent
            .insert(req.application_id, req.deployment);
        Ok(())
    }

    async fn create_deployment(&self, req: api::CreateDeploymentRequest) -> Result<(), AgentError> {
        self.record("CreateDeployment");
        let mut state = self.state.lock();
        state.created.push(req.deployment.clone());
        state.deployments.push(req.deployment);
        Ok(())
    }

    async fn report_deployment_planned(&self, req: api::ReportDeploymentPlannedRequest) -> Result<(), AgentError> {
        self.record("ReportDeploymentPlanned");
        self.update_deployment(&req.deployment_id, |d| {
            d.status = DeploymentStatus::Planned;
            d.status_reason = req.status_reason.clone();
            d.summary = req.summary.clone();
            d.version = req.version.clone();
            d.versions = req.versions.clone();
            d.running_commit_hash = req.running_commit_hash.clone();
            d.running_config_filename = req.running_config_filename.clone();
            d.stages = req.stages.clone();
        })?;
        self.state.lock().planned.push(req);
        Ok(())
    }

    async fn report_deployment_status_changed(
        &self,
        req: api::ReportDeploymentStatusChangedRequest,
    ) -> Result<(), AgentError> {
        self.record("ReportDeploymentStatusChanged");
        self.update_deployment(&req.deployment_id, |d| {
            d.status = req.status;
            d.status_reason = req.status_reason.clone();
        })
    }

    async fn report_deployment_completed(&self, req: api::ReportDeploymentCompletedRequest) -> Result<(), AgentError> {
        self.record("ReportDeploymentCompleted");
        self.update_deployment(&req.deployment_id, |d| {
            d.status = req.status;
            d.status_reason = req.status_reason.clone();
            d.completed_at = req.completed_at;
        })?;
        self.state.lock().completed.push(req);
        Ok(())
    }

    async fn report_stage_status_changed(
        &self,
        req: api::ReportStageStatusChangedRequest,
    ) -> Result<(), AgentError> {
        self.record("ReportStageStatusChanged");
        self.update_deployment(&req.deployment_id, |d| {
            if let Some(stage) = d.stages.iter_mut().find(|s| s.id == req.stage_id) {
                stage.status = req.status;
                stage.status_reason = req.status_reason.clone();
                stage.requires = req.requires.clone();
            }
        })?;
        self.state.lock().stage_changes.push(req);
        Ok(())
    }

    async fn save_deployment_shared_metadata(
        &self,
        req: api::SaveDeploymentSharedMetadataRequest,
    ) -> Result<(), AgentError> {
        self.check("SaveDeploymentSharedMetadata")?;
        self.state.lock().shared_metadata.push(req);
        Ok(())
    }

    async fn save_deployment_plugin_metadata(
        &self,
        req: api::SaveDeploymentPluginMetadataRequest,
    ) -> Result<(), AgentError> {
        self.check("SaveDeploymentPluginMetadata")?;
        self.state.lock().plugin_metadata.push(req);
        Ok(())
    }

    async fn save_stage_metadata(&self, req: api::SaveStageMetadataRequest) -> Result<(), AgentError> {
        self.check("SaveStageMetadata")?;
        self.state.lock().stage_metadata.push(req);
        Ok(())
    }

    async fn update_application_configurations(
        &self,
        req: api::UpdateApplicationConfigurationsRequest,
    ) -> Result<(), AgentError> {
        self.record("UpdateApplicationConfigurations");
        self.state.lock().updated_configs.push(req);
        Ok(())
    }

    async fn report_unregistered_application_configurations(
        &self,
        req: api::ReportUnregisteredApplicationConfigurationsRequest,
    ) -> Result<(), AgentError> {
        self.record("ReportUnregisteredApplicationConfigurations");
        self.state.lock().unregistered_configs.push(req);
        Ok(())
    }

    async fn in_chain_deployment_plannable(
        &self,
        _req: api::InChainDeploymentPlannableRequest,
    ) -> Result<api::InChainDeploymentPlannableResponse, AgentError> {
        self.record("InChainDeploymentPlannable");
        Ok(self.state.lock().plannable.clone().unwrap_or(
            api::InChainDeploymentPlannableResponse {
                plannable: true,
                ..Default::default()
            },
        ))
    }

    async fn create_deployment_chain(&self, req: api::CreateDeploymentChainRequest) -> Result<(), AgentError> {
        self.record("CreateDeploymentChain");
        self.state.lock().created_chains.push(req);
        Ok(())
    }

    async fn report_stage_logs(&self, _req: api::ReportStageLogsRequest) -> Result<(), AgentError> {
        self.record("ReportStageLogs");
        Ok(())
    }

    async fn report_stage_logs_from_last_checkpoint(
        &self,
        _req: api::ReportStageLogsFromLastCheckpointRequest,
    ) -> Result<(), AgentError> {
        self.record("ReportStageLogsFromLastCheckpoint");
        Ok(())
    }

    async fn get_latest_analysis_result(
        &self,
        _req: api::GetLatestAnalysisResultRequest,
    ) -> Result<api::AnalysisResult, AgentError> {
        self.record("GetLatestAnalysisResult");
        Err(AgentError::Rpc(RpcError::new(RpcCode::NotFound, "no analysis result")))
    }

    async fn put_latest_analysis_result(
        &self,
        _req: api::PutLatestAnalysisResultRequest,
    ) -> Result<(), AgentError> {
        self.record("PutLatestAnalysisResult");
        Ok(())
    }

    async fn get_application_shared_object(
        &self,
        req: api::GetApplicationSharedObjectRequest,
    ) -> Result<Vec<u8>, AgentError> {
        self.record("GetApplicationSharedObject");
        self.state
            .lock()
            .shared_objects
            .get(&(req.application_id, req.plugin_name, req.key))
            .cloned()
            .ok_or_else(|| AgentError::Rpc(RpcError::new(RpcCode::NotFound, "no object")))
    }

    async fn put_application_shared_object(
        &self,
        req: api::PutApplicationSharedObjectRequest,
    ) -> Result<(), AgentError> {
        self.record("PutApplicationSharedObject");
        self.state
            .lock()
            .shared_objects
            .insert((req.application_id, req.plugin_name, req.key), req.object);
        Ok(())
    }

    async fn report_stat(&self, req: api::ReportStatRequest) -> Result<(), AgentError> {
        self.record("ReportStat");
        self.state.lock().stats.push(req);
        Ok(())
    }

    async fn report_piped_meta(&self, req: api::ReportPipedMetaRequest) -> Result<(), AgentError> {
        self.record("ReportPipedMeta");
        self.state.lock().metas.push(req);
        Ok(())
    }
}

pub const SYNC_STAGE: &str = "FAKE_SYNC";
pub const ANALYSIS_STAGE: &str = "FAKE_ANALYSIS";
pub const ROLLBACK_STAGE: &str = "FAKE_ROLLBACK";

/// Plugin with scripted stage results
pub struct FakePlugin {
    name: String,
    stages: Vec<String>,
    /// stage name -> result, `Success` when absent
    results: HashMap<String, StageStatus>,
    /// Stages that never finish on their own
    hanging: HashSet<String>,
    /// Stages whose execution panics
    panicking: HashSet<String>,
    strategy: Option<DetermineStrategyResponse>,
    pub executed: Mutex<Vec<String>>,
}

impl FakePlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: vec![
                SYNC_STAGE.to_string(),
                ANALYSIS_STAGE.to_string(),
                ROLLBACK_STAGE.to_string(),
            ],
            results: HashMap::new(),
            hanging: HashSet::new(),
            panicking: HashSet::new(),
            strategy: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stages(mut self, stages: &[&str]) -> Self {
        self.stages = stages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_result(mut self, stage: &str, status: StageStatus) -> Self {
        self.results.insert(stage.to_string(), status);
        self
    }

    pub fn with_hanging(mut self, stage: &str) -> Self {
        self.hanging.insert(stage.to_string());
        self
    }

    pub fn with_panic(mut self, stage: &str) -> Self {
        self.panicking.insert(stage.to_string());
        self
    }

    pub fn with_strategy(mut self, strategy: DetermineStrategyResponse) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn stage(id: &str, name: &str, index: i32, rollback: bool) -> PipelineStage {
        PipelineStage {
            id: id.to_string(),
            name: name.to_string(),
            index,
            rollback,
            ..Default::default()
        }
    }

    fn rollback_stage(&self) -> PipelineStage {
        Self::stage(&format!("{}-rollback", self.name), ROLLBACK_STAGE, 0, true)
    }
}

#[async_trait]
impl PluginClient for FakePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_defined_stages(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.stages.clone())
    }

    async fn determine_strategy(
        &self,
        _input: PlanPluginInput,
    ) -> Result<Option<DetermineStrategyResponse>, AgentError> {
        Ok(self.strategy.clone())
    }

    async fn determine_versions(&self, _input: PlanPluginInput) -> Result<Vec<ArtifactVersion>, AgentError> {
        Ok(vec![ArtifactVersion {
            version: "v1.0.0".to_string(),
            name: self.name.clone(),
            ..Default::default()
        }])
    }

    async fn build_quick_sync_stages(&self, rollback: bool) -> Result<Vec<PipelineStage>, AgentError> {
        let mut stages = vec![Self::stage(&format!("{}-sync", self.name), SYNC_STAGE, 0, false)];
        if rollback {
            stages.push(self.rollback_stage());
        }
        Ok(stages)
    }

    async fn build_pipeline_sync_stages(
        &self,
        stages: Vec<StageConfig>,
        rollback: bool,
    ) -> Result<Vec<PipelineStage>, AgentError> {
        let mut out: Vec<PipelineStage> = stages
            .iter()
            .map(|c| Self::stage(&c.id, &c.name, c.index, false))
            .collect();
        if rollback {
            out.push(self.rollback_stage());
        }
        Ok(out)
    }

    async fn execute_stage(&self, input: ExecuteStageInput) -> Result<StageStatus, AgentError> {
        self.executed.lock().push(input.stage.id.clone());
        if self.hanging.contains(&input.stage.name) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.panicking.contains(&input.stage.name) {
            panic!("plugin crashed while executing {}", input.stage.id);
        }
        Ok(self
            .results
            .get(&input.stage.name)
            .copied()
            .unwrap_or(StageStatus::Success))
    }

    async fn get_livestate(&self, _req: GetLivestateRequest) -> Result<GetLivestateResponse, AgentError> {
        Err(unimplemented("GetLivestate"))
    }

    async fn get_plan_preview(&self, _input: PlanPluginInput) -> Result<Vec<PlanPreviewResult>, AgentError> {
        Ok(vec![PlanPreviewResult {
            deploy_target: "default".to_string(),
            summary: "1 resource will be updated".to_string(),
            no_change: false,
            details: b"+ replicas: 3".to_vec(),
            diff_language: "diff".to_string(),
        }])
    }

    async fn list_services(&self) -> Result<Vec<String>, AgentError> {
        Ok(Vec::new())
    }
}

/// Writes the same files for every revision and reports the revision as the commit hash
#[derive(Clone, Default)]
pub struct FakeCloner {
    revision: String,
    files: BTreeMap<String, String>,
}

#[async_trait]
impl Cloner for FakeCloner {
    fn revision(&self) -> &str {
        &self.revision
    }

    async fn clone_to(&self, dest: &Dir) -> Result<String, AgentError> {
        dest.create().await?;
        for (path, content) in &self.files {
            dest.file(path).write_string(content).await?;
        }
        Ok(self.revision.clone())
    }
}

/// Builds [`FakeCloner`]s over a fixed set of files
#[derive(Default)]
pub struct FakeClonerFactory {
    files: Mutex<BTreeMap<String, String>>,
    pub requested: Mutex<Vec<(String, String)>>,
}

impl FakeClonerFactory {
    pub fn with_file(path: &str, content: &str) -> Arc<Self> {
        let factory = Self::default();
        factory.put(path, content);
        Arc::new(factory)
    }

    pub fn put(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }
}

impl ClonerFactory for FakeClonerFactory {
    fn cloner(&self, repo_id: &str, revision: &str) -> Result<Arc<dyn Cloner>, AgentError> {
        self.requested
            .lock()
            .push((repo_id.to_string(), revision.to_string()));
        Ok(Arc::new(FakeCloner {
            revision: revision.to_string(),
            files: self.files.lock().clone(),
        }))
    }
}

/// Poll `cond` every 20ms for up to five seconds
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
