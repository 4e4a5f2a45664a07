//! Periodic runtime stats sent upstream with ReportStat

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use controlplane_api::service::ReportStatRequest;

use crate::controller::Controller;
use crate::errors::AgentError;
use crate::rpc::ControlPlane;
use crate::utils::version_info;

/// Host resources of the machine running piped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,
    pub cpu_count: usize,
    /// Bytes
    pub memory_used: u64,
    pub memory_total: u64,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedStats {
    pub version: String,
    pub uptime_secs: u64,
    pub planners: usize,
    pub schedulers: usize,
    pub system: SystemStats,
}

pub fn collect_system_stats() -> SystemStats {
    let mut sys = System::new_all();
    sys.refresh_all();

    SystemStats {
        cpu_usage: sys.global_cpu_usage(),
        cpu_count: sys.cpus().len(),
        memory_used: sys.used_memory(),
        memory_total: sys.total_memory(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    }
}

pub struct StatsReporter {
    control_plane: Arc<dyn ControlPlane>,
    controller: Arc<Controller>,
    interval: Duration,
    started_at: Instant,
}

impl StatsReporter {
    pub fn new(control_plane: Arc<dyn ControlPlane>, controller: Arc<Controller>, interval: Duration) -> Self {
        Self {
            control_plane,
            controller,
            interval,
            started_at: Instant::now(),
        }
    }

    pub fn collect(&self) -> PipedStats {
        let snapshot = self.controller.snapshot();
        PipedStats {
            version: version_info().version,
            uptime_secs: self.started_at.elapsed().as_secs(),
            planners: snapshot.planners.len(),
            schedulers: snapshot.schedulers.len(),
            system: collect_system_stats(),
        }
    }

    pub async fn report(&self) -> Result<(), AgentError> {
        let stats = self.collect();
        debug!(planners = stats.planners, schedulers = stats.schedulers, "Reporting piped stats");
        self.control_plane
            .report_stat(ReportStatRequest {
                piped_stats: serde_json::to_vec(&stats)?,
            })
            .await
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<(), AgentError> {
        info!("Stats reporter starting...");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Stats reporter shutting down...");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.report().await {
                        warn!("Failed to report piped stats: {}", e);
                    }
                }
            }
        }
    }
}
