//! Download, launch and supervise plugin processes

use std::process::Stdio;
use std::time::Duration;

use futures::future::join_all;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::settings::PluginSettings;
use crate::utils::sha256_hash;

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Where plugin binaries are downloaded
    pub plugins_dir: Dir,
    /// `host:port` of the plugin service plugins dial back into
    pub plugin_service_address: String,
    /// How long plugins get to exit after being asked to stop
    pub grace_period: Duration,
}

/// A running plugin process
struct PluginProcess {
    name: String,
    child: Child,
}

impl PluginProcess {
    /// Ask the process to terminate, killing it once `grace_period` elapsed
    async fn stop(mut self, grace_period: Duration) {
        if let Some(pid) = self.child.id() {
            let mut system = System::new();
            let pid = Pid::from_u32(pid);
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = system.process(pid) {
                process.kill_with(Signal::Term);
            }
        }

        match tokio::time::timeout(grace_period, self.child.wait()).await {
            Ok(Ok(status)) => info!(plugin = %self.name, %status, "Plugin stopped"),
            Ok(Err(e)) => warn!(plugin = %self.name, "Failed to wait for plugin: {}", e),
            Err(_) => {
                warn!(plugin = %self.name, "Plugin did not stop in {:?}, killing it", grace_period);
                if let Err(e) = self.child.kill().await {
                    error!(plugin = %self.name, "Failed to kill plugin: {}", e);
                }
            }
        }
    }
}

/// Owns every plugin process for the lifetime of piped
pub struct PluginHost {
    options: HostOptions,
    processes: Vec<PluginProcess>,
}

impl PluginHost {
    /// Download and launch every configured plugin
    pub async fn start(options: HostOptions, plugins: &[PluginSettings]) -> Result<Self, AgentError> {
        options.plugins_dir.create().await?;

        let mut host = PluginHost {
            options,
            processes: Vec::new(),
        };
        for settings in plugins {
            match host.launch(settings).await {
                Ok(process) => host.processes.push(process),
                Err(e) => {
                    host.stop().await;
                    return Err(e);
                }
            }
        }
        Ok(host)
    }

    async fn launch(&self, settings: &PluginSettings) -> Result<PluginProcess, AgentError> {
        let binary = download(&self.options.plugins_dir, settings).await?;
        let config = serde_json::to_string(settings)?;

        info!(plugin = %settings.name, port = settings.port, "Launching plugin");
        let child = Command::new(binary.path())
            .arg("start")
            .arg("--piped-plugin-service")
            .arg(&self.options.plugin_service_address)
            .arg("--config")
            .arg(config)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::PluginError(format!("failed to launch plugin {}: {}", settings.name, e))
            })?;

        Ok(PluginProcess {
            name: settings.name.clone(),
            child,
        })
    }

    /// Wait for shutdown, then stop every plugin
    pub async fn run(self, ctx: CancellationToken) -> Result<(), AgentError> {
        ctx.cancelled().await;
        self.stop().await;
        Ok(())
    }

    /// Stop every plugin concurrently
    pub async fn stop(self) {
        let grace_period = self.options.grace_period;
        info!("Stopping {} plugins", self.processes.len());
        join_all(self.processes.into_iter().map(|p| p.stop(grace_period))).await;
    }
}

/// Fetch the plugin binary into `plugins_dir/<name>`.
///
/// A binary downloaded earlier from the same URL is reused.
async fn download(plugins_dir: &Dir, settings: &PluginSettings) -> Result<File, AgentError> {
    let binary = plugins_dir.file(&settings.name);
    let source_marker = plugins_dir.file(format!("{}.source", settings.name));

    if binary.exists().await && source_marker.exists().await {
        if source_marker.read_string().await? == settings.url {
            return Ok(binary);
        }
    }

    info!(plugin = %settings.name, url = %settings.url, "Downloading plugin");
    let url = url::Url::parse(&settings.url).map_err(|e| {
        AgentError::ConfigError(format!("invalid url of plugin {}: {}", settings.name, e))
    })?;
    let content = match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|_| {
                AgentError::ConfigError(format!("invalid file url {}", settings.url))
            })?;
            File::new(path).read_bytes().await?
        }
        "http" | "https" => {
            let response = reqwest::get(url).await?.error_for_status()?;
            response.bytes().await?.to_vec()
        }
        scheme => {
            return Err(AgentError::ConfigError(format!(
                "unsupported scheme {} in url of plugin {}",
                scheme, settings.name
            )))
        }
    };
    info!(plugin = %settings.name, sha256 = %sha256_hash(&content), "Downloaded plugin");

    let staging = plugins_dir.file(format!("{}.download", settings.name));
    staging.write_bytes(&content).await?;
    staging.set_mode(0o755).await?;
    staging.rename(&binary).await?;
    source_marker.write_string(&settings.url).await?;
    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(name: &str, url: &str) -> PluginSettings {
        PluginSettings {
            name: name.to_string(),
            url: url.to_string(),
            port: 7001,
            config: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_download_reuses_same_source() {
        let root = tempfile::tempdir().unwrap();
        let plugins_dir = Dir::new(root.path().join("plugins"));
        let source = File::new(root.path().join("k8s-v1"));
        source.write_string("#!/bin/sh\n").await.unwrap();
        let url = format!("file://{}", source.path().display());

        let binary = download(&plugins_dir, &settings("k8s", &url)).await.unwrap();
        assert_eq!(binary.read_string().await.unwrap(), "#!/bin/sh\n");

        source.delete().await.unwrap();
        let again = download(&plugins_dir, &settings("k8s", &url)).await.unwrap();
        assert_eq!(again.path(), binary.path());

        assert!(download(&plugins_dir, &settings("k8s", "file:///nonexistent/k8s-v2"))
            .await
            .is_err());
        assert!(download(&plugins_dir, &settings("k8s", "ftp://example.com/k8s"))
            .await
            .is_err());
    }
}
