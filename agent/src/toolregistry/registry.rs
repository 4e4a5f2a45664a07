//! Versioned tool installs shared by every plugin

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;

type Install = Shared<BoxFuture<'static, Result<String, String>>>;

/// Installs tools into `tools_dir/<name>-<version>` on demand.
///
/// Concurrent requests for the same tool share a single install.
pub struct ToolRegistry {
    tools_dir: Dir,
    tmp_dir: Dir,
    inflight: Mutex<HashMap<String, Install>>,
}

impl ToolRegistry {
    pub fn new(tools_dir: Dir, tmp_dir: Dir) -> Self {
        Self {
            tools_dir,
            tmp_dir,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Install `name` at `version` with `script` unless already installed,
    /// returning the absolute path of the binary.
    pub async fn install(
        &self,
        name: &str,
        version: &str,
        script: &str,
    ) -> Result<String, AgentError> {
        let key = format!("{}-{}", name, version);
        let target = self.tools_dir.file(&key);
        if target.exists().await {
            return Ok(target.path().to_string_lossy().to_string());
        }

        let install = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(key.clone())
                .or_insert_with(|| {
                    let job = InstallJob {
                        name: name.to_string(),
                        version: version.to_string(),
                        script: script.to_string(),
                        tools_dir: self.tools_dir.clone(),
                        tmp_dir: self.tmp_dir.clone(),
                    };
                    async move { job.run().await.map_err(|e| e.to_string()) }
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let result = install.clone().await;
        {
            // A later caller may already have started a new install under the same key
            let mut inflight = self.inflight.lock();
            if inflight.get(&key).map_or(false, |current| current.ptr_eq(&install)) {
                inflight.remove(&key);
            }
        }
        result.map_err(AgentError::ToolError)
    }
}

struct InstallJob {
    name: String,
    version: String,
    script: String,
    tools_dir: Dir,
    tmp_dir: Dir,
}

impl InstallJob {
    async fn run(self) -> Result<String, AgentError> {
        let target = self.tools_dir.file(&format!("{}-{}", self.name, self.version));
        if target.exists().await {
            return Ok(target.path().to_string_lossy().to_string());
        }

        self.tmp_dir.create().await?;
        self.tools_dir.create().await?;
        let out_dir = self.tmp_dir.create_temp_dir("out").await?;
        let scratch = self.tmp_dir.create_temp_dir("scratch").await?;

        let result = self.install(&out_dir, &scratch).await;

        for dir in [&out_dir, &scratch] {
            if let Err(e) = dir.delete().await {
                warn!("Failed to remove {}: {}", dir.path().display(), e);
            }
        }
        result
    }

    async fn install(&self, out_dir: &Dir, scratch: &Dir) -> Result<String, AgentError> {
        let key = format!("{}-{}", self.name, self.version);
        let out = out_dir.file(&key);

        let vars = HashMap::from([
            ("Name", self.name.clone()),
            ("Version", self.version.clone()),
            ("OutPath", out.path().to_string_lossy().to_string()),
            ("TmpDir", scratch.path().to_string_lossy().to_string()),
            ("Arch", go_arch().to_string()),
            ("Os", go_os().to_string()),
        ]);
        let script = render_script(&self.script, &vars)?;

        info!(tool = %self.name, version = %self.version, "Installing tool");
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(&script)
            .current_dir(scratch.path())
            .output()
            .await?;
        if !output.status.success() {
            return Err(AgentError::ToolError(format!(
                "failed to install {}: {}{}",
                key,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        if !out.exists().await {
            return Err(AgentError::ToolError(format!(
                "install script of {} did not produce {}",
                key,
                out.path().display()
            )));
        }
        out.set_mode(0o755).await?;

        let target = self.tools_dir.file(&key);
        out.rename(&target).await?;
        info!(tool = %self.name, version = %self.version, "Installed tool at {}", target.path().display());
        Ok(target.path().to_string_lossy().to_string())
    }
}

/// Substitute `{{ .Var }}` placeholders
fn render_script(script: &str, vars: &HashMap<&str, String>) -> Result<String, AgentError> {
    let re = Regex::new(r"\{\{\s*\.([A-Za-z]+)\s*\}\}")
        .map_err(|e| AgentError::Internal(e.to_string()))?;

    let mut missing = None;
    let rendered = re.replace_all(script, |caps: &regex::Captures| {
        match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(var) => Err(AgentError::ToolError(format!(
            "unknown variable {} in install script",
            var
        ))),
        None => Ok(rendered.into_owned()),
    }
}

fn go_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

fn go_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(root: &std::path::Path) -> ToolRegistry {
        ToolRegistry::new(Dir::new(root.join("tools")), Dir::new(root.join("tmp")))
    }

    #[test]
    fn test_render_script() {
        let vars = HashMap::from([("Name", "kubectl".to_string()), ("Version", "1.30.0".to_string())]);
        let out = render_script("get {{ .Name }}-{{.Version}}", &vars).unwrap();
        assert_eq!(out, "get kubectl-1.30.0");

        assert!(render_script("{{ .Unknown }}", &vars).is_err());
    }

    #[tokio::test]
    async fn test_install() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry(root.path());

        let path = registry
            .install("tool", "1.0.0", "echo '#!/bin/sh' > {{ .OutPath }}")
            .await
            .unwrap();
        assert!(path.ends_with("tools/tool-1.0.0"));
        assert!(std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn test_install_failures() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry(root.path());

        let err = registry
            .install("tool", "1.0.0", "echo boom; exit 3")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        let err = registry.install("tool", "1.0.0", "true").await.unwrap_err();
        assert!(err.to_string().contains("did not produce"));

        // Failed installs are not cached
        registry
            .install("tool", "1.0.0", "touch {{ .OutPath }}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_installed_tool_is_reused() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry(root.path());

        let first = registry
            .install("tool", "1.0.0", "touch {{ .OutPath }}")
            .await
            .unwrap();
        let second = registry
            .install("tool", "1.0.0", "touch {{ .OutPath }}")
            .await
            .unwrap();
        assert_eq!(first, second);

        // The script is not run again once the tool exists
        let third = registry.install("tool", "1.0.0", "exit 1").await.unwrap();
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_concurrent_installs_run_script_once() {
        let root = tempfile::tempdir().unwrap();
        let registry = registry(root.path());
        let counter = root.path().join("runs");
        let script = format!(
            "echo run >> {}; sleep 0.2; touch {{{{ .OutPath }}}}",
            counter.display()
        );

        let results = futures::future::join_all(
            (0..5).map(|_| registry.install("tool", "1.0.0", &script)),
        )
        .await;

        let paths: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
        assert!(paths.iter().all(|p| p == &paths[0]));
        assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 1);
        assert!(registry.inflight.lock().is_empty());
    }
}
