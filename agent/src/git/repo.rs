//! A local checkout of a Git repository

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Commit summary read from `git log`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub message: String,
    /// Unix seconds
    pub created_at: i64,
}

/// Identity and credentials applied to every git invocation
#[derive(Debug, Clone, Default)]
pub struct GitEnv {
    pub username: String,
    pub email: String,
    pub ssh_key_file: Option<PathBuf>,
}

impl GitEnv {
    fn apply(&self, cmd: &mut Command) {
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(key) = &self.ssh_key_file {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o StrictHostKeyChecking=no -o IdentitiesOnly=yes",
                    key.display()
                ),
            );
        }
        if !self.username.is_empty() {
            cmd.env("GIT_AUTHOR_NAME", &self.username)
                .env("GIT_COMMITTER_NAME", &self.username);
        }
        if !self.email.is_empty() {
            cmd.env("GIT_AUTHOR_EMAIL", &self.email)
                .env("GIT_COMMITTER_EMAIL", &self.email);
        }
    }
}

/// Run git with `args` inside `dir`, returning trimmed stdout
pub(crate) async fn run_git(
    env: &GitEnv,
    dir: Option<&Path>,
    args: &[&str],
) -> Result<String, AgentError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.args(args);
    env.apply(&mut cmd);

    debug!("Running git {}", args.join(" "));
    let output = cmd
        .output()
        .await
        .map_err(|e| AgentError::GitError(format!("failed to run git {}: {}", args[0], e)))?;

    if !output.status.success() {
        return Err(AgentError::GitError(format!(
            "git {} failed: {}{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A working copy of a repository
#[derive(Debug, Clone)]
pub struct Repo {
    dir: Dir,
    remote: String,
    branch: String,
    env: GitEnv,
}

impl Repo {
    pub fn new(dir: Dir, remote: &str, branch: &str, env: GitEnv) -> Self {
        Self {
            dir,
            remote: remote.to_string(),
            branch: branch.to_string(),
            env,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// The base branch the repository was cloned with
    pub fn branch(&self) -> &str {
        &self.branch
    }

    async fn git(&self, args: &[&str]) -> Result<String, AgentError> {
        run_git(&self.env, Some(self.dir.path()), args).await
    }

    /// Fetch and fast-forward the base branch
    pub async fn pull(&self) -> Result<(), AgentError> {
        self.git(&["pull", "--ff-only", "origin", &self.branch])
            .await
            .map(|_| ())
    }

    pub async fn checkout(&self, revision: &str) -> Result<(), AgentError> {
        self.git(&["checkout", "-q", revision]).await.map(|_| ())
    }

    pub async fn checkout_new_branch(&self, branch: &str) -> Result<(), AgentError> {
        self.git(&["checkout", "-q", "-B", branch]).await.map(|_| ())
    }

    pub async fn latest_commit(&self) -> Result<CommitInfo, AgentError> {
        let out = self
            .git(&["log", "-1", "--format=%H%x00%an%x00%ct%x00%s"])
            .await?;
        parse_commit_line(&out)
            .ok_or_else(|| AgentError::GitError(format!("unexpected git log output: {}", out)))
    }

    /// Paths changed between two revisions, relative to the repository root
    pub async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>, AgentError> {
        let range = format!("{}..{}", from, to);
        let out = self.git(&["diff", "--name-only", &range]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetch `branch` from origin and merge it into the current HEAD
    pub async fn merge_remote_branch(&self, branch: &str, message: &str) -> Result<(), AgentError> {
        self.git(&["fetch", "-q", "origin", branch]).await?;
        self.git(&["merge", "-q", "--no-ff", "-m", message, "FETCH_HEAD"])
            .await
            .map(|_| ())
    }

    /// Write `changes` (repository relative path -> content) and commit them
    pub async fn commit_changes(
        &self,
        message: &str,
        changes: &BTreeMap<String, Vec<u8>>,
    ) -> Result<String, AgentError> {
        for (path, content) in changes {
            File::new(self.dir.path().join(path))
                .write_bytes(content)
                .await?;
            self.git(&["add", path]).await?;
        }
        self.git(&["commit", "-q", "-m", message]).await?;
        self.git(&["rev-parse", "HEAD"]).await
    }

    pub async fn push(&self, branch: &str) -> Result<(), AgentError> {
        let refspec = format!("HEAD:{}", branch);
        self.git(&["push", "-q", "origin", &refspec]).await.map(|_| ())
    }

    /// Copy the working copy, `.git` included, into `dest`
    pub async fn copy(&self, dest: Dir) -> Result<Repo, AgentError> {
        self.dir.copy_to(&dest).await?;
        Ok(Repo::new(dest, &self.remote, &self.branch, self.env.clone()))
    }

    /// Delete the working copy
    pub async fn clean(&self) -> Result<(), AgentError> {
        self.dir.delete().await
    }
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.splitn(4, '\0');
    let hash = parts.next()?.to_string();
    let author = parts.next()?.to_string();
    let created_at = parts.next()?.parse().ok()?;
    let message = parts.next().unwrap_or_default().to_string();
    Some(CommitInfo {
        hash,
        author,
        message,
        created_at,
    })
}
