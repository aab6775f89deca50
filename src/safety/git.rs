//! Thin async wrapper over the `git` CLI for one repository root.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {message}")]
    Failed { command: String, message: String },
}

const DEFAULT_USER_NAME: &str = "taskpilot";
const DEFAULT_USER_EMAIL: &str = "taskpilot@localhost";

#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `git <args>` in the repository root and return stdout.
    pub async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(GitError::Failed {
                command: args.first().copied().unwrap_or_default().to_string(),
                message,
            });
        }

        Ok(stdout.into_owned())
    }

    pub async fn is_work_tree(&self) -> bool {
        if !self.root.is_dir() {
            return false;
        }
        matches!(
            self.run(&["rev-parse", "--is-inside-work-tree"]).await,
            Ok(out) if out.trim() == "true"
        )
    }

    /// Whether the root is the top level of its own work tree (not nested in a parent repo).
    pub async fn is_repo_root(&self) -> bool {
        let Ok(top) = self.run(&["rev-parse", "--show-toplevel"]).await else {
            return false;
        };
        match (
            tokio::fs::canonicalize(top.trim()).await,
            tokio::fs::canonicalize(&self.root).await,
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Current HEAD commit, or `None` on an unborn branch.
    pub async fn head(&self) -> Option<String> {
        self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Paths with staged, unstaged or untracked changes.
    ///
    /// Renamed and copied entries report their new path.
    pub async fn changed_paths(&self) -> Result<Vec<String>, GitError> {
        let status = self
            .run(&["status", "--porcelain", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain_z(&status))
    }

    pub async fn reset_hard(&self, commit: &str) -> Result<(), GitError> {
        self.run(&["reset", "--hard", "--quiet", commit]).await.map(|_| ())
    }

    /// Remove untracked files and directories (ignored files are kept).
    pub async fn clean(&self) -> Result<(), GitError> {
        self.run(&["clean", "-fd", "--quiet"]).await.map(|_| ())
    }

    pub async fn stash_push(&self, message: &str) -> Result<(), GitError> {
        self.run(&["stash", "push", "--include-untracked", "--message", message])
            .await
            .map(|_| ())
    }

    pub async fn stash_pop(&self) -> Result<(), GitError> {
        self.run(&["stash", "pop", "--quiet"]).await.map(|_| ())
    }

    /// Stage everything and commit.
    pub async fn commit_all(&self, message: &str) -> Result<String, GitError> {
        self.run(&["add", "--all"]).await?;
        self.run(&["commit", "--quiet", "--message", message]).await?;
        self.head().await.ok_or_else(|| GitError::Failed {
            command: "commit".to_string(),
            message: "HEAD missing after commit".to_string(),
        })
    }

    /// Initialize a repository with an initial commit if it has none.
    ///
    /// Sets a repository-local identity when none is configured.
    pub async fn init_repository(&self) -> Result<String, GitError> {
        tokio::fs::create_dir_all(&self.root).await?;
        if !self.is_repo_root().await {
            self.run(&["init", "--quiet"]).await?;
            tracing::info!(root = %self.root.display(), "Initialized git repository");
        }

        for (key, fallback) in [("user.name", DEFAULT_USER_NAME), ("user.email", DEFAULT_USER_EMAIL)] {
            let configured = self
                .run(&["config", "--get", key])
                .await
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !configured {
                self.run(&["config", key, fallback]).await?;
            }
        }

        if let Some(head) = self.head().await {
            return Ok(head);
        }

        self.run(&["commit", "--allow-empty", "--quiet", "--message", "Initial commit"])
            .await?;
        self.head().await.ok_or_else(|| GitError::Failed {
            command: "commit".to_string(),
            message: "HEAD missing after initial commit".to_string(),
        })
    }
}

/// Parse `git status --porcelain -z`: `XY path\0`, with the source path as an
/// extra entry after renames and copies.
fn parse_porcelain_z(status: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut entries = status.split('\0').filter(|entry| !entry.is_empty());
    while let Some(entry) = entries.next() {
        let (Some(code), Some(path)) = (entry.get(..2), entry.get(3..)) else {
            continue;
        };
        if code.contains(|c: char| c == 'R' || c == 'C') {
            entries.next();
        }
        if !path.is_empty() {
            paths.push(path.to_string());
        }
    }
    paths
}
