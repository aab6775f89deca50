//! All-or-nothing transactions over a git working directory.
//!
//! # Protocol
//! 1. Take the guard's FIFO lock (held until the transaction finishes)
//! 2. Pre-check: the root must be a git work tree with at least one commit
//! 3. Record HEAD as the checkpoint
//! 4. Handle a dirty tree per [`DirtyTreeStrategy`]
//! 5. Run the operation
//! 6. On failure: `reset --hard <checkpoint>`, `clean -fd`, pop any auto-stash
//!
//! Every phase is appended to the audit log. Audit write failures are logged
//! and never change a transaction's outcome.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::SafetyConfig;
use crate::util::normalize_path;

use super::audit::{AuditError, AuditEvent, AuditLog, AuditPhase};
use super::git::Git;

/// What to do when the working tree has uncommitted changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyTreeStrategy {
    /// Refuse to start the transaction
    #[default]
    Fail,
    /// Stash the changes (including untracked files) and restore them afterwards
    AutoStash,
}

impl std::str::FromStr for DirtyTreeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail" => Ok(DirtyTreeStrategy::Fail),
            "auto_stash" | "stash" => Ok(DirtyTreeStrategy::AutoStash),
            other => Err(format!("unknown dirty tree strategy '{}'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("{} is not a git repository: {reason}", .path.display())]
    NotARepository { path: PathBuf, reason: String },

    #[error("Working tree at {} has uncommitted changes: {}", .path.display(), .changes.join(", "))]
    DirtyWorkingTree { path: PathBuf, changes: Vec<String> },

    /// The operation failed and the tree was rolled back cleanly.
    #[error(transparent)]
    Operation(anyhow::Error),

    /// Rollback did not complete; on-disk state is unknown.
    #[error("Rollback after failed operation ({operation}) did not complete: {reason}")]
    RollbackFailed { operation: String, reason: String },
}

impl TransactionError {
    /// Errors after which the repository cannot be trusted or used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransactionError::NotARepository { .. } | TransactionError::RollbackFailed { .. }
        )
    }
}

/// Where taskpilot keeps its own files for `repo_root`: inside `.git`, out of
/// reach of `status`, `stash` and `clean`.
pub fn state_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".git").join("taskpilot")
}

/// Whether `path` lies in the work tree of `repo_root` (its `.git` excluded).
pub fn in_work_tree(path: &Path, repo_root: &Path) -> bool {
    let path = normalize_path(path);
    let root = normalize_path(repo_root);
    path.starts_with(&root) && !path.starts_with(root.join(".git"))
}

/// Serializes mutating operations against one repository root.
pub struct SafetyGuard {
    git: Git,
    audit: AuditLog,
    strategy: DirtyTreeStrategy,
    lock: Mutex<()>,
}

impl SafetyGuard {
    /// An audit directory inside the guarded work tree falls back to the
    /// default under `.git`, so audit files never show up as changes.
    pub fn new(config: &SafetyConfig) -> Self {
        let default_dir = state_dir(&config.repo_root).join("audit");
        let audit_dir = match &config.audit_dir {
            Some(dir) if in_work_tree(dir, &config.repo_root) => {
                tracing::warn!(
                    dir = %dir.display(),
                    fallback = %default_dir.display(),
                    "Audit directory is inside the guarded work tree, using the git directory"
                );
                default_dir
            }
            Some(dir) => dir.clone(),
            None => default_dir,
        };
        Self {
            git: Git::new(&config.repo_root),
            audit: AuditLog::new(audit_dir),
            strategy: config.dirty_strategy,
            lock: Mutex::new(()),
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Make the root a repository with at least one commit.
    pub async fn init_repository(&self) -> anyhow::Result<String> {
        Ok(self.git.init_repository().await?)
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(&event).await {
            tracing::warn!(
                phase = ?event.phase,
                dir = %self.audit.dir().display(),
                "Failed to write audit event: {}",
                e
            );
        }
    }

    /// Run `operation` as a transaction.
    ///
    /// Returns the operation's value on success. On failure the working tree is
    /// restored to the checkpoint and the original error comes back unchanged as
    /// [`TransactionError::Operation`].
    pub async fn execute<T, F, Fut>(&self, description: &str, operation: F) -> Result<T, TransactionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let _held = self.lock.lock().await;
        let root = self.git.root().to_path_buf();

        if !self.git.is_work_tree().await {
            return Err(TransactionError::NotARepository {
                path: root,
                reason: "not a git work tree".to_string(),
            });
        }
        let Some(checkpoint) = self.git.head().await else {
            return Err(TransactionError::NotARepository {
                path: root,
                reason: "repository has no commits".to_string(),
            });
        };

        self.record(AuditEvent::new(description, AuditPhase::Precheck)).await;
        self.record(AuditEvent::new(description, AuditPhase::CheckpointCreated).with_checkpoint(&checkpoint))
            .await;

        let changes = self.git.changed_paths().await.map_err(|e| TransactionError::NotARepository {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        let mut stashed = false;
        if !changes.is_empty() {
            match self.strategy {
                DirtyTreeStrategy::Fail => {
                    return Err(TransactionError::DirtyWorkingTree { path: root, changes });
                }
                DirtyTreeStrategy::AutoStash => {
                    let message = format!("taskpilot auto-stash: {}", description);
                    if let Err(e) = self.git.stash_push(&message).await {
                        tracing::warn!("Auto-stash failed: {}", e);
                        return Err(TransactionError::DirtyWorkingTree { path: root, changes });
                    }
                    tracing::debug!(count = changes.len(), "Auto-stashed working tree changes");
                    stashed = true;
                }
            }
        }

        self.record(AuditEvent::new(description, AuditPhase::OperationStarted)).await;

        match operation().await {
            Ok(value) => {
                self.record(AuditEvent::new(description, AuditPhase::OperationSucceeded))
                    .await;
                if stashed {
                    if let Err(e) = self.git.stash_pop().await {
                        tracing::warn!("Could not restore auto-stash after success, it is kept in the stash list: {}", e);
                    }
                }
                Ok(value)
            }
            Err(error) => {
                tracing::warn!(task = %description, "Operation failed, rolling back: {:#}", error);
                self.record(
                    AuditEvent::new(description, AuditPhase::OperationFailed)
                        .with_error(AuditError::new("Error", format!("{:#}", error))),
                )
                .await;
                self.record(AuditEvent::new(description, AuditPhase::RollbackStarted).with_checkpoint(&checkpoint))
                    .await;

                match self.rollback(&checkpoint, stashed).await {
                    Ok(()) => {
                        self.record(
                            AuditEvent::new(description, AuditPhase::RollbackSucceeded)
                                .with_checkpoint(&checkpoint),
                        )
                        .await;
                        Err(TransactionError::Operation(error))
                    }
                    Err(reason) => {
                        tracing::error!(task = %description, "Rollback failed: {}", reason);
                        self.record(
                            AuditEvent::new(description, AuditPhase::RollbackFailed)
                                .with_checkpoint(&checkpoint)
                                .with_error(AuditError::new("RollbackFailed", reason.clone())),
                        )
                        .await;
                        Err(TransactionError::RollbackFailed {
                            operation: error.to_string(),
                            reason,
                        })
                    }
                }
            }
        }
    }

    async fn rollback(&self, checkpoint: &str, stashed: bool) -> Result<(), String> {
        self.git
            .reset_hard(checkpoint)
            .await
            .map_err(|e| format!("reset failed: {}", e))?;
        self.git
            .clean()
            .await
            .map_err(|e| format!("clean failed: {}", e))?;
        if stashed {
            self.git
                .stash_pop()
                .await
                .map_err(|e| format!("stash pop failed: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn config(root: &Path, strategy: DirtyTreeStrategy) -> SafetyConfig {
        SafetyConfig {
            enabled: true,
            repo_root: root.to_path_buf(),
            dirty_strategy: strategy,
            audit_dir: None,
            auto_init: false,
        }
    }

    /// Repo at commit A with hello.txt = "v1".
    async fn repo_with_hello(root: &Path) -> (Git, String) {
        let git = Git::new(root);
        git.init_repository().await.unwrap();
        tokio::fs::write(root.join("hello.txt"), "v1").await.unwrap();
        let head = git.commit_all("add hello").await.unwrap();
        (git, head)
    }

    #[tokio::test]
    async fn test_failed_operation_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (git, commit_a) = repo_with_hello(&root).await;
        let guard = SafetyGuard::new(&config(&root, DirtyTreeStrategy::Fail));

        let hello = root.join("hello.txt");
        let scratch = root.join("scratch.txt");
        let result: Result<(), _> = guard
            .execute("rewrite hello", || async {
                tokio::fs::write(&hello, "v2").await?;
                tokio::fs::write(&scratch, "tmp").await?;
                anyhow::bail!("boom")
            })
            .await;

        match result {
            Err(TransactionError::Operation(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(git.head().await.unwrap(), commit_a);
        assert_eq!(tokio::fs::read_to_string(&hello).await.unwrap(), "v1");
        assert!(!scratch.exists());

        let events = guard.audit_log().read_day(chrono::Utc::now().date_naive()).await.unwrap();
        let phases: Vec<AuditPhase> = events.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                AuditPhase::Precheck,
                AuditPhase::CheckpointCreated,
                AuditPhase::OperationStarted,
                AuditPhase::OperationFailed,
                AuditPhase::RollbackStarted,
                AuditPhase::RollbackSucceeded,
            ]
        );
        assert_eq!(events[1].checkpoint_commit.as_deref(), Some(commit_a.as_str()));
        assert_eq!(events[3].error.as_ref().unwrap().message, "boom");
    }

    #[tokio::test]
    async fn test_successful_operation_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        repo_with_hello(&root).await;
        let guard = SafetyGuard::new(&config(&root, DirtyTreeStrategy::Fail));

        let hello = root.join("hello.txt");
        let value = guard
            .execute("rewrite hello", || async {
                tokio::fs::write(&hello, "v2").await?;
                Ok::<_, anyhow::Error>(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(tokio::fs::read_to_string(&hello).await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let guard = SafetyGuard::new(&config(dir.path(), DirtyTreeStrategy::Fail));
        let ran = std::sync::atomic::AtomicBool::new(false);
        let err = guard
            .execute("noop", || async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::NotARepository { .. }));
        assert!(err.is_fatal());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unborn_head_is_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        Git::new(dir.path()).run(&["init", "--quiet"]).await.unwrap();
        let guard = SafetyGuard::new(&config(dir.path(), DirtyTreeStrategy::Fail));
        match guard.execute("noop", || async { Ok(()) }).await {
            Err(TransactionError::NotARepository { reason, .. }) => assert!(reason.contains("no commits")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dirty_tree_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        repo_with_hello(&root).await;
        tokio::fs::write(root.join("hello.txt"), "local edit").await.unwrap();
        let guard = SafetyGuard::new(&config(&root, DirtyTreeStrategy::Fail));

        match guard.execute("noop", || async { Ok(()) }).await {
            Err(TransactionError::DirtyWorkingTree { changes, .. }) => {
                assert_eq!(changes, vec!["hello.txt".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            tokio::fs::read_to_string(root.join("hello.txt")).await.unwrap(),
            "local edit"
        );
    }

    #[tokio::test]
    async fn test_auto_stash_restores_local_edits_after_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (git, commit_a) = repo_with_hello(&root).await;
        tokio::fs::write(root.join("notes.txt"), "untracked notes").await.unwrap();
        let guard = SafetyGuard::new(&config(&root, DirtyTreeStrategy::AutoStash));

        let hello = root.join("hello.txt");
        let result: Result<(), _> = guard
            .execute("rewrite hello", || async {
                // stash made the tree clean
                assert!(!root.join("notes.txt").exists());
                tokio::fs::write(&hello, "v2").await?;
                anyhow::bail!("boom")
            })
            .await;

        assert!(matches!(result, Err(TransactionError::Operation(_))));
        assert_eq!(git.head().await.unwrap(), commit_a);
        assert_eq!(tokio::fs::read_to_string(&hello).await.unwrap(), "v1");
        assert_eq!(
            tokio::fs::read_to_string(root.join("notes.txt")).await.unwrap(),
            "untracked notes"
        );
    }

    #[tokio::test]
    async fn test_transactions_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        repo_with_hello(&root).await;
        let guard = Arc::new(SafetyGuard::new(&config(&root, DirtyTreeStrategy::AutoStash)));
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let guard = Arc::clone(&guard);
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                guard
                    .execute(&format!("op {i}"), || async {
                        log.lock().await.push(format!("start {i}"));
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        log.lock().await.push(format!("end {i}"));
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = log.lock().await;
        assert_eq!(log.len(), 6);
        for pair in log.chunks(2) {
            let start = pair[0].strip_prefix("start ").unwrap();
            let end = pair[1].strip_prefix("end ").unwrap();
            assert_eq!(start, end);
        }
    }

    #[tokio::test]
    async fn test_rollback_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        repo_with_hello(&root).await;
        let guard = SafetyGuard::new(&config(&root, DirtyTreeStrategy::Fail));

        let hello = root.join("hello.txt");
        let lock = root.join(".git").join("index.lock");
        let result: Result<(), _> = guard
            .execute("rewrite hello", || async {
                tokio::fs::write(&hello, "v2").await?;
                // a stale index lock makes `reset --hard` refuse to run
                tokio::fs::write(&lock, "").await?;
                anyhow::bail!("boom")
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_fatal());
        match err {
            TransactionError::RollbackFailed { operation, reason } => {
                assert_eq!(operation, "boom");
                assert!(reason.starts_with("reset failed"), "{reason}");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let events = guard.audit_log().read_day(chrono::Utc::now().date_naive()).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.phase, AuditPhase::RollbackFailed);
        assert_eq!(last.error.as_ref().unwrap().name, "RollbackFailed");
        assert!(last.checkpoint_commit.is_some());
    }

    #[tokio::test]
    async fn test_audit_dir_inside_work_tree_moves_under_git() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (git, commit_a) = repo_with_hello(&root).await;
        let guard = SafetyGuard::new(&SafetyConfig {
            audit_dir: Some(root.join("audit")),
            ..config(&root, DirtyTreeStrategy::Fail)
        });
        assert_eq!(guard.audit_log().dir(), state_dir(&root).join("audit"));

        let hello = root.join("hello.txt");
        let result: Result<(), _> = guard
            .execute("rewrite hello", || async {
                tokio::fs::write(&hello, "v2").await?;
                anyhow::bail!("boom")
            })
            .await;
        assert!(matches!(result, Err(TransactionError::Operation(_))));
        assert_eq!(git.head().await.unwrap(), commit_a);
        assert!(git.changed_paths().await.unwrap().is_empty());
        assert!(!root.join("audit").exists());

        let phases: Vec<AuditPhase> = guard
            .audit_log()
            .read_day(chrono::Utc::now().date_naive())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.phase)
            .collect();
        assert_eq!(phases.first(), Some(&AuditPhase::Precheck));
        assert_eq!(phases.last(), Some(&AuditPhase::RollbackSucceeded));
    }

    #[test]
    fn test_in_work_tree() {
        let root = Path::new("/srv/repo");
        assert!(in_work_tree(Path::new("/srv/repo/logs"), root));
        assert!(in_work_tree(Path::new("/srv/repo/.git/../notes"), root));
        assert!(!in_work_tree(Path::new("/srv/repo/.git/taskpilot/audit"), root));
        assert!(!in_work_tree(Path::new("/var/log/taskpilot"), root));
        assert!(!in_work_tree(Path::new("/srv/repository"), root));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("auto-stash".parse::<DirtyTreeStrategy>().unwrap(), DirtyTreeStrategy::AutoStash);
        assert_eq!("FAIL".parse::<DirtyTreeStrategy>().unwrap(), DirtyTreeStrategy::Fail);
        assert!("whatever".parse::<DirtyTreeStrategy>().is_err());
    }
}
