//! Append-only audit trail for safety transactions.
//!
//! One newline-delimited JSON file per UTC day: `audit-YYYY-MM-DD.jsonl`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Precheck,
    CheckpointCreated,
    OperationStarted,
    OperationSucceeded,
    OperationFailed,
    RollbackStarted,
    RollbackSucceeded,
    RollbackFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditError {
    pub name: String,
    pub message: String,
}

impl AuditError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub task_description: String,
    pub phase: AuditPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,
}

impl AuditEvent {
    pub fn new(task_description: &str, phase: AuditPhase) -> Self {
        Self {
            timestamp: Utc::now(),
            task_description: task_description.to_string(),
            phase,
            checkpoint_commit: None,
            error: None,
        }
    }

    pub fn with_checkpoint(mut self, commit: &str) -> Self {
        self.checkpoint_commit = Some(commit.to_string());
        self
    }

    pub fn with_error(mut self, error: AuditError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one event to the file for its day.
    pub async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(event.timestamp.date_naive()))
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }

    /// Events recorded on `date`. A missing file reads as empty.
    pub async fn read_day(&self, date: NaiveDate) -> std::io::Result<Vec<AuditEvent>> {
        let content = match tokio::fs::read_to_string(self.file_for(date)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(std::io::Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit"));
        let first = AuditEvent::new("write config", AuditPhase::CheckpointCreated).with_checkpoint("abc123");
        let second = AuditEvent::new("write config", AuditPhase::OperationFailed)
            .with_error(AuditError::new("Error", "boom"));
        log.append(&first).await.unwrap();
        log.append(&second).await.unwrap();

        let today = first.timestamp.date_naive();
        let events = log.read_day(today).await.unwrap();
        assert_eq!(events, vec![first, second]);

        let name = log.file_for(today);
        assert!(name.file_name().unwrap().to_str().unwrap().starts_with("audit-"));
        assert!(name.to_str().unwrap().ends_with(".jsonl"));
    }

    #[tokio::test]
    async fn test_wire_shape() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let event = AuditEvent::new("task", AuditPhase::RollbackSucceeded);
        log.append(&event).await.unwrap();
        let raw = tokio::fs::read_to_string(log.file_for(event.timestamp.date_naive()))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["taskDescription"], "task");
        assert_eq!(value["phase"], "rollback_succeeded");
        assert!(value.get("checkpointCommit").is_none());
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn test_missing_day_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(log.read_day(day).await.unwrap().is_empty());
    }
}
