//! Durable, append-only request journal.
//!
//! Every committed mutation of an approval request is appended as a full
//! request image. Records are never rewritten, so the journal doubles as the
//! compliance audit log; replaying it and keeping the highest revision per
//! request restores the live state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::events::ApprovalEventKind;
use crate::types::{ApprovalError, ApprovalRequest, Result};

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub recorded_at: DateTime<Utc>,
    pub event: ApprovalEventKind,
    pub request: ApprovalRequest,
}

/// Append-only persistence for approval requests.
#[async_trait]
pub trait RequestJournal: Send + Sync {
    /// Durably append a record. The mutation is committed only if this succeeds.
    async fn append(&self, record: &JournalRecord) -> Result<()>;

    /// Read every record in append order.
    async fn load(&self) -> Result<Vec<JournalRecord>>;
}

/// Journal kept in memory, for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestJournal for InMemoryJournal {
    async fn append(&self, record: &JournalRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<JournalRecord>> {
        Ok(self.records.lock().await.clone())
    }
}

/// Journal stored as JSON lines on disk.
#[derive(Debug)]
pub struct JsonlJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RequestJournal for JsonlJournal {
    async fn append(&self, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| ApprovalError::Journal(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ApprovalError::Journal(format!("{}: {}", self.path.display(), e)))?;

        file.write_all(&line)
            .await
            .map_err(|e| ApprovalError::Journal(e.to_string()))?;
        file.sync_data()
            .await
            .map_err(|e| ApprovalError::Journal(e.to_string()))?;

        debug!(
            request_id = %record.request.request_id,
            event = record.event.as_str(),
            revision = record.request.revision,
            "Journal record appended"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Vec<JournalRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ApprovalError::Journal(format!("{}: {}", self.path.display(), e))),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    ApprovalError::Journal(format!("{} line {}: {}", self.path.display(), n + 1, e))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ApprovalStatus;
    use constitution::{ApprovalRequirement, ApprovalType};

    fn record(revision: u64, event: ApprovalEventKind, status: ApprovalStatus) -> JournalRecord {
        let now = Utc::now();
        JournalRecord {
            recorded_at: now,
            event,
            request: ApprovalRequest {
                request_id: "req-1".to_string(),
                action_id: "act-1".to_string(),
                action_type: "camera_zoom".to_string(),
                action_category: "surveillance".to_string(),
                risk_score: 10,
                requested_by: "vision".to_string(),
                context: Default::default(),
                requirements: vec![
                    ApprovalRequirement::new(ApprovalType::Supervisor, 1, false, 60).unwrap(),
                ],
                signatures: vec![],
                status,
                created_at: now,
                expires_at: now,
                completed_at: None,
                matched_rule_ids: vec!["sop-cam".to_string()],
                snapshot_version: 3,
                escalations: vec![],
                revision,
            },
        }
    }

    #[tokio::test]
    async fn test_jsonl_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JsonlJournal::new(dir.path().join("requests.jsonl"));
        assert!(journal.load().await.unwrap().is_empty());

        let first = record(1, ApprovalEventKind::Created, ApprovalStatus::Pending);
        let second = record(2, ApprovalEventKind::Expired, ApprovalStatus::Expired);
        journal.append(&first).await.unwrap();
        journal.append(&second).await.unwrap();

        let loaded = journal.load().await.unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = JsonlJournal::new(&path).load().await.unwrap_err();
        assert!(matches!(err, ApprovalError::Journal(msg) if msg.contains("line 1")));
    }
}
