//! Escalation sink for anything requiring human approval.
//!
//! The queue is an append-only JSONL file: `push` appends a Pending entry,
//! `resolve` appends an updated copy, and readers fold to the latest record
//! per id. The orchestrator and supervisor only ever write; resolutions
//! come from the external command surface and take effect at the next
//! cycle through their effect on backlog state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ForemanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Resolved,
}

/// One labeled choice with its tradeoff, for the human resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub label: String,
    pub tradeoff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionQueueEntry {
    pub id: String,
    /// Work item this decision concerns, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Original task, what was tried, and why it failed: enough to
    /// resolve without re-deriving state from logs.
    pub context: String,
    pub options: Vec<DecisionOption>,
    pub recommendation: String,
    pub status: DecisionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

pub struct DecisionQueue {
    path: PathBuf,
}

impl DecisionQueue {
    pub fn open(data_dir: &Path) -> Result<Self, ForemanError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join("decisions.jsonl"),
        })
    }

    /// Appends a Pending entry. Requires at least two options so the
    /// resolver always has a real choice.
    pub fn push(
        &self,
        item_id: Option<String>,
        context: String,
        options: Vec<DecisionOption>,
        recommendation: String,
    ) -> Result<DecisionQueueEntry, ForemanError> {
        if options.len() < 2 {
            return Err(ForemanError::Config(
                "decision entry requires at least two options".into(),
            ));
        }
        let entry = DecisionQueueEntry {
            id: Uuid::new_v4().to_string(),
            item_id,
            context,
            options,
            recommendation,
            status: DecisionStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        };
        self.append(&entry)?;
        info!(decision = %entry.id, item = ?entry.item_id, "escalation queued");
        Ok(entry)
    }

    /// Latest state of every entry, in first-seen order.
    pub fn entries(&self) -> Result<Vec<DecisionQueueEntry>, ForemanError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let mut order: Vec<String> = Vec::new();
        let mut latest: std::collections::HashMap<String, DecisionQueueEntry> =
            std::collections::HashMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let entry: DecisionQueueEntry = serde_json::from_str(line)?;
            if !latest.contains_key(&entry.id) {
                order.push(entry.id.clone());
            }
            latest.insert(entry.id.clone(), entry);
        }
        Ok(order.into_iter().filter_map(|id| latest.remove(&id)).collect())
    }

    pub fn pending(&self) -> Result<Vec<DecisionQueueEntry>, ForemanError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.status == DecisionStatus::Pending)
            .collect())
    }

    /// Marks an entry Resolved with the chosen resolution. External actors
    /// only; nothing inside the cycle loop calls this.
    pub fn resolve(&self, id: &str, resolution: &str) -> Result<DecisionQueueEntry, ForemanError> {
        let mut entry = self
            .entries()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ForemanError::DecisionNotFound(id.to_string()))?;
        if entry.status == DecisionStatus::Resolved {
            return Err(ForemanError::DecisionNotFound(format!(
                "{id} is already resolved"
            )));
        }
        entry.status = DecisionStatus::Resolved;
        entry.resolved_at = Some(Utc::now());
        entry.resolution = Some(resolution.to_string());
        self.append(&entry)?;
        info!(decision = %id, %resolution, "escalation resolved");
        Ok(entry)
    }

    fn append(&self, entry: &DecisionQueueEntry) -> Result<(), ForemanError> {
        let line = format!("{}\n", serde_json::to_string(entry)?);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn two_options() -> Vec<DecisionOption> {
        vec![
            DecisionOption {
                label: "retry".into(),
                tradeoff: "may burn budget on a systemic failure".into(),
            },
            DecisionOption {
                label: "wont_fix".into(),
                tradeoff: "drops the item permanently".into(),
            },
        ]
    }

    #[test]
    fn push_and_list_pending() {
        let dir = tempdir().unwrap();
        let queue = DecisionQueue::open(dir.path()).unwrap();
        let entry = queue
            .push(
                Some("X-001".into()),
                "gate failed twice: weak verification".into(),
                two_options(),
                "retry with a stricter brief".into(),
            )
            .unwrap();
        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, entry.id);
        assert_eq!(pending[0].status, DecisionStatus::Pending);
    }

    #[test]
    fn push_rejects_fewer_than_two_options() {
        let dir = tempdir().unwrap();
        let queue = DecisionQueue::open(dir.path()).unwrap();
        let err = queue.push(None, "ctx".into(), vec![], "rec".into());
        assert!(matches!(err, Err(ForemanError::Config(_))));
    }

    #[test]
    fn resolve_removes_from_pending_but_keeps_history() {
        let dir = tempdir().unwrap();
        let queue = DecisionQueue::open(dir.path()).unwrap();
        let entry = queue
            .push(Some("X-001".into()), "ctx".into(), two_options(), "retry".into())
            .unwrap();
        queue.resolve(&entry.id, "retry").unwrap();

        assert!(queue.pending().unwrap().is_empty());
        let all = queue.entries().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, DecisionStatus::Resolved);
        assert_eq!(all[0].resolution.as_deref(), Some("retry"));
    }

    #[test]
    fn resolve_unknown_or_resolved_errors() {
        let dir = tempdir().unwrap();
        let queue = DecisionQueue::open(dir.path()).unwrap();
        assert!(matches!(
            queue.resolve("nope", "retry"),
            Err(ForemanError::DecisionNotFound(_))
        ));
        let entry = queue
            .push(None, "ctx".into(), two_options(), "retry".into())
            .unwrap();
        queue.resolve(&entry.id, "retry").unwrap();
        assert!(matches!(
            queue.resolve(&entry.id, "again"),
            Err(ForemanError::DecisionNotFound(_))
        ));
    }

    #[test]
    fn file_is_append_only_jsonl() {
        let dir = tempdir().unwrap();
        let queue = DecisionQueue::open(dir.path()).unwrap();
        let entry = queue
            .push(None, "ctx".into(), two_options(), "retry".into())
            .unwrap();
        queue.resolve(&entry.id, "retry").unwrap();
        let content = fs::read_to_string(dir.path().join("decisions.jsonl")).unwrap();
        // One record per event: the push and the resolution.
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn queue_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let queue = DecisionQueue::open(dir.path()).unwrap();
            queue
                .push(None, "ctx".into(), two_options(), "retry".into())
                .unwrap()
                .id
        };
        let queue = DecisionQueue::open(dir.path()).unwrap();
        assert_eq!(queue.pending().unwrap()[0].id, id);
    }
}
