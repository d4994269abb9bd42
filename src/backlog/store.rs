//! Durable work-item backlog with claim-serialized mutation.
//!
//! All writers go through a single internal lock, so per-item status
//! transitions are linearizable. Every mutation appends an audit record
//! (`who|when|item|old->new`) to `backlog.audit.log` and rewrites the
//! `backlog.json` snapshot atomically (temp file + rename).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ForemanError;

use super::item::{Claim, WorkItem};
use super::status::ItemStatus;

/// Per-status counts plus the actionable ready count, for external observers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacklogStats {
    pub discovered: usize,
    pub ready: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub deployed: usize,
    pub wont_fix: usize,
    /// Ready items whose dependencies are all deployed.
    pub actionable: usize,
}

pub struct BacklogStore {
    inner: Mutex<Vec<WorkItem>>,
    path: PathBuf,
    audit_path: PathBuf,
}

impl BacklogStore {
    /// Opens the backlog under `data_dir`, loading `backlog.json` if present.
    pub fn open(data_dir: &Path) -> Result<Self, ForemanError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("backlog.json");
        let items = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            inner: Mutex::new(items),
            path,
            audit_path: data_dir.join("backlog.audit.log"),
        })
    }

    /// Adds a new item. Fails with `DuplicateItem` if the id already exists.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), ForemanError> {
        let mut items = self.inner.lock().expect("backlog lock poisoned");
        if items.iter().any(|i| i.id == item.id) {
            return Err(ForemanError::DuplicateItem(item.id));
        }
        info!(item = %item.id, category = %item.category, "enqueued");
        self.audit("intake", &item.id, "-", &format!("{}", item.status))?;
        items.push(item);
        self.persist(&items)
    }

    /// Atomically claims an item for `executor_id`.
    ///
    /// Fails with `ClaimConflict` when another executor holds an unexpired
    /// claim. An expired claim is treated as released and overwritten, so a
    /// crashed executor cannot block an item forever.
    pub fn claim(
        &self,
        id: &str,
        executor_id: &str,
        ttl_secs: u64,
    ) -> Result<Claim, ForemanError> {
        let mut items = self.inner.lock().expect("backlog lock poisoned");
        let item = find_mut(&mut items, id)?;
        let now = Utc::now();
        if let Some(existing) = item.claimed_by_other(executor_id, now) {
            debug!(item = %id, holder = %existing.executor_id, "claim conflict");
            return Err(ForemanError::ClaimConflict {
                item: id.to_string(),
                holder: existing.executor_id.clone(),
                expires: existing.expires_at(),
            });
        }
        let claim = Claim::new(executor_id.to_string(), ttl_secs);
        item.claim = Some(claim.clone());
        item.updated_at = now;
        self.audit(executor_id, id, "unclaimed", "claimed")?;
        self.persist(&items)?;
        Ok(claim)
    }

    /// Releases any claim on the item without changing its status.
    pub fn release(&self, id: &str, actor: &str) -> Result<(), ForemanError> {
        let mut items = self.inner.lock().expect("backlog lock poisoned");
        let item = find_mut(&mut items, id)?;
        if item.claim.take().is_some() {
            item.updated_at = Utc::now();
            self.audit(actor, id, "claimed", "unclaimed")?;
            self.persist(&items)?;
        }
        Ok(())
    }

    /// Moves an item to `new_status`, enforcing the state machine.
    ///
    /// Illegal transitions are rejected with `InvalidTransition`, never
    /// coerced. READY → IN_PROGRESS additionally requires the caller to
    /// hold a live claim on the item. Terminal statuses release the claim.
    pub fn transition(
        &self,
        id: &str,
        new_status: ItemStatus,
        actor: &str,
    ) -> Result<(), ForemanError> {
        let mut items = self.inner.lock().expect("backlog lock poisoned");
        let item = find_mut(&mut items, id)?;
        let old = item.status;
        if !old.can_transition_to(new_status) {
            warn!(item = %id, %old, new = %new_status, "invalid transition rejected");
            return Err(ForemanError::InvalidTransition {
                item: id.to_string(),
                from: old,
                to: new_status,
            });
        }
        if new_status == ItemStatus::InProgress {
            let held = item
                .claim
                .as_ref()
                .is_some_and(|c| !c.is_expired(Utc::now()) && c.executor_id == actor);
            if !held {
                warn!(item = %id, %actor, "IN_PROGRESS rejected: caller holds no live claim");
                return Err(ForemanError::InvalidTransition {
                    item: id.to_string(),
                    from: old,
                    to: new_status,
                });
            }
        }
        item.status = new_status;
        if new_status.is_terminal() {
            item.claim = None;
        }
        item.updated_at = Utc::now();
        info!(item = %id, %old, new = %new_status, "transition");
        self.audit(actor, id, &old.to_string(), &new_status.to_string())?;
        self.persist(&items)
    }

    /// Explicit failure reset: WONT_FIX or IN_PROGRESS back to READY.
    ///
    /// This is the only backward edge in the item lifecycle and is reserved
    /// for external resolution (decision queue) and crashed-executor cleanup.
    pub fn reset(&self, id: &str, actor: &str) -> Result<(), ForemanError> {
        let mut items = self.inner.lock().expect("backlog lock poisoned");
        let item = find_mut(&mut items, id)?;
        let old = item.status;
        if !matches!(old, ItemStatus::WontFix | ItemStatus::InProgress) {
            return Err(ForemanError::InvalidTransition {
                item: id.to_string(),
                from: old,
                to: ItemStatus::Ready,
            });
        }
        item.status = ItemStatus::Ready;
        item.claim = None;
        item.updated_at = Utc::now();
        info!(item = %id, %old, "reset to READY");
        self.audit(actor, id, &old.to_string(), "READY")?;
        self.persist(&items)
    }

    /// Ready items whose dependencies are all DEPLOYED, ordered by score
    /// descending; ties keep insertion order. Optional category filter.
    pub fn list_ready(&self, category: Option<&str>) -> Vec<WorkItem> {
        let items = self.inner.lock().expect("backlog lock poisoned");
        let deployed: Vec<&str> = items
            .iter()
            .filter(|i| i.status == ItemStatus::Deployed)
            .map(|i| i.id.as_str())
            .collect();
        let mut ready: Vec<WorkItem> = items
            .iter()
            .filter(|i| i.status == ItemStatus::Ready)
            .filter(|i| category.is_none_or(|c| i.category == c))
            .filter(|i| {
                i.dependencies
                    .iter()
                    .all(|d| deployed.contains(&d.as_str()))
            })
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal scores.
        ready.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ready
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        let items = self.inner.lock().expect("backlog lock poisoned");
        items.iter().find(|i| i.id == id).cloned()
    }

    pub fn stats(&self) -> BacklogStats {
        let actionable = self.list_ready(None).len();
        let items = self.inner.lock().expect("backlog lock poisoned");
        let mut stats = BacklogStats {
            actionable,
            ..Default::default()
        };
        for item in items.iter() {
            match item.status {
                ItemStatus::Discovered => stats.discovered += 1,
                ItemStatus::Ready => stats.ready += 1,
                ItemStatus::InProgress => stats.in_progress += 1,
                ItemStatus::Complete => stats.complete += 1,
                ItemStatus::Deployed => stats.deployed += 1,
                ItemStatus::WontFix => stats.wont_fix += 1,
            }
        }
        stats
    }

    /// Next category-prefixed id for manual intake (e.g. "PRICING-003").
    pub fn allocate_id(&self, category: &str) -> String {
        let prefix = category
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        let items = self.inner.lock().expect("backlog lock poisoned");
        let next = items
            .iter()
            .filter_map(|i| i.id.strip_prefix(&format!("{prefix}-")))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        format!("{prefix}-{next:03}")
    }

    /// Last `n` audit records, oldest first.
    pub fn audit_tail(&self, n: usize) -> Result<Vec<String>, ForemanError> {
        if !self.audit_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.audit_path)?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }

    fn audit(&self, who: &str, item: &str, old: &str, new: &str) -> Result<(), ForemanError> {
        let line = format!("{}|{}|{}|{}->{}\n", who, Utc::now().to_rfc3339(), item, old, new);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)?
            .write_all(line.as_bytes())?;
        Ok(())
    }

    // Atomic replace-on-write: the snapshot is never half-written on disk.
    fn persist(&self, items: &[WorkItem]) -> Result<(), ForemanError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn find_mut<'a>(items: &'a mut [WorkItem], id: &str) -> Result<&'a mut WorkItem, ForemanError> {
    items
        .iter_mut()
        .find(|i| i.id == id)
        .ok_or_else(|| ForemanError::ItemNotFound(id.to_string()))
}
