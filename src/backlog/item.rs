use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::status::{ItemStatus, Priority};

/// A time-limited exclusive lock on a work item held by one executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub executor_id: String,
    pub claimed_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl Claim {
    pub fn new(executor_id: String, ttl_secs: u64) -> Self {
        Self {
            executor_id,
            claimed_at: Utc::now(),
            ttl_secs,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claimed_at + Duration::seconds(self.ttl_secs as i64)
    }

    /// An expired claim is treated as released; the item can be re-claimed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// A unit of backlog work with a status state machine and priority score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable, category-prefixed identifier (e.g. "PRICING-001").
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub priority: Priority,
    /// Ordinal impact scale, 1 to 5.
    pub impact: u8,
    /// Ordinal effort scale, 1 to 5.
    pub effort: u8,
    /// Ids of items that must reach DEPLOYED before this one is actionable.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
    /// Free-text tag used for memory retrieval.
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Creates a new item in DISCOVERED. Impact and effort clamp to 1..=5.
    pub fn new(
        id: String,
        title: String,
        category: String,
        priority: Priority,
        impact: u8,
        effort: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            status: ItemStatus::Discovered,
            priority,
            impact: impact.clamp(1, 5),
            effort: effort.clamp(1, 5),
            dependencies: Vec::new(),
            claim: None,
            category,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Priority score used for ready-queue ordering: impact over effort.
    pub fn score(&self) -> f64 {
        f64::from(self.impact) / f64::from(self.effort)
    }

    /// Whether another executor holds a live claim at `now`.
    pub fn claimed_by_other(&self, executor_id: &str, now: DateTime<Utc>) -> Option<&Claim> {
        self.claim
            .as_ref()
            .filter(|c| !c.is_expired(now) && c.executor_id != executor_id)
    }
}
