use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a work item.
///
/// Items flow DISCOVERED → READY → IN_PROGRESS → {COMPLETE | WONT_FIX},
/// COMPLETE → DEPLOYED. The only backward edge is the explicit failure
/// reset back to READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Discovered,
    Ready,
    InProgress,
    Complete,
    Deployed,
    WontFix,
}

impl ItemStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// The failure reset (WONT_FIX → READY, IN_PROGRESS → READY) is not
    /// part of this set; it goes through [`BacklogStore::reset`] only.
    ///
    /// [`BacklogStore::reset`]: crate::backlog::BacklogStore::reset
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Discovered, ItemStatus::Ready)
                | (ItemStatus::Ready, ItemStatus::InProgress)
                | (ItemStatus::InProgress, ItemStatus::Complete)
                | (ItemStatus::InProgress, ItemStatus::WontFix)
                | (ItemStatus::Complete, ItemStatus::Deployed)
        )
    }

    /// Terminal statuses release any held claim.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Complete | ItemStatus::Deployed | ItemStatus::WontFix
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Discovered => write!(f, "DISCOVERED"),
            ItemStatus::Ready => write!(f, "READY"),
            ItemStatus::InProgress => write!(f, "IN_PROGRESS"),
            ItemStatus::Complete => write!(f, "COMPLETE"),
            ItemStatus::Deployed => write!(f, "DEPLOYED"),
            ItemStatus::WontFix => write!(f, "WONT_FIX"),
        }
    }
}

/// Work item priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::P0 => write!(f, "P0"),
            Priority::P1 => write!(f, "P1"),
            Priority::P2 => write!(f, "P2"),
            Priority::P3 => write!(f, "P3"),
        }
    }
}
