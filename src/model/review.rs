//! QC review items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, UserId};

/// A worker submission awaiting a QC verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: ItemId,
    /// The worker whose output is being reviewed.
    pub subject_worker_id: UserId,
    /// Opaque to the engine.
    pub payload: serde_json::Value,
    pub status: ItemStatus,
    pub verdict: Option<Verdict>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    pub fn new(id: ItemId, subject_worker_id: UserId, payload: serde_json::Value) -> Self {
        Self {
            id,
            subject_worker_id,
            payload,
            status: ItemStatus::Pending,
            verdict: None,
            decided_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Active,
    /// Time box ran out before a verdict. Never reselected.
    Locked,
    Completed,
    Rejected,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Active => "active",
            ItemStatus::Locked => "locked",
            ItemStatus::Completed => "completed",
            ItemStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    Bad,
}

impl Verdict {
    /// Status an item takes on once this verdict is recorded.
    pub fn resulting_status(self) -> ItemStatus {
        match self {
            Verdict::Good => ItemStatus::Completed,
            Verdict::Bad => ItemStatus::Rejected,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Good => write!(f, "good"),
            Verdict::Bad => write!(f, "bad"),
        }
    }
}
