//! Core data model.
//!
//! Identifiers, the people the engine acts for, and the work units it
//! sequences. Review items belong to the QC queue, tasks to the worker
//! walker, and the ledger records to the daily manager gate.

pub mod ledger;
pub mod review;
pub mod task;

use serde::{Deserialize, Serialize};

pub use ledger::{AttendanceRecord, AttendanceStatus, MarkedBy, PerformanceRecord, Rating, VerifiedSet};
pub use review::{ItemStatus, ReviewItem, Verdict};
pub use task::{FinalSubmission, LinkReview, LinkStatus, Quality, Submission, Subtask, Task};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A person known to the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// A review item in a QC queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

macro_rules! string_id {
    ($($(#[$meta:meta])* $name:ident),*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }
        )*
    };
}

string_id!(
    /// A worker-facing task.
    TaskId,
    /// A subtask (or the clicker phase) within a task.
    SubtaskId,
    /// A single link review within a subtask.
    LinkId
);

display_inner!(UserId, ItemId, TaskId, SubtaskId, LinkId);

// ---------------------------------------------------------------------------
// People
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    Manager,
    QcReviewer,
    Hr,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Worker => "worker",
            Role::Manager => "manager",
            Role::QcReviewer => "qc_reviewer",
            Role::Hr => "hr",
        };
        write!(f, "{s}")
    }
}

/// The user an engine instance acts for, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub role: Role,
    /// Direct reports. Only meaningful for managers.
    #[serde(default)]
    pub assigned_team_ids: Vec<UserId>,
}
