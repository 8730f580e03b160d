//! Structured events emitted on every engine state transition.
//!
//! The queue and walker buffer [`EventKind`]s as they transition; the host
//! drains them, stamps them into [`Event`]s and fans them out to
//! subscribers and the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::GateStatus;
use crate::model::{ItemId, LinkId, Quality, SubtaskId, TaskId, UserId, Verdict};

/// A stamped engine event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per host. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// User whose session produced the event.
    pub user_id: UserId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionPaused,
    SessionResumed,
    SessionStopped {
        reason: StopReason,
    },
    ItemActivated {
        id: ItemId,
    },
    ItemLocked {
        id: ItemId,
    },
    ItemDecided {
        id: ItemId,
        verdict: Verdict,
    },
    QueueIdle,
    LinkReviewStarted {
        subtask: SubtaskId,
        link: LinkId,
    },
    LinkReviewExpired {
        subtask: SubtaskId,
        link: LinkId,
    },
    LinkReviewCompleted {
        subtask: SubtaskId,
        link: LinkId,
        quality: Quality,
    },
    LinkReloaded {
        subtask: SubtaskId,
        link: LinkId,
        proxy_ref: String,
    },
    SubtaskCompleted {
        subtask: SubtaskId,
    },
    ClickerPhaseCompleted {
        subtask: SubtaskId,
    },
    TaskCompleted {
        task: TaskId,
    },
    GateChanged {
        date: chrono::NaiveDate,
        status: GateStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reviewer ended the session.
    Requested,
    /// The session ran into its cap.
    CapReached,
}

impl EventKind {
    /// Short name used as a log field and metric label.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::SessionPaused => "session_paused",
            EventKind::SessionResumed => "session_resumed",
            EventKind::SessionStopped { .. } => "session_stopped",
            EventKind::ItemActivated { .. } => "item_activated",
            EventKind::ItemLocked { .. } => "item_locked",
            EventKind::ItemDecided { .. } => "item_decided",
            EventKind::QueueIdle => "queue_idle",
            EventKind::LinkReviewStarted { .. } => "link_review_started",
            EventKind::LinkReviewExpired { .. } => "link_review_expired",
            EventKind::LinkReviewCompleted { .. } => "link_review_completed",
            EventKind::LinkReloaded { .. } => "link_reloaded",
            EventKind::SubtaskCompleted { .. } => "subtask_completed",
            EventKind::ClickerPhaseCompleted { .. } => "clicker_phase_completed",
            EventKind::TaskCompleted { .. } => "task_completed",
            EventKind::GateChanged { .. } => "gate_changed",
        }
    }
}
