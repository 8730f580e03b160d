//! Worker-facing hierarchical tasks.
//!
//! A task is an ordered list of subtasks, each holding a set of link
//! reviews, optionally followed by a clicker phase (shaped like a subtask)
//! and always closed by a final submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LinkId, SubtaskId, TaskId};
use crate::evidence::EvidenceRef;

// ---------------------------------------------------------------------------
// Link review
// ---------------------------------------------------------------------------

/// One link a worker must open, dwell on, and rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkReview {
    pub id: LinkId,
    pub subtask_id: SubtaskId,
    /// Target URL as supplied by the campaign.
    pub url: String,
    /// URL handed to the worker. Regenerated on every reload.
    pub masked_url: Option<String>,
    /// Proxy the masked URL routes through.
    pub proxy_ref: Option<String>,
    /// Minimum dwell time for the review.
    #[serde(default)]
    pub required_seconds: u32,
    #[serde(default)]
    pub status: LinkStatus,
    #[serde(default)]
    pub quality: Quality,
    /// Set when the review timer ran out; cleared by a reload.
    #[serde(default)]
    pub reload_required: bool,
    #[serde(default)]
    pub reloads: u32,
}

impl LinkReview {
    pub fn new(
        id: impl Into<LinkId>,
        subtask_id: impl Into<SubtaskId>,
        url: impl Into<String>,
        required_seconds: u32,
    ) -> Self {
        Self {
            id: id.into(),
            subtask_id: subtask_id.into(),
            url: url.into(),
            masked_url: None,
            proxy_ref: None,
            required_seconds,
            status: LinkStatus::Pending,
            quality: Quality::Unset,
            reload_required: false,
            reloads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkStatus::Pending => "pending",
            LinkStatus::InProgress => "in_progress",
            LinkStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Unset,
    Good,
    Bad,
}

// ---------------------------------------------------------------------------
// Subtask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    pub completed: bool,
    pub notes: String,
    pub evidence_ref: Option<EvidenceRef>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub links: Vec<LinkReview>,
    #[serde(default)]
    pub submission: Submission,
}

impl Subtask {
    pub fn new(id: impl Into<SubtaskId>) -> Self {
        Self {
            id: id.into(),
            links: Vec::new(),
            submission: Submission::default(),
        }
    }

    /// Append a link. The link inherits this subtask's id.
    pub fn link(mut self, id: impl Into<LinkId>, url: impl Into<String>, required_seconds: u32) -> Self {
        let link = LinkReview::new(id, self.id.clone(), url, required_seconds);
        self.links.push(link);
        self
    }

    pub fn links_remaining(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.status != LinkStatus::Completed)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalSubmission {
    pub completed: bool,
    pub notes: String,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub subtasks: Vec<Subtask>,
    pub clicker_phase: Option<Subtask>,
    #[serde(default)]
    pub final_submission: FinalSubmission,
}

impl Task {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            subtasks: Vec::new(),
            clicker_phase: None,
            final_submission: FinalSubmission::default(),
        }
    }

    pub fn subtask(mut self, subtask: Subtask) -> Self {
        self.subtasks.push(subtask);
        self
    }

    pub fn clicker_phase(mut self, phase: Subtask) -> Self {
        self.clicker_phase = Some(phase);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.final_submission.completed
    }
}
