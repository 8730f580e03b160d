//! Hierarchical task walker.
//!
//! Drives a worker through a [`Task`]: subtasks strictly in order, then the
//! clicker phase if there is one, then the final submission. Within the
//! unlocked subtask any unreviewed link may be opened, but only one link
//! in the whole task can be under review at a time.
//!
//! A link's timer is a minimum dwell time, not a hard cap. Running out
//! only flags the link for a reload.
//!
//! Every submission is all-or-nothing: if any check fails the task is left
//! exactly as it was.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WalkerConfig;
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::evidence::{Evidence, EvidenceBoard, EvidenceRef};
use crate::model::{LinkId, LinkReview, LinkStatus, Quality, Rating, Subtask, SubtaskId, Task};
use crate::timer::{Tick, Timer};

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Where a worker is sent to open a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRoute {
    pub masked_url: String,
    pub proxy_ref: String,
}

/// Produces a fresh route for a link. Called on first open and on reload.
pub trait RouteGenerator: Send {
    fn route(&mut self, link: &LinkReview) -> LinkRoute;
}

/// Round-robin over a proxy pool with an unguessable masked URL per open.
pub struct ProxyRotation {
    base_url: String,
    pool: Vec<String>,
    next: usize,
}

impl ProxyRotation {
    pub fn new(base_url: impl Into<String>, pool: Vec<String>) -> Self {
        Self {
            base_url: base_url.into(),
            pool,
            next: 0,
        }
    }

    pub fn from_config(config: &WalkerConfig) -> Self {
        Self::new(config.mask_base_url.clone(), config.proxy_pool.clone())
    }
}

impl RouteGenerator for ProxyRotation {
    fn route(&mut self, _link: &LinkReview) -> LinkRoute {
        let proxy_ref = if self.pool.is_empty() {
            "direct".to_string()
        } else {
            let proxy = self.pool[self.next % self.pool.len()].clone();
            self.next = self.next.wrapping_add(1);
            proxy
        };
        LinkRoute {
            masked_url: format!("{}/{}", self.base_url.trim_end_matches('/'), Uuid::new_v4()),
            proxy_ref,
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The part of the task currently open to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WalkerPhase {
    Subtask { index: usize, id: SubtaskId },
    Clicker { id: SubtaskId },
    FinalSubmission,
    Done,
}

impl WalkerPhase {
    pub fn name(&self) -> &'static str {
        match self {
            WalkerPhase::Subtask { .. } => "subtask",
            WalkerPhase::Clicker { .. } => "clicker",
            WalkerPhase::FinalSubmission => "final_submission",
            WalkerPhase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Subtask(usize),
    Clicker,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task: Task,
    pub phase: WalkerPhase,
    pub active_link: Option<LinkId>,
    pub review_remaining_seconds: Option<u32>,
    /// Submission metadata keyed by unit id.
    pub evidence: EvidenceBoard,
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

pub struct TaskWalker {
    task: Task,
    timer: Timer,
    /// The single link under review, if any.
    active: Option<(SubtaskId, LinkId)>,
    routes: Box<dyn RouteGenerator>,
    evidence: EvidenceBoard,
    default_review_seconds: u32,
    outbox: Vec<EventKind>,
}

impl TaskWalker {
    /// Take over a task, possibly one resumed from persisted progress.
    ///
    /// A link persisted as in review restarts its timer from the top.
    pub fn new(task: Task, config: &WalkerConfig, routes: Box<dyn RouteGenerator>) -> Result<Self> {
        let in_review: Vec<(SubtaskId, LinkId, u32)> = task
            .subtasks
            .iter()
            .chain(task.clicker_phase.iter())
            .flat_map(|s| s.links.iter())
            .filter(|l| l.status == LinkStatus::InProgress)
            .map(|l| (l.subtask_id.clone(), l.id.clone(), l.required_seconds))
            .collect();
        if in_review.len() > 1 {
            return Err(Error::InvalidInput(format!(
                "task {} has {} links under review at once",
                task.id,
                in_review.len()
            )));
        }

        let mut walker = Self {
            task,
            timer: Timer::new(),
            active: None,
            routes,
            evidence: EvidenceBoard::new(),
            default_review_seconds: config.default_review_seconds,
            outbox: Vec::new(),
        };
        if let Some((subtask, link, required)) = in_review.into_iter().next() {
            let seconds = walker.review_seconds(required);
            walker.timer.restart(seconds);
            walker.active = Some((subtask, link));
        }
        Ok(walker)
    }

    /// Open a link for review.
    pub fn start_link_review(&mut self, subtask_id: &SubtaskId, link_id: &LinkId) -> Result<()> {
        let slot = self.locate(subtask_id)?;
        self.ensure_reachable(slot)?;
        let link = self.link(slot, link_id)?.clone();
        if let Some((_, active)) = &self.active {
            return Err(Error::ReviewAlreadyInProgress {
                active: active.clone(),
            });
        }
        if link.status == LinkStatus::Completed {
            return Err(Error::AlreadyCompleted(format!("link {link_id}")));
        }

        let needs_route = link.masked_url.is_none();
        let seconds = self.review_seconds(link.required_seconds);
        let route = needs_route.then(|| self.routes.route(&link));

        let link = self.link_mut(slot, link_id)?;
        if let Some(route) = route {
            link.masked_url = Some(route.masked_url);
            link.proxy_ref = Some(route.proxy_ref);
        }
        link.status = LinkStatus::InProgress;
        link.reload_required = false;
        self.timer.restart(seconds);
        self.active = Some((subtask_id.clone(), link_id.clone()));

        debug!(subtask = %subtask_id, link = %link_id, seconds, "link review started");
        self.outbox.push(EventKind::LinkReviewStarted {
            subtask: subtask_id.clone(),
            link: link_id.clone(),
        });
        Ok(())
    }

    /// Rate the link under review and close it.
    pub fn complete_link_review(
        &mut self,
        subtask_id: &SubtaskId,
        link_id: &LinkId,
        quality: Quality,
    ) -> Result<()> {
        let slot = self.locate(subtask_id)?;
        if self.link(slot, link_id)?.status != LinkStatus::InProgress {
            return Err(Error::NotInProgress(link_id.clone()));
        }
        if quality == Quality::Unset {
            return Err(Error::InvalidInput("link quality must be good or bad".into()));
        }

        let link = self.link_mut(slot, link_id)?;
        link.quality = quality;
        link.status = LinkStatus::Completed;
        link.reload_required = false;
        self.timer.stop();
        self.active = None;

        debug!(subtask = %subtask_id, link = %link_id, ?quality, "link review completed");
        self.outbox.push(EventKind::LinkReviewCompleted {
            subtask: subtask_id.clone(),
            link: link_id.clone(),
            quality,
        });
        Ok(())
    }

    /// Hand out a fresh route and, if the link is under review, restart
    /// its timer.
    pub fn reload_link(&mut self, subtask_id: &SubtaskId, link_id: &LinkId) -> Result<LinkRoute> {
        let slot = self.locate(subtask_id)?;
        self.ensure_reachable(slot)?;
        let link = self.link(slot, link_id)?.clone();
        if link.status == LinkStatus::Completed {
            return Err(Error::AlreadyCompleted(format!("link {link_id}")));
        }

        let seconds = self.review_seconds(link.required_seconds);
        let route = self.routes.route(&link);
        let link = self.link_mut(slot, link_id)?;
        link.masked_url = Some(route.masked_url.clone());
        link.proxy_ref = Some(route.proxy_ref.clone());
        link.reloads += 1;
        link.reload_required = false;
        let in_review = link.status == LinkStatus::InProgress;
        if in_review {
            self.timer.restart(seconds);
        }

        info!(subtask = %subtask_id, link = %link_id, proxy = %route.proxy_ref, in_review, "link reloaded");
        self.outbox.push(EventKind::LinkReloaded {
            subtask: subtask_id.clone(),
            link: link_id.clone(),
            proxy_ref: route.proxy_ref.clone(),
        });
        Ok(route)
    }

    /// Submit a subtask (or the clicker phase) with its evidence. The
    /// optional rating is the worker's own score for the unit.
    pub fn complete_subtask(
        &mut self,
        subtask_id: &SubtaskId,
        notes: &str,
        evidence_ref: Option<EvidenceRef>,
        rating: Option<Rating>,
    ) -> Result<()> {
        let slot = self.locate(subtask_id)?;
        self.submit(slot, notes, evidence_ref, rating)
    }

    pub fn complete_clicker_phase(
        &mut self,
        notes: &str,
        evidence_ref: Option<EvidenceRef>,
        rating: Option<Rating>,
    ) -> Result<()> {
        if self.task.clicker_phase.is_none() {
            return Err(Error::NotFound(format!("task {} has no clicker phase", self.task.id)));
        }
        self.submit(Slot::Clicker, notes, evidence_ref, rating)
    }

    /// Close the task. Terminal.
    pub fn complete_final_submission(&mut self, notes: &str) -> Result<()> {
        match self.current_phase() {
            WalkerPhase::Done => {
                return Err(Error::AlreadyCompleted(format!("task {}", self.task.id)));
            }
            WalkerPhase::FinalSubmission => {}
            WalkerPhase::Subtask { id, .. } | WalkerPhase::Clicker { id } => {
                return Err(Error::OutOfOrder(format!(
                    "final submission is locked until {id} is submitted"
                )));
            }
        }
        if notes.trim().is_empty() {
            return Err(Error::MissingEvidence("notes are required"));
        }

        self.timer.stop();
        self.active = None;
        let fin = &mut self.task.final_submission;
        fin.completed = true;
        fin.notes = notes.to_string();
        fin.completed_at = Some(Utc::now());

        info!(task = %self.task.id, "task completed");
        self.outbox.push(EventKind::TaskCompleted {
            task: self.task.id.clone(),
        });
        Ok(())
    }

    /// Advance the review timer one second.
    pub fn tick(&mut self) {
        if self.timer.tick() != Tick::Expired {
            return;
        }
        let Some((subtask_id, link_id)) = self.active.clone() else {
            return;
        };
        let Ok(slot) = self.locate(&subtask_id) else {
            return;
        };
        if let Ok(link) = self.link_mut(slot, &link_id) {
            link.reload_required = true;
        }
        warn!(subtask = %subtask_id, link = %link_id, "link review timer ran out, reload required");
        self.outbox.push(EventKind::LinkReviewExpired {
            subtask: subtask_id,
            link: link_id,
        });
    }

    /// Tear down: stop the timer and put an unfinished review back.
    pub fn abandon(&mut self) {
        self.timer.stop();
        if let Some((subtask_id, link_id)) = self.active.take() {
            if let Ok(slot) = self.locate(&subtask_id) {
                if let Ok(link) = self.link_mut(slot, &link_id) {
                    link.status = LinkStatus::Pending;
                }
            }
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn evidence(&self) -> &EvidenceBoard {
        &self.evidence
    }

    pub fn active_link(&self) -> Option<&LinkId> {
        self.active.as_ref().map(|(_, l)| l)
    }

    pub fn is_reviewing(&self) -> bool {
        self.active.is_some()
    }

    pub fn review_remaining(&self) -> Option<u32> {
        self.active.as_ref().map(|_| self.timer.remaining())
    }

    pub fn is_done(&self) -> bool {
        self.task.is_completed()
    }

    pub fn current_phase(&self) -> WalkerPhase {
        if let Some((index, s)) = self
            .task
            .subtasks
            .iter()
            .enumerate()
            .find(|(_, s)| !s.submission.completed)
        {
            return WalkerPhase::Subtask {
                index,
                id: s.id.clone(),
            };
        }
        if let Some(ref clicker) = self.task.clicker_phase {
            if !clicker.submission.completed {
                return WalkerPhase::Clicker {
                    id: clicker.id.clone(),
                };
            }
        }
        if self.task.final_submission.completed {
            WalkerPhase::Done
        } else {
            WalkerPhase::FinalSubmission
        }
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            task: self.task.clone(),
            phase: self.current_phase(),
            active_link: self.active_link().cloned(),
            review_remaining_seconds: self.review_remaining(),
            evidence: self.evidence.clone(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<EventKind> {
        std::mem::take(&mut self.outbox)
    }

    // -- internals ----------------------------------------------------------

    fn review_seconds(&self, required: u32) -> u32 {
        if required == 0 {
            self.default_review_seconds
        } else {
            required
        }
    }

    fn locate(&self, subtask_id: &SubtaskId) -> Result<Slot> {
        if let Some(index) = self.task.subtasks.iter().position(|s| &s.id == subtask_id) {
            return Ok(Slot::Subtask(index));
        }
        match self.task.clicker_phase {
            Some(ref c) if &c.id == subtask_id => Ok(Slot::Clicker),
            _ => Err(Error::NotFound(format!("subtask {subtask_id}"))),
        }
    }

    fn subtask(&self, slot: Slot) -> Result<&Subtask> {
        match slot {
            Slot::Subtask(i) => Ok(&self.task.subtasks[i]),
            Slot::Clicker => self
                .task
                .clicker_phase
                .as_ref()
                .ok_or_else(|| Error::NotFound("clicker phase".into())),
        }
    }

    fn subtask_mut(&mut self, slot: Slot) -> Result<&mut Subtask> {
        match slot {
            Slot::Subtask(i) => Ok(&mut self.task.subtasks[i]),
            Slot::Clicker => self
                .task
                .clicker_phase
                .as_mut()
                .ok_or_else(|| Error::NotFound("clicker phase".into())),
        }
    }

    fn link(&self, slot: Slot, link_id: &LinkId) -> Result<&LinkReview> {
        self.subtask(slot)?
            .links
            .iter()
            .find(|l| &l.id == link_id)
            .ok_or_else(|| Error::NotFound(format!("link {link_id}")))
    }

    fn link_mut(&mut self, slot: Slot, link_id: &LinkId) -> Result<&mut LinkReview> {
        self.subtask_mut(slot)?
            .links
            .iter_mut()
            .find(|l| &l.id == link_id)
            .ok_or_else(|| Error::NotFound(format!("link {link_id}")))
    }

    fn ensure_reachable(&self, slot: Slot) -> Result<()> {
        let target = self.subtask(slot)?;
        if target.submission.completed {
            return Err(Error::AlreadyCompleted(format!("subtask {}", target.id)));
        }
        let open = match self.current_phase() {
            WalkerPhase::Subtask { index, .. } => slot == Slot::Subtask(index),
            WalkerPhase::Clicker { .. } => slot == Slot::Clicker,
            WalkerPhase::FinalSubmission | WalkerPhase::Done => false,
        };
        if open {
            Ok(())
        } else {
            let blocker = match self.current_phase() {
                WalkerPhase::Subtask { id, .. } | WalkerPhase::Clicker { id } => id.to_string(),
                WalkerPhase::FinalSubmission | WalkerPhase::Done => "the task".to_string(),
            };
            Err(Error::OutOfOrder(format!(
                "{} is locked until {blocker} is submitted",
                target.id
            )))
        }
    }

    fn submit(
        &mut self,
        slot: Slot,
        notes: &str,
        evidence_ref: Option<EvidenceRef>,
        rating: Option<Rating>,
    ) -> Result<()> {
        self.ensure_reachable(slot)?;
        let target = self.subtask(slot)?;
        let remaining = target.links_remaining();
        if remaining > 0 {
            return Err(Error::LinksIncomplete {
                subtask: target.id.clone(),
                remaining,
            });
        }
        let mut evidence = Evidence::new(notes, evidence_ref.clone());
        evidence.check_complete()?;
        if let Some(rating) = rating {
            evidence = evidence.with_rating(rating);
        }

        let subtask = self.subtask_mut(slot)?;
        let id = subtask.id.clone();
        subtask.submission.completed = true;
        subtask.submission.notes = notes.to_string();
        subtask.submission.evidence_ref = evidence_ref;
        subtask.submission.completed_at = Some(evidence.attached_at);
        self.evidence.attach(id.0.clone(), evidence);

        info!(task = %self.task.id, subtask = %id, "subtask submitted");
        self.outbox.push(match slot {
            Slot::Subtask(_) => EventKind::SubtaskCompleted { subtask: id },
            Slot::Clicker => EventKind::ClickerPhaseCompleted { subtask: id },
        });
        Ok(())
    }
}
