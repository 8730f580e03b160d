//! QC review queue.
//!
//! A reviewer works through a queue of [`ReviewItem`]s inside a bounded
//! [`WorkSession`]. Each item gets its own time box; when it runs out the
//! item locks and the reviewer has to explicitly move on. A verdict
//! advances to the next pending item after a configurable settle delay.
//!
//! The queue owns no clock. Its host calls [`ReviewQueue::tick`] once per
//! second, which advances the session clock and the item timer together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::event::{EventKind, StopReason};
use crate::model::{ItemId, ItemStatus, ReviewItem, Verdict};
use crate::timer::{Tick, Timer, TimerState};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum QueuePhase {
    NoSession,
    /// Session running with no pending items left.
    Idle,
    ItemActive { id: ItemId },
    ItemLocked { id: ItemId },
    /// Verdict recorded; the next item is selected when the delay runs out.
    Settling { decided: ItemId, remaining: u32 },
}

impl QueuePhase {
    pub fn has_session(self) -> bool {
        self != QueuePhase::NoSession
    }

    pub fn name(self) -> &'static str {
        match self {
            QueuePhase::NoSession => "no_session",
            QueuePhase::Idle => "idle",
            QueuePhase::ItemActive { .. } => "item_active",
            QueuePhase::ItemLocked { .. } => "item_locked",
            QueuePhase::Settling { .. } => "settling",
        }
    }
}

// ---------------------------------------------------------------------------
// Work session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Inactive,
    Active,
    Paused,
}

/// The reviewer's whole shift, counted down from its cap.
#[derive(Debug, Clone)]
pub struct WorkSession {
    started_at: Option<DateTime<Utc>>,
    clock: Timer,
}

impl WorkSession {
    fn new() -> Self {
        Self {
            started_at: None,
            clock: Timer::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.clock.state() {
            TimerState::Running => SessionState::Active,
            TimerState::Paused => SessionState::Paused,
            TimerState::Idle | TimerState::Expired => SessionState::Inactive,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.clock.elapsed()
    }

    pub fn cap_seconds(&self) -> u32 {
        self.clock.duration()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            started_at: self.started_at,
            elapsed_seconds: self.elapsed_seconds(),
            cap_seconds: self.cap_seconds(),
            state: self.state(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u32,
    pub cap_seconds: u32,
    pub state: SessionState,
}

/// Point-in-time view of a queue, for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub phase: QueuePhase,
    pub session: SessionView,
    pub item_remaining_seconds: Option<u32>,
    pub items: Vec<ReviewItem>,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct ReviewQueue {
    items: Vec<ReviewItem>,
    session: WorkSession,
    item_timer: Timer,
    phase: QueuePhase,
    config: QueueConfig,
    outbox: Vec<EventKind>,
}

impl ReviewQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            items: Vec::new(),
            session: WorkSession::new(),
            item_timer: Timer::new(),
            phase: QueuePhase::NoSession,
            config,
            outbox: Vec::new(),
        }
    }

    pub fn with_items(config: QueueConfig, items: impl IntoIterator<Item = ReviewItem>) -> Result<Self> {
        let mut queue = Self::new(config);
        for item in items {
            queue.enqueue(item)?;
        }
        Ok(queue)
    }

    /// Append an item in pending state. An idle session picks it up at once.
    pub fn enqueue(&mut self, mut item: ReviewItem) -> Result<()> {
        if self.items.iter().any(|i| i.id == item.id) {
            return Err(Error::InvalidInput(format!("duplicate review item {}", item.id)));
        }
        item.status = ItemStatus::Pending;
        item.verdict = None;
        item.decided_at = None;
        self.items.push(item);

        if self.phase == QueuePhase::Idle {
            self.advance();
        }
        Ok(())
    }

    /// Begin a shift and select the first pending item.
    pub fn start_session(&mut self, now: DateTime<Utc>) -> Result<Option<ItemId>> {
        if self.phase.has_session() {
            return Err(Error::AlreadyRunning);
        }
        self.session.clock.restart(self.config.session_cap_seconds);
        self.session.started_at = Some(now);
        self.outbox.push(EventKind::SessionStarted);
        info!(cap_seconds = self.config.session_cap_seconds, "review session started");

        self.advance();
        Ok(self.current_item_id())
    }

    /// Freeze the shift clock and the item clock together.
    pub fn pause_session(&mut self) -> bool {
        if self.session.state() != SessionState::Active {
            return false;
        }
        self.session.clock.pause();
        self.item_timer.pause();
        self.outbox.push(EventKind::SessionPaused);
        true
    }

    pub fn resume_session(&mut self) -> bool {
        if self.session.state() != SessionState::Paused {
            return false;
        }
        self.session.clock.resume();
        self.item_timer.resume();
        self.outbox.push(EventKind::SessionResumed);
        true
    }

    /// End the shift. Verdicts stay; an undecided item goes back to pending.
    pub fn stop_session(&mut self) {
        self.end_session(StopReason::Requested);
    }

    /// Record a verdict on the current item.
    pub fn decide(&mut self, item_id: ItemId, verdict: Verdict, now: DateTime<Utc>) -> Result<()> {
        match self.phase {
            QueuePhase::ItemLocked { id } if id == item_id => return Err(Error::ItemLocked(id)),
            QueuePhase::ItemActive { id } if id == item_id => {}
            _ => return Err(Error::NotCurrentItem(item_id)),
        }
        if self.session.state() == SessionState::Paused {
            return Err(Error::SessionPaused);
        }

        self.item_timer.stop();
        let item = self.item_mut(item_id)?;
        item.status = verdict.resulting_status();
        item.verdict = Some(verdict);
        item.decided_at = Some(now);
        info!(item = %item_id, %verdict, "review item decided");
        self.outbox.push(EventKind::ItemDecided { id: item_id, verdict });

        if self.config.settle_delay_seconds == 0 {
            self.advance();
        } else {
            self.phase = QueuePhase::Settling {
                decided: item_id,
                remaining: self.config.settle_delay_seconds,
            };
        }
        Ok(())
    }

    /// Leave a locked item behind and select the next pending one.
    pub fn unlock_and_advance(&mut self) -> Result<Option<ItemId>> {
        let QueuePhase::ItemLocked { id } = self.phase else {
            return Err(Error::NotLocked);
        };
        if self.session.state() == SessionState::Paused {
            return Err(Error::SessionPaused);
        }
        debug!(item = %id, "unlocking and advancing");
        self.advance();
        Ok(self.current_item_id())
    }

    /// Advance one second. No-op unless the session is active.
    pub fn tick(&mut self) {
        if self.session.state() != SessionState::Active {
            return;
        }

        match self.phase {
            QueuePhase::ItemActive { id } => {
                if self.item_timer.tick() == Tick::Expired {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
                        item.status = ItemStatus::Locked;
                    }
                    self.phase = QueuePhase::ItemLocked { id };
                    info!(item = %id, "review item time box expired");
                    self.outbox.push(EventKind::ItemLocked { id });
                }
            }
            QueuePhase::Settling { decided, remaining } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.advance();
                } else {
                    self.phase = QueuePhase::Settling { decided, remaining };
                }
            }
            QueuePhase::NoSession | QueuePhase::Idle | QueuePhase::ItemLocked { .. } => {}
        }

        if self.session.clock.tick() == Tick::Expired {
            info!("review session reached its cap");
            self.end_session(StopReason::CapReached);
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn phase(&self) -> QueuePhase {
        self.phase
    }

    pub fn session(&self) -> &WorkSession {
        &self.session
    }

    pub fn items(&self) -> &[ReviewItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&ReviewItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// The item currently in its time box.
    pub fn current_item_id(&self) -> Option<ItemId> {
        match self.phase {
            QueuePhase::ItemActive { id } => Some(id),
            _ => None,
        }
    }

    pub fn item_remaining(&self) -> Option<u32> {
        match self.phase {
            QueuePhase::ItemActive { .. } => Some(self.item_timer.remaining()),
            _ => None,
        }
    }

    pub fn drain_events(&mut self) -> Vec<EventKind> {
        std::mem::take(&mut self.outbox)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            phase: self.phase,
            session: self.session.view(),
            item_remaining_seconds: self.item_remaining(),
            items: self.items.clone(),
        }
    }

    // -- internals ----------------------------------------------------------

    fn item_mut(&mut self, id: ItemId) -> Result<&mut ReviewItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::NotFound(format!("review item {id}")))
    }

    /// Select the first pending item in queue order, or go idle.
    fn advance(&mut self) {
        let next = self
            .items
            .iter_mut()
            .find(|i| i.status == ItemStatus::Pending);

        match next {
            Some(item) => {
                item.status = ItemStatus::Active;
                let id = item.id;
                self.item_timer.restart(self.config.item_cap_seconds);
                if self.session.state() == SessionState::Paused {
                    self.item_timer.pause();
                }
                self.phase = QueuePhase::ItemActive { id };
                debug!(item = %id, cap_seconds = self.config.item_cap_seconds, "review item activated");
                self.outbox.push(EventKind::ItemActivated { id });
            }
            None => {
                self.item_timer.stop();
                self.phase = QueuePhase::Idle;
                debug!("review queue idle");
                self.outbox.push(EventKind::QueueIdle);
            }
        }
    }

    fn end_session(&mut self, reason: StopReason) {
        if !self.phase.has_session() {
            return;
        }
        if let QueuePhase::ItemActive { id } = self.phase {
            if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
                item.status = ItemStatus::Pending;
            }
        }
        self.item_timer.stop();
        self.session.clock.stop();
        self.phase = QueuePhase::NoSession;
        info!(?reason, "review session stopped");
        self.outbox.push(EventKind::SessionStopped { reason });
    }
}
