//! QC reviewer sessions.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tracing::{Span, debug};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::identity::require_role;
use crate::model::{CurrentUser, ItemId, ReviewItem, Role, UserId, Verdict};
use crate::queue::{QueuePhase, QueueSnapshot, ReviewQueue};
use crate::telemetry::unit::{record_state_transition, start_unit_span};
use crate::ticker::{ControlFlow, Ticker};

use super::{Engine, EventSink, TICK_PERIOD};

pub(crate) struct ReviewerSession {
    user: UserId,
    queue: ReviewQueue,
    ticker: Option<Ticker>,
    span: Span,
}

impl ReviewerSession {
    pub(crate) fn new(user: UserId, config: QueueConfig) -> Self {
        Self {
            user,
            queue: ReviewQueue::new(config),
            ticker: None,
            span: start_unit_span("review", user, &format!("queue-{user}")),
        }
    }

    /// Publish what the queue buffered and log any phase change.
    fn flush(&mut self, before: QueuePhase, sink: &EventSink) {
        let after = self.queue.phase();
        if before.name() != after.name() {
            record_state_transition(&self.span, before.name(), after.name());
        }
        sink.emit(self.user, self.queue.drain_events());
    }
}

impl Engine {
    /// Append items to a reviewer's queue. The batch goes in whole or not
    /// at all.
    pub async fn enqueue_review_items(
        &self,
        reviewer: UserId,
        items: Vec<ReviewItem>,
    ) -> Result<QueueSnapshot> {
        let slot = self.reviewer_slot(reviewer);
        let mut session = slot.lock().await;

        for (i, item) in items.iter().enumerate() {
            let duplicate = session.queue.item(item.id).is_some()
                || items[..i].iter().any(|earlier| earlier.id == item.id);
            if duplicate {
                return Err(Error::InvalidInput(format!("duplicate review item {}", item.id)));
            }
        }

        let before = session.queue.phase();
        let count = items.len();
        for item in items {
            session.queue.enqueue(item)?;
        }
        debug!(%reviewer, count, "review items enqueued");
        session.flush(before, self.sink());
        Ok(session.queue.snapshot())
    }

    pub async fn start_review_session(&self, user: &CurrentUser) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        self.with_queue(user.id, |queue| queue.start_session(Utc::now()).map(|_| ()))
            .await
    }

    /// Redundant pauses are no-ops.
    pub async fn pause_review_session(&self, user: &CurrentUser) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        self.with_queue(user.id, |queue| {
            queue.pause_session();
            Ok(())
        })
        .await
    }

    pub async fn resume_review_session(&self, user: &CurrentUser) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        self.with_queue(user.id, |queue| {
            queue.resume_session();
            Ok(())
        })
        .await
    }

    pub async fn stop_review_session(&self, user: &CurrentUser) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        self.with_queue(user.id, |queue| {
            queue.stop_session();
            Ok(())
        })
        .await
    }

    pub async fn decide(
        &self,
        user: &CurrentUser,
        item: ItemId,
        verdict: Verdict,
    ) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        self.with_queue(user.id, |queue| queue.decide(item, verdict, Utc::now()))
            .await
    }

    pub async fn unlock_and_advance(&self, user: &CurrentUser) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        self.with_queue(user.id, |queue| queue.unlock_and_advance().map(|_| ()))
            .await
    }

    pub async fn queue_state(&self, user: &CurrentUser) -> Result<QueueSnapshot> {
        require_role(user, Role::QcReviewer)?;
        match self.existing_reviewer(user.id) {
            Some(slot) => Ok(slot.lock().await.queue.snapshot()),
            None => Ok(ReviewQueue::new(self.config().queue.clone()).snapshot()),
        }
    }

    /// Run one queue operation under the reviewer's lock, then publish its
    /// events and start or drop the session ticker to match.
    async fn with_queue<F>(&self, user: UserId, op: F) -> Result<QueueSnapshot>
    where
        F: FnOnce(&mut ReviewQueue) -> Result<()>,
    {
        let slot = self.reviewer_slot(user);
        let mut session = slot.lock().await;
        let before = session.queue.phase();
        let outcome = op(&mut session.queue);
        session.flush(before, self.sink());

        if session.queue.phase().has_session() {
            // A ticker breaks only after seeing no session, so a session that
            // just started needs a fresh one even if the old task is still
            // winding down.
            let stale = !before.has_session()
                || session.ticker.as_ref().is_none_or(Ticker::is_finished);
            if stale {
                session.ticker = Some(spawn_queue_ticker(
                    Arc::downgrade(&slot),
                    self.sink().clone(),
                ));
            }
        } else {
            session.ticker = None;
        }

        outcome?;
        Ok(session.queue.snapshot())
    }
}

fn spawn_queue_ticker(
    slot: Weak<tokio::sync::Mutex<ReviewerSession>>,
    sink: EventSink,
) -> Ticker {
    Ticker::spawn(TICK_PERIOD, move || {
        let slot = slot.clone();
        let sink = sink.clone();
        async move {
            let Some(slot) = slot.upgrade() else {
                return ControlFlow::Break;
            };
            let mut session = slot.lock().await;
            let before = session.queue.phase();
            session.queue.tick();
            session.flush(before, &sink);
            if session.queue.phase().has_session() {
                ControlFlow::Continue
            } else {
                ControlFlow::Break
            }
        }
    })
}
