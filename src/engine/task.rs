//! Worker task sessions.

use std::sync::{Arc, Weak};

use tracing::{Span, info};

use crate::error::{Error, Result};
use crate::evidence::EvidenceRef;
use crate::identity::require_role;
use crate::model::{CurrentUser, LinkId, Quality, Rating, Role, SubtaskId, Task, UserId};
use crate::telemetry::unit::{record_state_transition, start_unit_span};
use crate::ticker::{ControlFlow, Ticker};
use crate::walker::{LinkRoute, ProxyRotation, TaskView, TaskWalker};

use super::{Engine, EventSink, TICK_PERIOD};

pub(crate) struct WorkerSession {
    user: UserId,
    walker: Option<TaskWalker>,
    ticker: Option<Ticker>,
    span: Span,
}

impl WorkerSession {
    pub(crate) fn new(user: UserId) -> Self {
        Self {
            user,
            walker: None,
            ticker: None,
            span: Span::none(),
        }
    }

    fn walker_mut(&mut self) -> Result<&mut TaskWalker> {
        let user = self.user;
        self.walker
            .as_mut()
            .ok_or_else(|| Error::NotFound(format!("no task assigned to user {user}")))
    }
}

/// The link timer still has time to count down.
fn timer_live(walker: &TaskWalker) -> bool {
    walker.review_remaining().is_some_and(|r| r > 0)
}

impl Engine {
    /// Hand a task to a worker. A task resumed with a link still under
    /// review restarts that link's timer.
    pub async fn assign_task(&self, worker: UserId, task: Task) -> Result<TaskView> {
        let slot = self.worker_slot(worker);
        let mut session = slot.lock().await;
        if let Some(ref current) = session.walker {
            if !current.is_done() {
                return Err(Error::InvalidInput(format!(
                    "user {worker} is still working on task {}",
                    current.task().id
                )));
            }
        }

        let routes = Box::new(ProxyRotation::from_config(&self.config().walker));
        let walker = TaskWalker::new(task, &self.config().walker, routes)?;
        let task_id = walker.task().id.to_string();
        session.span = start_unit_span("task", worker, &task_id);
        record_state_transition(&session.span, "unassigned", walker.current_phase().name());
        info!(%worker, task = %task_id, "task assigned");

        let live = timer_live(&walker);
        let view = walker.view();
        session.walker = Some(walker);
        session.ticker = live.then(|| spawn_walker_ticker(Arc::downgrade(&slot), self.sink().clone()));
        Ok(view)
    }

    pub async fn start_link_review(
        &self,
        user: &CurrentUser,
        subtask: &SubtaskId,
        link: &LinkId,
    ) -> Result<TaskView> {
        require_role(user, Role::Worker)?;
        self.with_walker(user.id, |walker| walker.start_link_review(subtask, link))
            .await
    }

    pub async fn complete_link_review(
        &self,
        user: &CurrentUser,
        subtask: &SubtaskId,
        link: &LinkId,
        quality: Quality,
    ) -> Result<TaskView> {
        require_role(user, Role::Worker)?;
        self.with_walker(user.id, |walker| walker.complete_link_review(subtask, link, quality))
            .await
    }

    pub async fn reload_link(
        &self,
        user: &CurrentUser,
        subtask: &SubtaskId,
        link: &LinkId,
    ) -> Result<LinkRoute> {
        require_role(user, Role::Worker)?;
        let mut route = None;
        self.with_walker(user.id, |walker| {
            route = Some(walker.reload_link(subtask, link)?);
            Ok(())
        })
        .await?;
        route.ok_or_else(|| Error::Other("reload produced no route".into()))
    }

    pub async fn complete_subtask(
        &self,
        user: &CurrentUser,
        subtask: &SubtaskId,
        notes: &str,
        evidence_ref: Option<EvidenceRef>,
        rating: Option<Rating>,
    ) -> Result<TaskView> {
        require_role(user, Role::Worker)?;
        self.check_uploaded(evidence_ref.as_ref()).await?;
        self.with_walker(user.id, |walker| {
            walker.complete_subtask(subtask, notes, evidence_ref, rating)
        })
        .await
    }

    pub async fn complete_clicker_phase(
        &self,
        user: &CurrentUser,
        notes: &str,
        evidence_ref: Option<EvidenceRef>,
        rating: Option<Rating>,
    ) -> Result<TaskView> {
        require_role(user, Role::Worker)?;
        self.check_uploaded(evidence_ref.as_ref()).await?;
        self.with_walker(user.id, |walker| {
            walker.complete_clicker_phase(notes, evidence_ref, rating)
        })
        .await
    }

    pub async fn complete_final_submission(&self, user: &CurrentUser, notes: &str) -> Result<TaskView> {
        require_role(user, Role::Worker)?;
        self.with_walker(user.id, |walker| walker.complete_final_submission(notes))
            .await
    }

    pub async fn task_state(&self, user: &CurrentUser) -> Result<TaskView> {
        require_role(user, Role::Worker)?;
        let slot = self
            .existing_worker(user.id)
            .ok_or_else(|| Error::NotFound(format!("no task assigned to user {}", user.id)))?;
        let mut session = slot.lock().await;
        Ok(session.walker_mut()?.view())
    }

    /// Tear down a worker's task: stop its timer and hand back the task as
    /// it stands.
    pub async fn abandon_task(&self, worker: UserId) -> Result<Task> {
        let slot = self
            .existing_worker(worker)
            .ok_or_else(|| Error::NotFound(format!("no task assigned to user {worker}")))?;
        let mut session = slot.lock().await;
        session.ticker = None;
        let mut walker = session
            .walker
            .take()
            .ok_or_else(|| Error::NotFound(format!("no task assigned to user {worker}")))?;
        walker.abandon();
        record_state_transition(&session.span, walker.current_phase().name(), "abandoned");
        info!(%worker, task = %walker.task().id, "task abandoned");
        Ok(walker.task().clone())
    }

    async fn with_walker<F>(&self, user: UserId, op: F) -> Result<TaskView>
    where
        F: FnOnce(&mut TaskWalker) -> Result<()>,
    {
        let slot = self
            .existing_worker(user)
            .ok_or_else(|| Error::NotFound(format!("no task assigned to user {user}")))?;
        let mut session = slot.lock().await;
        let walker = session.walker_mut()?;

        let before = walker.current_phase();
        let live_before = timer_live(walker);
        let outcome = op(walker);
        let after = walker.current_phase();
        let events = walker.drain_events();
        let live = timer_live(walker);
        let view = walker.view();

        if before.name() != after.name() {
            record_state_transition(&session.span, before.name(), after.name());
        }
        self.sink().emit(user, events);

        if live {
            // The ticker breaks once it sees the clock dead; a re-armed clock
            // always gets its own.
            let stale = !live_before || session.ticker.as_ref().is_none_or(Ticker::is_finished);
            if stale {
                session.ticker = Some(spawn_walker_ticker(
                    Arc::downgrade(&slot),
                    self.sink().clone(),
                ));
            }
        } else {
            session.ticker = None;
        }

        outcome?;
        Ok(view)
    }
}

fn spawn_walker_ticker(slot: Weak<tokio::sync::Mutex<WorkerSession>>, sink: EventSink) -> Ticker {
    Ticker::spawn(TICK_PERIOD, move || {
        let slot = slot.clone();
        let sink = sink.clone();
        async move {
            let Some(slot) = slot.upgrade() else {
                return ControlFlow::Break;
            };
            let mut session = slot.lock().await;
            let user = session.user;
            let Some(walker) = session.walker.as_mut() else {
                return ControlFlow::Break;
            };
            walker.tick();
            let live = timer_live(walker);
            sink.emit(user, walker.drain_events());
            if live {
                ControlFlow::Continue
            } else {
                ControlFlow::Break
            }
        }
    })
}
