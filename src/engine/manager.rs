//! Attendance, performance and the manager gate.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::gate::{GateStatus, WorkflowGate, WorkflowGateState};
use crate::identity::{StaticIdentity, require_role};
use crate::model::{AttendanceRecord, CurrentUser, PerformanceRecord, Rating, Role, UserId, VerifiedSet};
use crate::telemetry::unit::count_gate_evaluation;

use super::Engine;
use super::watch::GateWatcher;

/// Gate state as returned to a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateReport {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub state: WorkflowGateState,
    pub status: GateStatus,
}

impl Engine {
    /// The gate as seen by `manager`.
    pub fn gate_for(&self, manager: &CurrentUser) -> WorkflowGate {
        WorkflowGate::new(
            self.ledgers().clone(),
            Arc::new(StaticIdentity::new(manager.clone())),
            self.config().gate.team_verification,
        )
    }

    pub async fn gate_state(&self, manager: &CurrentUser, date: NaiveDate) -> Result<GateReport> {
        let state = self.gate_for(manager).state(date).await?;
        let status = state.status();
        count_gate_evaluation(status);
        Ok(GateReport { date, state, status })
    }

    /// Keep a live view of `manager`'s gate for `date`.
    pub async fn watch_gate(&self, manager: &CurrentUser, date: NaiveDate) -> Result<GateWatcher> {
        GateWatcher::spawn(self.clone(), manager.clone(), date).await
    }

    pub async fn verify_team_attendance(
        &self,
        manager: &CurrentUser,
        date: NaiveDate,
        subject_ids: &[UserId],
    ) -> Result<VerifiedSet> {
        self.gate_for(manager)
            .verify_attendance(date, subject_ids, Utc::now())
            .await
    }

    /// Self-mark for the day. Open to every role.
    pub async fn mark_attendance(&self, user: &CurrentUser, date: NaiveDate) -> Result<AttendanceRecord> {
        self.ledgers()
            .mark_self_attendance(date, user.id, Utc::now())
            .await
    }

    pub async fn approve_attendance(
        &self,
        manager: &CurrentUser,
        date: NaiveDate,
        subject: UserId,
    ) -> Result<AttendanceRecord> {
        ensure_manages(manager, subject)?;
        self.ledgers()
            .approve_attendance(manager.id, date, subject, Utc::now())
            .await
    }

    pub async fn reject_attendance(
        &self,
        manager: &CurrentUser,
        date: NaiveDate,
        subject: UserId,
    ) -> Result<AttendanceRecord> {
        ensure_manages(manager, subject)?;
        self.ledgers()
            .reject_attendance(manager.id, date, subject, Utc::now())
            .await
    }

    pub async fn mark_performance(
        &self,
        manager: &CurrentUser,
        date: NaiveDate,
        worker: UserId,
        rating: Rating,
        notes: &str,
    ) -> Result<PerformanceRecord> {
        ensure_manages(manager, worker)?;
        self.ledgers()
            .mark_performance(date, worker, manager.id, rating, notes, Utc::now())
            .await
    }

    /// Day-end sweep over `ids`, or over every known user when empty.
    pub async fn sweep_absent(&self, date: NaiveDate, ids: &[UserId]) -> Result<Vec<UserId>> {
        let roster: Vec<UserId> = if ids.is_empty() {
            self.config().users.iter().map(|u| u.id).collect()
        } else {
            ids.to_vec()
        };
        let marked = self.ledgers().sweep_absent(date, &roster, Utc::now()).await?;
        info!(%date, checked = roster.len(), marked = marked.len(), "absent sweep");
        Ok(marked)
    }
}

fn ensure_manages(manager: &CurrentUser, subject: UserId) -> Result<()> {
    require_role(manager, Role::Manager)?;
    if manager.assigned_team_ids.contains(&subject) {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!(
            "user {subject} is not on manager {}'s team",
            manager.id
        )))
    }
}
