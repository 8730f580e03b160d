//! Manager workflow gate.
//!
//! The dashboard stays blocked until three daily prerequisites are met, in
//! order: the manager marked their own attendance, verified their team's
//! attendance, and rated everyone they verified. Nothing here is stored;
//! [`recompute`] derives the state from ledger snapshots every time.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::{IdentityProvider, require_role};
use crate::ledger::{AttendanceLedger, Ledgers, PerformanceLedger, VerificationLedger};
use crate::model::{AttendanceRecord, MarkedBy, Role, UserId, VerifiedSet};

/// How stage two (team verification) clears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamVerificationPolicy {
    /// A non-empty bulk verification for today.
    #[default]
    VerifiedSet,
    /// Every assigned team member holds an approved attendance record.
    ApprovedRecords,
    /// Either of the above; a verified set wins when both hold.
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    SelfAttendance,
    TeamVerification,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateStatus {
    Blocked { stage: GateStage },
    Open,
}

impl GateStatus {
    pub fn is_open(self) -> bool {
        self == GateStatus::Open
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowGateState {
    pub self_attended: bool,
    pub team_verified: bool,
    pub performance_complete: bool,
}

impl WorkflowGateState {
    /// Stages are checked in order; the first uncleared one blocks.
    pub fn status(&self) -> GateStatus {
        if !self.self_attended {
            GateStatus::Blocked {
                stage: GateStage::SelfAttendance,
            }
        } else if !self.team_verified {
            GateStatus::Blocked {
                stage: GateStage::TeamVerification,
            }
        } else if !self.performance_complete {
            GateStatus::Blocked {
                stage: GateStage::Performance,
            }
        } else {
            GateStatus::Open
        }
    }
}

/// Everything the gate needs to know about one manager on one date.
#[derive(Debug, Clone)]
pub struct GateSnapshot {
    pub manager_id: UserId,
    pub team_ids: Vec<UserId>,
    pub self_record: Option<AttendanceRecord>,
    pub verified: Option<VerifiedSet>,
    pub team_attendance: Vec<(UserId, AttendanceRecord)>,
    /// Users with a performance record on the date.
    pub rated: BTreeSet<UserId>,
}

/// Derive the gate state from ledger snapshots.
pub fn recompute(snapshot: &GateSnapshot, policy: TeamVerificationPolicy) -> WorkflowGateState {
    let self_attended = snapshot
        .self_record
        .as_ref()
        .is_some_and(|r| r.marked_by == MarkedBy::SelfMarked);

    let verified: Option<BTreeSet<UserId>> = snapshot
        .verified
        .as_ref()
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.subject_ids
                .iter()
                .copied()
                .filter(|id| *id != snapshot.manager_id)
                .collect()
        });

    let approved: Option<BTreeSet<UserId>> = {
        let all_approved = snapshot.team_ids.iter().all(|member| {
            snapshot
                .team_attendance
                .iter()
                .any(|(id, rec)| id == member && rec.is_approved())
        });
        // An empty team has nobody to approve, so it never clears the stage.
        (all_approved && !snapshot.team_ids.is_empty())
            .then(|| snapshot.team_ids.iter().copied().collect())
    };

    let roster = match policy {
        TeamVerificationPolicy::VerifiedSet => verified,
        TeamVerificationPolicy::ApprovedRecords => approved,
        TeamVerificationPolicy::Either => verified.or(approved),
    };

    let team_verified = roster.is_some();
    let performance_complete = roster
        .as_ref()
        .is_some_and(|ids| ids.iter().all(|id| snapshot.rated.contains(id)));

    WorkflowGateState {
        self_attended,
        team_verified,
        performance_complete,
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// The gate for the manager behind `identity`.
#[derive(Clone)]
pub struct WorkflowGate {
    ledgers: Ledgers,
    identity: Arc<dyn IdentityProvider>,
    policy: TeamVerificationPolicy,
}

impl WorkflowGate {
    pub fn new(
        ledgers: Ledgers,
        identity: Arc<dyn IdentityProvider>,
        policy: TeamVerificationPolicy,
    ) -> Self {
        Self {
            ledgers,
            identity,
            policy,
        }
    }

    pub fn policy(&self) -> TeamVerificationPolicy {
        self.policy
    }

    pub fn manager_id(&self) -> Result<UserId> {
        Ok(self.identity.current_user()?.id)
    }

    /// Read the three ledgers for `date`.
    pub async fn load_snapshot(&self, date: NaiveDate) -> Result<GateSnapshot> {
        let manager = self.identity.current_user()?;
        require_role(&manager, Role::Manager)?;
        let store = self.ledgers.store();

        let self_record = store.get_attendance(date, manager.id).await?;
        let verified = store.get_verified(manager.id, date).await?;
        let team_attendance = store
            .list_attendance(date, &manager.assigned_team_ids)
            .await?;

        let mut roster: BTreeSet<UserId> = manager.assigned_team_ids.iter().copied().collect();
        if let Some(ref v) = verified {
            roster.extend(v.subject_ids.iter().copied());
        }
        let roster: Vec<UserId> = roster.into_iter().collect();
        let rated = store
            .list_performance(date, &roster)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        Ok(GateSnapshot {
            manager_id: manager.id,
            team_ids: manager.assigned_team_ids,
            self_record,
            verified,
            team_attendance,
            rated,
        })
    }

    pub async fn state(&self, date: NaiveDate) -> Result<WorkflowGateState> {
        let snapshot = self.load_snapshot(date).await?;
        let state = recompute(&snapshot, self.policy);
        debug!(manager = %snapshot.manager_id, %date, ?state, "gate recomputed");
        Ok(state)
    }

    pub async fn status(&self, date: NaiveDate) -> Result<GateStatus> {
        Ok(self.state(date).await?.status())
    }

    /// Bulk-confirm team attendance. The manager's own id is always dropped.
    pub async fn verify_attendance(
        &self,
        date: NaiveDate,
        subject_ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<VerifiedSet> {
        let manager = self.identity.current_user()?;
        require_role(&manager, Role::Manager)?;
        let set = VerifiedSet::new(manager.id, date, subject_ids.iter().copied(), now);
        if set.is_empty() {
            return Err(Error::InvalidInput("no team members to verify".into()));
        }
        self.ledgers.put_verified(set.clone()).await?;
        info!(manager = %manager.id, %date, verified = set.subject_ids.len(), "team attendance verified");
        Ok(set)
    }
}
