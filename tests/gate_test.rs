//! Workflow gate: stage ordering, verification policies, verify input.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clickwork_engine::error::Error;
use clickwork_engine::gate::{
    GateSnapshot, GateStage, GateStatus, TeamVerificationPolicy, WorkflowGate, recompute,
};
use clickwork_engine::identity::StaticIdentity;
use clickwork_engine::ledger::{Ledgers, VerificationLedger};
use clickwork_engine::model::{
    AttendanceRecord, AttendanceStatus, CurrentUser, Rating, Role, UserId, VerifiedSet,
};

const MANAGER: UserId = UserId(2);

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn ids(raw: &[u64]) -> Vec<UserId> {
    raw.iter().copied().map(UserId).collect()
}

fn blocked(stage: GateStage) -> GateStatus {
    GateStatus::Blocked { stage }
}

fn snapshot() -> GateSnapshot {
    GateSnapshot {
        manager_id: MANAGER,
        team_ids: ids(&[5, 6, 7]),
        self_record: None,
        verified: None,
        team_attendance: Vec::new(),
        rated: BTreeSet::new(),
    }
}

fn approved() -> AttendanceRecord {
    let mut rec = AttendanceRecord::self_marked(Utc::now());
    rec.status = AttendanceStatus::Approved;
    rec.verified_by = Some(MANAGER);
    rec
}

fn gate(ledgers: &Ledgers, policy: TeamVerificationPolicy) -> WorkflowGate {
    WorkflowGate::new(
        ledgers.clone(),
        Arc::new(StaticIdentity::manager(MANAGER, ids(&[5, 6, 7]))),
        policy,
    )
}

// ---------------------------------------------------------------------------
// Pure recompute
// ---------------------------------------------------------------------------

#[test]
fn no_self_attendance_blocks_whatever_else_is_recorded() {
    let mut snap = snapshot();
    snap.verified = Some(VerifiedSet::new(MANAGER, day(), ids(&[5, 6, 7]), Utc::now()));
    snap.team_attendance = ids(&[5, 6, 7]).into_iter().map(|id| (id, approved())).collect();
    snap.rated = ids(&[5, 6, 7]).into_iter().collect();

    for policy in [
        TeamVerificationPolicy::VerifiedSet,
        TeamVerificationPolicy::ApprovedRecords,
        TeamVerificationPolicy::Either,
    ] {
        let state = recompute(&snap, policy);
        assert!(!state.self_attended);
        assert_eq!(state.status(), blocked(GateStage::SelfAttendance));
    }
}

#[test]
fn system_marked_record_does_not_clear_stage_one() {
    let mut snap = snapshot();
    snap.self_record = Some(AttendanceRecord::absent(Utc::now()));
    assert_eq!(
        recompute(&snap, TeamVerificationPolicy::VerifiedSet).status(),
        blocked(GateStage::SelfAttendance)
    );
}

#[test]
fn stages_clear_in_order() {
    let mut snap = snapshot();
    snap.self_record = Some(AttendanceRecord::self_marked(Utc::now()));
    let policy = TeamVerificationPolicy::VerifiedSet;
    assert_eq!(recompute(&snap, policy).status(), blocked(GateStage::TeamVerification));

    snap.verified = Some(VerifiedSet::new(MANAGER, day(), ids(&[5, 6]), Utc::now()));
    assert_eq!(recompute(&snap, policy).status(), blocked(GateStage::Performance));

    snap.rated = ids(&[5]).into_iter().collect();
    assert_eq!(recompute(&snap, policy).status(), blocked(GateStage::Performance));

    snap.rated.insert(UserId(6));
    assert_eq!(recompute(&snap, policy).status(), GateStatus::Open);
}

#[test]
fn approved_records_alone_do_not_clear_the_default_policy() {
    let mut snap = snapshot();
    snap.self_record = Some(AttendanceRecord::self_marked(Utc::now()));
    snap.team_attendance = ids(&[5, 6, 7]).into_iter().map(|id| (id, approved())).collect();

    assert!(!recompute(&snap, TeamVerificationPolicy::VerifiedSet).team_verified);
    assert!(recompute(&snap, TeamVerificationPolicy::ApprovedRecords).team_verified);
    assert!(recompute(&snap, TeamVerificationPolicy::Either).team_verified);
}

#[test]
fn approved_records_policy_rates_the_whole_team() {
    let mut snap = snapshot();
    snap.self_record = Some(AttendanceRecord::self_marked(Utc::now()));
    snap.team_attendance = ids(&[5, 6, 7]).into_iter().map(|id| (id, approved())).collect();
    snap.rated = ids(&[5, 6]).into_iter().collect();
    let policy = TeamVerificationPolicy::ApprovedRecords;
    assert_eq!(recompute(&snap, policy).status(), blocked(GateStage::Performance));

    snap.rated.insert(UserId(7));
    assert_eq!(recompute(&snap, policy).status(), GateStatus::Open);
}

#[test]
fn empty_verified_set_does_not_count() {
    let mut snap = snapshot();
    snap.self_record = Some(AttendanceRecord::self_marked(Utc::now()));
    snap.verified = Some(VerifiedSet::new(MANAGER, day(), ids(&[2]), Utc::now()));
    assert_eq!(
        recompute(&snap, TeamVerificationPolicy::VerifiedSet).status(),
        blocked(GateStage::TeamVerification)
    );
}

#[test]
fn approved_records_policy_needs_a_team() {
    let mut snap = snapshot();
    snap.team_ids.clear();
    snap.self_record = Some(AttendanceRecord::self_marked(Utc::now()));

    let state = recompute(&snap, TeamVerificationPolicy::ApprovedRecords);
    assert!(!state.team_verified);
    assert_eq!(state.status(), blocked(GateStage::TeamVerification));

    snap.verified = Some(VerifiedSet::new(MANAGER, day(), ids(&[5]), Utc::now()));
    snap.rated = ids(&[5]).into_iter().collect();
    assert_eq!(recompute(&snap, TeamVerificationPolicy::Either).status(), GateStatus::Open);
}

// ---------------------------------------------------------------------------
// Against the ledgers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verify_excludes_the_manager() {
    let ledgers = Ledgers::in_memory();
    let gate = gate(&ledgers, TeamVerificationPolicy::VerifiedSet);

    let set = gate
        .verify_attendance(day(), &ids(&[5, 2, 6, 7]), Utc::now())
        .await
        .unwrap();
    assert_eq!(set.subject_ids, ids(&[5, 6, 7]).into_iter().collect());
    assert!(!set.contains(MANAGER));

    let stored = ledgers.store().get_verified(MANAGER, day()).await.unwrap().unwrap();
    assert_eq!(stored.subject_ids, ids(&[5, 6, 7]).into_iter().collect());
}

#[tokio::test]
async fn verify_with_no_subjects_is_rejected() {
    let ledgers = Ledgers::in_memory();
    let gate = gate(&ledgers, TeamVerificationPolicy::VerifiedSet);
    let err = gate.verify_attendance(day(), &[], Utc::now()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn verifying_only_yourself_is_rejected() {
    let ledgers = Ledgers::in_memory();
    let gate = gate(&ledgers, TeamVerificationPolicy::VerifiedSet);
    let err = gate
        .verify_attendance(day(), &[MANAGER, MANAGER], Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(ledgers.store().get_verified(MANAGER, day()).await.unwrap().is_none());
}

#[tokio::test]
async fn only_managers_may_verify() {
    let ledgers = Ledgers::in_memory();
    let worker = CurrentUser {
        id: UserId(5),
        role: Role::Worker,
        assigned_team_ids: Vec::new(),
    };
    let gate = WorkflowGate::new(
        ledgers,
        Arc::new(StaticIdentity::new(worker)),
        TeamVerificationPolicy::VerifiedSet,
    );
    let err = gate.verify_attendance(day(), &ids(&[6]), Utc::now()).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn gate_opens_after_the_full_day() {
    let ledgers = Ledgers::in_memory();
    let gate = gate(&ledgers, TeamVerificationPolicy::VerifiedSet);
    let now = Utc::now();
    let rating = Rating::try_from(4).unwrap();

    assert_eq!(gate.status(day()).await.unwrap(), blocked(GateStage::SelfAttendance));

    ledgers.mark_self_attendance(day(), MANAGER, now).await.unwrap();
    assert_eq!(gate.status(day()).await.unwrap(), blocked(GateStage::TeamVerification));

    gate.verify_attendance(day(), &ids(&[5, 6]), now).await.unwrap();
    assert_eq!(gate.status(day()).await.unwrap(), blocked(GateStage::Performance));

    ledgers
        .mark_performance(day(), UserId(5), MANAGER, rating, "steady", now)
        .await
        .unwrap();
    assert_eq!(gate.status(day()).await.unwrap(), blocked(GateStage::Performance));

    ledgers
        .mark_performance(day(), UserId(6), MANAGER, rating, "quick", now)
        .await
        .unwrap();
    assert_eq!(gate.status(day()).await.unwrap(), GateStatus::Open);

    let tomorrow = day().succ_opt().unwrap();
    assert_eq!(gate.status(tomorrow).await.unwrap(), blocked(GateStage::SelfAttendance));
}
