//! Attendance and performance ledgers: lifecycle rules and the change feed.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clickwork_engine::error::Error;
use clickwork_engine::ledger::memory::MemoryLedger;
use clickwork_engine::ledger::{
    AttendanceLedger, LedgerChange, LedgerKind, Ledgers, PerformanceLedger, VerificationLedger,
};
use clickwork_engine::model::{AttendanceStatus, MarkedBy, Rating, UserId, VerifiedSet};

const MANAGER: UserId = UserId(2);
const WORKER: UserId = UserId(5);

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn rating(v: u8) -> Rating {
    Rating::try_from(v).unwrap()
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn self_mark_records_marked_by_self() {
    let ledgers = Ledgers::in_memory();
    let rec = ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    assert_eq!(rec.status, AttendanceStatus::Marked);
    assert_eq!(rec.marked_by, MarkedBy::SelfMarked);

    let stored = ledgers.store().get_attendance(day(), WORKER).await.unwrap();
    assert_eq!(stored, Some(rec));
}

#[tokio::test]
async fn second_self_mark_is_already_recorded() {
    let ledgers = Ledgers::in_memory();
    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    let err = ledgers
        .mark_self_attendance(day(), WORKER, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRecorded { user: WORKER, .. }));
}

#[tokio::test]
async fn self_marks_are_per_date() {
    let ledgers = Ledgers::in_memory();
    let tomorrow = day().succ_opt().unwrap();
    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    ledgers.mark_self_attendance(tomorrow, WORKER, Utc::now()).await.unwrap();
}

#[tokio::test]
async fn approve_sets_the_verifier() {
    let ledgers = Ledgers::in_memory();
    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    let rec = ledgers
        .approve_attendance(MANAGER, day(), WORKER, Utc::now())
        .await
        .unwrap();
    assert!(rec.is_approved());
    assert_eq!(rec.verified_by, Some(MANAGER));
    assert!(rec.verified_at.is_some());

    let err = ledgers
        .reject_attendance(MANAGER, day(), WORKER, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRecorded { .. }));
}

#[tokio::test]
async fn reject_is_a_terminal_verdict() {
    let ledgers = Ledgers::in_memory();
    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    let rec = ledgers
        .reject_attendance(MANAGER, day(), WORKER, Utc::now())
        .await
        .unwrap();
    assert_eq!(rec.status, AttendanceStatus::Rejected);
}

#[tokio::test]
async fn nobody_verifies_their_own_attendance() {
    let ledgers = Ledgers::in_memory();
    ledgers.mark_self_attendance(day(), MANAGER, Utc::now()).await.unwrap();
    let err = ledgers
        .approve_attendance(MANAGER, day(), MANAGER, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn verifying_a_missing_record_is_not_found() {
    let ledgers = Ledgers::in_memory();
    let err = ledgers
        .approve_attendance(MANAGER, day(), WORKER, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn sweep_marks_only_users_without_a_record() {
    let ledgers = Ledgers::in_memory();
    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();

    let marked = ledgers
        .sweep_absent(day(), &[WORKER, UserId(6), UserId(7)], Utc::now())
        .await
        .unwrap();
    assert_eq!(marked, vec![UserId(6), UserId(7)]);

    let absent = ledgers.store().get_attendance(day(), UserId(6)).await.unwrap().unwrap();
    assert_eq!(absent.status, AttendanceStatus::Absent);
    assert_eq!(absent.marked_by, MarkedBy::System);

    let again = ledgers
        .sweep_absent(day(), &[WORKER, UserId(6), UserId(7)], Utc::now())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn absent_is_final_for_the_day() {
    let ledgers = Ledgers::in_memory();
    ledgers.sweep_absent(day(), &[WORKER], Utc::now()).await.unwrap();

    let err = ledgers
        .mark_self_attendance(day(), WORKER, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::AttendanceFinal {
            status: AttendanceStatus::Absent,
            ..
        }
    ));

    let err = ledgers
        .approve_attendance(MANAGER, day(), WORKER, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AttendanceFinal { .. }));
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_rating_per_worker_per_day() {
    let ledgers = Ledgers::in_memory();
    let rec = ledgers
        .mark_performance(day(), WORKER, MANAGER, rating(5), "fast and clean", Utc::now())
        .await
        .unwrap();
    assert_eq!(rec.rating.value(), 5);
    assert_eq!(rec.marked_by, MANAGER);

    let err = ledgers
        .mark_performance(day(), WORKER, MANAGER, rating(1), "changed my mind", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRecorded { .. }));

    let stored = ledgers.store().get_performance(day(), WORKER).await.unwrap().unwrap();
    assert_eq!(stored.rating.value(), 5);
    assert_eq!(stored.notes, "fast and clean");
}

#[tokio::test]
async fn nobody_rates_themselves() {
    let ledgers = Ledgers::in_memory();
    let err = ledgers
        .mark_performance(day(), MANAGER, MANAGER, rating(5), "", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn list_performance_omits_unrated_users() {
    let ledgers = Ledgers::in_memory();
    ledgers
        .mark_performance(day(), WORKER, MANAGER, rating(3), "", Utc::now())
        .await
        .unwrap();
    let listed = ledgers
        .store()
        .list_performance(day(), &[WORKER, UserId(6)])
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, WORKER);
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_write_is_published() {
    let ledgers = Ledgers::in_memory();
    let mut rx = ledgers.subscribe();

    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    ledgers
        .mark_performance(day(), WORKER, MANAGER, rating(4), "", Utc::now())
        .await
        .unwrap();
    ledgers
        .put_verified(VerifiedSet::new(MANAGER, day(), [WORKER], Utc::now()))
        .await
        .unwrap();

    let expect = |kind, subject| LedgerChange {
        kind,
        date: day(),
        subject,
    };
    assert_eq!(rx.recv().await.unwrap(), expect(LedgerKind::Attendance, WORKER));
    assert_eq!(rx.recv().await.unwrap(), expect(LedgerKind::Performance, WORKER));
    assert_eq!(rx.recv().await.unwrap(), expect(LedgerKind::Verification, MANAGER));
}

#[tokio::test]
async fn rejected_writes_are_not_published() {
    let ledgers = Ledgers::in_memory();
    ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
    let mut rx = ledgers.subscribe();

    assert!(ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.is_err());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_self_marks_admit_exactly_one() {
    let ledgers = Ledgers::in_memory();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledgers = ledgers.clone();
        handles.push(tokio::spawn(async move {
            ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
}

// ---------------------------------------------------------------------------
// Snapshot persistence
// ---------------------------------------------------------------------------

fn snapshot_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("clickwork-ledger-{}.json", uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn snapshot_survives_reopen() {
    let path = snapshot_path();
    {
        let ledgers = Ledgers::new(Arc::new(MemoryLedger::open(&path).await.unwrap()));
        ledgers.mark_self_attendance(day(), WORKER, Utc::now()).await.unwrap();
        ledgers
            .mark_performance(day(), WORKER, MANAGER, rating(2), "slow", Utc::now())
            .await
            .unwrap();
        ledgers
            .put_verified(VerifiedSet::new(MANAGER, day(), [WORKER, UserId(6)], Utc::now()))
            .await
            .unwrap();
    }

    let reopened = MemoryLedger::open(&path).await.unwrap();
    let rec = reopened.get_attendance(day(), WORKER).await.unwrap().unwrap();
    assert_eq!(rec.marked_by, MarkedBy::SelfMarked);
    let perf = reopened.get_performance(day(), WORKER).await.unwrap().unwrap();
    assert_eq!(perf.notes, "slow");
    let set = reopened.get_verified(MANAGER, day()).await.unwrap().unwrap();
    assert!(set.contains(UserId(6)));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn missing_snapshot_opens_empty() {
    let path = snapshot_path();
    let store = MemoryLedger::open(&path).await.unwrap();
    assert!(store.get_attendance(day(), WORKER).await.unwrap().is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn corrupt_snapshot_is_ledger_unavailable() {
    let path = snapshot_path();
    std::fs::write(&path, "{ not json").unwrap();
    let err = MemoryLedger::open(&path).await.unwrap_err();
    assert!(matches!(err, Error::LedgerUnavailable(_)));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn failed_snapshot_write_leaves_memory_untouched() {
    let dir = std::env::temp_dir().join(format!("clickwork-gone-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(MemoryLedger::open(dir.join("ledger.json")).await.unwrap());
    let ledgers = Ledgers::new(store.clone());
    let mut rx = ledgers.subscribe();

    for _ in 0..2 {
        let err = ledgers
            .mark_self_attendance(day(), WORKER, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LedgerUnavailable(_)), "{err}");
    }
    assert!(store.get_attendance(day(), WORKER).await.unwrap().is_none());

    let err = ledgers
        .mark_performance(day(), WORKER, MANAGER, rating(4), "", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LedgerUnavailable(_)));
    assert!(store.get_performance(day(), WORKER).await.unwrap().is_none());

    let set = VerifiedSet::new(MANAGER, day(), [WORKER], Utc::now());
    assert!(ledgers.put_verified(set).await.is_err());
    assert!(store.get_verified(MANAGER, day()).await.unwrap().is_none());

    assert!(rx.try_recv().is_err(), "failed writes are not published");
}
