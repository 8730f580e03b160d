//! Attendance and performance ledgers.
//!
//! The ledgers are the system of record the gate reads from. Storage sits
//! behind the three accessor traits below, each taking the date partition
//! explicitly; [`memory::MemoryLedger`] and [`crate::db::Db`] implement all
//! three.
//!
//! [`Ledgers`] is the only write path the engine uses. It applies the
//! record lifecycle rules, serializes writes per `(date, user)` key and
//! publishes a [`LedgerChange`] for every successful write so gates can
//! recompute eagerly.

pub mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, broadcast};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{
    AttendanceRecord, AttendanceStatus, PerformanceRecord, Rating, UserId, VerifiedSet,
};

// ---------------------------------------------------------------------------
// Accessor contracts
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AttendanceLedger: Send + Sync {
    async fn get_attendance(&self, date: NaiveDate, user: UserId) -> Result<Option<AttendanceRecord>>;

    async fn put_attendance(&self, date: NaiveDate, user: UserId, record: AttendanceRecord) -> Result<()>;

    /// Records for `ids` on `date`. Users without a record are omitted.
    async fn list_attendance(
        &self,
        date: NaiveDate,
        ids: &[UserId],
    ) -> Result<Vec<(UserId, AttendanceRecord)>>;
}

#[async_trait]
pub trait PerformanceLedger: Send + Sync {
    async fn get_performance(&self, date: NaiveDate, worker: UserId) -> Result<Option<PerformanceRecord>>;

    async fn put_performance(
        &self,
        date: NaiveDate,
        worker: UserId,
        record: PerformanceRecord,
    ) -> Result<()>;

    async fn list_performance(
        &self,
        date: NaiveDate,
        ids: &[UserId],
    ) -> Result<Vec<(UserId, PerformanceRecord)>>;
}

#[async_trait]
pub trait VerificationLedger: Send + Sync {
    async fn get_verified(&self, verifier: UserId, date: NaiveDate) -> Result<Option<VerifiedSet>>;

    async fn put_verified(&self, set: VerifiedSet) -> Result<()>;
}

/// A backend holding all three ledgers.
pub trait LedgerStore: AttendanceLedger + PerformanceLedger + VerificationLedger {}

impl<T> LedgerStore for T where T: AttendanceLedger + PerformanceLedger + VerificationLedger {}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Attendance,
    Performance,
    Verification,
}

/// A successful write. `subject` is the user the record is about, or the
/// verifier for verified sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerChange {
    pub kind: LedgerKind,
    pub date: NaiveDate,
    pub subject: UserId,
}

const CHANGE_FEED_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Ledgers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Ledgers {
    store: Arc<dyn LedgerStore>,
    changes: broadcast::Sender<LedgerChange>,
    key_locks: Arc<Mutex<HashMap<(NaiveDate, UserId), Arc<tokio::sync::Mutex<()>>>>>,
}

impl Ledgers {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            store,
            changes,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ledgers backed by a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(memory::MemoryLedger::new()))
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.changes.subscribe()
    }

    // -- attendance ---------------------------------------------------------

    /// First self-mark of the day.
    pub async fn mark_self_attendance(
        &self,
        date: NaiveDate,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        let _guard = self.lock_key(date, user).await;
        match self.store.get_attendance(date, user).await? {
            Some(existing) if existing.status == AttendanceStatus::Absent => {
                return Err(Error::AttendanceFinal {
                    date,
                    user,
                    status: existing.status,
                });
            }
            Some(existing) if existing.status != AttendanceStatus::NotMarked => {
                return Err(Error::AlreadyRecorded { date, user });
            }
            _ => {}
        }

        let record = AttendanceRecord::self_marked(now);
        self.store.put_attendance(date, user, record.clone()).await?;
        info!(%date, %user, "attendance self-marked");
        self.publish(LedgerKind::Attendance, date, user);
        Ok(record)
    }

    pub async fn approve_attendance(
        &self,
        verifier: UserId,
        date: NaiveDate,
        subject: UserId,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        self.verify_record(verifier, date, subject, AttendanceStatus::Approved, now)
            .await
    }

    pub async fn reject_attendance(
        &self,
        verifier: UserId,
        date: NaiveDate,
        subject: UserId,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        self.verify_record(verifier, date, subject, AttendanceStatus::Rejected, now)
            .await
    }

    async fn verify_record(
        &self,
        verifier: UserId,
        date: NaiveDate,
        subject: UserId,
        status: AttendanceStatus,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        if verifier == subject {
            return Err(Error::Unauthorized(format!(
                "user {verifier} cannot verify their own attendance"
            )));
        }
        let _guard = self.lock_key(date, subject).await;
        let mut record = self
            .store
            .get_attendance(date, subject)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attendance for user {subject} on {date}")))?;
        match record.status {
            AttendanceStatus::Marked => {}
            AttendanceStatus::Absent => {
                return Err(Error::AttendanceFinal {
                    date,
                    user: subject,
                    status: record.status,
                });
            }
            AttendanceStatus::Approved | AttendanceStatus::Rejected => {
                return Err(Error::AlreadyRecorded { date, user: subject });
            }
            AttendanceStatus::NotMarked => {
                return Err(Error::NotFound(format!(
                    "attendance for user {subject} on {date}"
                )));
            }
        }

        record.status = status;
        record.verified_by = Some(verifier);
        record.verified_at = Some(now);
        self.store.put_attendance(date, subject, record.clone()).await?;
        info!(%date, %subject, %verifier, %status, "attendance verified");
        self.publish(LedgerKind::Attendance, date, subject);
        Ok(record)
    }

    /// Day-end sweep: everyone in `ids` without a record becomes absent.
    /// Returns who was marked.
    pub async fn sweep_absent(
        &self,
        date: NaiveDate,
        ids: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>> {
        let mut marked = Vec::new();
        for &user in ids {
            let _guard = self.lock_key(date, user).await;
            if self.store.get_attendance(date, user).await?.is_some() {
                continue;
            }
            self.store
                .put_attendance(date, user, AttendanceRecord::absent(now))
                .await?;
            self.publish(LedgerKind::Attendance, date, user);
            marked.push(user);
        }
        info!(%date, swept = marked.len(), "absent sweep finished");
        Ok(marked)
    }

    // -- performance --------------------------------------------------------

    /// Write the day's rating for a worker. One per worker per date.
    pub async fn mark_performance(
        &self,
        date: NaiveDate,
        worker: UserId,
        marked_by: UserId,
        rating: Rating,
        notes: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<PerformanceRecord> {
        if worker == marked_by {
            return Err(Error::Unauthorized(format!(
                "user {worker} cannot rate their own performance"
            )));
        }
        let _guard = self.lock_key(date, worker).await;
        if self.store.get_performance(date, worker).await?.is_some() {
            return Err(Error::AlreadyRecorded { date, user: worker });
        }

        let record = PerformanceRecord {
            rating,
            notes: notes.into(),
            marked_by,
            marked_at: now,
        };
        self.store.put_performance(date, worker, record.clone()).await?;
        info!(%date, %worker, rating = rating.value(), "performance marked");
        self.publish(LedgerKind::Performance, date, worker);
        Ok(record)
    }

    // -- verification -------------------------------------------------------

    pub async fn put_verified(&self, set: VerifiedSet) -> Result<()> {
        let _guard = self.lock_key(set.date, set.verifier_id).await;
        let (date, verifier) = (set.date, set.verifier_id);
        self.store.put_verified(set).await?;
        self.publish(LedgerKind::Verification, date, verifier);
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    fn publish(&self, kind: LedgerKind, date: NaiveDate, subject: UserId) {
        // No subscribers is fine.
        let _ = self.changes.send(LedgerChange { kind, date, subject });
        debug!(?kind, %date, %subject, "ledger change published");
    }

    /// Serialize mutations on one `(date, user)` key.
    async fn lock_key(&self, date: NaiveDate, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .key_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry((date, user)).or_default())
        };
        lock.lock_owned().await
    }
}
