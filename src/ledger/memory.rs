//! Process-local ledger store.
//!
//! Date-partitioned maps keyed by user. When opened with a path, every
//! write rewrites a JSON snapshot (write to a temp file, then rename) so
//! the ledgers survive a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{AttendanceLedger, PerformanceLedger, VerificationLedger};
use crate::error::{Error, Result};
use crate::model::{AttendanceRecord, AttendanceStatus, PerformanceRecord, UserId, VerifiedSet};

type Partitioned<T> = BTreeMap<NaiveDate, BTreeMap<UserId, T>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    #[serde(default)]
    attendance: Partitioned<AttendanceRecord>,
    #[serde(default)]
    performance: Partitioned<PerformanceRecord>,
    /// Keyed by verifier.
    #[serde(default)]
    verified: Partitioned<VerifiedSet>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    path: Option<PathBuf>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` if it exists; persist there from now on.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::LedgerUnavailable(format!("corrupt ledger snapshot {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerState::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "ledger snapshot opened");
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    async fn persist(&self, state: &LedgerState) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::LedgerUnavailable(format!("serialize ledger snapshot: {e}")))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Puts `previous` back after a write whose snapshot failed, so memory
/// never holds a record the snapshot does not.
fn restore<T>(partitioned: &mut Partitioned<T>, date: NaiveDate, key: UserId, previous: Option<T>) {
    let Some(partition) = partitioned.get_mut(&date) else {
        return;
    };
    match previous {
        Some(previous) => {
            partition.insert(key, previous);
        }
        None => {
            partition.remove(&key);
            if partition.is_empty() {
                partitioned.remove(&date);
            }
        }
    }
}

fn list<T: Clone>(partition: Option<&BTreeMap<UserId, T>>, ids: &[UserId]) -> Vec<(UserId, T)> {
    let Some(partition) = partition else {
        return Vec::new();
    };
    ids.iter()
        .filter_map(|id| partition.get(id).map(|r| (*id, r.clone())))
        .collect()
}

#[async_trait]
impl AttendanceLedger for MemoryLedger {
    async fn get_attendance(&self, date: NaiveDate, user: UserId) -> Result<Option<AttendanceRecord>> {
        let state = self.state.read().await;
        Ok(state
            .attendance
            .get(&date)
            .and_then(|p| p.get(&user))
            .cloned())
    }

    async fn put_attendance(&self, date: NaiveDate, user: UserId, record: AttendanceRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.attendance.get(&date).and_then(|p| p.get(&user)) {
            if existing.status == AttendanceStatus::Absent {
                return Err(Error::AttendanceFinal {
                    date,
                    user,
                    status: existing.status,
                });
            }
        }
        let previous = state.attendance.entry(date).or_default().insert(user, record);
        if let Err(e) = self.persist(&state).await {
            restore(&mut state.attendance, date, user, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn list_attendance(
        &self,
        date: NaiveDate,
        ids: &[UserId],
    ) -> Result<Vec<(UserId, AttendanceRecord)>> {
        let state = self.state.read().await;
        Ok(list(state.attendance.get(&date), ids))
    }
}

#[async_trait]
impl PerformanceLedger for MemoryLedger {
    async fn get_performance(&self, date: NaiveDate, worker: UserId) -> Result<Option<PerformanceRecord>> {
        let state = self.state.read().await;
        Ok(state
            .performance
            .get(&date)
            .and_then(|p| p.get(&worker))
            .cloned())
    }

    async fn put_performance(
        &self,
        date: NaiveDate,
        worker: UserId,
        record: PerformanceRecord,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let previous = state.performance.entry(date).or_default().insert(worker, record);
        if let Err(e) = self.persist(&state).await {
            restore(&mut state.performance, date, worker, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn list_performance(
        &self,
        date: NaiveDate,
        ids: &[UserId],
    ) -> Result<Vec<(UserId, PerformanceRecord)>> {
        let state = self.state.read().await;
        Ok(list(state.performance.get(&date), ids))
    }
}

#[async_trait]
impl VerificationLedger for MemoryLedger {
    async fn get_verified(&self, verifier: UserId, date: NaiveDate) -> Result<Option<VerifiedSet>> {
        let state = self.state.read().await;
        Ok(state.verified.get(&date).and_then(|p| p.get(&verifier)).cloned())
    }

    async fn put_verified(&self, set: VerifiedSet) -> Result<()> {
        let mut state = self.state.write().await;
        let (date, verifier) = (set.date, set.verifier_id);
        let previous = state.verified.entry(date).or_default().insert(verifier, set);
        if let Err(e) = self.persist(&state).await {
            restore(&mut state.verified, date, verifier, previous);
            return Err(e);
        }
        Ok(())
    }
}
