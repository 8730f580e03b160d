//! Eager gate recompute.
//!
//! A [`GateWatcher`] follows the ledger change feed and recomputes one
//! manager's gate whenever a write lands on the watched date. Readers get
//! the latest state from a `watch` channel without touching the ledgers.

use chrono::NaiveDate;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::gate::GateStatus;
use crate::identity::require_role;
use crate::ledger::{LedgerChange, LedgerKind};
use crate::model::{CurrentUser, Role};

use super::{Engine, GateReport};

pub struct GateWatcher {
    rx: watch::Receiver<GateReport>,
    handle: JoinHandle<()>,
}

impl GateWatcher {
    /// Compute the current state, then follow changes until dropped.
    pub async fn spawn(engine: Engine, manager: CurrentUser, date: NaiveDate) -> Result<Self> {
        require_role(&manager, Role::Manager)?;
        // Subscribe before the first read so no write slips between them.
        let changes = engine.ledgers().subscribe();
        let initial = engine.gate_state(&manager, date).await?;
        let (tx, rx) = watch::channel(initial);
        let handle = tokio::spawn(follow(engine, manager, date, changes, tx));
        Ok(Self { rx, handle })
    }

    pub fn current(&self) -> GateReport {
        *self.rx.borrow()
    }

    pub fn status(&self) -> GateStatus {
        self.rx.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<GateReport> {
        self.rx.clone()
    }

    /// Wait for the next recompute that changed the state.
    pub async fn changed(&mut self) -> Result<GateReport> {
        self.rx
            .changed()
            .await
            .map_err(|_| Error::Other("gate watcher stopped".into()))?;
        Ok(*self.rx.borrow_and_update())
    }
}

impl Drop for GateWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Does this write move the manager's gate?
fn relevant(change: &LedgerChange, manager: &CurrentUser, date: NaiveDate) -> bool {
    if change.date != date {
        return false;
    }
    match change.kind {
        LedgerKind::Verification => change.subject == manager.id,
        // Verified subjects may sit outside the assigned team.
        LedgerKind::Performance => true,
        LedgerKind::Attendance => {
            change.subject == manager.id || manager.assigned_team_ids.contains(&change.subject)
        }
    }
}

async fn follow(
    engine: Engine,
    manager: CurrentUser,
    date: NaiveDate,
    mut changes: broadcast::Receiver<LedgerChange>,
    tx: watch::Sender<GateReport>,
) {
    debug!(manager = %manager.id, %date, "gate watcher started");
    loop {
        match changes.recv().await {
            Ok(change) if relevant(&change, &manager, date) => {}
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(manager = %manager.id, missed, "gate watcher lagged, recomputing");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        let report = match engine.gate_state(&manager, date).await {
            Ok(report) => report,
            Err(e) => {
                warn!(manager = %manager.id, %date, error = %e, "gate recompute failed");
                continue;
            }
        };

        let changed = tx.send_if_modified(|current| {
            if *current == report {
                false
            } else {
                *current = report;
                true
            }
        });
        if changed {
            info!(manager = %manager.id, %date, status = ?report.status, "gate changed");
            engine.sink().emit(
                manager.id,
                vec![EventKind::GateChanged {
                    date,
                    status: report.status,
                }],
            );
        }
        if tx.is_closed() {
            break;
        }
    }
}
