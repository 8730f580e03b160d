//! Session host.
//!
//! [`Engine`] owns one review queue per QC reviewer and one task walker per
//! worker. Each user's state sits behind its own `tokio::sync::Mutex`, so
//! calls for the same user are serialized while different users never
//! contend. Running clocks are driven by one [`Ticker`] each; the ticker
//! only holds a weak handle, so dropping the engine stops every clock.
//!
//! Ledgers are the only state shared between users.

pub mod manager;
pub mod review;
pub mod task;
pub mod watch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::evidence::{BlobStore, EvidenceBlob, EvidenceRef, MemoryBlobStore};
use crate::identity::Directory;
use crate::ledger::Ledgers;
use crate::model::{CurrentUser, UserId};
use crate::telemetry::unit::count_event;

pub use manager::GateReport;
pub use watch::GateWatcher;

use review::ReviewerSession;
use task::WorkerSession;

/// One engine second.
pub(crate) const TICK_PERIOD: Duration = Duration::from_secs(1);

const EVENT_FEED_CAPACITY: usize = 1024;

type SessionMap<T> = Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<T>>>>;

// ---------------------------------------------------------------------------
// Event sink
// ---------------------------------------------------------------------------

/// Stamps drained engine events and fans them out.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<Event>,
    seq: Arc<AtomicU64>,
}

impl EventSink {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_FEED_CAPACITY);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn emit(&self, user: UserId, kinds: Vec<EventKind>) {
        for kind in kinds {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            count_event(&kind);
            info!(seq, %user, event = kind.name(), "engine event");
            // Nobody listening is fine.
            let _ = self.tx.send(Event {
                seq,
                timestamp: Utc::now(),
                user_id: user,
                kind,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    directory: Directory,
    ledgers: Ledgers,
    blobs: Arc<dyn BlobStore>,
    reviewers: SessionMap<ReviewerSession>,
    workers: SessionMap<WorkerSession>,
    sink: EventSink,
}

impl Engine {
    pub fn new(config: EngineConfig, ledgers: Ledgers, blobs: Arc<dyn BlobStore>) -> Self {
        let directory = Directory::from_entries(&config.users);
        info!(
            users = directory.len(),
            policy = ?config.gate.team_verification,
            "engine ready"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                directory,
                ledgers,
                blobs,
                reviewers: Mutex::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                sink: EventSink::new(),
            }),
        }
    }

    /// Engine with process-local ledgers and evidence (for testing).
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, Ledgers::in_memory(), Arc::new(MemoryBlobStore::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn ledgers(&self) -> &Ledgers {
        &self.inner.ledgers
    }

    pub fn directory(&self) -> &Directory {
        &self.inner.directory
    }

    /// Every stamped engine event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.sink.tx.subscribe()
    }

    /// Resolve a caller through the directory.
    pub fn user(&self, id: UserId) -> Result<CurrentUser> {
        self.inner
            .directory
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Unauthorized(format!("unknown user {id}")))
    }

    // -- evidence -----------------------------------------------------------

    /// Store a screenshot for `unit_id` and hand back its reference.
    pub async fn upload_evidence(
        &self,
        user: &CurrentUser,
        unit_id: &str,
        blob: EvidenceBlob,
    ) -> Result<EvidenceRef> {
        if unit_id.trim().is_empty() {
            return Err(Error::InvalidInput("unit id is required".into()));
        }
        let evidence_ref = self.inner.blobs.put_evidence(unit_id, blob).await?;
        info!(user = %user.id, unit = unit_id, evidence = %evidence_ref, "evidence uploaded");
        Ok(evidence_ref)
    }

    /// A reference is only good if the store actually has the blob. A
    /// missing reference is left for the walker to reject.
    pub(crate) async fn check_uploaded(&self, evidence_ref: Option<&EvidenceRef>) -> Result<()> {
        let Some(evidence_ref) = evidence_ref else {
            return Ok(());
        };
        match self.inner.blobs.get_evidence(evidence_ref).await? {
            Some(_) => Ok(()),
            None => Err(Error::MissingEvidence("screenshot was never uploaded")),
        }
    }

    // -- internals ----------------------------------------------------------

    pub(crate) fn sink(&self) -> &EventSink {
        &self.inner.sink
    }

    fn reviewer_slot(&self, user: UserId) -> Arc<tokio::sync::Mutex<ReviewerSession>> {
        let mut sessions = lock_map(&self.inner.reviewers);
        Arc::clone(sessions.entry(user).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(ReviewerSession::new(
                user,
                self.inner.config.queue.clone(),
            )))
        }))
    }

    fn existing_reviewer(&self, user: UserId) -> Option<Arc<tokio::sync::Mutex<ReviewerSession>>> {
        lock_map(&self.inner.reviewers).get(&user).cloned()
    }

    fn worker_slot(&self, user: UserId) -> Arc<tokio::sync::Mutex<WorkerSession>> {
        let mut sessions = lock_map(&self.inner.workers);
        Arc::clone(
            sessions
                .entry(user)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(WorkerSession::new(user)))),
        )
    }

    fn existing_worker(&self, user: UserId) -> Option<Arc<tokio::sync::Mutex<WorkerSession>>> {
        lock_map(&self.inner.workers).get(&user).cloned()
    }
}

fn lock_map<T>(map: &SessionMap<T>) -> std::sync::MutexGuard<'_, HashMap<UserId, Arc<tokio::sync::Mutex<T>>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
