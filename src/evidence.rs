//! Evidence: proof attached to completed work units.
//!
//! Two layers. The [`BlobStore`] is the external collaborator that keeps
//! screenshot bytes and hands back an [`EvidenceRef`]. The
//! [`EvidenceBoard`] is plain data: the submission metadata (notes,
//! rating, screenshot reference) keyed by the unit it was submitted for.
//! Detaching a unit's evidence leaves the blob where it is.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Rating;

/// Handle to a stored evidence blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(pub String);

impl EvidenceRef {
    pub fn generate() -> Self {
        Self(format!("ev-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EvidenceRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceBlob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Submission metadata for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub notes: String,
    pub rating: Option<Rating>,
    pub screenshot: Option<EvidenceRef>,
    pub attached_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(notes: impl Into<String>, screenshot: Option<EvidenceRef>) -> Self {
        Self {
            notes: notes.into(),
            rating: None,
            screenshot,
            attached_at: Utc::now(),
        }
    }

    pub fn with_rating(mut self, rating: Rating) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Notes present and a screenshot attached.
    pub fn check_complete(&self) -> Result<()> {
        if self.notes.trim().is_empty() {
            return Err(Error::MissingEvidence("notes are required"));
        }
        if self.screenshot.is_none() {
            return Err(Error::MissingEvidence("screenshot is required"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceBoard {
    attachments: HashMap<String, Evidence>,
}

impl EvidenceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach evidence to a unit, replacing anything attached before.
    pub fn attach(&mut self, unit_id: impl Into<String>, evidence: Evidence) -> Option<Evidence> {
        self.attachments.insert(unit_id.into(), evidence)
    }

    pub fn get(&self, unit_id: &str) -> Option<&Evidence> {
        self.attachments.get(unit_id)
    }

    pub fn detach(&mut self, unit_id: &str) -> Option<Evidence> {
        self.attachments.remove(unit_id)
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_evidence(&self, unit_id: &str, blob: EvidenceBlob) -> Result<EvidenceRef>;

    async fn get_evidence(&self, evidence_ref: &EvidenceRef) -> Result<Option<EvidenceBlob>>;
}

/// Process-local blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<EvidenceRef, (String, EvidenceBlob)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit the blob was uploaded for.
    pub fn owner_of(&self, evidence_ref: &EvidenceRef) -> Option<String> {
        self.blobs
            .lock()
            .ok()?
            .get(evidence_ref)
            .map(|(unit, _)| unit.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_evidence(&self, unit_id: &str, blob: EvidenceBlob) -> Result<EvidenceRef> {
        if blob.bytes.is_empty() {
            return Err(Error::MissingEvidence("empty evidence upload"));
        }
        let evidence_ref = EvidenceRef::generate();
        self.blobs
            .lock()
            .map_err(|_| Error::LedgerUnavailable("evidence store poisoned".to_string()))?
            .insert(evidence_ref.clone(), (unit_id.to_string(), blob));
        Ok(evidence_ref)
    }

    async fn get_evidence(&self, evidence_ref: &EvidenceRef) -> Result<Option<EvidenceBlob>> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| Error::LedgerUnavailable("evidence store poisoned".to_string()))?
            .get(evidence_ref)
            .map(|(_, blob)| blob.clone()))
    }
}
