//! Daily ledger records: attendance, performance and bulk verification.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    NotMarked,
    Marked,
    Approved,
    Rejected,
    /// Written by the day-end sweep. Final for the day.
    Absent,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttendanceStatus::NotMarked => "not_marked",
            AttendanceStatus::Marked => "marked",
            AttendanceStatus::Approved => "approved",
            AttendanceStatus::Rejected => "rejected",
            AttendanceStatus::Absent => "absent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_marked" => Ok(Self::NotMarked),
            "marked" => Ok(Self::Marked),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "absent" => Ok(Self::Absent),
            other => Err(Error::InvalidInput(format!("unknown attendance status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkedBy {
    #[serde(rename = "self")]
    SelfMarked,
    System,
}

impl std::fmt::Display for MarkedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkedBy::SelfMarked => write!(f, "self"),
            MarkedBy::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MarkedBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "self" => Ok(Self::SelfMarked),
            "system" => Ok(Self::System),
            other => Err(Error::InvalidInput(format!("unknown marker: {other}"))),
        }
    }
}

/// Attendance for one user on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub status: AttendanceStatus,
    pub marked_by: MarkedBy,
    pub marked_at: DateTime<Utc>,
    /// Verifier who approved or rejected the record.
    pub verified_by: Option<UserId>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    pub fn self_marked(at: DateTime<Utc>) -> Self {
        Self {
            status: AttendanceStatus::Marked,
            marked_by: MarkedBy::SelfMarked,
            marked_at: at,
            verified_by: None,
            verified_at: None,
        }
    }

    pub fn absent(at: DateTime<Utc>) -> Self {
        Self {
            status: AttendanceStatus::Absent,
            marked_by: MarkedBy::System,
            marked_at: at,
            verified_by: None,
            verified_at: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == AttendanceStatus::Approved
    }
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Five-point ordinal rating, 1 (poor) through 5 (excellent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&v) {
            Ok(Self(v))
        } else {
            Err(Error::InvalidInput(format!(
                "rating {v} outside {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }
}

impl From<Rating> for u8 {
    fn from(r: Rating) -> u8 {
        r.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub rating: Rating,
    pub notes: String,
    /// Manager who wrote the record.
    pub marked_by: UserId,
    pub marked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Verified set
// ---------------------------------------------------------------------------

/// Users a verifier confirmed present in bulk on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSet {
    pub verifier_id: UserId,
    pub date: NaiveDate,
    pub subject_ids: BTreeSet<UserId>,
    pub verified_at: DateTime<Utc>,
}

impl VerifiedSet {
    /// Build a set from raw input. The verifier's own id never survives.
    pub fn new(
        verifier_id: UserId,
        date: NaiveDate,
        subjects: impl IntoIterator<Item = UserId>,
        verified_at: DateTime<Utc>,
    ) -> Self {
        let subject_ids = subjects
            .into_iter()
            .filter(|id| *id != verifier_id)
            .collect();
        Self {
            verifier_id,
            date,
            subject_ids,
            verified_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subject_ids.is_empty()
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.subject_ids.contains(&id)
    }
}
