//! Error types for clickwork-engine.
//!
//! Every rejected operation leaves engine state untouched. `Error::kind`
//! collapses the variants onto the stable taxonomy that callers (and the
//! HTTP surface) switch on.

use serde::Serialize;
use thiserror::Error;

use crate::model::{ItemId, LinkId, SubtaskId, UserId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("timer already running")]
    AlreadyRunning,

    #[error("item {0} is locked; unlock and advance first")]
    ItemLocked(ItemId),

    #[error("item {0} is not the current item")]
    NotCurrentItem(ItemId),

    #[error("no item is locked")]
    NotLocked,

    #[error("session is paused")]
    SessionPaused,

    #[error("link {active} is already under review")]
    ReviewAlreadyInProgress { active: LinkId },

    #[error("link {0} is not under review")]
    NotInProgress(LinkId),

    #[error("out of order: {0}")]
    OutOfOrder(String),

    #[error("subtask {subtask} has {remaining} unreviewed link(s)")]
    LinksIncomplete { subtask: SubtaskId, remaining: usize },

    #[error("missing evidence: {0}")]
    MissingEvidence(&'static str),

    #[error("already completed: {0}")]
    AlreadyCompleted(String),

    #[error("already recorded for {date}: user {user}")]
    AlreadyRecorded { date: chrono::NaiveDate, user: UserId },

    #[error("attendance for user {user} on {date} is final ({status})")]
    AttendanceFinal {
        date: chrono::NaiveDate,
        user: UserId,
        status: crate::model::AttendanceStatus,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Stable classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyRunning,
    ItemLocked,
    NotCurrentItem,
    NotLocked,
    SessionPaused,
    ReviewAlreadyInProgress,
    NotInProgress,
    OutOfOrder,
    LinksIncomplete,
    MissingEvidence,
    AlreadyCompleted,
    AlreadyRecorded,
    AttendanceFinal,
    Unauthorized,
    NotFound,
    InvalidInput,
    LedgerUnavailable,
    Config,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyRunning => ErrorKind::AlreadyRunning,
            Error::ItemLocked(_) => ErrorKind::ItemLocked,
            Error::NotCurrentItem(_) => ErrorKind::NotCurrentItem,
            Error::NotLocked => ErrorKind::NotLocked,
            Error::SessionPaused => ErrorKind::SessionPaused,
            Error::ReviewAlreadyInProgress { .. } => ErrorKind::ReviewAlreadyInProgress,
            Error::NotInProgress(_) => ErrorKind::NotInProgress,
            Error::OutOfOrder(_) => ErrorKind::OutOfOrder,
            Error::LinksIncomplete { .. } => ErrorKind::LinksIncomplete,
            Error::MissingEvidence(_) => ErrorKind::MissingEvidence,
            Error::AlreadyCompleted(_) => ErrorKind::AlreadyCompleted,
            Error::AlreadyRecorded { .. } => ErrorKind::AlreadyRecorded,
            Error::AttendanceFinal { .. } => ErrorKind::AttendanceFinal,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::LedgerUnavailable(_) => ErrorKind::LedgerUnavailable,
            Error::Config(_) => ErrorKind::Config,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::LedgerUnavailable(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::LedgerUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
