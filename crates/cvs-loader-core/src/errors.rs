//! Error and warning types for the core library.

use serde::Serialize;

/// A revision file could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed revision file {path} at offset {offset}: expected {expected}")]
pub struct MalformedRevisionFile {
    pub path: String,
    pub offset: usize,
    pub expected: String,
}

/// Failure while applying an RCS edit script or materializing a revision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("bad edit command at script line {line}: {reason}")]
    BadCommand { line: usize, reason: String },

    #[error("edit command out of range at script line {line}")]
    OutOfRange { line: usize },

    #[error("revision {revision} of {path} is unknown")]
    UnknownRevision { path: String, revision: String },

    #[error("revision {revision} of {path} has no stored text")]
    MissingText { path: String, revision: String },

    #[error("content fetch failed for {path} {revision}: {reason}")]
    Fetch {
        path: String,
        revision: String,
        reason: String,
    },
}

/// Errors surfaced by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    Write(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("stored object {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Kind of a recovered, non-fatal problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MalformedRevisionFile,
    InconsistentHistory,
    DuplicateRevision,
    AtticConflict,
    MissingCvsroot,
    OrderingRepair,
    ContentSkipped,
    ContentUnavailable,
    ResumeMarkerMissing,
}

/// Something the loader recovered from. Every dropped file, tag or
/// revision leaves one of these behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryWarning {
    pub kind: WarningKind,
    pub path: Option<String>,
    pub message: String,
}

impl HistoryWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            message: message.into(),
        }
    }

    pub fn for_path(kind: WarningKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HistoryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{:?} {}: {}", self.kind, path, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}
