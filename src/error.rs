//! Load-level error taxonomy.
//!
//! Per-file problems never reach this type: they are downgraded to
//! [`HistoryWarning`](cvs_loader_core::errors::HistoryWarning)s and
//! aggregated into the [`LoadReport`](crate::report::LoadReport). A
//! `LoadError` aborts the run.

use cvs_loader_core::errors::{MalformedRevisionFile, StoreError};

use crate::cvsroot::LocationError;
use crate::pserver::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    MalformedRevisionFile(#[from] MalformedRevisionFile),

    #[error("remote protocol failure: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("store operation failed: {0}")]
    StoreWrite(#[from] StoreError),

    #[error("no revision file could be parsed ({skipped} skipped)")]
    ExhaustedRun { skipped: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("load cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("content unavailable for {path} {revision}: {reason}")]
    Content {
        path: String,
        revision: String,
        reason: String,
    },

    #[error("rsync mirror failed: {0}")]
    Mirror(String),

    #[error("worker task failed: {0}")]
    Task(String),
}

impl From<LocationError> for LoadError {
    fn from(e: LocationError) -> Self {
        LoadError::NotFound(e.to_string())
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
