//! Archive storage abstraction.
//!
//! The [`ObjectStore`] trait is the only way the loader touches persistent
//! state. Backends must be `Send + Sync` and every write must be
//! idempotent: writing an object that already exists is a no-op.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`has`](ObjectStore::has) | Existence check for any object id |
//! | [`put_blob`](ObjectStore::put_blob) | Store file contents (or a skipped reference) |
//! | [`put_tree`](ObjectStore::put_tree) | Store a directory listing |
//! | [`put_revision`](ObjectStore::put_revision) | Store a synthesized commit |
//! | [`put_snapshot`](ObjectStore::put_snapshot) | Record branch/tag state for an origin |
//! | [`mark_ingested`](ObjectStore::mark_ingested) | Move the origin's "last ingested" marker |
//! | [`latest_ingested`](ObjectStore::latest_ingested) | Read the marker |
//! | [`latest_snapshot`](ObjectStore::latest_snapshot) | Most recent snapshot of an origin |
//! | [`revision`](ObjectStore::revision) / [`tree`](ObjectStore::tree) | Read back objects on resume |
//! | [`record_visit`](ObjectStore::record_visit) | Append the outcome of a load |

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreResult;
use crate::object::{Blob, ObjectId, Revision, Snapshot, Tree};

/// Outcome of one load of an origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginVisit {
    pub origin: String,
    pub run_id: String,
    pub date: DateTime<Utc>,
    /// `full`, `partial` or `failed`.
    pub status: String,
    /// `eventful` when the visit wrote at least one new revision.
    pub eventful: bool,
    pub snapshot: Option<ObjectId>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn has(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Returns `true` when the object was newly written.
    async fn put_blob(&self, blob: &Blob) -> StoreResult<bool>;

    async fn put_tree(&self, tree: &Tree) -> StoreResult<bool>;

    async fn put_revision(&self, revision: &Revision) -> StoreResult<bool>;

    async fn put_snapshot(&self, origin: &str, snapshot: &Snapshot) -> StoreResult<()>;

    async fn mark_ingested(&self, origin: &str, revision: &ObjectId) -> StoreResult<()>;

    async fn latest_ingested(&self, origin: &str) -> StoreResult<Option<ObjectId>>;

    async fn latest_snapshot(&self, origin: &str) -> StoreResult<Option<Snapshot>>;

    async fn revision(&self, id: &ObjectId) -> StoreResult<Option<Revision>>;

    async fn tree(&self, id: &ObjectId) -> StoreResult<Option<Tree>>;

    async fn record_visit(&self, visit: &OriginVisit) -> StoreResult<()>;
}
