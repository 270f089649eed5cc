//! In-memory [`ObjectStore`] implementation for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::errors::{StoreError, StoreResult};
use crate::object::{Blob, ObjectId, Revision, Snapshot, Tree};

use super::{ObjectStore, OriginVisit};

#[derive(Default)]
struct Inner {
    blobs: HashMap<ObjectId, Option<Arc<[u8]>>>,
    trees: HashMap<ObjectId, Tree>,
    revisions: HashMap<ObjectId, Revision>,
    snapshots: HashMap<ObjectId, Snapshot>,
    latest_snapshot: HashMap<String, ObjectId>,
    markers: HashMap<String, ObjectId>,
    visits: Vec<OriginVisit>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Read("memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Write("memory store lock poisoned".into()))
    }

    pub fn blob_count(&self) -> usize {
        self.read().map(|i| i.blobs.len()).unwrap_or(0)
    }

    pub fn tree_count(&self) -> usize {
        self.read().map(|i| i.trees.len()).unwrap_or(0)
    }

    pub fn revision_count(&self) -> usize {
        self.read().map(|i| i.revisions.len()).unwrap_or(0)
    }

    /// Stored bytes of a blob; `None` if absent or skipped.
    pub fn blob_data(&self, id: &ObjectId) -> Option<Arc<[u8]>> {
        self.read().ok()?.blobs.get(id).cloned().flatten()
    }

    pub fn visits(&self) -> Vec<OriginVisit> {
        self.read().map(|i| i.visits.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        let inner = self.read()?;
        Ok(inner.blobs.contains_key(id)
            || inner.trees.contains_key(id)
            || inner.revisions.contains_key(id)
            || inner.snapshots.contains_key(id))
    }

    async fn put_blob(&self, blob: &Blob) -> StoreResult<bool> {
        let mut inner = self.write()?;
        if inner.blobs.contains_key(&blob.id) {
            return Ok(false);
        }
        inner.blobs.insert(blob.id, blob.data.clone());
        Ok(true)
    }

    async fn put_tree(&self, tree: &Tree) -> StoreResult<bool> {
        let mut inner = self.write()?;
        if inner.trees.contains_key(&tree.id) {
            return Ok(false);
        }
        inner.trees.insert(tree.id, tree.clone());
        Ok(true)
    }

    async fn put_revision(&self, revision: &Revision) -> StoreResult<bool> {
        let mut inner = self.write()?;
        if inner.revisions.contains_key(&revision.id) {
            return Ok(false);
        }
        inner.revisions.insert(revision.id, revision.clone());
        Ok(true)
    }

    async fn put_snapshot(&self, origin: &str, snapshot: &Snapshot) -> StoreResult<()> {
        let mut inner = self.write()?;
        inner.snapshots.insert(snapshot.id, snapshot.clone());
        inner.latest_snapshot.insert(origin.to_string(), snapshot.id);
        Ok(())
    }

    async fn mark_ingested(&self, origin: &str, revision: &ObjectId) -> StoreResult<()> {
        self.write()?.markers.insert(origin.to_string(), *revision);
        Ok(())
    }

    async fn latest_ingested(&self, origin: &str) -> StoreResult<Option<ObjectId>> {
        Ok(self.read()?.markers.get(origin).copied())
    }

    async fn latest_snapshot(&self, origin: &str) -> StoreResult<Option<Snapshot>> {
        let inner = self.read()?;
        Ok(inner
            .latest_snapshot
            .get(origin)
            .and_then(|id| inner.snapshots.get(id))
            .cloned())
    }

    async fn revision(&self, id: &ObjectId) -> StoreResult<Option<Revision>> {
        Ok(self.read()?.revisions.get(id).cloned())
    }

    async fn tree(&self, id: &ObjectId) -> StoreResult<Option<Tree>> {
        Ok(self.read()?.trees.get(id).cloned())
    }

    async fn record_visit(&self, visit: &OriginVisit) -> StoreResult<()> {
        self.write()?.visits.push(visit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_writes_are_idempotent() {
        let store = InMemoryStore::new();
        let blob = Blob::new(Arc::from(&b"hello\n"[..]));
        assert!(store.put_blob(&blob).await.unwrap());
        assert!(!store.put_blob(&blob).await.unwrap());
        assert!(store.has(&blob.id).await.unwrap());
        assert_eq!(store.blob_count(), 1);

        let tree = Tree::empty();
        assert!(store.put_tree(&tree).await.unwrap());
        assert!(!store.put_tree(&tree).await.unwrap());
        assert_eq!(store.tree(&tree.id).await.unwrap(), Some(tree));
    }

    #[tokio::test]
    async fn test_skipped_blob_has_no_data() {
        let store = InMemoryStore::new();
        let blob = Blob::skipped(b"huge");
        store.put_blob(&blob).await.unwrap();
        assert!(store.has(&blob.id).await.unwrap());
        assert!(store.blob_data(&blob.id).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_and_marker_per_origin() {
        let store = InMemoryStore::new();
        assert!(store.latest_ingested("o").await.unwrap().is_none());
        let tree = Tree::empty();
        let rev = Revision::new(
            tree.id,
            vec![],
            "joe".into(),
            chrono::DateTime::from_timestamp(0, 0).unwrap(),
            "m".into(),
            "HEAD".into(),
            "k".into(),
        );
        store.put_revision(&rev).await.unwrap();
        let mut branches = BTreeMap::new();
        branches.insert("HEAD".to_string(), rev.id);
        let snap = Snapshot::new(branches);
        store.put_snapshot("o", &snap).await.unwrap();
        store.mark_ingested("o", &rev.id).await.unwrap();

        assert_eq!(store.latest_ingested("o").await.unwrap(), Some(rev.id));
        assert_eq!(store.latest_snapshot("o").await.unwrap(), Some(snap));
        assert!(store.latest_snapshot("other").await.unwrap().is_none());
        assert_eq!(store.revision(&rev.id).await.unwrap(), Some(rev));
    }
}
