//! SQLite-backed [`ObjectStore`].
//!
//! Objects are keyed by their hex id. Tree entries and snapshot branches
//! are stored as JSON; every object read back is rehashed and rejected as
//! [`StoreError::Corrupt`] when its id does not match.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};

use cvs_loader_core::errors::{StoreError, StoreResult};
use cvs_loader_core::object::{Blob, ObjectId, Revision, Snapshot, Tree, TreeEntry};
use cvs_loader_core::store::{ObjectStore, OriginVisit};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn write_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Write(e.to_string())
}

fn read_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Read(e.to_string())
}

fn parse_id(hex: &str) -> StoreResult<ObjectId> {
    ObjectId::from_hex(hex).ok_or_else(|| StoreError::Corrupt {
        id: hex.to_string(),
        reason: "not a valid object id".into(),
    })
}

fn check_id(expected: &ObjectId, actual: &ObjectId) -> StoreResult<()> {
    if expected != actual {
        return Err(StoreError::Corrupt {
            id: expected.to_hex(),
            reason: format!("content hashes to {}", actual),
        });
    }
    Ok(())
}

impl SqliteStore {
    /// Wrap a pool whose schema has been created by
    /// [`migrate_pool`](crate::migrate::migrate_pool).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Content of a blob, `None` when unknown or stored by reference only.
    pub async fn blob_data(&self, id: &ObjectId) -> StoreResult<Option<Arc<[u8]>>> {
        let data: Option<Option<Vec<u8>>> = sqlx::query_scalar("SELECT data FROM blobs WHERE id = ?")
            .bind(id.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        Ok(data.flatten().map(Arc::from))
    }

    async fn update_origin(&self, origin: &str, column: &str, value: &ObjectId) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO origins (origin, {col}, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(origin) DO UPDATE SET {col} = excluded.{col}, updated_at = excluded.updated_at",
            col = column
        );
        sqlx::query(&sql)
            .bind(origin)
            .bind(value.to_hex())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn origin_pointer(&self, origin: &str, column: &str) -> StoreResult<Option<ObjectId>> {
        let sql = format!("SELECT {} FROM origins WHERE origin = ?", column);
        let value: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(origin)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        value.flatten().map(|hex| parse_id(&hex)).transpose()
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM blobs WHERE id = ?1)
                OR EXISTS(SELECT 1 FROM trees WHERE id = ?1)
                OR EXISTS(SELECT 1 FROM revisions WHERE id = ?1)
                OR EXISTS(SELECT 1 FROM snapshots WHERE id = ?1)
            "#,
        )
        .bind(id.to_hex())
        .fetch_one(&self.pool)
        .await
        .map_err(read_err)?;
        Ok(found)
    }

    async fn put_blob(&self, blob: &Blob) -> StoreResult<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO blobs (id, length, data) VALUES (?, ?, ?)")
            .bind(blob.id.to_hex())
            .bind(blob.length as i64)
            .bind(blob.data.as_deref())
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_tree(&self, tree: &Tree) -> StoreResult<bool> {
        let entries = serde_json::to_string(&tree.entries).map_err(write_err)?;
        let result = sqlx::query("INSERT OR IGNORE INTO trees (id, entries_json) VALUES (?, ?)")
            .bind(tree.id.to_hex())
            .bind(entries)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_revision(&self, revision: &Revision) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO revisions (id, tree, author, date, message, branch, changeset_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(revision.id.to_hex())
        .bind(revision.tree.to_hex())
        .bind(&revision.author)
        .bind(revision.date.timestamp())
        .bind(&revision.message)
        .bind(&revision.branch)
        .bind(&revision.changeset_key)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            for (position, parent) in revision.parents.iter().enumerate() {
                sqlx::query("INSERT INTO revision_parents (revision_id, position, parent_id) VALUES (?, ?, ?)")
                    .bind(revision.id.to_hex())
                    .bind(position as i64)
                    .bind(parent.to_hex())
                    .execute(&mut *tx)
                    .await
                    .map_err(write_err)?;
            }
        }
        tx.commit().await.map_err(write_err)?;
        Ok(inserted)
    }

    async fn put_snapshot(&self, origin: &str, snapshot: &Snapshot) -> StoreResult<()> {
        let branches = serde_json::to_string(&snapshot.branches).map_err(write_err)?;
        sqlx::query("INSERT OR IGNORE INTO snapshots (id, branches_json) VALUES (?, ?)")
            .bind(snapshot.id.to_hex())
            .bind(branches)
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        self.update_origin(origin, "latest_snapshot", &snapshot.id).await
    }

    async fn mark_ingested(&self, origin: &str, revision: &ObjectId) -> StoreResult<()> {
        self.update_origin(origin, "last_ingested", revision).await
    }

    async fn latest_ingested(&self, origin: &str) -> StoreResult<Option<ObjectId>> {
        self.origin_pointer(origin, "last_ingested").await
    }

    async fn latest_snapshot(&self, origin: &str) -> StoreResult<Option<Snapshot>> {
        let Some(id) = self.origin_pointer(origin, "latest_snapshot").await? else {
            return Ok(None);
        };
        let json: Option<String> = sqlx::query_scalar("SELECT branches_json FROM snapshots WHERE id = ?")
            .bind(id.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        let Some(json) = json else {
            return Err(StoreError::Corrupt {
                id: id.to_hex(),
                reason: "latest snapshot missing".into(),
            });
        };
        let branches: BTreeMap<String, ObjectId> = serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            id: id.to_hex(),
            reason: e.to_string(),
        })?;
        let snapshot = Snapshot::new(branches);
        check_id(&id, &snapshot.id)?;
        Ok(Some(snapshot))
    }

    async fn revision(&self, id: &ObjectId) -> StoreResult<Option<Revision>> {
        let row = sqlx::query(
            "SELECT tree, author, date, message, branch, changeset_key FROM revisions WHERE id = ?",
        )
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let parent_rows: Vec<String> =
            sqlx::query_scalar("SELECT parent_id FROM revision_parents WHERE revision_id = ? ORDER BY position")
                .bind(id.to_hex())
                .fetch_all(&self.pool)
                .await
                .map_err(read_err)?;
        let parents = parent_rows.iter().map(|p| parse_id(p)).collect::<StoreResult<Vec<_>>>()?;

        let tree: String = row.get("tree");
        let ts: i64 = row.get("date");
        let date = DateTime::from_timestamp(ts, 0).ok_or_else(|| StoreError::Corrupt {
            id: id.to_hex(),
            reason: format!("bad timestamp {}", ts),
        })?;
        let revision = Revision::new(
            parse_id(&tree)?,
            parents,
            row.get("author"),
            date,
            row.get("message"),
            row.get("branch"),
            row.get("changeset_key"),
        );
        check_id(id, &revision.id)?;
        Ok(Some(revision))
    }

    async fn tree(&self, id: &ObjectId) -> StoreResult<Option<Tree>> {
        let json: Option<String> = sqlx::query_scalar("SELECT entries_json FROM trees WHERE id = ?")
            .bind(id.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?;
        let Some(json) = json else {
            return Ok(None);
        };
        let entries: Vec<TreeEntry> = serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            id: id.to_hex(),
            reason: e.to_string(),
        })?;
        let tree = Tree::new(entries);
        check_id(id, &tree.id)?;
        Ok(Some(tree))
    }

    async fn record_visit(&self, visit: &OriginVisit) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO origin_visits (run_id, origin, date, status, eventful, snapshot)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&visit.run_id)
        .bind(&visit.origin)
        .bind(visit.date.timestamp())
        .bind(&visit.status)
        .bind(visit.eventful)
        .bind(visit.snapshot.map(|s| s.to_hex()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }
}
