use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table the store uses. Safe to run on an existing store.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Contents; `data` is NULL for blobs referenced by hash only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blobs (
            id TEXT PRIMARY KEY,
            length INTEGER NOT NULL,
            data BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trees (
            id TEXT PRIMARY KEY,
            entries_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            id TEXT PRIMARY KEY,
            tree TEXT NOT NULL,
            author TEXT NOT NULL,
            date INTEGER NOT NULL,
            message TEXT NOT NULL,
            branch TEXT NOT NULL,
            changeset_key TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revision_parents (
            revision_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            parent_id TEXT NOT NULL,
            PRIMARY KEY (revision_id, position),
            FOREIGN KEY (revision_id) REFERENCES revisions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            branches_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-origin pointers: latest snapshot and "last ingested" marker
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS origins (
            origin TEXT PRIMARY KEY,
            latest_snapshot TEXT,
            last_ingested TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS origin_visits (
            run_id TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            date INTEGER NOT NULL,
            status TEXT NOT NULL,
            eventful INTEGER NOT NULL,
            snapshot TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_revisions_changeset ON revisions(changeset_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_origin_date ON origin_visits(origin, date DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
