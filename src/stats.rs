//! Store statistics and visit overview.
//!
//! Summarizes what the archive holds: object counts per kind, bytes of
//! archived content, and the latest visit of every origin. Used by
//! `cvsload stats` to confirm that loads are landing.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Latest visit of one origin.
struct OriginStats {
    origin: String,
    visits: i64,
    status: String,
    eventful: bool,
    last_visit_ts: i64,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let blobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs").fetch_one(&pool).await?;
    let skipped: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs WHERE data IS NULL")
        .fetch_one(&pool)
        .await?;
    let content_bytes: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(length), 0) FROM blobs WHERE data IS NOT NULL")
        .fetch_one(&pool)
        .await?;
    let trees: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trees").fetch_one(&pool).await?;
    let revisions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revisions").fetch_one(&pool).await?;
    let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots").fetch_one(&pool).await?;

    let db_size = std::fs::metadata(&config.store.path).map(|m| m.len()).unwrap_or(0);

    println!("cvsload — Store Stats");
    println!("=====================");
    println!();
    println!("  Store:       {}", config.store.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Revisions:   {}", revisions);
    println!("  Trees:       {}", trees);
    println!("  Blobs:       {} ({} by reference only)", blobs, skipped);
    println!("  Content:     {}", format_bytes(content_bytes.max(0) as u64));
    println!("  Snapshots:   {}", snapshots);

    // Latest visit per origin
    let rows = sqlx::query(
        r#"
        SELECT v.origin, v.status, v.eventful, v.date,
               (SELECT COUNT(*) FROM origin_visits w WHERE w.origin = v.origin) AS visits
        FROM origin_visits v
        WHERE v.rowid = (SELECT MAX(rowid) FROM origin_visits w WHERE w.origin = v.origin)
        ORDER BY v.origin
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let origins: Vec<OriginStats> = rows
        .iter()
        .map(|row| OriginStats {
            origin: row.get("origin"),
            visits: row.get("visits"),
            status: row.get("status"),
            eventful: row.get("eventful"),
            last_visit_ts: row.get("date"),
        })
        .collect();

    if !origins.is_empty() {
        println!();
        println!("  By origin:");
        println!(
            "  {:<40} {:>6} {:<8} {:<11}   {}",
            "ORIGIN", "VISITS", "STATUS", "VISIT", "LAST VISIT"
        );
        println!("  {}", "-".repeat(84));

        for o in &origins {
            println!(
                "  {:<40} {:>6} {:<8} {:<11}   {}",
                o.origin,
                o.visits,
                o.status,
                if o.eventful { "eventful" } else { "uneventful" },
                format_ts_relative(o.last_visit_ts)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
