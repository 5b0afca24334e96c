use super::model::ChangeRow;
use crate::model::{Collection, Operation, PendingChange, Record};
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the
/// parent directory exists. In-memory and non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot cache

/// Overwrite the stored snapshot for `collection` with `records` and the
/// current timestamp. Best-effort: a storage failure is logged, never
/// surfaced, so a full disk cannot take the write path down with it.
#[instrument(skip_all, fields(collection = collection.as_str()))]
pub async fn save_snapshot(pool: &Pool, collection: Collection, records: &[Record]) {
    let saved_at = Utc::now().timestamp_millis();
    let body = match serde_json::to_string(records) {
        Ok(body) => body,
        Err(err) => {
            warn!(?err, "failed to serialize snapshot; keeping previous one");
            return;
        }
    };
    let res = sqlx::query(
        "INSERT INTO snapshots (collection, records, saved_at_ms) VALUES (?, ?, ?)
         ON CONFLICT(collection) DO UPDATE SET records = excluded.records, saved_at_ms = excluded.saved_at_ms",
    )
    .bind(collection.as_str())
    .bind(body)
    .bind(saved_at)
    .execute(pool)
    .await;
    if let Err(err) = res {
        warn!(?err, "failed to persist snapshot");
    }
}

/// Last-saved record list for `collection`. Missing or unreadable data is
/// an empty list, never an error.
pub async fn load_snapshot(pool: &Pool, collection: Collection) -> Vec<Record> {
    let body: Option<String> =
        match sqlx::query_scalar("SELECT records FROM snapshots WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_optional(pool)
            .await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(collection = collection.as_str(), ?err, "failed to read snapshot");
                return Vec::new();
            }
        };
    let Some(body) = body else {
        return Vec::new();
    };
    match serde_json::from_str(&body) {
        Ok(records) => records,
        Err(err) => {
            warn!(collection = collection.as_str(), ?err, "snapshot unreadable; treating as empty");
            Vec::new()
        }
    }
}

/// When the snapshot for `collection` was last replaced, or None if never.
pub async fn last_write_time(pool: &Pool, collection: Collection) -> Option<DateTime<Utc>> {
    let ms: Option<i64> =
        match sqlx::query_scalar("SELECT saved_at_ms FROM snapshots WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_optional(pool)
            .await
        {
            Ok(ms) => ms,
            Err(err) => {
                warn!(collection = collection.as_str(), ?err, "failed to read snapshot timestamp");
                return None;
            }
        };
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

// ---------------------------------------------------------------------------
// Pending change queue

/// Append a mutation to the queue and return its change id. The id is
/// composed from collection, operation, enqueue time and a random suffix so
/// two changes within the same millisecond cannot collide. Persistence is
/// best-effort: a storage failure is logged and swallowed.
#[instrument(skip_all, fields(collection = collection.as_str(), operation = operation.as_str()))]
pub async fn enqueue_change(
    pool: &Pool,
    collection: Collection,
    operation: Operation,
    payload: Option<&Map<String, Value>>,
    target_id: Option<&str>,
) -> String {
    let queued_at = Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let change_id = format!(
        "{}_{}_{}_{}",
        collection.as_str(),
        operation.as_str(),
        queued_at,
        &suffix[..8]
    );

    let payload_text = payload.and_then(|map| match serde_json::to_string(map) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(?err, "failed to serialize change payload");
            None
        }
    });

    let res = sqlx::query(
        "INSERT INTO pending_changes (change_id, collection, operation, target_id, payload, queued_at_ms, retry_count)
         VALUES (?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(&change_id)
    .bind(collection.as_str())
    .bind(operation.as_str())
    .bind(target_id)
    .bind(payload_text)
    .bind(queued_at)
    .execute(pool)
    .await;
    if let Err(err) = res {
        warn!(%change_id, ?err, "failed to persist pending change");
    }
    change_id
}

/// All queued changes in insertion order. Rows that no longer parse are
/// skipped rather than failing the listing.
pub async fn list_changes(pool: &Pool) -> Result<Vec<PendingChange>> {
    let rows = sqlx::query(
        "SELECT change_id, collection, operation, target_id, payload, queued_at_ms, retry_count
         FROM pending_changes ORDER BY seq ASC",
    )
    .fetch_all(pool)
    .await?;

    let changes = rows
        .into_iter()
        .map(|row| ChangeRow {
            change_id: row.get("change_id"),
            collection: row.get("collection"),
            operation: row.get("operation"),
            target_id: row.get("target_id"),
            payload: row.get("payload"),
            queued_at_ms: row.get("queued_at_ms"),
            retry_count: row.get("retry_count"),
        })
        .filter_map(ChangeRow::into_change)
        .collect();
    Ok(changes)
}

/// Delete one queue entry by id; no-op if absent.
#[instrument(skip_all)]
pub async fn remove_change(pool: &Pool, change_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM pending_changes WHERE change_id = ?")
        .bind(change_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_changes(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Increment a change's retry counter and return the new value.
#[instrument(skip_all)]
pub async fn bump_retry(pool: &Pool, change_id: &str) -> Result<i32> {
    let count: i32 = sqlx::query_scalar(
        "UPDATE pending_changes SET retry_count = retry_count + 1 WHERE change_id = ? RETURNING retry_count",
    )
    .bind(change_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Engine bookkeeping

const LAST_SYNC_KEY: &str = "last_sync";

pub async fn set_last_sync(pool: &Pool, at: DateTime<Utc>) -> Result<()> {
    let ms = at.timestamp_millis();
    sqlx::query(
        "INSERT INTO sync_meta (key, value, updated_at_ms) VALUES (?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_ms = excluded.updated_at_ms",
    )
    .bind(LAST_SYNC_KEY)
    .bind(ms.to_string())
    .bind(ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn last_sync(pool: &Pool) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
        .bind(LAST_SYNC_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
}
