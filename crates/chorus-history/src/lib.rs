//! Append-only, persistent log of completed single-model queries.
//!
//! Records live in one SQLite table (`queries`) keyed by a UUID, indexed by
//! timestamp. Records are never updated or deleted by this crate.
//!
//! Substring search uses SQLite's `instr()`, so matching is case-sensitive
//! and treats `%` and `_` literally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chorus_types::{ChorusError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// File name of the history database inside the configuration directory.
pub const DB_FILE_NAME: &str = "queries.db";

/// Limit applied by the read operations when the caller passes `limit <= 0`.
pub const DEFAULT_LIMIT: i64 = 10;

/// One persisted, immutable log entry of a completed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub model: String,
    pub response: String,
    pub duration_ms: i64,
    pub temperature: f64,
}

type QueryRow = (String, String, String, String, String, i64, f64);

impl QueryRecord {
    fn from_row(row: QueryRow) -> Result<Self> {
        let (id, timestamp, prompt, model, response, duration_ms, temperature) = row;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| {
                ChorusError::HistoryRead(format!("bad timestamp {timestamp:?} on record {id}: {e}"))
            })?
            .with_timezone(&Utc);
        Ok(Self {
            id,
            timestamp,
            prompt,
            model,
            response,
            duration_ms,
            temperature,
        })
    }
}

/// Handle to the query history database. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl HistoryStore {
    /// Open (creating if needed) `<dir>/queries.db`.
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open_file(&dir.join(DB_FILE_NAME)).await
    }

    /// Open (creating if needed) the database at an explicit path.
    ///
    /// A database that cannot be opened or bootstrapped is unreadable, so
    /// those failures are reported as [`ChorusError::HistoryRead`].
    pub async fn open_file(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                ChorusError::HistoryRead(format!("failed to open {}: {e}", path.display()))
            })?;

        // Create tables (idempotent)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queries (
                id          TEXT    PRIMARY KEY,
                timestamp   TEXT    NOT NULL,
                prompt      TEXT    NOT NULL,
                model       TEXT    NOT NULL,
                response    TEXT    NOT NULL,
                duration_ms INTEGER NOT NULL,
                temperature REAL    NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| ChorusError::HistoryRead(format!("failed to create table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queries_timestamp ON queries (timestamp)")
            .execute(&pool)
            .await
            .map_err(|e| ChorusError::HistoryRead(format!("failed to create index: {e}")))?;

        tracing::debug!(path = %path.display(), "Opened query history");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record with a fresh id and the current time.
    pub async fn log_query(
        &self,
        prompt: &str,
        model: &str,
        response: &str,
        duration: Duration,
        temperature: f64,
    ) -> Result<QueryRecord> {
        let record = QueryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            prompt: prompt.to_string(),
            model: model.to_string(),
            response: response.to_string(),
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
            temperature,
        };

        // Fixed-width UTC timestamps sort lexicographically in time order.
        let timestamp = record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true);

        sqlx::query(
            r#"
            INSERT INTO queries (id, timestamp, prompt, model, response, duration_ms, temperature)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&timestamp)
        .bind(&record.prompt)
        .bind(&record.model)
        .bind(&record.response)
        .bind(record.duration_ms)
        .bind(record.temperature)
        .execute(&self.pool)
        .await
        .map_err(|e| ChorusError::HistoryWrite(e.to_string()))?;

        tracing::debug!(id = %record.id, model = %record.model, "Logged query");
        Ok(record)
    }

    /// Most recent records first, at most `limit` (10 when `limit <= 0`).
    pub async fn recent_queries(&self, limit: i64) -> Result<Vec<QueryRecord>> {
        let rows = sqlx::query_as::<_, QueryRow>(
            r#"
            SELECT id, timestamp, prompt, model, response, duration_ms, temperature
            FROM queries
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(effective_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::HistoryRead(format!("failed to fetch queries: {e}")))?;

        rows.into_iter().map(QueryRecord::from_row).collect()
    }

    /// Records whose prompt or response contains `text`, most recent first,
    /// at most `limit` (10 when `limit <= 0`).
    pub async fn search_queries(&self, text: &str, limit: i64) -> Result<Vec<QueryRecord>> {
        let rows = sqlx::query_as::<_, QueryRow>(
            r#"
            SELECT id, timestamp, prompt, model, response, duration_ms, temperature
            FROM queries
            WHERE instr(prompt, ?) > 0 OR instr(response, ?) > 0
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(text)
        .bind(text)
        .bind(effective_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChorusError::HistoryRead(format!("failed to search queries: {e}")))?;

        rows.into_iter().map(QueryRecord::from_row).collect()
    }

    /// Close every pooled connection. Later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn effective_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
