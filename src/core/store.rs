//! Video Record Store: durable per-video state keyed by (job, video).
//!
//! Writes are partial merges guarded by an optimistic version token. The
//! SQLite implementation keeps the indexed columns next to the full record
//! serialized as JSON, and serializes access through a single connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{InvalidTransition, VideoKey, VideoPatch, VideoRecord};

/// Errors that can occur in the video store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Video not found: {0}")]
    NotFound(VideoKey),

    #[error("Video already exists: {0}")]
    AlreadyExists(VideoKey),

    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: VideoKey,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable per-video state
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Current record, if any (carries its version)
    async fn get(&self, key: &VideoKey) -> Result<Option<VideoRecord>, StoreError>;

    /// Insert a new record and return its version
    async fn insert(&self, record: VideoRecord) -> Result<u64, StoreError>;

    /// Merge `patch` into an existing record.
    ///
    /// With `expected_version` set, the write only happens if the stored
    /// version still matches. Returns the merged record with its new version.
    async fn conditional_merge(
        &self,
        key: &VideoKey,
        patch: &VideoPatch,
        expected_version: Option<u64>,
    ) -> Result<VideoRecord, StoreError>;

    async fn list_job(&self, job_id: &str) -> Result<Vec<VideoRecord>, StoreError>;

    async fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError>;

    /// Delete one record; returns whether it existed
    async fn delete(&self, key: &VideoKey) -> Result<bool, StoreError>;

    /// Delete every record of a job; returns how many were removed
    async fn delete_job(&self, job_id: &str) -> Result<usize, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS videos (
    job_id      TEXT NOT NULL,
    video_id    TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    status      INTEGER NOT NULL,
    version     INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    body        TEXT NOT NULL,
    PRIMARY KEY (job_id, video_id)
);
CREATE INDEX IF NOT EXISTS idx_videos_status ON videos (status, updated_at);
CREATE INDEX IF NOT EXISTS idx_videos_user ON videos (user_id);
";

/// SQLite-backed store.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct SqliteVideoStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVideoStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "Video store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the locked connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn read_record(conn: &Connection, key: &VideoKey) -> Result<Option<VideoRecord>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM videos WHERE job_id = ?1 AND video_id = ?2",
            params![key.job_id, key.video_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

fn read_many(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<VideoRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let bodies = stmt
        .query_map(args, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    async fn get(&self, key: &VideoKey) -> Result<Option<VideoRecord>, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| read_record(conn, &key)).await
    }

    async fn insert(&self, mut record: VideoRecord) -> Result<u64, StoreError> {
        record.version = 1;

        self.with_conn(move |conn| {
            let body = serde_json::to_string(&record)?;
            let result = conn.execute(
                "INSERT INTO videos (job_id, video_id, user_id, status, version, created_at, updated_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.job_id,
                    record.video_id.to_string(),
                    record.user_id,
                    record.status.code(),
                    record.version as i64,
                    timestamp(record.created_at),
                    timestamp(record.updated_at),
                    body,
                ],
            );

            match result {
                Ok(_) => {
                    debug!(job_id = %record.job_id, video_id = %record.video_id, "Inserted video");
                    Ok(record.version)
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::AlreadyExists(record.key()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn conditional_merge(
        &self,
        key: &VideoKey,
        patch: &VideoPatch,
        expected_version: Option<u64>,
    ) -> Result<VideoRecord, StoreError> {
        let key = key.clone();
        let patch = patch.clone();

        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            let mut record = read_record(&tx, &key)?
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            let current = record.version;

            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(StoreError::VersionConflict {
                        key,
                        expected,
                        actual: current,
                    });
                }
            }

            patch.apply(&mut record)?;
            record.version = current + 1;

            let body = serde_json::to_string(&record)?;
            let changed = tx.execute(
                "UPDATE videos SET status = ?1, version = ?2, updated_at = ?3, body = ?4
                 WHERE job_id = ?5 AND video_id = ?6 AND version = ?7",
                params![
                    record.status.code(),
                    record.version as i64,
                    timestamp(record.updated_at),
                    body,
                    key.job_id,
                    key.video_id.to_string(),
                    current as i64,
                ],
            )?;

            if changed == 0 {
                return Err(StoreError::VersionConflict {
                    key,
                    expected: current,
                    actual: current + 1,
                });
            }

            tx.commit()?;
            Ok(record)
        })
        .await
    }

    async fn list_job(&self, job_id: &str) -> Result<Vec<VideoRecord>, StoreError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            read_many(
                conn,
                "SELECT body FROM videos WHERE job_id = ?1 ORDER BY created_at",
                &[&job_id],
            )
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        self.with_conn(|conn| read_many(conn, "SELECT body FROM videos ORDER BY created_at", &[]))
            .await
    }

    async fn delete(&self, key: &VideoKey) -> Result<bool, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM videos WHERE job_id = ?1 AND video_id = ?2",
                params![key.job_id, key.video_id.to_string()],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn delete_job(&self, job_id: &str) -> Result<usize, StoreError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM videos WHERE job_id = ?1", params![job_id])?;
            Ok(n)
        })
        .await
    }
}

/// Outcome of a guarded merge
#[derive(Debug, Clone)]
pub enum Guarded {
    /// The patch was written; the record before and after the write
    Applied {
        before: VideoRecord,
        after: VideoRecord,
    },
    /// The record does not exist
    Missing,
    /// The guard rejected the delivery
    Discarded(VideoRecord),
}

/// Read, guard, patch and write, retrying on version conflicts.
///
/// `build` sees the current record and returns the patch to write, or `None`
/// when the delivery must be discarded. Conflicts re-read and re-run `build`
/// up to `max_attempts` times.
pub async fn guarded_merge<F>(
    store: &dyn VideoStore,
    key: &VideoKey,
    max_attempts: u32,
    mut build: F,
) -> Result<Guarded, StoreError>
where
    F: FnMut(&VideoRecord) -> Option<VideoPatch> + Send,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let Some(before) = store.get(key).await? else {
            return Ok(Guarded::Missing);
        };

        let Some(patch) = build(&before) else {
            return Ok(Guarded::Discarded(before));
        };

        match store.conditional_merge(key, &patch, Some(before.version)).await {
            Ok(after) => return Ok(Guarded::Applied { before, after }),
            Err(StoreError::VersionConflict { .. }) if attempt < max_attempts.max(1) => {
                debug!(%key, attempt, "Version conflict, re-reading");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}
