//! SQLite checkpoint store
//!
//! Durable [`CheckpointStore`] backed by a single SQLite file in WAL mode with
//! `synchronous = FULL`, so a committed append survives a crash.
//!
//! Layout (see `migrations/`):
//!
//! ```text
//! checkpoints(thread_id, step_index, node, state_json, created_at)
//!     PRIMARY KEY (thread_id, step_index)
//! ```
//!
//! The primary key serves both "latest for thread" (`ORDER BY step_index DESC
//! LIMIT 1`) and ordered history queries.
//!
//! An append runs inside `BEGIN IMMEDIATE`, which holds SQLite's write lock
//! from the parent check through the last insert. A writer in another
//! process (or on another store over the same file) that read a stale latest
//! step gets [`CheckpointError::Conflict`]. Appends within one store also
//! queue on an in-process per-thread lock.

use crate::{
    checkpoint::{Checkpoint, HistoryQuery, PendingCheckpoint, StepIndex},
    error::{CheckpointError, Result},
    locks::ThreadLocks,
    store::{CheckpointStore, CheckpointStream},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rows fetched per round trip while streaming history.
pub const DEFAULT_PAGE_SIZE: usize = 64;

const SELECT_COLUMNS: &str =
    "SELECT thread_id, step_index, node, state_json, created_at FROM checkpoints";

/// [`CheckpointStore`] persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    locks: ThreadLocks,
    page_size: usize,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        debug!(path = %path.display(), "Connecting to checkpoint database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Checkpoint database opened");

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool. Migrations are applied before returning.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            locks: ThreadLocks::new(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Checkpoint database closed");
    }

    async fn max_step(&self, thread_id: &str) -> Result<Option<i64>> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(step_index) FROM checkpoints WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn append_all(
        &self,
        thread_id: &str,
        parent: Option<StepIndex>,
        writes: Vec<PendingCheckpoint>,
    ) -> Result<Vec<StepIndex>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = writes
            .iter()
            .map(|write| serde_json::to_string(&write.state))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let _guard = self.locks.lock(thread_id).await;

        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let written = match insert_batch(&mut *conn, thread_id, parent, &writes, &encoded).await {
            Ok(steps) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| steps)
                .map_err(CheckpointError::from),
            Err(e) => Err(e),
        };

        match written {
            Ok(steps) => {
                debug!(thread_id, ?steps, "Committed checkpoints");
                Ok(steps)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    // never hand a connection with an open transaction back to the pool
                    warn!(thread_id, error = %rollback, "Rollback failed, dropping connection");
                    drop(conn.detach());
                }
                Err(e)
            }
        }
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE thread_id = ? ORDER BY step_index DESC LIMIT 1"
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn get(&self, thread_id: &str, step: StepIndex) -> Result<Checkpoint> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE thread_id = ? AND step_index = ?"
        ))
        .bind(thread_id)
        .bind(to_sql_step(step)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => decode_row(&row),
            None => Err(CheckpointError::not_found(thread_id, step)),
        }
    }

    async fn list(&self, thread_id: &str, query: HistoryQuery) -> Result<CheckpointStream> {
        let before = query.before.map(to_sql_step).transpose()?;
        Ok(Box::pin(history_pages(
            self.pool.clone(),
            thread_id.to_string(),
            query,
            before,
            self.page_size,
        )))
    }

    async fn fork(
        &self,
        thread_id: &str,
        step: StepIndex,
        new_thread_id: &str,
    ) -> Result<Vec<Checkpoint>> {
        let sql_step = to_sql_step(step)?;

        let source: Option<i64> = sqlx::query_scalar(
            "SELECT step_index FROM checkpoints WHERE thread_id = ? AND step_index = ?",
        )
        .bind(thread_id)
        .bind(sql_step)
        .fetch_optional(&self.pool)
        .await?;
        if source.is_none() {
            return Err(CheckpointError::not_found(thread_id, step));
        }

        let _guard = self.locks.lock(new_thread_id).await;

        if self.max_step(new_thread_id).await?.is_some() {
            return Err(CheckpointError::ThreadExists(new_thread_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO checkpoints (thread_id, step_index, node, state_json, created_at) \
             SELECT ?, step_index, node, state_json, created_at FROM checkpoints \
             WHERE thread_id = ? AND step_index <= ?",
        )
        .bind(new_thread_id)
        .bind(thread_id)
        .bind(sql_step)
        .execute(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE thread_id = ? ORDER BY step_index ASC"
        ))
        .bind(new_thread_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(thread_id, step, new_thread_id, copied = rows.len(), "Forked thread");
        rows.iter().map(decode_row).collect()
    }

    async fn threads(&self) -> Result<Vec<String>> {
        let threads: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(threads)
    }
}

/// Check `parent` against the thread's newest step, then insert `writes`
/// after it. Runs inside the caller's transaction.
async fn insert_batch(
    conn: &mut SqliteConnection,
    thread_id: &str,
    parent: Option<StepIndex>,
    writes: &[PendingCheckpoint],
    encoded: &[String],
) -> Result<Vec<StepIndex>> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(step_index) FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_one(&mut *conn)
            .await?;
    let actual = max.map(from_sql_step).transpose()?;
    if actual != parent {
        return Err(CheckpointError::conflict(thread_id, parent, actual));
    }

    let base = max.map_or(0, |max| max + 1);
    let created_at = Utc::now().to_rfc3339();

    let mut steps = Vec::with_capacity(writes.len());
    for (offset, (write, state_json)) in writes.iter().zip(encoded).enumerate() {
        let step = base + offset as i64;
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, step_index, node, state_json, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(step)
        .bind(&write.node)
        .bind(state_json)
        .bind(&created_at)
        .execute(&mut *conn)
        .await?;
        steps.push(from_sql_step(step)?);
    }
    Ok(steps)
}

/// Lazily page through a thread's history, newest first.
fn history_pages(
    pool: SqlitePool,
    thread_id: String,
    query: HistoryQuery,
    mut before: Option<i64>,
    page_size: usize,
) -> impl Stream<Item = Result<Checkpoint>> + Send + 'static {
    async_stream::try_stream! {
        let mut remaining = query.limit.unwrap_or(usize::MAX);

        while remaining > 0 {
            let take = remaining.min(page_size);

            let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
            builder.push(" WHERE thread_id = ").push_bind(thread_id.clone());
            if let Some(before) = before {
                builder.push(" AND step_index < ").push_bind(before);
            }
            if let Some(node) = &query.node {
                builder.push(" AND node = ").push_bind(node.clone());
            }
            builder
                .push(" ORDER BY step_index DESC LIMIT ")
                .push_bind(i64::try_from(take).unwrap_or(i64::MAX));

            let rows = builder
                .build()
                .fetch_all(&pool)
                .await
                .map_err(CheckpointError::from)?;
            let fetched = rows.len();

            for row in rows {
                let checkpoint = decode_row(&row)?;
                before = Some(to_sql_step(checkpoint.step)?);
                remaining -= 1;
                yield checkpoint;
            }

            if fetched < take {
                break;
            }
        }
    }
}

fn decode_row(row: &SqliteRow) -> Result<Checkpoint> {
    let step: i64 = row.try_get("step_index")?;
    let state_json: String = row.try_get("state_json")?;
    let created_at: String = row.try_get("created_at")?;

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| CheckpointError::Invalid(format!("bad created_at '{}': {}", created_at, e)))?
        .with_timezone(&Utc);

    Ok(Checkpoint {
        thread_id: row.try_get("thread_id")?,
        step: from_sql_step(step)?,
        node: row.try_get("node")?,
        state: serde_json::from_str(&state_json)?,
        created_at,
    })
}

fn to_sql_step(step: StepIndex) -> Result<i64> {
    i64::try_from(step).map_err(|_| CheckpointError::Invalid(format!("step {} out of range", step)))
}

fn from_sql_step(step: i64) -> Result<StepIndex> {
    StepIndex::try_from(step)
        .map_err(|_| CheckpointError::Invalid(format!("negative step {}", step)))
}
