//! SQLite-backed repository for interactive states.
//!
//! One row per state, keyed by id with a unique index on the
//! `(channel_id, message_ts)` conversation anchor. The payload and metadata
//! columns hold JSON; everything the store filters or updates on lives in
//! its own column so that the pending-to-terminal transition can be a
//! single conditional UPDATE. Timestamps are stored as unix seconds.
//!
//! The database runs in WAL mode with synchronous=FULL and a restrictive
//! busy timeout. Opening verifies the journal mode actually took effect
//! and refuses to proceed otherwise. Schema changes are sequential
//! migrations tracked in the `schema_version` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use super::{ProcessedUpdate, RepositoryError, StateRepository};
use crate::interactive::model::{
    InteractiveState, StateId, StatePayload, StateStatus, StateType,
};

const CURRENT_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT_MS: u64 = 5000;

/// Transient busy/locked errors are retried this many times on top of the
/// connection-level busy timeout.
const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 50;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS interactive_states (
    id TEXT PRIMARY KEY,
    state_type TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    message_ts TEXT NOT NULL,
    thread_ts TEXT,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    version INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    processed_by TEXT,
    processed_at INTEGER,
    error_message TEXT,
    metadata_json TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_states_anchor
    ON interactive_states (channel_id, message_ts);

CREATE INDEX IF NOT EXISTS idx_states_pending
    ON interactive_states (state_type, status, expires_at);

CREATE INDEX IF NOT EXISTS idx_states_expiry
    ON interactive_states (expires_at);
";

const STATE_COLUMNS: &str = "id, state_type, channel_id, message_ts, thread_ts, payload_json, \
     status, version, created_at, expires_at, processed_by, processed_at, \
     error_message, metadata_json";

#[derive(Debug)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Opens (or creates) the database at `db_path` and applies pending
    /// migrations. The containing directory is created with restrictive
    /// permissions since payloads can hold customer conversation text.
    pub fn new(db_path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RepositoryError::storage("open", format!("creating state directory: {e}"))
                })?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    std::fs::set_permissions(parent, perms).map_err(|e| {
                        RepositoryError::storage(
                            "open",
                            format!("setting state directory permissions: {e}"),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| RepositoryError::storage("open", e.to_string()))?;
        configure_connection(&conn, false)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(db_path, perms).map_err(|e| {
                RepositoryError::storage("open", format!("setting database permissions: {e}"))
            })?;
        }

        migrate(&conn)?;
        info!("State database ready at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests and ephemeral development runs.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RepositoryError::storage("open", e.to_string()))?;
        configure_connection(&conn, true)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn configure_connection(conn: &Connection, in_memory: bool) -> Result<(), RepositoryError> {
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(|e| RepositoryError::storage("open", format!("enabling WAL: {e}")))?;
    // In-memory databases report "memory"; a file database that cannot do
    // WAL loses the concurrent-reader guarantees we rely on.
    let expected = if in_memory { "memory" } else { "wal" };
    if !journal_mode.eq_ignore_ascii_case(expected) {
        return Err(RepositoryError::storage(
            "open",
            format!("unexpected journal mode: {journal_mode}"),
        ));
    }

    conn.execute_batch("PRAGMA synchronous = FULL;")
        .map_err(|e| RepositoryError::storage("open", format!("setting synchronous: {e}")))?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
        .map_err(|e| RepositoryError::storage("open", format!("setting busy timeout: {e}")))?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<(), RepositoryError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| RepositoryError::storage("migrate", e.to_string()))?;

    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()
        .map_err(|e| RepositoryError::storage("migrate", e.to_string()))?;

    let version = match version {
        Some(v) => v,
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
                .map_err(|e| RepositoryError::storage("migrate", e.to_string()))?;
            0
        }
    };

    if version > CURRENT_SCHEMA_VERSION {
        return Err(RepositoryError::storage(
            "migrate",
            format!(
                "database schema version {version} is newer than this binary supports \
                 ({CURRENT_SCHEMA_VERSION})"
            ),
        ));
    }

    if version < 1 {
        info!("Applying state database schema migration 1");
        conn.execute_batch(SCHEMA_V1)
            .map_err(|e| RepositoryError::storage("migrate", e.to_string()))?;
    }

    if version < CURRENT_SCHEMA_VERSION {
        conn.execute(
            "UPDATE schema_version SET version = ?1",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("migrate", e.to_string()))?;
    }

    Ok(())
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Runs a statement, retrying transient busy/locked failures a bounded
/// number of times before giving up.
fn with_retry<T>(
    operation: &'static str,
    mut run: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T, RepositoryError> {
    let mut attempt = 0u32;
    loop {
        match run() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt + 1 < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                warn!(
                    "State database busy during {} (attempt {}), retrying",
                    operation, attempt
                );
                std::thread::sleep(Duration::from_millis(
                    RETRY_BASE_DELAY_MS * u64::from(attempt),
                ));
            }
            Err(err) => return Err(RepositoryError::storage(operation, err.to_string())),
        }
    }
}

type StateRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    i64,
    i64,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<String>,
);

fn row_to_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn timestamp_to_datetime(secs: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| RepositoryError::corruption("state timestamp"))
}

fn state_from_row(row: StateRow) -> Result<InteractiveState, RepositoryError> {
    let (
        id,
        state_type,
        channel_id,
        message_ts,
        thread_ts,
        payload_json,
        status,
        version,
        created_at,
        expires_at,
        processed_by,
        processed_at,
        error_message,
        metadata_json,
    ) = row;

    let payload: StatePayload = serde_json::from_str(&payload_json)
        .map_err(|_| RepositoryError::corruption("state payload JSON"))?;
    let status =
        StateStatus::parse(&status).ok_or_else(|| RepositoryError::corruption("state status"))?;
    let metadata = metadata_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|_| RepositoryError::corruption("state metadata JSON"))?;

    Ok(InteractiveState {
        id: StateId::from(id),
        state_type: StateType::parse(&state_type),
        channel_id,
        message_ts,
        thread_ts,
        payload,
        status,
        version,
        created_at: timestamp_to_datetime(created_at)?,
        expires_at: timestamp_to_datetime(expires_at)?,
        processed_by,
        processed_at: processed_at.map(timestamp_to_datetime).transpose()?,
        error_message,
        metadata,
    })
}

fn save_sync(conn: &Connection, state: &InteractiveState) -> Result<(), RepositoryError> {
    let payload_json = serde_json::to_string(&state.payload)
        .map_err(|_| RepositoryError::corruption("state payload JSON"))?;
    let metadata_json = state
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|_| RepositoryError::corruption("state metadata JSON"))?;

    with_retry("save", || {
        conn.execute(
            "INSERT INTO interactive_states (
                 id, state_type, channel_id, message_ts, thread_ts, payload_json,
                 status, version, created_at, expires_at, processed_by, processed_at,
                 error_message, metadata_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT (channel_id, message_ts) DO UPDATE SET
                 id = excluded.id,
                 state_type = excluded.state_type,
                 thread_ts = excluded.thread_ts,
                 payload_json = excluded.payload_json,
                 status = excluded.status,
                 version = excluded.version,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at,
                 processed_by = excluded.processed_by,
                 processed_at = excluded.processed_at,
                 error_message = excluded.error_message,
                 metadata_json = excluded.metadata_json",
            params![
                state.id.as_str(),
                state.state_type.as_str(),
                state.channel_id,
                state.message_ts,
                state.thread_ts,
                payload_json,
                state.status.as_str(),
                state.version,
                state.created_at.timestamp(),
                state.expires_at.timestamp(),
                state.processed_by,
                state.processed_at.map(|t| t.timestamp()),
                state.error_message,
                metadata_json,
            ],
        )
    })?;
    Ok(())
}

fn get_by_id_sync(
    conn: &Connection,
    id: &StateId,
) -> Result<Option<InteractiveState>, RepositoryError> {
    let row = with_retry("get_by_id", || {
        conn.query_row(
            &format!("SELECT {STATE_COLUMNS} FROM interactive_states WHERE id = ?1"),
            params![id.as_str()],
            row_to_tuple,
        )
        .optional()
    })?;
    row.map(state_from_row).transpose()
}

fn get_pending_by_channel_message_sync(
    conn: &Connection,
    channel_id: &str,
    message_ts: &str,
    state_type: Option<&StateType>,
    now: DateTime<Utc>,
) -> Result<Option<InteractiveState>, RepositoryError> {
    let row = with_retry("get_pending_by_channel_message", || {
        match state_type {
            Some(state_type) => conn
                .query_row(
                    &format!(
                        "SELECT {STATE_COLUMNS} FROM interactive_states
                         WHERE channel_id = ?1 AND message_ts = ?2
                           AND status = 'pending' AND expires_at > ?3
                           AND state_type = ?4"
                    ),
                    params![channel_id, message_ts, now.timestamp(), state_type.as_str()],
                    row_to_tuple,
                )
                .optional(),
            None => conn
                .query_row(
                    &format!(
                        "SELECT {STATE_COLUMNS} FROM interactive_states
                         WHERE channel_id = ?1 AND message_ts = ?2
                           AND status = 'pending' AND expires_at > ?3"
                    ),
                    params![channel_id, message_ts, now.timestamp()],
                    row_to_tuple,
                )
                .optional(),
        }
    })?;
    row.map(state_from_row).transpose()
}

fn list_pending_by_type_sync(
    conn: &Connection,
    state_type: &StateType,
    now: DateTime<Utc>,
) -> Result<Vec<InteractiveState>, RepositoryError> {
    let rows = with_retry("list_pending_by_type", || {
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATE_COLUMNS} FROM interactive_states
             WHERE state_type = ?1 AND status = 'pending' AND expires_at > ?2
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![state_type.as_str(), now.timestamp()], row_to_tuple)?;
        rows.collect::<rusqlite::Result<Vec<StateRow>>>()
    })?;

    let mut states = Vec::with_capacity(rows.len());
    for row in rows {
        match state_from_row(row) {
            Ok(state) => states.push(state),
            // A corrupt row must not hide the rest of the queue.
            Err(e) => warn!("Skipping unreadable interactive state: {}", e),
        }
    }
    Ok(states)
}

fn mark_processed_sync(
    conn: &Connection,
    channel_id: &str,
    message_ts: &str,
    update: &ProcessedUpdate,
) -> Result<bool, RepositoryError> {
    // Status check and write are one statement, so of any number of racing
    // callers exactly one sees a changed row.
    let changed = with_retry("mark_processed", || {
        conn.execute(
            "UPDATE interactive_states
             SET status = ?1, processed_by = ?2, processed_at = ?3,
                 error_message = ?4, version = version + 1
             WHERE channel_id = ?5 AND message_ts = ?6 AND status = 'pending'",
            params![
                update.status.as_str(),
                update.processed_by,
                update.processed_at.timestamp(),
                update.error_message,
                channel_id,
                message_ts,
            ],
        )
    })?;
    Ok(changed > 0)
}

fn update_payload_sync(
    conn: &Connection,
    channel_id: &str,
    message_ts: &str,
    partial: &serde_json::Value,
) -> Result<bool, RepositoryError> {
    let serde_json::Value::Object(partial_map) = partial else {
        return Ok(false);
    };

    let row: Option<(String, i64)> = with_retry("update_payload", || {
        conn.query_row(
            "SELECT payload_json, version FROM interactive_states
             WHERE channel_id = ?1 AND message_ts = ?2",
            params![channel_id, message_ts],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    })?;
    let Some((payload_json, version)) = row else {
        return Ok(false);
    };

    let mut payload: serde_json::Value = serde_json::from_str(&payload_json)
        .map_err(|_| RepositoryError::corruption("state payload JSON"))?;
    let serde_json::Value::Object(payload_map) = &mut payload else {
        return Ok(false);
    };
    for (key, value) in partial_map {
        payload_map.insert(key.clone(), value.clone());
    }
    let merged_json = serde_json::to_string(&payload)
        .map_err(|_| RepositoryError::corruption("state payload JSON"))?;

    // The version predicate rejects the merge if another writer got in
    // between the read and this write.
    let changed = with_retry("update_payload", || {
        conn.execute(
            "UPDATE interactive_states
             SET payload_json = ?1, version = version + 1
             WHERE channel_id = ?2 AND message_ts = ?3 AND version = ?4",
            params![merged_json, channel_id, message_ts, version],
        )
    })?;
    Ok(changed > 0)
}

fn delete_expired_sync(conn: &Connection, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
    with_retry("delete_expired", || {
        conn.execute(
            "DELETE FROM interactive_states WHERE expires_at < ?1",
            params![now.timestamp()],
        )
    })
}

#[async_trait]
impl StateRepository for SqliteRepository {
    async fn save(&self, state: &InteractiveState) -> Result<(), RepositoryError> {
        let conn = Arc::clone(&self.conn);
        let state = state.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            save_sync(&conn, &state)
        })
        .await
        .map_err(|e| RepositoryError::storage("save", format!("blocking task failed: {e}")))?
    }

    async fn get_by_id(&self, id: &StateId) -> Result<Option<InteractiveState>, RepositoryError> {
        let conn = Arc::clone(&self.conn);
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            get_by_id_sync(&conn, &id)
        })
        .await
        .map_err(|e| RepositoryError::storage("get_by_id", format!("blocking task failed: {e}")))?
    }

    async fn get_pending_by_channel_message(
        &self,
        channel_id: &str,
        message_ts: &str,
        state_type: Option<&StateType>,
        now: DateTime<Utc>,
    ) -> Result<Option<InteractiveState>, RepositoryError> {
        let conn = Arc::clone(&self.conn);
        let channel_id = channel_id.to_string();
        let message_ts = message_ts.to_string();
        let state_type = state_type.cloned();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            get_pending_by_channel_message_sync(
                &conn,
                &channel_id,
                &message_ts,
                state_type.as_ref(),
                now,
            )
        })
        .await
        .map_err(|e| {
            RepositoryError::storage(
                "get_pending_by_channel_message",
                format!("blocking task failed: {e}"),
            )
        })?
    }

    async fn list_pending_by_type(
        &self,
        state_type: &StateType,
        now: DateTime<Utc>,
    ) -> Result<Vec<InteractiveState>, RepositoryError> {
        let conn = Arc::clone(&self.conn);
        let state_type = state_type.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            list_pending_by_type_sync(&conn, &state_type, now)
        })
        .await
        .map_err(|e| {
            RepositoryError::storage("list_pending_by_type", format!("blocking task failed: {e}"))
        })?
    }

    async fn mark_processed(
        &self,
        channel_id: &str,
        message_ts: &str,
        update: &ProcessedUpdate,
    ) -> Result<bool, RepositoryError> {
        let conn = Arc::clone(&self.conn);
        let channel_id = channel_id.to_string();
        let message_ts = message_ts.to_string();
        let update = update.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            mark_processed_sync(&conn, &channel_id, &message_ts, &update)
        })
        .await
        .map_err(|e| {
            RepositoryError::storage("mark_processed", format!("blocking task failed: {e}"))
        })?
    }

    async fn update_payload(
        &self,
        channel_id: &str,
        message_ts: &str,
        partial: &serde_json::Value,
    ) -> Result<bool, RepositoryError> {
        let conn = Arc::clone(&self.conn);
        let channel_id = channel_id.to_string();
        let message_ts = message_ts.to_string();
        let partial = partial.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            update_payload_sync(&conn, &channel_id, &message_ts, &partial)
        })
        .await
        .map_err(|e| {
            RepositoryError::storage("update_payload", format!("blocking task failed: {e}"))
        })?
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            delete_expired_sync(&conn, now)
        })
        .await
        .map_err(|e| {
            RepositoryError::storage("delete_expired", format!("blocking task failed: {e}"))
        })?
    }
}

#[cfg(test)]
mod tests;
