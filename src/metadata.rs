//! Metadata store backed by SQLite
//!
//! Holds one row per savepoint and one row per captured file:
//!
//! ```text
//! savepoints(id PK, name, description, timestamp, size)
//! savepoint_files(savepoint_id FK -> savepoints ON DELETE CASCADE,
//!                 file_path, status, file_size, position,
//!                 PK(savepoint_id, file_path))
//! ```
//!
//! Inserts go through a single transaction, so a failed insert leaves no trace.
//! Timestamps are stored as fixed-width RFC 3339 strings with nanosecond
//! precision so that lexical order is chronological order.
//!
//! The connection sits behind a mutex; every method takes `&self`.

use crate::error::{Result, SavepointError};
use crate::types::{FileStatus, Savepoint, SavepointFileRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the database inside the storage directory
pub const DATABASE_FILE: &str = "savepoints.db";

const SCHEMA_VERSION: &str = "1";

/// Durable, transactional record of savepoints and their files
pub struct MetadataStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("path", &self.path)
            .finish()
    }
}

impl MetadataStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        let store = Self {
            path,
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        info!("Opened metadata store at {:?}", store.path);
        Ok(store)
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS savepoints (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              description TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS savepoint_files (
              savepoint_id TEXT NOT NULL REFERENCES savepoints(id) ON DELETE CASCADE,
              file_path TEXT NOT NULL,
              status TEXT NOT NULL CHECK (status IN ('new', 'modified', 'deleted')),
              file_size INTEGER NOT NULL,
              position INTEGER NOT NULL,
              PRIMARY KEY (savepoint_id, file_path)
            );

            CREATE INDEX IF NOT EXISTS idx_savepoints_timestamp ON savepoints(timestamp);
            "#,
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params!["schema_version", SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Insert a savepoint and all of its file records in one transaction
    pub fn insert_savepoint(
        &self,
        savepoint: &Savepoint,
        records: &[SavepointFileRecord],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO savepoints(id, name, description, timestamp, size)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                savepoint.id,
                savepoint.name,
                savepoint.description,
                encode_timestamp(&savepoint.timestamp),
                to_sql_size(savepoint.size)?,
            ],
        )?;

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO savepoint_files(savepoint_id, file_path, status, file_size, position)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for (position, record) in records.iter().enumerate() {
                if record.savepoint_id != savepoint.id {
                    return Err(SavepointError::internal(format!(
                        "record for {} belongs to savepoint {}, not {}",
                        record.file_path, record.savepoint_id, savepoint.id
                    )));
                }
                insert.execute(params![
                    record.savepoint_id,
                    record.file_path,
                    record.status.as_str(),
                    to_sql_size(record.file_size)?,
                    position as i64,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            "Committed savepoint {} with {} file records",
            savepoint.id,
            records.len()
        );
        Ok(())
    }

    /// Fetch one savepoint, hydrated with its file list
    pub fn get_savepoint(&self, id: &str) -> Result<Savepoint> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let savepoint = load_savepoint_tx(&tx, id)?
            .ok_or_else(|| SavepointError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(savepoint)
    }

    /// Whether a savepoint with this id exists
    pub fn contains(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM savepoints WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All savepoints, most recently created first
    pub fn list_savepoints(&self) -> Result<Vec<Savepoint>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM savepoints ORDER BY timestamp DESC, rowid DESC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut savepoints = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(savepoint) = load_savepoint_tx(&tx, &id)? {
                savepoints.push(savepoint);
            }
        }
        tx.commit()?;
        Ok(savepoints)
    }

    /// File records of a savepoint in capture order
    pub fn savepoint_files(&self, id: &str) -> Result<Vec<SavepointFileRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if !exists_tx(&tx, id)? {
            return Err(SavepointError::NotFound(id.to_string()));
        }
        let records = load_records_tx(&tx, id)?;
        tx.commit()?;
        Ok(records)
    }

    /// Delete a savepoint; file records go with it through the cascade
    pub fn delete_savepoint(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if !exists_tx(&tx, id)? {
            return Err(SavepointError::NotFound(id.to_string()));
        }
        tx.execute("DELETE FROM savepoints WHERE id = ?1", params![id])?;
        tx.commit()?;
        debug!("Deleted metadata for savepoint {}", id);
        Ok(())
    }

    /// Ids of every savepoint in the store
    pub fn savepoint_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM savepoints")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

fn exists_tx(tx: &Transaction<'_>, id: &str) -> Result<bool> {
    let found = tx
        .query_row(
            "SELECT 1 FROM savepoints WHERE id = ?1",
            params![id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn load_savepoint_tx(tx: &Transaction<'_>, id: &str) -> Result<Option<Savepoint>> {
    let row = tx
        .query_row(
            r#"
            SELECT id, name, description, timestamp, size
            FROM savepoints
            WHERE id = ?1
            "#,
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, description, timestamp, size)) = row else {
        return Ok(None);
    };

    let files = load_records_tx(tx, &id)?
        .into_iter()
        .map(|record| record.file_path)
        .collect();

    Ok(Some(Savepoint {
        timestamp: decode_timestamp(&timestamp)?,
        size: from_sql_size(size)?,
        id,
        name,
        description,
        files,
    }))
}

fn load_records_tx(tx: &Transaction<'_>, id: &str) -> Result<Vec<SavepointFileRecord>> {
    let mut stmt = tx.prepare(
        r#"
        SELECT file_path, status, file_size
        FROM savepoint_files
        WHERE savepoint_id = ?1
        ORDER BY position ASC
        "#,
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (file_path, status, file_size) = row?;
        records.push(SavepointFileRecord {
            savepoint_id: id.to_string(),
            file_path,
            status: status.parse::<FileStatus>()?,
            file_size: from_sql_size(file_size)?,
        });
    }
    Ok(records)
}

fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SavepointError::corruption(format!("invalid timestamp '{}': {}", raw, e)))
}

fn to_sql_size(size: u64) -> Result<i64> {
    i64::try_from(size)
        .map_err(|_| SavepointError::validation(format!("size {} does not fit the store", size)))
}

fn from_sql_size(size: i64) -> Result<u64> {
    u64::try_from(size)
        .map_err(|_| SavepointError::corruption(format!("negative size {} in store", size)))
}
