// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use tessera_core::TesseraError;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::migrations;

/// Error raised inside a database closure.
///
/// Returning any variant from a [`Database::write`] closure drops the
/// transaction uncommitted, which rolls back every statement it ran.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] refinery::Error),

    #[error("metadata encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Optimistic-concurrency check failed on `UPDATE ... WHERE version = ?`.
    #[error("version conflict on {id}: expected version {expected_version}")]
    Conflict { id: String, expected_version: i64 },

    #[error("{0}")]
    Validation(String),
}

impl From<TxError> for TesseraError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::Sql(e) => TesseraError::Storage {
                source: Box::new(e),
            },
            TxError::Migration(e) => TesseraError::Storage {
                source: Box::new(e),
            },
            TxError::Json(e) => TesseraError::Internal(format!("metadata encoding failed: {e}")),
            TxError::Conflict {
                id,
                expected_version,
            } => TesseraError::Conflict {
                id,
                expected_version,
            },
            TxError::Validation(msg) => TesseraError::Validation(msg),
        }
    }
}

/// Convert a tokio-rusqlite error into TesseraError::Storage.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> TesseraError {
    TesseraError::Storage {
        source: Box::new(e),
    }
}

fn map_tx_err(e: tokio_rusqlite::Error<TxError>) -> TesseraError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner.into(),
        other => TesseraError::Storage {
            source: other.to_string().into(),
        },
    }
}

/// Handle to the single SQLite connection.
///
/// Cloning is cheap; every clone talks to the same background thread.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file in WAL mode and run migrations.
    pub async fn open(path: &str) -> Result<Self, TesseraError> {
        Self::open_with(path, true).await
    }

    /// Open (or create) a database file and run migrations.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, TesseraError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TesseraError::Storage {
                source: Box::new(e),
            })?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::Error(e)))?;
        let db = Self::prepare(conn, wal_mode).await?;
        debug!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// Open a private in-memory database with migrations applied.
    pub async fn open_in_memory() -> Result<Self, TesseraError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::Error(e)))?;
        Self::prepare(conn, false).await
    }

    async fn prepare(conn: Connection, wal_mode: bool) -> Result<Self, TesseraError> {
        conn.call(move |conn| -> Result<(), TxError> {
            if wal_mode {
                conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            migrations::run_migrations(conn)?;
            Ok(())
        })
        .await
        .map_err(map_tx_err)?;
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a read-only closure on the connection thread.
    pub async fn read<F, T>(&self, f: F) -> Result<T, TesseraError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, TxError> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| -> Result<T, TxError> { f(conn) })
            .await
            .map_err(map_tx_err)
    }

    /// Run a closure inside one transaction; commit only if it returns `Ok`.
    pub async fn write<F, T>(&self, f: F) -> Result<T, TesseraError>
    where
        F: FnOnce(&mut rusqlite::Transaction<'_>) -> Result<T, TxError> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| -> Result<T, TxError> {
                let mut tx = conn.transaction()?;
                let value = f(&mut tx)?;
                tx.commit()?;
                Ok(value)
            })
            .await
            .map_err(map_tx_err)
    }

    /// Whether a table or virtual table with this name exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool, TesseraError> {
        let name = name.to_string();
        self.read(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                rusqlite::params![name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), TesseraError> {
        self.checkpoint().await?;
        self.conn.close().await.map_err(map_tr_err)
    }

    /// Flush the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), TesseraError> {
        self.read(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await
    }
}
