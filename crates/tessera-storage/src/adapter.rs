// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter that owns the memory database for a process.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use tessera_config::model::StorageConfig;
use tessera_core::{AdapterType, HealthStatus, PluginAdapter, StorageAdapter, TesseraError};

use crate::database::Database;

/// Tables without which no memory operation can run.
const REQUIRED_TABLES: [&str; 3] = ["memories", "trait_evidence", "memory_history"];

/// Row counts across the memory tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StorageStats {
    pub memories: i64,
    /// Rows whose validity interval is still open.
    pub active: i64,
    pub owners: i64,
    pub evidence: i64,
    pub history: i64,
}

/// Opens the configured memory database on `initialize` and checkpoints it
/// on `close`.
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// The open database handle.
    pub fn database(&self) -> Result<&Database, TesseraError> {
        self.db.get().ok_or_else(|| {
            TesseraError::storage(format!(
                "memory database {} is not open",
                self.config.database_path
            ))
        })
    }

    pub async fn stats(&self) -> Result<StorageStats, TesseraError> {
        self.database()?
            .read(|conn| {
                let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));
                Ok(StorageStats {
                    memories: count("SELECT COUNT(*) FROM memories")?,
                    active: count("SELECT COUNT(*) FROM memories WHERE valid_until IS NULL")?,
                    owners: count("SELECT COUNT(DISTINCT owner_id) FROM memories")?,
                    evidence: count("SELECT COUNT(*) FROM trait_evidence")?,
                    history: count("SELECT COUNT(*) FROM memory_history")?,
                })
            })
            .await
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    /// Unhealthy when a memory table is missing; degraded without the
    /// keyword index, since retrieval then scans content directly.
    async fn health_check(&self) -> Result<HealthStatus, TesseraError> {
        let db = self.database()?;
        for table in REQUIRED_TABLES {
            if !db.table_exists(table).await? {
                return Ok(HealthStatus::Unhealthy(format!("table {table} missing")));
            }
        }
        if db.table_exists("memories_fts").await? {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Degraded(
                "memories_fts missing; keyword ranking uses a plain scan".to_string(),
            ))
        }
    }

    async fn shutdown(&self) -> Result<(), TesseraError> {
        match self.db.get() {
            Some(_) => self.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), TesseraError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| TesseraError::storage("memory database opened twice"))?;
        info!(path = %self.config.database_path, wal = self.config.wal_mode, "memory database ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), TesseraError> {
        self.database()?.checkpoint().await?;
        debug!("memory database checkpointed");
        Ok(())
    }
}
