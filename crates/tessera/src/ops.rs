// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline maintenance operations run against a database file.
//!
//! None of these need an embedder or a chat provider: they only touch
//! rows that already exist.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_core::{Clock, SystemClock, TesseraError};
use tessera_memory::{MemoryStore, MemoryType, TraitEngine};
use tessera_storage::Database;
use tracing::info;

/// Handle over an opened database.
pub struct Ops {
    store: MemoryStore,
    traits: TraitEngine,
}

impl Ops {
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: MemoryStore::new(db.clone(), clock.clone()),
            traits: TraitEngine::new(db, clock),
        }
    }

    /// Expire and promote trends, then decay behaviors for one owner.
    pub async fn maintain(&self, owner: &str) -> Result<serde_json::Value, TesseraError> {
        let report = self.traits.run_maintenance(owner).await?;
        info!(owner, ?report, "maintenance finished");
        to_json(&report)
    }

    pub async fn rollback(
        &self,
        owner: &str,
        to: DateTime<Utc>,
    ) -> Result<serde_json::Value, TesseraError> {
        let report = self.store.rollback(owner, to).await?;
        info!(owner, %to, invalidated = report.invalidated, reactivated = report.reactivated, "rolled back");
        to_json(&report)
    }

    pub async fn erase(&self, owner: &str) -> Result<serde_json::Value, TesseraError> {
        let report = self.store.delete_owner(owner).await?;
        info!(owner, memories = report.memories, "owner erased");
        to_json(&report)
    }

    pub async fn history(&self, memory_id: &str) -> Result<serde_json::Value, TesseraError> {
        to_json(&self.store.history(memory_id).await?)
    }

    pub async fn list(
        &self,
        owner: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<serde_json::Value, TesseraError> {
        to_json(&self.store.list_active(owner, memory_type).await?)
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, TesseraError> {
    serde_json::to_value(value).map_err(|e| TesseraError::Internal(format!("json encoding: {e}")))
}
