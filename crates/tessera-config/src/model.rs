// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration sections.
//!
//! Every section rejects unknown keys and falls back to its `Default` impl
//! for keys that are absent, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TesseraConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
    pub retrieval: RetrievalConfig,
    pub traits: TraitsConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Display name used in logs.
    pub name: String,
    /// One of trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "tessera".into(),
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite file; parent directories are created on open.
    pub database_path: String,
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    /// `<data dir>/tessera/tessera.db`, or `tessera.db` when the platform
    /// has no data dir.
    fn default() -> Self {
        let database_path = match dirs::data_dir() {
            Some(dir) => dir.join("tessera").join("tessera.db"),
            None => "tessera.db".into(),
        };
        Self {
            database_path: database_path.to_string_lossy().into_owned(),
            wal_mode: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Required embedding length; writes with any other length are rejected.
    /// Unset accepts any non-empty vector.
    pub embedding_dims: Option<usize>,
}

/// Which keyword-ranking engine the retriever uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordIndex {
    /// FTS5 when `memories_fts` exists, else the plain scan.
    #[default]
    Auto,
    /// FTS5 with BM25 ranking.
    Fts5,
    /// In-process term-frequency scan.
    Plain,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Result count when the caller passes no limit.
    pub default_limit: usize,
    /// Recency half-scale for scored search, in seconds.
    pub decay_rate_secs: f64,
    pub keyword_index: KeywordIndex,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            decay_rate_secs: 30.0 * 86_400.0,
            keyword_index: KeywordIndex::Auto,
        }
    }
}

/// Values applied when reflection output leaves a trait field out.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraitsConfig {
    /// Observation window for new trends.
    pub default_window_days: i64,
    /// Starting confidence of a new behavior, clamped to [0.3, 0.5] on insert.
    pub default_behavior_confidence: f64,
    pub default_context: String,
}

impl Default for TraitsConfig {
    fn default() -> Self {
        Self {
            default_window_days: 30,
            default_behavior_confidence: 0.4,
            default_context: "general".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TasksConfig {
    /// Session inactivity before the idle timer fires.
    pub idle_timeout_secs: u64,
    /// New memories an owner accumulates before reflection is due.
    pub reflection_threshold: u32,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            reflection_threshold: 10,
        }
    }
}
