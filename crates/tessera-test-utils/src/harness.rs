// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for integration testing.
//!
//! `TestHarness` opens a migrated database (in memory, or in a temp
//! directory) and wires deterministic mock collaborators around it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tessera_config::TesseraConfig;
use tessera_core::TesseraError;
use tessera_storage::Database;

use crate::clock::ManualClock;
use crate::mock_embedder::{DEFAULT_DIMS, MockEmbedder};
use crate::mock_provider::MockProvider;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    responses: Vec<String>,
    config: TesseraConfig,
    dims: usize,
    start: Option<DateTime<Utc>>,
    on_disk: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            responses: Vec::new(),
            config: TesseraConfig::default(),
            dims: DEFAULT_DIMS,
            start: None,
            on_disk: false,
        }
    }

    /// Set mock provider responses.
    pub fn with_mock_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_config(mut self, config: TesseraConfig) -> Self {
        self.config = config;
        self
    }

    /// Embedding width; also enforced through `memory.embedding_dims`.
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.start = Some(at);
        self
    }

    /// Use a WAL-mode database file in a temp directory instead of memory.
    pub fn on_disk(mut self) -> Self {
        self.on_disk = true;
        self
    }

    pub async fn build(mut self) -> Result<TestHarness, TesseraError> {
        let (db, temp_dir) = if self.on_disk {
            let temp_dir =
                tempfile::TempDir::new().map_err(|e| TesseraError::Storage { source: e.into() })?;
            let path = temp_dir.path().join("test.db").to_string_lossy().to_string();
            self.config.storage.database_path = path.clone();
            (Database::open_with(&path, true).await?, Some(temp_dir))
        } else {
            (Database::open_in_memory().await?, None)
        };

        self.config.memory.embedding_dims = Some(self.dims);
        let clock = Arc::new(match self.start {
            Some(at) => ManualClock::new(at),
            None => ManualClock::epoch(),
        });

        Ok(TestHarness {
            db,
            config: self.config,
            embedder: Arc::new(MockEmbedder::with_dims(self.dims)),
            provider: Arc::new(MockProvider::with_responses(self.responses)),
            clock,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock adapters and a migrated database.
pub struct TestHarness {
    pub db: Database,
    pub config: TesseraConfig,
    pub embedder: Arc<MockEmbedder>,
    pub provider: Arc<MockProvider>,
    pub clock: Arc<ManualClock>,
    _temp_dir: Option<tempfile::TempDir>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// In-memory harness with defaults.
    pub async fn new() -> Result<Self, TesseraError> {
        Self::builder().build().await
    }
}
