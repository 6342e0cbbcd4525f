// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tessera integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockEmbedder`] - Deterministic embeddings with pinned per-text vectors
//! - [`MockProvider`] - Mock chat provider with pre-configured responses
//! - [`ManualClock`] - Clock that only moves when told to
//! - [`MockTemporalParser`] - Phrase-table date parser
//! - [`TestHarness`] - In-memory database plus all of the above

pub mod clock;
pub mod harness;
pub mod mock_embedder;
pub mod mock_provider;
pub mod mock_temporal;

pub use clock::ManualClock;
pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_embedder::MockEmbedder;
pub use mock_provider::MockProvider;
pub use mock_temporal::MockTemporalParser;
