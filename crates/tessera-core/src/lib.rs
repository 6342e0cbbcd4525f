// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared vocabulary of the Tessera crates.
//!
//! Holds [`TesseraError`], the request and response types exchanged with
//! collaborators, and the traits those collaborators implement: embedding
//! and chat providers, the storage backend, a clock and a date parser.

pub mod error;
pub mod traits;
pub mod types;

pub use error::TesseraError;
pub use traits::{
    Clock, EmbeddingAdapter, PluginAdapter, ProviderAdapter, StorageAdapter, SystemClock,
    TemporalParser,
};
pub use types::{
    AdapterType, ChatMessage, ChatRequest, EmbeddingInput, EmbeddingOutput, HealthStatus,
};
