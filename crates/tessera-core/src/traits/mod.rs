// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits.
//!
//! Embedding, chat and storage backends are async and share the
//! [`PluginAdapter`] lifecycle. [`Clock`] and [`TemporalParser`] are plain
//! synchronous capabilities.

pub mod adapter;
pub mod clock;
pub mod embedding;
pub mod provider;
pub mod storage;
pub mod temporal;

pub use adapter::PluginAdapter;
pub use clock::{Clock, SystemClock};
pub use embedding::EmbeddingAdapter;
pub use provider::ProviderAdapter;
pub use storage::StorageAdapter;
pub use temporal::TemporalParser;
