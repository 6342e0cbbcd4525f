// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;

use crate::error::TesseraError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Turns text into vectors for similarity search.
///
/// Implementations return exactly one vector per input text, in input order;
/// ingest rejects the whole batch otherwise.
#[async_trait]
pub trait EmbeddingAdapter: PluginAdapter {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, TesseraError>;
}
