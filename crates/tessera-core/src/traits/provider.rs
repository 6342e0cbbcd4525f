// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait for LLM chat completion.

use async_trait::async_trait;

use crate::error::TesseraError;
use crate::traits::adapter::PluginAdapter;
use crate::types::ChatRequest;

/// Adapter for chat-style LLM providers.
///
/// Used for classification, contradiction judgment, and summarization.
/// Callers own prompt construction; the provider only returns the text.
#[async_trait]
pub trait ProviderAdapter: PluginAdapter {
    /// Sends a chat request and returns the assistant's text.
    async fn chat(&self, request: ChatRequest) -> Result<String, TesseraError>;
}
