// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted chat provider.
//!
//! Replies come from a queue filled by the test; once it runs dry every call
//! answers [`MockProvider::FALLBACK`]. All requests are recorded so tests
//! can assert on the prompts the memory crate builds.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use tessera_core::{
    AdapterType, ChatRequest, HealthStatus, PluginAdapter, ProviderAdapter, TesseraError,
};

#[derive(Default)]
struct Script {
    replies: VecDeque<String>,
    seen: Vec<ChatRequest>,
    failing: bool,
}

#[derive(Default)]
pub struct MockProvider {
    script: Mutex<Script>,
}

impl MockProvider {
    pub const FALLBACK: &'static str = "mock response";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(replies: Vec<String>) -> Self {
        Self {
            script: Mutex::new(Script {
                replies: replies.into(),
                ..Script::default()
            }),
        }
    }

    pub fn add_response(&self, reply: impl Into<String>) {
        self.script().replies.push_back(reply.into());
    }

    /// While set, calls are recorded and then fail; queued replies stay queued.
    pub fn set_failing(&self, failing: bool) {
        self.script().failing = failing;
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.script().seen.clone()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, TesseraError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TesseraError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<String, TesseraError> {
        let mut script = self.script();
        script.seen.push(request);
        if script.failing {
            return Err(TesseraError::Provider {
                message: "scripted provider failure".into(),
                source: None,
            });
        }
        Ok(script
            .replies
            .pop_front()
            .unwrap_or_else(|| Self::FALLBACK.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ChatMessage;

    fn ask(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user(text)],
            temperature: 0.0,
            max_tokens: 16,
        }
    }

    #[tokio::test]
    async fn replies_drain_then_fall_back() {
        let provider = MockProvider::with_responses(vec!["first".into()]);
        provider.add_response("second");
        assert_eq!(provider.chat(ask("a")).await.unwrap(), "first");
        assert_eq!(provider.chat(ask("b")).await.unwrap(), "second");
        assert_eq!(provider.chat(ask("c")).await.unwrap(), MockProvider::FALLBACK);

        let seen = provider.requests();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].messages[0].content, "c");
    }

    #[tokio::test]
    async fn failing_calls_are_recorded_but_keep_replies() {
        let provider = MockProvider::with_responses(vec!["kept".into()]);
        provider.set_failing(true);
        assert!(matches!(
            provider.chat(ask("x")).await,
            Err(TesseraError::Provider { .. })
        ));
        provider.set_failing(false);
        assert_eq!(provider.chat(ask("y")).await.unwrap(), "kept");
        assert_eq!(provider.requests().len(), 2);
    }
}
