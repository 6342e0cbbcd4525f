// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::types::AdapterType;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a memory, trait or storage operation.
///
/// Expected outcomes such as a duplicate write or a missing trait are not
/// errors; they are reported through the operation's outcome type.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// SQLite or the connection thread failed.
    #[error("storage error: {source}")]
    Storage { source: BoxError },

    /// The chat provider failed or returned text that could not be used.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<BoxError>,
    },

    /// The embedding provider failed or returned the wrong number of vectors.
    #[error("embedding error: {message}")]
    Embedding {
        message: String,
        source: Option<BoxError>,
    },

    /// Input rejected before anything was written.
    #[error("validation error: {0}")]
    Validation(String),

    /// The row's version moved between read and write.
    #[error("version conflict on {id}: expected version {expected_version}")]
    Conflict { id: String, expected_version: i64 },

    /// An operation needs a collaborator that was not configured.
    #[error("adapter not found: {adapter_type}/{name}")]
    AdapterNotFound {
        adapter_type: AdapterType,
        name: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Only version conflicts succeed when the same call is simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            source: message.into().into(),
        }
    }
}
