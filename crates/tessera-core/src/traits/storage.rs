// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;

use crate::error::TesseraError;
use crate::traits::adapter::PluginAdapter;

/// Backend holding memories, trait evidence and the audit history.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Open the backend and apply pending migrations.
    async fn initialize(&self) -> Result<(), TesseraError>;

    /// Flush pending writes. The backend stays usable afterwards.
    async fn close(&self) -> Result<(), TesseraError>;
}
