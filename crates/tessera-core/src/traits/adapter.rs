// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;

use crate::error::TesseraError;
use crate::types::{AdapterType, HealthStatus};

/// Identity and lifecycle shared by every pluggable collaborator.
#[async_trait]
pub trait PluginAdapter: Send + Sync + 'static {
    /// Short name shown in logs and `tessera status`.
    fn name(&self) -> &str;

    fn version(&self) -> semver::Version;

    fn adapter_type(&self) -> AdapterType;

    async fn health_check(&self) -> Result<HealthStatus, TesseraError>;

    /// Release held resources. Calling it on an adapter that never started
    /// must succeed.
    async fn shutdown(&self) -> Result<(), TesseraError>;
}
