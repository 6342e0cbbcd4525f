// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Date/time expression parser capability.

use chrono::{DateTime, Utc};

/// Resolves a natural-language time expression ("yesterday", "last March")
/// relative to a reference time.
pub trait TemporalParser: Send + Sync + 'static {
    /// Returns `None` when the text contains no recognizable expression.
    fn extract(&self, text: &str, reference: Option<DateTime<Utc>>) -> Option<DateTime<Utc>>;
}
