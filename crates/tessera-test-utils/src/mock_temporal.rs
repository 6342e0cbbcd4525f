// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Phrase-table date parser.

use chrono::{DateTime, Duration, Utc};
use tessera_core::TemporalParser;

/// Resolves a fixed set of phrases.
///
/// Absolute phrases map to a fixed instant; relative phrases map to an
/// offset from the reference time and resolve to nothing without one.
#[derive(Debug, Default)]
pub struct MockTemporalParser {
    absolute: Vec<(String, DateTime<Utc>)>,
    relative: Vec<(String, Duration)>,
}

impl MockTemporalParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phrase(mut self, phrase: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.absolute.push((phrase.into().to_lowercase(), at));
        self
    }

    pub fn with_relative(mut self, phrase: impl Into<String>, offset: Duration) -> Self {
        self.relative.push((phrase.into().to_lowercase(), offset));
        self
    }
}

impl TemporalParser for MockTemporalParser {
    fn extract(&self, text: &str, reference: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let lower = text.to_lowercase();
        if let Some((_, at)) = self.absolute.iter().find(|(p, _)| lower.contains(p.as_str())) {
            return Some(*at);
        }
        let (_, offset) = self
            .relative
            .iter()
            .find(|(p, _)| lower.contains(p.as_str()))?;
        reference.map(|r| r + *offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn relative_needs_reference() {
        let parser = MockTemporalParser::new().with_relative("yesterday", Duration::days(-1));
        let reference = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(
            parser.extract("Went hiking Yesterday", Some(reference)),
            Some(reference - Duration::days(1))
        );
        assert_eq!(parser.extract("went hiking yesterday", None), None);
        assert_eq!(parser.extract("no time here", Some(reference)), None);
    }
}
