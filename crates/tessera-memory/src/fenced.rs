// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pull a JSON document out of a chat reply that may wrap it in a code fence.

use serde::de::DeserializeOwned;

/// Body of the first ```` ```json ```` fence, else of the first bare fence,
/// else the trimmed text.
pub(crate) fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let (open, skip) = match text.find("```json") {
        Some(pos) => (pos, "```json".len()),
        None => match text.find("```") {
            Some(pos) => (pos, 3),
            None => return text,
        },
    };
    let body = &text[open + skip..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

pub(crate) fn parse_fenced<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_fences(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_passes_through() {
        assert_eq!(strip_fences("  {\"a\":1} \n"), "{\"a\":1}");
    }

    #[test]
    fn json_fence_is_preferred() {
        let text = "here:\n```json\n{\"a\":1}\n```\ntrailing";
        assert_eq!(strip_fences(text), "{\"a\":1}");
    }

    #[test]
    fn bare_fence_and_unterminated_fence() {
        assert_eq!(strip_fences("```\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_fences("```json\n{\"b\":2}"), "{\"b\":2}");
    }

    #[test]
    fn parse_reports_errors() {
        let v: serde_json::Value = parse_fenced("```json {\"x\": true} ```").unwrap();
        assert_eq!(v["x"], true);
        assert!(parse_fenced::<serde_json::Value>("not json").is_err());
    }
}
