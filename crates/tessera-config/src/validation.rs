// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Range and consistency checks run after figment has produced a config.

use crate::diagnostic::ConfigError;
use crate::model::TesseraConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Longest trend window the trait engine accepts.
const MAX_WINDOW_DAYS: i64 = 3650;

/// Check every setting and report all violations together.
pub fn validate_config(config: &TesseraConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.service.log_level.as_str()) {
        fail(format!(
            "service.log_level `{}` must be one of: {}",
            config.service.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if config.memory.embedding_dims == Some(0) {
        fail("memory.embedding_dims must be at least 1 when set".to_string());
    }

    if config.retrieval.default_limit < 1 {
        fail("retrieval.default_limit must be at least 1".to_string());
    }

    let decay = config.retrieval.decay_rate_secs;
    if !decay.is_finite() || decay <= 0.0 {
        fail(format!(
            "retrieval.decay_rate_secs must be a positive number, got {decay}"
        ));
    }

    let window = config.traits.default_window_days;
    if !(1..=MAX_WINDOW_DAYS).contains(&window) {
        fail(format!(
            "traits.default_window_days must be between 1 and {MAX_WINDOW_DAYS}, got {window}"
        ));
    }

    let confidence = config.traits.default_behavior_confidence;
    if !(0.0..=1.0).contains(&confidence) {
        fail(format!(
            "traits.default_behavior_confidence must be within [0, 1], got {confidence}"
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &TesseraConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        let config = TesseraConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = TesseraConfig::default();
        config.storage.database_path = "  ".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("database_path"))));
    }

    #[test]
    fn zero_limit_and_zero_dims_fail() {
        let mut config = TesseraConfig::default();
        config.retrieval.default_limit = 0;
        config.memory.embedding_dims = Some(0);
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("default_limit")));
        assert!(msgs.iter().any(|m| m.contains("embedding_dims")));
    }

    #[test]
    fn errors_are_collected_not_fail_fast() {
        let mut config = TesseraConfig::default();
        config.service.log_level = "loud".to_string();
        config.retrieval.decay_rate_secs = 0.0;
        config.traits.default_window_days = 0;
        config.traits.default_behavior_confidence = 1.5;
        assert_eq!(validate_config(&config).unwrap_err().len(), 4);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let mut config = TesseraConfig::default();
        config.traits.default_window_days = MAX_WINDOW_DAYS;
        assert!(validate_config(&config).is_ok());
        config.traits.default_window_days = 3_000_000;
        assert!(messages(&config)[0].contains("default_window_days"));
    }

    #[test]
    fn nan_decay_rate_is_rejected() {
        let mut config = TesseraConfig::default();
        config.retrieval.decay_rate_secs = f64::NAN;
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("decay_rate_secs")));
    }

    #[test]
    fn traits_section_deny_unknown_fields() {
        let toml_str = r#"
[traits]
default_window_days = 7
windw = 3
"#;
        assert!(toml::from_str::<TesseraConfig>(toml_str).is_err());
    }

    #[test]
    fn keyword_index_parses_lowercase() {
        let toml_str = r#"
[retrieval]
keyword_index = "plain"
"#;
        let config: TesseraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retrieval.keyword_index, crate::model::KeywordIndex::Plain);
    }
}
