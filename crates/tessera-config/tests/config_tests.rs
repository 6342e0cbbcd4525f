// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Tessera configuration system.

use tessera_config::diagnostic::ConfigError;
use tessera_config::model::{KeywordIndex, TesseraConfig};
use tessera_config::{
    load_and_validate_path, load_and_validate_str, load_config_from_path, load_config_from_str,
    ConfigSource,
};

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_tessera_config() {
    let toml = r#"
[service]
name = "memory-node"
log_level = "debug"

[storage]
database_path = "/tmp/test.db"
wal_mode = false

[memory]
embedding_dims = 384

[retrieval]
default_limit = 8
decay_rate_secs = 86400.0
keyword_index = "fts5"

[traits]
default_window_days = 14
default_behavior_confidence = 0.45
default_context = "work"

[tasks]
idle_timeout_secs = 120
reflection_threshold = 3
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.service.name, "memory-node");
    assert_eq!(config.service.log_level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.memory.embedding_dims, Some(384));
    assert_eq!(config.retrieval.default_limit, 8);
    assert_eq!(config.retrieval.decay_rate_secs, 86_400.0);
    assert_eq!(config.retrieval.keyword_index, KeywordIndex::Fts5);
    assert_eq!(config.traits.default_window_days, 14);
    assert_eq!(config.traits.default_behavior_confidence, 0.45);
    assert_eq!(config.traits.default_context, "work");
    assert_eq!(config.tasks.idle_timeout_secs, 120);
    assert_eq!(config.tasks.reflection_threshold, 3);
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.service.name, "tessera");
    assert_eq!(config.service.log_level, "info");
    assert!(config.storage.database_path.ends_with("tessera.db"));
    assert!(config.storage.wal_mode);
    assert!(config.memory.embedding_dims.is_none());
    assert_eq!(config.retrieval.default_limit, 5);
    assert_eq!(config.retrieval.decay_rate_secs, 30.0 * 86_400.0);
    assert_eq!(config.retrieval.keyword_index, KeywordIndex::Auto);
    assert_eq!(config.traits.default_window_days, 30);
    assert_eq!(config.traits.default_behavior_confidence, 0.4);
    assert_eq!(config.traits.default_context, "general");
    assert_eq!(config.tasks.idle_timeout_secs, 300);
}

/// Unknown field in [retrieval] produces an UnknownKey diagnostic with a suggestion.
#[test]
fn unknown_key_yields_suggestion() {
    let toml = r#"
[retrieval]
defualt_limit = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    let found = errors.iter().any(|e| {
        matches!(
            e,
            ConfigError::UnknownKey { key, suggestion: Some(s), .. }
                if key == "defualt_limit" && s == "default_limit"
        )
    });
    assert!(found, "expected UnknownKey with suggestion, got {errors:?}");
}

/// A wrongly typed value is reported as InvalidType with its dotted key.
#[test]
fn wrong_type_yields_invalid_type() {
    let toml = r#"
[retrieval]
default_limit = "many"
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject string limit");
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::InvalidType { key, .. } if key == "retrieval.default_limit"
    )));
}

/// Semantic validation runs after successful deserialization.
#[test]
fn semantic_validation_runs_after_parse() {
    let toml = r#"
[traits]
default_behavior_confidence = 2.0
"#;

    let errors = load_and_validate_str(toml).expect_err("confidence out of range");
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("default_behavior_confidence"))));
}

/// Dotted overrides (what the env provider produces) land on the right key.
#[test]
fn dotted_override_maps_to_nested_key() {
    let config: TesseraConfig = ConfigSource::Inline("[retrieval]\ndecay_rate_secs = 10.0\n".into())
        .figment()
        .merge(("retrieval.decay_rate_secs", 99.0))
        .extract()
        .expect("should merge override");

    assert_eq!(config.retrieval.decay_rate_secs, 99.0);
}

/// Errors in an explicit file point at the offending line of that file.
#[test]
fn file_errors_carry_source_span() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tessera.toml");
    std::fs::write(&path, "[service]\nname = \"x\"\n\n[traits]\ndefault_windw_days = 3\n").unwrap();

    let errors = load_and_validate_path(&path).expect_err("unknown key");
    let Some(ConfigError::UnknownKey { span: Some(span), src: Some(_), suggestion, .. }) =
        errors.first()
    else {
        panic!("expected a located UnknownKey, got {errors:?}");
    };
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(&text[span.offset()..span.offset() + span.len()], "default_windw_days");
    assert_eq!(suggestion.as_deref(), Some("default_window_days"));
}

/// Missing config files are silently skipped (Figment's Toml::file() behavior).
#[test]
fn missing_config_file_is_skipped() {
    let config = load_config_from_path(std::path::Path::new("/nonexistent/tessera.toml"))
        .expect("missing file should be silently skipped");
    assert_eq!(config.service.name, "tessera");
}

/// Defaults survive a JSON round trip, so they can be echoed by `check-config`.
#[test]
fn defaults_serialize_to_json() {
    let json = serde_json::to_value(TesseraConfig::default()).unwrap();
    assert_eq!(json["retrieval"]["keyword_index"], "auto");
    assert_eq!(json["traits"]["default_context"], "general");
}

/// Diagnostics render through miette without panicking.
#[test]
fn diagnostics_render_through_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let errors = load_and_validate_str("[tasks]\nidle_timeout = 5\n").unwrap_err();
    let handler = GraphicalReportHandler::new();
    for error in &errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        handler.render_report(&mut buf, diagnostic).unwrap();
        assert!(buf.contains("idle_timeout"));
    }
}
