// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tessera configuration.
//!
//! Settings are read from TOML through figment, with unknown keys rejected,
//! then checked for value ranges. Every failure comes back as a
//! [`ConfigError`] that [`render_errors`] can print with the offending line.
//!
//! ```no_run
//! let config = match tessera_config::load_and_validate() {
//!     Ok(config) => config,
//!     Err(errors) => {
//!         tessera_config::render_errors(&errors);
//!         std::process::exit(1);
//!     }
//! };
//! println!("database: {}", config.storage.database_path);
//! ```

use std::path::Path;

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str, ConfigSource};
pub use model::{
    KeywordIndex, MemoryConfig, RetrievalConfig, ServiceConfig, StorageConfig, TasksConfig,
    TesseraConfig, TraitsConfig,
};

/// Extract and validate a configuration from `source`.
pub fn load_from(source: &ConfigSource) -> Result<TesseraConfig, Vec<ConfigError>> {
    let config = source
        .extract()
        .map_err(|err| diagnostic::figment_to_config_errors(err, &source.texts()))?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Layered lookup: system, user and local files, then `TESSERA_*` variables.
pub fn load_and_validate() -> Result<TesseraConfig, Vec<ConfigError>> {
    load_from(&ConfigSource::Layered)
}

/// One explicit file, then `TESSERA_*` variables.
pub fn load_and_validate_path(path: &Path) -> Result<TesseraConfig, Vec<ConfigError>> {
    load_from(&ConfigSource::File(path.to_path_buf()))
}

pub fn load_and_validate_str(toml_content: &str) -> Result<TesseraConfig, Vec<ConfigError>> {
    load_from(&ConfigSource::Inline(toml_content.to_string()))
}
