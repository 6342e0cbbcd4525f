// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Where configuration comes from, and how the layers are merged.
//!
//! Layered lookup reads, lowest precedence first, `/etc/tessera/tessera.toml`,
//! the user config dir's `tessera/tessera.toml` and `./tessera.toml`, then
//! applies `TESSERA_*` environment variables on top.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::TesseraConfig;

/// Sections whose env keys are rewritten from `section_key` to `section.key`.
const SECTIONS: &[&str] = &["service", "storage", "memory", "retrieval", "traits", "tasks"];

const FILE_NAME: &str = "tessera.toml";

/// One way of obtaining a configuration.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// System, user and working-directory files plus the environment.
    Layered,
    /// A single file plus the environment.
    File(PathBuf),
    /// TOML text only; the environment is ignored.
    Inline(String),
}

impl ConfigSource {
    /// Candidate files in merge order. Missing files are skipped by figment.
    pub fn files(&self) -> Vec<PathBuf> {
        match self {
            Self::Layered => {
                let mut files = vec![Path::new("/etc/tessera").join(FILE_NAME)];
                files.extend(dirs::config_dir().map(|d| d.join("tessera").join(FILE_NAME)));
                files.push(
                    std::env::current_dir()
                        .map(|d| d.join(FILE_NAME))
                        .unwrap_or_else(|_| PathBuf::from(FILE_NAME)),
                );
                files
            }
            Self::File(path) => vec![path.clone()],
            Self::Inline(_) => Vec::new(),
        }
    }

    pub fn figment(&self) -> Figment {
        let base = Figment::from(Serialized::defaults(TesseraConfig::default()));
        match self {
            Self::Inline(text) => base.merge(Toml::string(text)),
            _ => self
                .files()
                .into_iter()
                .fold(base, |fig, file| fig.merge(Toml::file(file)))
                .merge(env_provider()),
        }
    }

    /// `(name, text)` of every source that exists, for placing error spans.
    pub fn texts(&self) -> Vec<(String, String)> {
        match self {
            Self::Inline(text) => vec![("<inline>".to_string(), text.clone())],
            _ => self
                .files()
                .into_iter()
                .filter_map(|file| {
                    let text = std::fs::read_to_string(&file).ok()?;
                    Some((file.display().to_string(), text))
                })
                .collect(),
        }
    }

    pub fn extract(&self) -> Result<TesseraConfig, figment::Error> {
        self.figment().extract()
    }
}

pub fn load_config() -> Result<TesseraConfig, figment::Error> {
    ConfigSource::Layered.extract()
}

pub fn load_config_from_path(path: &Path) -> Result<TesseraConfig, figment::Error> {
    ConfigSource::File(path.to_path_buf()).extract()
}

pub fn load_config_from_str(toml_content: &str) -> Result<TesseraConfig, figment::Error> {
    ConfigSource::Inline(toml_content.to_string()).extract()
}

/// Map an env key (prefix stripped, lowercased) to its dotted config path.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `TESSERA_RETRIEVAL_DECAY_RATE_SECS` maps to `retrieval.decay_rate_secs`.
pub fn map_env_key(key: &str) -> String {
    SECTIONS
        .iter()
        .find_map(|section| {
            let rest = key.strip_prefix(section)?.strip_prefix('_')?;
            Some(format!("{section}.{rest}"))
        })
        .unwrap_or_else(|| key.to_string())
}

fn env_provider() -> Env {
    Env::prefixed("TESSERA_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_first_section_dot() {
        assert_eq!(map_env_key("storage_database_path"), "storage.database_path");
        assert_eq!(
            map_env_key("retrieval_decay_rate_secs"),
            "retrieval.decay_rate_secs"
        );
        assert_eq!(
            map_env_key("traits_default_window_days"),
            "traits.default_window_days"
        );
        assert_eq!(map_env_key("tasks_idle_timeout_secs"), "tasks.idle_timeout_secs");
    }

    #[test]
    fn unknown_section_is_left_alone() {
        assert_eq!(map_env_key("bogus_key"), "bogus_key");
    }

    #[test]
    fn layered_lookup_ends_with_working_directory() {
        let files = ConfigSource::Layered.files();
        assert_eq!(files.first().unwrap(), Path::new("/etc/tessera/tessera.toml"));
        assert!(files.last().unwrap().ends_with(FILE_NAME));
        assert!(ConfigSource::Inline(String::new()).files().is_empty());
    }

    #[test]
    fn texts_skip_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.toml");
        std::fs::write(&present, "[service]\nname = \"x\"\n").unwrap();

        let texts = ConfigSource::File(present.clone()).texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, present.display().to_string());
        assert!(ConfigSource::File(dir.path().join("absent.toml")).texts().is_empty());
    }
}
