// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading the application configuration from JSON and YAML files in
//! the working directory or the global config directory.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ConfigError;

use super::types::AppConfig;

/// Config file names to search for in the working directory (in order).
pub const CONFIG_FILES: &[&str] = &["colloquy.yaml", "colloquy.yml", "colloquy.json"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".colloquy";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Find the config file to use for `dir`, falling back to the global one.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
        .or_else(|| get_global_config_path().filter(|path| path.exists()))
}

/// Load a configuration file (JSON or YAML, by extension).
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Load the application config.
///
/// An explicit `path` must exist. Without one the working directory and then
/// the global directory are searched; when nothing is found the defaults apply.
pub fn load_app_config(path: Option<&Path>, dir: &Path) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match find_config_file(dir) {
            Some(p) => p,
            None => return Ok(AppConfig::default()),
        },
    };

    let config = load_config_file(&path)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_yaml_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("colloquy.yaml");
        std::fs::write(
            &path,
            "full_debug: true\nchunk_delay_ms: 10\nsession_defaults:\n  vendor: anthropic\n  model: claude-test\n",
        )
        .unwrap();

        let config = load_app_config(None, temp.path()).unwrap();
        assert!(config.full_debug);
        assert_eq!(config.chunk_delay_ms, 10);
        assert_eq!(config.session_defaults.model.as_deref(), Some("claude-test"));
    }

    #[test]
    fn test_load_json_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.json");
        std::fs::write(&path, r#"{"request_timeout_secs": 5}"#).unwrap();

        let config = load_app_config(Some(&path), temp.path()).unwrap();
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = load_app_config(Some(&temp.path().join("nope.yaml")), temp.path());
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("colloquy.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::JsonError(_))
        ));
    }
}
