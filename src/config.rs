//! Database configuration
//!
//! Loaded from `rowmap.toml`:
//!
//! ```toml
//! [database]
//! url = "postgres://localhost/shop"
//! max_connections = 10
//!
//! [mapping]
//! auto_select = true
//! named_params = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RowmapError, RowmapResult};

pub const CONFIG_FILE: &str = "rowmap.toml";
pub const URL_ENV: &str = "ROWMAP_DATABASE_URL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub mapping: MappingConfig,
}

/// Connection settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Connection URL; its scheme picks the dialect unless `dialect` is set
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Dialect name overriding the URL scheme
    pub dialect: Option<String>,
}

/// Query preparation switches
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MappingConfig {
    /// Complete partial SQL with a SELECT clause
    #[serde(default = "default_true")]
    pub auto_select: bool,

    /// Resolve `@name` placeholders from record arguments
    #[serde(default = "default_true")]
    pub named_params: bool,
}

fn default_true() -> bool { true }

fn default_max_connections() -> u32 { 5 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            dialect: None,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            auto_select: true,
            named_params: true,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> RowmapResult<Self> {
        toml::from_str(text).map_err(|e| RowmapError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> RowmapResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| RowmapError::Config(format!("{}: {}", path.display(), e)))
    }

    /// `./rowmap.toml`, then `<config dir>/rowmap/rowmap.toml`, then defaults.
    /// The environment URL override is applied last.
    pub fn discover() -> RowmapResult<Self> {
        let config = match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::load(path)?
            }
            None => Self::default(),
        };
        Ok(config.apply_env_with(|key| std::env::var(key).ok()))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("rowmap").join(CONFIG_FILE));
        }
        paths
    }

    /// Override the URL from `ROWMAP_DATABASE_URL` as resolved by `lookup`.
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(URL_ENV).filter(|u| !u.is_empty()) {
            self.database.url = url;
        }
        self
    }

    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = url.into();
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.database.max_connections = n;
        self
    }

    pub fn dialect(mut self, name: impl Into<String>) -> Self {
        self.config.database.dialect = Some(name.into());
        self
    }

    pub fn auto_select(mut self, on: bool) -> Self {
        self.config.mapping.auto_select = on;
        self
    }

    pub fn named_params(mut self, on: bool) -> Self {
        self.config.mapping.named_params = on;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database.max_connections, 5);
        assert!(config.mapping.auto_select);
        assert!(config.mapping.named_params);
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [database]
            url = "sqlite::memory:"

            [mapping]
            named_params = false
            "#,
        )
        .unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
        assert!(config.mapping.auto_select);
        assert!(!config.mapping.named_params);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[database\nurl=").unwrap_err();
        assert!(matches!(err, RowmapError::Config(_)));
    }

    #[test]
    fn test_env_override() {
        let config = Config::builder().url("postgres://a/b").build();
        let config = config.apply_env_with(|key| {
            (key == URL_ENV).then(|| "mysql://c/d".to_string())
        });
        assert_eq!(config.database.url, "mysql://c/d");

        let config = Config::default().apply_env_with(|_| Some(String::new()));
        assert_eq!(config.database.url, "");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/rowmap.toml").unwrap_err();
        assert!(matches!(err, RowmapError::Io(_)));
    }
}
