//! Configuration file handling for flickd

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_SERVER: &str = "http://localhost:8080";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default service base URL
    pub server: Option<String>,
    /// Service description file (YAML)
    pub service: Option<PathBuf>,
    /// Application key
    pub api_key: Option<String>,
    /// Application secret
    pub api_secret: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("flickd");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        &self,
        server: Option<&str>,
        service: Option<&Path>,
        api_key: Option<&str>,
        api_secret: Option<&str>,
        no_color: bool,
    ) -> MergedConfig {
        let server_overridden = server.is_some() || self.server.is_some();
        MergedConfig {
            server: server
                .map(String::from)
                .or_else(|| self.server.clone())
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            server_overridden,
            service: service
                .map(Path::to_path_buf)
                .or_else(|| self.service.clone()),
            api_key: api_key.map(String::from).or_else(|| self.api_key.clone()),
            api_secret: api_secret
                .map(String::from)
                .or_else(|| self.api_secret.clone()),
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub server: String,
    /// Whether `server` came from the command line or config file rather than the default
    pub server_overridden: bool,
    pub service: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_file() {
        let config: Config = toml::from_str(
            r#"
            server = "https://api.example.com"
            api_key = "file-key"
            no_color = true
            "#,
        )
        .unwrap();

        let merged = config.merge_with_args(None, None, Some("cli-key"), None, false);
        assert_eq!(merged.server, "https://api.example.com");
        assert!(merged.server_overridden);
        assert_eq!(merged.api_key.as_deref(), Some("cli-key"));
        assert_eq!(merged.api_secret, None);
        assert!(merged.no_color);
    }

    #[test]
    fn test_defaults() {
        let merged = Config::default().merge_with_args(None, None, None, None, false);
        assert_eq!(merged.server, DEFAULT_SERVER);
        assert!(!merged.server_overridden);
        assert!(merged.service.is_none());
    }
}
