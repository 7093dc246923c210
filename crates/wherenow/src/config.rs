//! Configuration management for wherenow.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "wherenow";

/// Default log file name.
const LOG_FILE_NAME: &str = "locations.jsonl";

/// Environment variable prefix.
const ENV_PREFIX: &str = "WHERENOW_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `WHERENOW_`)
/// 2. TOML config file at `~/.config/wherenow/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener configuration.
    pub server: ServerConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Location log configuration.
    pub log: LogConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared bearer token expected in the `Authorization` header.
    pub token: String,
}

/// Location log configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Path to the JSON Lines file.
    /// Defaults to `~/.local/share/wherenow/locations.jsonl`
    pub path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Self::figment(config_path).extract::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validating it.
    ///
    /// Used by commands that only inspect configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_unvalidated(config_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self::figment(config_path).extract::<Config>()?)
    }

    fn figment(config_path: Option<PathBuf>) -> Figment {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("_"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.auth.token.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "auth.token must be set (WHERENOW_AUTH_TOKEN)".to_string(),
            });
        }

        if self.auth.token.chars().any(char::is_whitespace) {
            return Err(Error::ConfigValidation {
                message: "auth.token must not contain whitespace".to_string(),
            });
        }

        if self.server.port == 0 {
            return Err(Error::ConfigValidation {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the log file path, resolving defaults if not set.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(LOG_FILE_NAME))
    }

    /// Get the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// A copy of this configuration that is safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.auth.token.is_empty() {
            copy.auth.token = "********".to_string();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.token = "s3cret".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.auth.token.is_empty());
        assert!(config.log.path.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_token() {
        let result = Config::default().validate();
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("auth.token"));
    }

    #[test]
    fn test_validate_token_with_whitespace() {
        let mut config = valid_config();
        config.auth.token = "two words".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_port() {
        let mut config = valid_config();
        config.server.port = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("server.port"));
    }

    #[test]
    fn test_log_path_default() {
        let config = Config::default();
        let path = config.log_path();

        assert!(path.to_string_lossy().contains("locations.jsonl"));
        assert!(path.to_string_lossy().contains("wherenow"));
    }

    #[test]
    fn test_log_path_custom() {
        let mut config = Config::default();
        config.log.path = Some(PathBuf::from("/srv/wherenow/log.jsonl"));

        assert_eq!(config.log_path(), PathBuf::from("/srv/wherenow/log.jsonl"));
    }

    #[test]
    fn test_bind_addr() {
        let mut config = Config::default();
        config.server.host = "0.0.0.0".to_string();
        config.server.port = 9000;
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = valid_config();
        let redacted = config.redacted();

        assert_ne!(redacted.auth.token, config.auth.token);
        assert!(!serde_json::to_string(&redacted).unwrap().contains("s3cret"));
    }

    #[test]
    fn test_redacted_keeps_empty_token_empty() {
        assert!(Config::default().redacted().auth.token.is_empty());
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("wherenow"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config_without_token_fails() {
        // Defaults alone carry no token
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        if std::env::var("WHERENOW_AUTH_TOKEN").is_err() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(
            &file,
            "[server]\nport = 9191\n\n[auth]\ntoken = \"from-file\"\n\n[log]\npath = \"/tmp/w.jsonl\"\n",
        )
        .unwrap();

        let config = Config::load_unvalidated(Some(file)).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.log_path(), PathBuf::from("/tmp/w.jsonl"));
        if std::env::var("WHERENOW_AUTH_TOKEN").is_err() {
            assert_eq!(config.auth.token, "from-file");
        }
    }

    #[test]
    fn test_load_from_toml_file_validates_with_file_token() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(
            &file,
            "[server]\nhost = \"0.0.0.0\"\n\n[auth]\ntoken = \"from-file\"\n",
        )
        .unwrap();

        let config = Config::load_from(Some(file)).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(!config.auth.token.is_empty());
    }

    #[test]
    fn test_server_config_deserialize() {
        let json = r#"{"port": 3000}"#;
        let server: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(server.port, 3000);
        assert_eq!(server.host, "127.0.0.1");
    }
}
