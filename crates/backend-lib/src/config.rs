// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional `eventroom.toml`
//! (or the file passed explicitly), then `EVENTROOM__*` environment variables.
use crate::promoter::UnlimitedPromotion;
use anyhow::{bail, Result};
use config::{Config, Environment, File, Map};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which [`crate::storage::Storage`] backend to run on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    #[default]
    FlatFile,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Root directory of the flat-file store
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    pub log_format: LogFormat,
    /// Messages replayed to a connection when it joins a room
    pub history_limit: usize,
    /// Frames buffered per connection before broadcasts to it are dropped
    pub outbound_buffer: usize,
    /// Lifetime of issued bearer tokens
    pub token_ttl_secs: u64,
    /// How many waitlist entries an unlimited event promotes per trigger
    pub unlimited_promotion: UnlimitedPromotion,
    /// Mount `POST /tokens`, which hands out a token for any user id.
    /// Local development only.
    pub dev_token_issuer: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("data"),
            storage: StorageKind::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            history_limit: 20,
            outbound_buffer: 64,
            token_ttl_secs: 60 * 60 * 24, // 1 day
            unlimited_promotion: UnlimitedPromotion::default(),
            dev_token_issuer: false,
        }
    }
}

impl Settings {
    /// Load from `eventroom.toml` in the working directory (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit config file, which must then exist
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::layered(path, None)
    }

    /// `env` replaces the process environment when given
    fn layered(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("eventroom").required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("EVENTROOM")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!(
                "log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            );
        }
        if self.history_limit == 0 {
            bail!("history_limit must be positive");
        }
        if self.outbound_buffer == 0 {
            bail!("outbound_buffer must be positive");
        }
        if self.token_ttl_secs == 0 {
            bail!("token_ttl_secs must be positive");
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_settings_validation() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());

        let mut invalid = settings.clone();
        invalid.log_level = "loud".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.history_limit = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings.clone();
        invalid.outbound_buffer = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = settings;
        invalid.token_ttl_secs = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_load_from_file_keeps_defaults_for_missing_keys() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
bind_addr = "0.0.0.0:8080"
storage = "memory"
log_level = "debug"
unlimited_promotion = "drain"
"#
        )
        .unwrap();

        let settings = Settings::load_from(Some(file.path())).unwrap();
        assert_eq!(settings.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.unlimited_promotion, UnlimitedPromotion::Drain);
        assert_eq!(settings.history_limit, 20);
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = Map::new();
        env.insert("EVENTROOM__TOKEN_TTL_SECS".to_string(), "120".to_string());
        env.insert("EVENTROOM__DEV_TOKEN_ISSUER".to_string(), "true".to_string());
        env.insert("UNRELATED".to_string(), "ignored".to_string());

        let settings = Settings::layered(None, Some(env)).unwrap();
        assert_eq!(settings.token_ttl(), Duration::from_secs(120));
        assert!(settings.dev_token_issuer);
    }

    #[test]
    fn test_token_issuer_is_off_by_default() {
        assert!(!Settings::default().dev_token_issuer);
        let settings = Settings::layered(None, Some(Map::new())).unwrap();
        assert!(!settings.dev_token_issuer);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Settings::load_from(Some(Path::new("/nonexistent/eventroom.toml"))).is_err());
    }
}
