//! Application configuration: TOML file, environment overrides, validation.
//!
//! ```toml
//! [app]
//! debug = true
//!
//! [server]
//! addr = "0.0.0.0:8080"
//!
//! [rate_limit]
//! max_attempts = 100
//! decay_minutes = 1
//!
//! [cache]
//! driver = "file"
//! path = "storage/cache"
//! default_ttl = 3600
//! ```
//!
//! Every field is optional. Environment variables override the file:
//!
//! | Variable                   | Field                      |
//! |----------------------------|----------------------------|
//! | `APP_DEBUG`                | `app.debug`                |
//! | `SERVER_ADDR`              | `server.addr`              |
//! | `RATE_LIMIT_MAX_ATTEMPTS`  | `rate_limit.max_attempts`  |
//! | `RATE_LIMIT_DECAY_MINUTES` | `rate_limit.decay_minutes` |
//! | `CACHE_DRIVER`             | `cache.driver`             |
//! | `CACHE_PATH`               | `cache.path`               |

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::{Cache, CacheError, FileCache, MemoryCache};
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value `{value}` for {var}")]
    Env { var: &'static str, value: String },

    #[error("{field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Include error details in 500 responses.
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum CacheDriver {
    Memory,
    File,
}

/// `"memory"` selects the in-memory cache; anything else the file cache.
impl From<String> for CacheDriver {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("memory") {
            Self::Memory
        } else {
            Self::File
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub driver: CacheDriver,
    /// Directory of the file cache.
    pub path: PathBuf,
    /// Seconds; applied by the file cache to writes without a TTL.
    pub default_ttl: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: CacheDriver::File,
            path: PathBuf::from("storage/cache"),
            default_ttl: Some(3600),
        }
    }
}

impl CacheConfig {
    /// Constructs the configured backend.
    pub fn build(&self) -> Result<Arc<dyn Cache>, CacheError> {
        Ok(match self.driver {
            CacheDriver::Memory => Arc::new(MemoryCache::new()),
            CacheDriver::File => Arc::new(
                FileCache::open(&self.path)?
                    .with_default_ttl(self.default_ttl.map(Duration::from_secs)),
            ),
        })
    }
}

impl AppConfig {
    /// Parses and validates a TOML document. Environment variables are not consulted.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, applies environment overrides, then validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("APP_DEBUG") {
            self.app.debug = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = lookup("SERVER_ADDR") {
            self.server.addr = v;
        }
        if let Some(v) = lookup("RATE_LIMIT_MAX_ATTEMPTS") {
            self.rate_limit.max_attempts = parse_u32("RATE_LIMIT_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_DECAY_MINUTES") {
            self.rate_limit.decay_minutes = parse_u32("RATE_LIMIT_DECAY_MINUTES", v)?;
        }
        if let Some(v) = lookup("CACHE_DRIVER") {
            self.cache.driver = CacheDriver::from(v);
        }
        if let Some(v) = lookup("CACHE_PATH") {
            self.cache.path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "rate_limit.max_attempts",
                reason: "must be at least 1",
            });
        }
        if self.rate_limit.decay_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "rate_limit.decay_minutes",
                reason: "must be at least 1",
            });
        }
        if self.server.addr.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server.addr",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

fn parse_u32(var: &'static str, value: String) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}
