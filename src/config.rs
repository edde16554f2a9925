//! Configuration management
//!
//! Config is read from a TOML file named by the `CONFIG_PATH` environment
//! variable. Every section has defaults so a partial (or missing) file still
//! yields a runnable configuration.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::params::PaperSize;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pdf: PdfConfig,
    pub cache: CacheConfig,
    pub rate_limiter: RateLimiterConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Path to the Chromium executable. Empty means "let the launcher find
    /// one"; the `CHROME_BIN` env var overrides an empty value at startup.
    pub chrome_path: String,
    pub chrome_no_sandbox: bool,
    /// Number of concurrently attachable tabs. Zero or negative disables the
    /// pool and falls back to one fresh browser per request.
    pub chrome_pool_size: i32,
    /// Base directory for browser profile dirs. Empty means the OS temp root.
    pub user_data_dir: String,
    /// Per-render timeout in seconds.
    pub timeout_secs: u64,
    pub default_paper: String,
    pub paper_sizes: HashMap<String, PaperSize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub redis_url: String,
    /// TTL for cached PDFs in seconds. Non-positive values fall back to 60s
    /// at write time.
    pub ttl_secs: i64,
    /// Redis database used for rate-limit counters, kept separate from the
    /// PDF cache.
    pub rate_limit_redis_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Width of the sliding window in seconds.
    pub interval_secs: u64,
    /// Budget for anonymous (keyless) clients. Zero disables the anonymous
    /// limiter.
    pub user_limit: u32,
    pub enable_user_limiter: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Postgres connection string for the token control-plane table.
    pub database_url: String,
    /// Token reload interval in seconds.
    pub reload_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_html_bytes: usize,
    pub max_pdf_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            chrome_path: String::new(),
            chrome_no_sandbox: false,
            chrome_pool_size: 4,
            user_data_dir: String::new(),
            timeout_secs: 30,
            default_paper: "A4".to_string(),
            paper_sizes: default_paper_sizes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            ttl_secs: 86_400,
            rate_limit_redis_url: "redis://127.0.0.1:6379/1".to_string(),
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            user_limit: 0,
            enable_user_limiter: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://postgres@localhost:5432/html2pdf".to_string(),
            reload_secs: 60,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_html_bytes: 2 * 1024 * 1024,
            max_pdf_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Built-in paper size table, dimensions in inches.
fn default_paper_sizes() -> HashMap<String, PaperSize> {
    HashMap::from([
        ("A3".to_string(), PaperSize::new(11.69, 16.54)),
        ("A4".to_string(), PaperSize::new(8.27, 11.69)),
        ("A5".to_string(), PaperSize::new(5.83, 8.27)),
        ("LETTER".to_string(), PaperSize::new(8.5, 11.0)),
        ("LEGAL".to_string(), PaperSize::new(8.5, 14.0)),
        ("TABLOID".to_string(), PaperSize::new(11.0, 17.0)),
    ])
}

impl Config {
    /// Load configuration from the file named by `CONFIG_PATH`, or defaults
    /// when the variable is unset.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var("CONFIG_PATH") {
            Ok(path) if !path.is_empty() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
