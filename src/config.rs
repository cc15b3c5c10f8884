//! Configuration types for the cassette proxy

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use hyper::header::HeaderName;
use hyper::Uri;

use crate::cassette::CassetteOptions;
use crate::headers::{default_rules, HeaderRule};
use crate::{ProxyError, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding cassette files
    pub cassette_dir: PathBuf,
    /// Base endpoint of the real service, e.g. `http://api.example.com:80`
    pub upstream: String,
    /// Port the front-end listens on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Options stored in newly created cassettes
    #[serde(default)]
    pub cassettes: CassetteOptions,
    /// Header forwarding table
    #[serde(default = "default_rules")]
    pub headers: Vec<HeaderRule>,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_listen_port() -> u16 {
    9292
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum inbound request body in bytes
    pub max_request_size: usize,
    /// Upstream call timeout in milliseconds
    pub upstream_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_request_size: 16 * 1024 * 1024, // 16 MB
            upstream_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ProxyError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if !self.cassette_dir.is_dir() {
            return Err(ProxyError::ConfigError(format!(
                "Cassette directory does not exist: {}",
                self.cassette_dir.display()
            )));
        }

        let upstream: Uri = self.upstream.parse().map_err(|e| {
            ProxyError::ConfigError(format!("Invalid upstream '{}': {e}", self.upstream))
        })?;
        if upstream.scheme_str() != Some("http") {
            return Err(ProxyError::ConfigError(format!(
                "Upstream must use the http scheme: {}",
                self.upstream
            )));
        }
        if upstream.authority().is_none() {
            return Err(ProxyError::ConfigError(format!(
                "Upstream has no host: {}",
                self.upstream
            )));
        }

        if self.listen_port == 0 {
            return Err(ProxyError::ConfigError(
                "listen_port cannot be 0".to_string(),
            ));
        }

        for (i, rule) in self.headers.iter().enumerate() {
            if HeaderName::from_bytes(rule.name.as_bytes()).is_err() {
                return Err(ProxyError::ConfigError(format!(
                    "Header rule {i}: invalid header name '{}'",
                    rule.name
                )));
            }
        }

        if self.limits.max_connections == 0 {
            return Err(ProxyError::ConfigError(
                "max_connections must be > 0".to_string(),
            ));
        }
        if self.limits.max_request_size == 0 {
            return Err(ProxyError::ConfigError(
                "max_request_size must be > 0".to_string(),
            ));
        }
        if self.limits.upstream_timeout_ms == 0 {
            return Err(ProxyError::ConfigError(
                "upstream_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
