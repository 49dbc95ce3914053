mod client;
mod observability;
mod server;

pub use client::*;
pub use observability::*;
pub use server::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load a TOML config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if !self.server.ws_path.starts_with('/') {
            error("server.ws_path", "ws_path must start with '/'");
        }
        if let Some(prefix) = &self.server.prefix {
            if !prefix.starts_with('/') {
                error("server.prefix", "prefix must start with '/'");
            }
        }
        if let Some(ka) = &self.server.keepalive {
            if ka.ping_interval_ms == 0 || ka.pong_wait_ms == 0 {
                error(
                    "server.keepalive",
                    "ping_interval_ms and pong_wait_ms must be greater than 0",
                );
            }
        }
        if self.client.reconnect.backoff_factor < 1.0 {
            error("client.reconnect.backoff_factor", "backoff_factor must be >= 1.0");
        }
        if let Some(otlp) = &self.observability.otlp {
            if otlp.endpoint.is_empty() {
                error("observability.otlp.endpoint", "endpoint must not be empty");
            }
        }

        if self.server.cors.origin.as_deref() == Some("*") && self.server.cors.credentials {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors".into(),
                message: "credentials are ignored by browsers for wildcard \"*\" origins".into(),
            });
        }

        if let Some(otlp) = &self.observability.otlp {
            if !(0.0..=1.0).contains(&otlp.sample_ratio) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "observability.otlp.sample_ratio".into(),
                    message: format!(
                        "{} is outside [0, 1]; {} is used",
                        otlp.sample_ratio,
                        otlp.effective_ratio()
                    ),
                });
            }
        }

        errors
    }
}
