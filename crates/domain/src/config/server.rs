use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_4710")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Path the duplex WebSocket endpoint is mounted on.
    #[serde(default = "d_ws_path")]
    pub ws_path: String,
    /// Prefix stripped from single-shot request paths before route
    /// matching (e.g. `/api`).
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Keep-alive supervision for duplex connections.  `None` disables it.
    #[serde(default)]
    pub keepalive: Option<KeepAliveConfig>,
    /// Upper bound on concurrently served HTTP requests.
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4710,
            host: d_host(),
            ws_path: d_ws_path(),
            prefix: None,
            cors: CorsConfig::default(),
            keepalive: None,
            max_concurrent_requests: 256,
        }
    }
}

/// CORS headers written by the single-shot adapter.
///
/// Each option maps 1:1 to an `Access-Control-*` response header and is
/// only emitted when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `Access-Control-Allow-Origin`.
    #[serde(default)]
    pub origin: Option<String>,
    /// `Access-Control-Allow-Methods`.
    #[serde(default)]
    pub methods: Option<String>,
    /// `Access-Control-Allow-Headers`.
    #[serde(default)]
    pub allowed_headers: Option<String>,
    /// `Access-Control-Expose-Headers`.
    #[serde(default)]
    pub exposed_headers: Option<String>,
    /// `Access-Control-Allow-Credentials: true` when set.
    #[serde(default)]
    pub credentials: bool,
    /// `Access-Control-Max-Age`, in seconds.
    #[serde(default)]
    pub max_age: Option<u64>,
}

/// Ping/pong supervision of duplex connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Interval between server pings.
    pub ping_interval_ms: u64,
    /// How long after a ping a pong must be observed before the
    /// connection is terminated.
    pub pong_wait_ms: u64,
}

impl KeepAliveConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_4710() -> u16 {
    4710
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_ws_path() -> String {
    "/ws".into()
}
fn d_256() -> usize {
    256
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_empty_toml_uses_all_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.port, 4710);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.ws_path, "/ws");
        assert!(cfg.prefix.is_none());
        assert!(cfg.keepalive.is_none());
        assert_eq!(cfg.cors, CorsConfig::default());
    }

    #[test]
    fn cors_options_parse() {
        let toml_str = r#"
            [cors]
            origin = "https://app.example.com"
            methods = "POST, OPTIONS"
            allowed_headers = "content-type"
            credentials = true
            max_age = 600
        "#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.cors.origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(cfg.cors.methods.as_deref(), Some("POST, OPTIONS"));
        assert!(cfg.cors.exposed_headers.is_none());
        assert!(cfg.cors.credentials);
        assert_eq!(cfg.cors.max_age, Some(600));
    }

    #[test]
    fn keepalive_durations() {
        let ka = KeepAliveConfig {
            ping_interval_ms: 30_000,
            pong_wait_ms: 5_000,
        };
        assert_eq!(ka.ping_interval(), Duration::from_secs(30));
        assert_eq!(ka.pong_wait(), Duration::from_secs(5));
    }
}
