use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Duplex endpoint (e.g. `ws://127.0.0.1:4710/ws`).
    #[serde(default = "d_url")]
    pub url: String,
    /// Defer connecting until the first call is issued.
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            lazy: false,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnect back-off policy, in config-file units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_500")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_30000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub backoff_factor: f64,
    /// Consecutive failed attempts before giving up.  `0` means unlimited.
    #[serde(default = "d_10")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_attempts: 10,
        }
    }
}

fn d_url() -> String {
    "ws://127.0.0.1:4710/ws".into()
}
fn d_500() -> u64 {
    500
}
fn d_30000() -> u64 {
    30_000
}
fn d_factor() -> f64 {
    2.0
}
fn d_10() -> u32 {
    10
}
