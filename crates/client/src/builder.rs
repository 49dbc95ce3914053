//! Builder pattern for constructing a [`DuplexClient`].

use sy_domain::config::ClientConfig;

use crate::duplex::DuplexClient;
use crate::error::ClientError;
use crate::reconnect::ReconnectBackoff;

/// Fluent builder for [`DuplexClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use sy_client::DuplexClientBuilder;
/// # async fn demo() -> Result<(), sy_client::ClientError> {
/// let client = DuplexClientBuilder::new()
///     .url("ws://localhost:4710/ws")
///     .lazy(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct DuplexClientBuilder {
    pub(crate) url: String,
    pub(crate) lazy: bool,
    pub(crate) backoff: ReconnectBackoff,
}

impl DuplexClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    /// Seed the builder from the `[client]` config section.
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            lazy: cfg.lazy,
            backoff: ReconnectBackoff::from(&cfg.reconnect),
        }
    }

    /// Set the duplex endpoint (e.g. `wss://api.example.com/ws`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Defer connecting until the first call or subscription.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build the [`DuplexClient`].  Unless lazy, the connection supervisor
    /// starts immediately, so this must run inside a Tokio runtime.
    pub fn build(self) -> Result<DuplexClient, ClientError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "duplex url must start with ws:// or wss://, got {:?}",
                self.url
            )));
        }

        let client = DuplexClient::new(self.url, self.backoff);
        if !self.lazy {
            client.ensure_started();
        }
        Ok(client)
    }
}

impl Default for DuplexClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_urls() {
        let err = DuplexClientBuilder::new()
            .url("http://localhost:4710")
            .lazy(true)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn lazy_client_does_not_need_a_runtime() {
        let client = DuplexClientBuilder::new().lazy(true).build().unwrap();
        assert_eq!(client.state(), crate::ConnectionState::Disconnected);
    }
}
