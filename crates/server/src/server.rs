//! Server assembly: compiled routes plus transport settings, exposed as
//! an axum [`axum::Router`] serving both transports.

use std::sync::Arc;

use axum::routing::get;
use sy_domain::config::{CorsConfig, KeepAliveConfig, ServerConfig};
use tower_http::trace::TraceLayer;

use crate::context::Middleware;
use crate::router::{RouteTable, Router};
use crate::{duplex, http};

struct Inner {
    routes: RouteTable,
    cors: CorsConfig,
    prefix: Option<String>,
    keepalive: Option<KeepAliveConfig>,
    ws_path: String,
}

/// Shared server state.  Cheap to clone.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

impl RpcServer {
    pub fn builder(router: Router) -> RpcServerBuilder {
        RpcServerBuilder {
            router,
            root: Vec::new(),
            config: ServerConfig::default(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn cors(&self) -> &CorsConfig {
        &self.inner.cors
    }

    pub fn prefix(&self) -> Option<&str> {
        self.inner.prefix.as_deref()
    }

    pub fn keepalive(&self) -> Option<KeepAliveConfig> {
        self.inner.keepalive
    }

    pub fn ws_path(&self) -> &str {
        &self.inner.ws_path
    }

    /// axum app: the duplex endpoint on `ws_path`, every other path goes
    /// to the single-shot adapter.
    pub fn into_router(self) -> axum::Router {
        let ws_path = self.inner.ws_path.clone();
        axum::Router::new()
            .route(&ws_path, get(duplex::upgrade))
            .fallback(http::single_shot)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

pub struct RpcServerBuilder {
    router: Router,
    root: Vec<Arc<dyn Middleware>>,
    config: ServerConfig,
}

impl RpcServerBuilder {
    /// Apply the transport settings of a `[server]` config section.
    pub fn from_config(mut self, config: &ServerConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Root middleware.  Runs before every procedure's own middleware,
    /// in the order added.
    pub fn context<M: Middleware>(mut self, middleware: M) -> Self {
        self.root.push(Arc::new(middleware));
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = cors;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = Some(prefix.into());
        self
    }

    pub fn keepalive(mut self, keepalive: KeepAliveConfig) -> Self {
        self.config.keepalive = Some(keepalive);
        self
    }

    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.config.ws_path = path.into();
        self
    }

    pub fn build(self) -> RpcServer {
        let routes = self.router.compile_with(&self.root);
        let prefix = self
            .config
            .prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        tracing::info!(
            routes = routes.len(),
            ws_path = %self.config.ws_path,
            prefix = prefix.as_deref().unwrap_or(""),
            keepalive = self.config.keepalive.is_some(),
            "rpc server built"
        );

        RpcServer {
            inner: Arc::new(Inner {
                routes,
                cors: self.config.cors,
                prefix,
                keepalive: self.config.keepalive,
                ws_path: self.config.ws_path,
            }),
        }
    }
}
