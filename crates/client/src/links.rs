//! Client link chain.
//!
//! A call passes through an ordered list of [`Link`]s.  Each link may
//! inspect or rewrite the [`Operation`], then hand it to the rest of the
//! chain through [`Next`], which is consumed on use.  The last link must
//! perform the transport itself; falling off the end of the chain is
//! [`CallError::ChainExhausted`].
//!
//! ```text
//! Client ─► LoggerLink ─► SplitLink ─┬─► [HttpLink]     (queries)
//!                                    └─► [DuplexLink]   (subscriptions)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sy_protocol::Method;

use crate::duplex::{DuplexClient, SubscriptionCallback, Unsubscribe};
use crate::error::{CallError, ClientError};
use crate::shared::SharedSubscriptions;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation / Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum Operation {
    Query {
        path: String,
        input: Option<Value>,
    },
    Subscribe {
        path: String,
        input: Option<Value>,
        callback: SubscriptionCallback,
    },
}

impl Operation {
    pub fn path(&self) -> &str {
        match self {
            Operation::Query { path, .. } | Operation::Subscribe { path, .. } => path,
        }
    }

    pub fn input(&self) -> Option<&Value> {
        match self {
            Operation::Query { input, .. } | Operation::Subscribe { input, .. } => input.as_ref(),
        }
    }

    /// Wire method this operation maps to.
    pub fn method(&self) -> Method {
        match self {
            Operation::Query { .. } => Method::Post,
            Operation::Subscribe { .. } => Method::Subscribe,
        }
    }

    pub fn is_subscription(&self) -> bool {
        matches!(self, Operation::Subscribe { .. })
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("method", &self.method())
            .field("path", &self.path())
            .field("input", &self.input())
            .finish()
    }
}

pub enum Outcome {
    /// Result of a query.
    Value(Value),
    /// A live subscription.
    Subscribed(Unsubscribe),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outcome::Subscribed(_) => f.write_str("Subscribed(..)"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chain plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait Link: Send + Sync {
    async fn handle(&self, op: Operation, next: Next<'_>) -> Result<Outcome, CallError>;
}

/// The remainder of the chain after the current link.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Link>],
}

impl<'a> Next<'a> {
    /// Run the rest of the chain.  Takes `self`, so a link can call it
    /// at most once.
    pub async fn run(self, op: Operation) -> Result<Outcome, CallError> {
        match self.rest.split_first() {
            Some((link, rest)) => link.handle(op, Next { rest }).await,
            None => Err(CallError::ChainExhausted),
        }
    }
}

#[derive(Clone)]
pub struct LinkChain {
    links: Arc<[Arc<dyn Link>]>,
}

impl LinkChain {
    pub fn new(links: Vec<Arc<dyn Link>>) -> Self {
        Self {
            links: links.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub async fn execute(&self, op: Operation) -> Result<Outcome, CallError> {
        Next { rest: &self.links }.run(op).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LoggerLink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logs every operation, its outcome and latency, and each subscription
/// message as it arrives.
#[derive(Default)]
pub struct LoggerLink {
    seq: AtomicU64,
}

impl LoggerLink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for LoggerLink {
    async fn handle(&self, op: Operation, next: Next<'_>) -> Result<Outcome, CallError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let method = op.method();
        let path = op.path().to_string();
        let started = Instant::now();
        tracing::debug!(seq, method = %method, path = %path, "call started");

        let op = match op {
            Operation::Subscribe {
                path,
                input,
                callback,
            } => {
                let msg_path = path.clone();
                let logged: SubscriptionCallback = Arc::new(move |msg: Result<Value, CallError>| {
                    match &msg {
                        Ok(data) => {
                            tracing::debug!(seq, path = %msg_path, data = %data, "subscription message")
                        }
                        Err(e) => {
                            tracing::warn!(seq, path = %msg_path, error = %e, "subscription ended with error")
                        }
                    }
                    callback(msg)
                });
                Operation::Subscribe {
                    path,
                    input,
                    callback: logged,
                }
            }
            query => query,
        };

        let result = next.run(op).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(seq, method = %method, path = %path, elapsed_ms, "call completed"),
            Err(e) => tracing::warn!(
                seq,
                method = %method,
                path = %path,
                elapsed_ms,
                status = e.status(),
                error = %e,
                "call failed"
            ),
        }
        result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HttpLink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal link performing queries as single-shot HTTP POSTs.
pub struct HttpLink {
    base_url: String,
    http: reqwest::Client,
}

impl HttpLink {
    /// `base_url` is the server origin plus any prefix, e.g.
    /// `http://localhost:4710/api`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn post(&self, path: &str, input: Option<Value>) -> Result<Value, CallError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self.http.post(&url);
        if let Some(input) = &input {
            req = req.json(input);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        if sy_protocol::is_success(status) {
            let mut body: Value = serde_json::from_slice(&bytes)
                .map_err(|e| CallError::Decode(format!("{url}: {e}")))?;
            return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
        }
        // Error bodies from outside the procedure layer (proxies, body
        // limits) are often plain text; the status still stands.
        let data = match serde_json::from_slice::<Value>(&bytes) {
            Ok(mut body) => body.get_mut("error").map(Value::take).unwrap_or(Value::Null),
            Err(_) => {
                tracing::debug!(url = %url, status, "non-JSON error body");
                Value::Null
            }
        };
        Err(CallError::Remote { status, data })
    }
}

#[async_trait]
impl Link for HttpLink {
    async fn handle(&self, op: Operation, _next: Next<'_>) -> Result<Outcome, CallError> {
        match op {
            Operation::Query { path, input } => self.post(&path, input).await.map(Outcome::Value),
            Operation::Subscribe { path, .. } => Err(CallError::Unsupported(format!(
                "{path}: subscriptions need a duplex transport"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DuplexLink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal link over a [`DuplexClient`].  Subscriptions are shared
/// across identical `(path, input)` pairs.
#[derive(Clone)]
pub struct DuplexLink {
    subscriptions: SharedSubscriptions,
}

impl DuplexLink {
    pub fn new(client: DuplexClient) -> Self {
        Self {
            subscriptions: SharedSubscriptions::new(client),
        }
    }

    pub fn client(&self) -> &DuplexClient {
        self.subscriptions.client()
    }

    pub fn subscriptions(&self) -> &SharedSubscriptions {
        &self.subscriptions
    }
}

#[async_trait]
impl Link for DuplexLink {
    async fn handle(&self, op: Operation, _next: Next<'_>) -> Result<Outcome, CallError> {
        match op {
            Operation::Query { path, input } => self
                .subscriptions
                .client()
                .call(&path, input)
                .await
                .map(Outcome::Value),
            Operation::Subscribe {
                path,
                input,
                callback,
            } => Ok(Outcome::Subscribed(
                self.subscriptions.subscribe(&path, input, callback),
            )),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SplitLink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Selector = Box<dyn Fn(&Operation) -> String + Send + Sync>;

/// Delegates the whole call to one of several named sub-chains, picked
/// per operation by `select`.
pub struct SplitLink {
    select: Selector,
    routes: HashMap<String, LinkChain>,
}

impl SplitLink {
    pub fn new<F, S>(select: F) -> Self
    where
        F: Fn(&Operation) -> S + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            select: Box::new(move |op: &Operation| select(op).into()),
            routes: HashMap::new(),
        }
    }

    pub fn route(mut self, name: impl Into<String>, chain: LinkChain) -> Self {
        self.routes.insert(name.into(), chain);
        self
    }

    /// Subscriptions to `duplex`, everything else to `http`.
    pub fn by_method(http: LinkChain, duplex: LinkChain) -> Self {
        Self::new(|op: &Operation| if op.is_subscription() { "duplex" } else { "http" })
            .route("http", http)
            .route("duplex", duplex)
    }
}

#[async_trait]
impl Link for SplitLink {
    async fn handle(&self, op: Operation, _next: Next<'_>) -> Result<Outcome, CallError> {
        let name = (self.select)(&op);
        match self.routes.get(&name) {
            Some(chain) => {
                tracing::trace!(route = %name, path = %op.path(), "split");
                chain.execute(op).await
            }
            None => Err(CallError::Unsupported(format!("no link chain named {name:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records its name, then forwards.
    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Link for Tag {
        async fn handle(&self, op: Operation, next: Next<'_>) -> Result<Outcome, CallError> {
            self.1.lock().push(self.0);
            next.run(op).await
        }
    }

    /// Terminal link echoing the path back.
    struct Echo;

    #[async_trait]
    impl Link for Echo {
        async fn handle(&self, op: Operation, _next: Next<'_>) -> Result<Outcome, CallError> {
            Ok(Outcome::Value(json!({ "path": op.path(), "input": op.input() })))
        }
    }

    fn query(path: &str) -> Operation {
        Operation::Query {
            path: path.into(),
            input: Some(json!(1)),
        }
    }

    fn value(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Value(v) => v,
            Outcome::Subscribed(_) => panic!("expected a value"),
        }
    }

    #[tokio::test]
    async fn links_run_in_order_and_terminal_stops_the_chain() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let chain = LinkChain::new(vec![
            Arc::new(Tag("a", trail.clone())),
            Arc::new(Tag("b", trail.clone())),
            Arc::new(Echo),
            Arc::new(Tag("never", trail.clone())),
        ]);

        let out = value(chain.execute(query("/x")).await.unwrap());
        assert_eq!(out, json!({"path": "/x", "input": 1}));
        assert_eq!(*trail.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn chain_without_terminal_is_exhausted() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let chain = LinkChain::new(vec![Arc::new(LoggerLink::new()), Arc::new(Tag("a", trail))]);
        assert!(matches!(
            chain.execute(query("/x")).await,
            Err(CallError::ChainExhausted)
        ));
        assert!(matches!(
            LinkChain::new(Vec::new()).execute(query("/x")).await,
            Err(CallError::ChainExhausted)
        ));
    }

    #[tokio::test]
    async fn split_delegates_to_the_selected_chain() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let left = LinkChain::new(vec![Arc::new(Tag("left", trail.clone())), Arc::new(Echo)]);
        let right = LinkChain::new(vec![Arc::new(Tag("right", trail.clone())), Arc::new(Echo)]);
        let split = SplitLink::new(|op: &Operation| {
            if op.path().starts_with("/admin") {
                "right"
            } else {
                "left"
            }
        })
        .route("left", left)
        .route("right", right);
        let chain = LinkChain::new(vec![Arc::new(split)]);

        chain.execute(query("/users")).await.unwrap();
        chain.execute(query("/admin/stats")).await.unwrap();
        assert_eq!(*trail.lock(), vec!["left", "right"]);
    }

    #[tokio::test]
    async fn split_with_unknown_route_is_unsupported() {
        let split = SplitLink::new(|_: &Operation| "nowhere");
        let chain = LinkChain::new(vec![Arc::new(split)]);
        assert!(matches!(
            chain.execute(query("/x")).await,
            Err(CallError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn http_link_refuses_subscriptions() {
        let chain = LinkChain::new(vec![Arc::new(HttpLink::new("http://127.0.0.1:9").unwrap())]);
        let op = Operation::Subscribe {
            path: "/ticks".into(),
            input: None,
            callback: Arc::new(|_: Result<Value, CallError>| {}),
        };
        assert!(matches!(chain.execute(op).await, Err(CallError::Unsupported(_))));
    }
}
