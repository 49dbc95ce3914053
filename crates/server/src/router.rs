//! Router compiler.
//!
//! A [`Router`] is a nested tree of named handlers.  [`Router::compile`]
//! flattens it depth-first into a [`RouteTable`]: an ordered list of
//! routes in declaration order.  Matching scans the list and the first
//! route whose pattern fits wins, so overlapping patterns resolve by
//! declaration order rather than specificity.
//!
//! A key ending in `:` declares a path parameter:
//!
//! ```text
//! users/                  → /users/...
//!   id:/                  → /users/{id}/...
//!     profile   (query)   → /users/{id}/profile
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::context::Middleware;
use crate::procedure::{SubscriptionHandler, UnaryHandler};

#[derive(Clone)]
pub enum Handler {
    Unary(UnaryHandler),
    Subscription(SubscriptionHandler),
}

impl Handler {
    pub fn is_subscription(&self) -> bool {
        matches!(self, Handler::Subscription(_))
    }

    fn with_root(&self, root: &[Arc<dyn Middleware>]) -> Self {
        match self {
            Handler::Unary(h) => Handler::Unary(h.with_root(root)),
            Handler::Subscription(h) => Handler::Subscription(h.with_root(root)),
        }
    }
}

impl From<UnaryHandler> for Handler {
    fn from(h: UnaryHandler) -> Self {
        Handler::Unary(h)
    }
}

impl From<SubscriptionHandler> for Handler {
    fn from(h: SubscriptionHandler) -> Self {
        Handler::Subscription(h)
    }
}

enum Node {
    Leaf(Handler),
    Branch(Router),
}

/// Nested procedure tree.
#[derive(Default)]
pub struct Router {
    entries: Vec<(String, Node)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler under `key`.  The key may contain `/` to declare
    /// several segments at once.
    pub fn route(mut self, key: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.entries.push((key.into(), Node::Leaf(handler.into())));
        self
    }

    /// Mount a sub-tree under `key`.
    pub fn nest(mut self, key: impl Into<String>, router: Router) -> Self {
        self.entries.push((key.into(), Node::Branch(router)));
        self
    }

    pub fn compile(self) -> RouteTable {
        self.compile_with(&[])
    }

    /// Compile with `root` middleware prepended to every handler.
    pub fn compile_with(self, root: &[Arc<dyn Middleware>]) -> RouteTable {
        let mut routes = Vec::new();
        flatten(self, &mut Vec::new(), root, &mut routes);

        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.path.as_str()) {
                tracing::warn!(path = %route.path, "duplicate route, the first declaration wins");
            }
        }
        tracing::debug!(routes = routes.len(), "router compiled");
        RouteTable { routes }
    }
}

fn flatten(
    router: Router,
    prefix: &mut Vec<Segment>,
    root: &[Arc<dyn Middleware>],
    out: &mut Vec<Route>,
) {
    for (key, node) in router.entries {
        let depth = prefix.len();
        prefix.extend(parse_key(&key));
        match node {
            Node::Leaf(handler) => out.push(Route::new(prefix.clone(), handler.with_root(root))),
            Node::Branch(child) => flatten(child, prefix, root, out),
        }
        prefix.truncate(depth);
    }
}

fn parse_key(key: &str) -> impl Iterator<Item = Segment> + '_ {
    key.split('/').filter(|s| !s.is_empty()).map(|s| match s.strip_suffix(':') {
        Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
        _ => Segment::Literal(s.to_string()),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Clone)]
pub struct Route {
    pattern: Vec<Segment>,
    param_names: Vec<String>,
    path: String,
    handler: Handler,
}

impl Route {
    fn new(pattern: Vec<Segment>, handler: Handler) -> Self {
        let param_names = pattern
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect();
        let path = pattern
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.clone(),
                Segment::Param(p) => format!("{p}:"),
            })
            .collect::<Vec<_>>()
            .join("/");
        Self {
            pattern,
            param_names,
            path: format!("/{path}"),
            handler,
        }
    }

    /// Declared path, e.g. `/users/id:/profile`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    fn capture(&self, segments: &[&str]) -> Option<HashMap<String, String>> {
        if segments.len() != self.pattern.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (pattern, actual) in self.pattern.iter().zip(segments) {
            match pattern {
                Segment::Literal(lit) if lit == actual => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    let value = actual
                        .strip_prefix(name.as_str())
                        .and_then(|rest| rest.strip_prefix(':'))
                        .unwrap_or(actual);
                    params.insert(name.clone(), value.to_string());
                }
            }
        }
        Some(params)
    }
}

/// A matched route and the parameters it captured.
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
}

/// Flat, immutable route list.  Shared read-only across connections.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First declared route matching `path`.  Empty segments are
    /// ignored, so `/a//b/` matches `a/b`.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.routes.iter().find_map(|route| {
            route
                .capture(&segments)
                .map(|params| RouteMatch { route, params })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::procedure::{Emitter, Procedure};
    use serde_json::json;

    fn answer(n: i64) -> UnaryHandler {
        Procedure::new().query(move |_ctx: Context| async move { Ok(json!(n)) })
    }

    async fn resolve(table: &RouteTable, path: &str) -> Option<serde_json::Value> {
        let m = table.match_path(path)?;
        match m.route.handler() {
            Handler::Unary(h) => Some(h.call(None, Context::new(path)).await.data),
            Handler::Subscription(_) => None,
        }
    }

    #[tokio::test]
    async fn nested_tree_flattens_in_declaration_order() {
        let table = Router::new()
            .route("helloWorld", answer(1))
            .nest("users", Router::new().route("list", answer(2)).route("id:", answer(3)))
            .compile();

        let paths: Vec<_> = table.routes().iter().map(Route::path).collect();
        assert_eq!(paths, vec!["/helloWorld", "/users/list", "/users/id:"]);
        assert_eq!(resolve(&table, "/users/list").await, Some(json!(2)));
        assert_eq!(resolve(&table, "/users/42").await, Some(json!(3)));
    }

    #[tokio::test]
    async fn first_declared_wins_on_overlap() {
        let table = Router::new()
            .route("users/id:", answer(1))
            .route("users/me", answer(2))
            .compile();
        assert_eq!(resolve(&table, "/users/me").await, Some(json!(1)));

        let table = Router::new()
            .route("users/me", answer(2))
            .route("users/id:", answer(1))
            .compile();
        assert_eq!(resolve(&table, "/users/me").await, Some(json!(2)));
        assert_eq!(resolve(&table, "/users/7").await, Some(json!(1)));
    }

    #[test]
    fn params_strip_their_name_prefix() {
        let table = Router::new()
            .nest("users", Router::new().route("id:/posts/post:", answer(0)))
            .compile();

        let m = table.match_path("/users/id:42/posts/9").unwrap();
        assert_eq!(m.params["id"], "42");
        assert_eq!(m.params["post"], "9");
        assert_eq!(m.route.param_names(), ["id", "post"]);
    }

    #[test]
    fn unmatched_paths_return_none() {
        let table = Router::new().route("a/b", answer(0)).compile();
        assert!(table.match_path("/missingRoute").is_none());
        assert!(table.match_path("/a").is_none());
        assert!(table.match_path("/a/b/c").is_none());
        assert!(table.match_path("//a//b/").is_some());
    }

    #[test]
    fn subscriptions_are_marked() {
        let ticks = Procedure::new().subscription(|_ctx: Context, _emit: Emitter| async move { Ok(|| {}) });
        let table = Router::new().route("ticks", ticks).compile();
        assert!(table.match_path("/ticks").unwrap().route.handler().is_subscription());
    }
}
