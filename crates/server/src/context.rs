//! Per-call context and the middleware that builds it.
//!
//! A [`Context`] is created fresh by the transport for every call and
//! then threaded through the middleware chain left to right.  Each
//! middleware takes the context by value and returns the next one, so a
//! later middleware always sees (and may override) what earlier ones
//! added.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Extensions, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sy_domain::FieldError;

use crate::cookies::CookieJar;
use crate::error::ProcedureError;

#[derive(Clone, Default)]
pub struct Context {
    path: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
    cookies: Option<Arc<dyn CookieJar>>,
    input: Option<Value>,
    extensions: Extensions,
}

impl Context {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    // ── Transport-provided fields ────────────────────────────────────

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cookies(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub(crate) fn with_input(mut self, input: Option<Value>) -> Self {
        self.input = input;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Cookie access, present for connection-bound transports.
    pub fn cookies(&self) -> Option<&dyn CookieJar> {
        self.cookies.as_deref()
    }

    /// Raw call input.  Set only once validation has passed.
    pub fn input(&self) -> Option<&Value> {
        self.input.as_ref()
    }

    /// Deserialize the call input.  An absent input deserializes from
    /// `null`, so `Option<T>` and `()` accept it.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, ProcedureError> {
        let raw = self.input.clone().unwrap_or(Value::Null);
        serde_json::from_value(raw).map_err(|e| {
            ProcedureError::invalid(
                "Error deserializing input",
                vec![FieldError::root(e.to_string())],
            )
        })
    }

    // ── Middleware-provided fields ───────────────────────────────────

    /// Add a typed field.  Inserting a value of a type that is already
    /// present replaces it.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path)
            .field("params", &self.params)
            .field("input", &self.input)
            .field("has_cookies", &self.cookies.is_some())
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Contributes fields to the context before a resolver runs.
///
/// Returning an error short-circuits the call with that error's status.
/// Side effects (e.g. setting a cookie) are not rolled back when a later
/// step fails.
///
/// Any `Fn(Context) -> impl Future<Output = Result<Context, ProcedureError>>`
/// is a middleware:
///
/// ```rust,no_run
/// use sy_server::{Context, Procedure, ProcedureError};
///
/// #[derive(Clone)]
/// struct UserId(String);
///
/// let authed = Procedure::new().use_middleware(|ctx: Context| async move {
///     let Some(user) = ctx.cookies().and_then(|c| c.get("session")) else {
///         return Err(ProcedureError::classified(401, "sign in first"));
///     };
///     Ok(ctx.with(UserId(user)))
/// });
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn apply(&self, ctx: Context) -> Result<Context, ProcedureError>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, ProcedureError>> + Send + 'static,
{
    async fn apply(&self, ctx: Context) -> Result<Context, ProcedureError> {
        (self)(ctx).await
    }
}

/// Run `chain` strictly in order.
pub(crate) async fn apply_chain(
    chain: &[Arc<dyn Middleware>],
    mut ctx: Context,
) -> Result<Context, ProcedureError> {
    for middleware in chain {
        ctx = middleware.apply(ctx).await?;
    }
    Ok(ctx)
}
