//! Procedure pipeline: middleware, validation, resolver, error mapping.
//!
//! A [`Procedure`] is an immutable builder.  Finishing it with
//! [`Procedure::query`] or [`Procedure::subscription`] produces a handler
//! that the router stores and the transports invoke.
//!
//! Unary call order:
//!
//! 1. run middleware over the transport's base context
//! 2. validate input, then params (400 on failure)
//! 3. run the resolver with the validated input in the context
//! 4. validate the output (500 on failure, it is a server bug)
//! 5. wrap as status 200
//!
//! Any error along the way maps to its status via [`ProcedureError`]; a
//! panicking resolver maps to 500.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use sy_domain::Schema;
use sy_protocol::STATUS_OK;
use tokio_util::sync::CancellationToken;

use crate::context::{apply_chain, Context, Middleware};
use crate::error::ProcedureError;

/// Stops a running subscription.  Called exactly once.
pub type Teardown = Box<dyn FnOnce() + Send + 'static>;

type UnaryResolver =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Value, ProcedureError>> + Send + Sync>;
type SubscriptionResolver = Arc<
    dyn Fn(Context, Emitter) -> BoxFuture<'static, Result<Teardown, ProcedureError>>
        + Send
        + Sync,
>;

/// Outcome of one unary call: the body of the response envelope minus
/// the path.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureResponse {
    pub status: u16,
    pub data: Value,
}

impl ProcedureResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: STATUS_OK,
            data,
        }
    }

    pub fn from_error(err: &ProcedureError) -> Self {
        Self {
            status: err.status(),
            data: err.to_data(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Default)]
pub struct Procedure {
    middleware: Vec<Arc<dyn Middleware>>,
    input: Option<Arc<dyn Schema>>,
    output: Option<Arc<dyn Schema>>,
    params: Option<Arc<dyn Schema>>,
}

impl Procedure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new procedure that runs `middleware` after the ones
    /// already attached.  `self` is left unchanged, so a base procedure
    /// can be shared by several derived ones.
    pub fn use_middleware<M: Middleware>(&self, middleware: M) -> Self {
        let mut next = self.clone();
        next.middleware.push(Arc::new(middleware));
        next
    }

    pub fn input<S: Schema>(&self, schema: S) -> Self {
        let mut next = self.clone();
        next.input = Some(Arc::new(schema));
        next
    }

    pub fn output<S: Schema>(&self, schema: S) -> Self {
        let mut next = self.clone();
        next.output = Some(Arc::new(schema));
        next
    }

    pub fn params<S: Schema>(&self, schema: S) -> Self {
        let mut next = self.clone();
        next.params = Some(Arc::new(schema));
        next
    }

    /// Finish as a request/response handler.
    pub fn query<F, Fut, O>(&self, resolver: F) -> UnaryHandler
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ProcedureError>> + Send + 'static,
        O: Serialize + Send + 'static,
    {
        let resolver: UnaryResolver =
            Arc::new(move |ctx: Context| resolve_to_json(resolver(ctx)).boxed());
        UnaryHandler {
            procedure: self.clone(),
            resolver,
        }
    }

    /// Finish as a subscription handler.  The resolver receives an
    /// [`Emitter`] and returns the function that stops the stream.
    pub fn subscription<F, Fut, T>(&self, resolver: F) -> SubscriptionHandler
    where
        F: Fn(Context, Emitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ProcedureError>> + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let resolver: SubscriptionResolver = Arc::new(move |ctx: Context, emitter: Emitter| {
            resolve_to_teardown(resolver(ctx, emitter)).boxed()
        });
        SubscriptionHandler {
            procedure: self.clone(),
            resolver,
        }
    }

    /// Middleware, then input and params validation.  Returns the
    /// context the resolver will see.
    async fn prepare(&self, input: Option<Value>, base: Context) -> Result<Context, ProcedureError> {
        let ctx = apply_chain(&self.middleware, base).await?;

        if let Some(schema) = &self.input {
            let value = input.as_ref().unwrap_or(&Value::Null);
            schema
                .validate(value)
                .map_err(|errors| ProcedureError::invalid("Error validating input", errors))?;
        }

        if let Some(schema) = &self.params {
            let params = serde_json::to_value(ctx.params())?;
            schema
                .validate(&params)
                .map_err(|errors| ProcedureError::invalid("Error validating params", errors))?;
        }

        Ok(ctx.with_input(input))
    }

    fn with_root(&self, root: &[Arc<dyn Middleware>]) -> Vec<Arc<dyn Middleware>> {
        root.iter().chain(&self.middleware).cloned().collect()
    }
}

async fn resolve_to_json<O: Serialize>(
    fut: impl Future<Output = Result<O, ProcedureError>>,
) -> Result<Value, ProcedureError> {
    let out = fut.await?;
    Ok(serde_json::to_value(out)?)
}

async fn resolve_to_teardown<T: FnOnce() + Send + 'static>(
    fut: impl Future<Output = Result<T, ProcedureError>>,
) -> Result<Teardown, ProcedureError> {
    let stop = fut.await?;
    Ok(Box::new(stop))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "resolver panicked".to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct UnaryHandler {
    procedure: Procedure,
    resolver: UnaryResolver,
}

impl UnaryHandler {
    /// Run the pipeline.  Never fails: every error becomes a response.
    pub async fn call(&self, input: Option<Value>, base: Context) -> ProcedureResponse {
        let path = base.path().to_string();
        let result = AssertUnwindSafe(self.run(input, base)).catch_unwind().await;

        let response = match result {
            Ok(Ok(data)) => ProcedureResponse::ok(data),
            Ok(Err(err)) => ProcedureResponse::from_error(&err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(path = %path, error = %message, "resolver panicked");
                ProcedureResponse::from_error(&ProcedureError::Internal(message))
            }
        };

        match response.status {
            s if s >= 500 => tracing::warn!(path = %path, status = s, "procedure failed"),
            s if s >= 400 => tracing::debug!(path = %path, status = s, "procedure rejected call"),
            s => tracing::trace!(path = %path, status = s, "procedure completed"),
        }
        response
    }

    async fn run(&self, input: Option<Value>, base: Context) -> Result<Value, ProcedureError> {
        let ctx = self.procedure.prepare(input, base).await?;
        let data = (self.resolver)(ctx).await?;

        if let Some(schema) = &self.procedure.output {
            if let Err(errors) = schema.validate(&data) {
                return Err(ProcedureError::classified(
                    sy_protocol::STATUS_INTERNAL,
                    "Error validating output",
                )
                .with_data(serde_json::to_value(errors)?));
            }
        }
        Ok(data)
    }

    /// Same handler with `root` middleware running before its own.
    pub(crate) fn with_root(&self, root: &[Arc<dyn Middleware>]) -> Self {
        let mut procedure = self.procedure.clone();
        procedure.middleware = self.procedure.with_root(root);
        Self {
            procedure,
            resolver: self.resolver.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct SubscriptionHandler {
    procedure: Procedure,
    resolver: SubscriptionResolver,
}

impl SubscriptionHandler {
    /// Start the subscription.  The stream is live once this returns
    /// `Ok`; the caller owns the teardown.
    pub async fn subscribe(
        &self,
        input: Option<Value>,
        base: Context,
        emitter: Emitter,
    ) -> Result<Teardown, ProcedureError> {
        let path = base.path().to_string();
        let emitter = emitter.with_schema(self.procedure.output.clone());

        let started = AssertUnwindSafe(async {
            let ctx = self.procedure.prepare(input, base).await?;
            (self.resolver)(ctx, emitter).await
        })
        .catch_unwind()
        .await;

        match started {
            Ok(Ok(teardown)) => Ok(teardown),
            Ok(Err(err)) => {
                tracing::debug!(path = %path, status = err.status(), error = %err, "subscription rejected");
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(path = %path, error = %message, "subscription resolver panicked");
                Err(ProcedureError::Internal(message))
            }
        }
    }

    pub(crate) fn with_root(&self, root: &[Arc<dyn Middleware>]) -> Self {
        let mut procedure = self.procedure.clone();
        procedure.middleware = self.procedure.with_root(root);
        Self {
            procedure,
            resolver: self.resolver.clone(),
        }
    }
}

/// Handle a subscription resolver uses to push values to its subscriber.
///
/// Cloning is cheap; all clones feed the same subscriber.  Once the
/// subscription is torn down [`Emitter::emit`] silently drops values, so
/// a resolver timer that fires after unsubscribe delivers nothing.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn Fn(Value) + Send + Sync>,
    cancel: CancellationToken,
    schema: Option<Arc<dyn Schema>>,
}

impl Emitter {
    pub fn new(sink: impl Fn(Value) + Send + Sync + 'static, cancel: CancellationToken) -> Self {
        Self {
            sink: Arc::new(sink),
            cancel,
            schema: None,
        }
    }

    fn with_schema(mut self, schema: Option<Arc<dyn Schema>>) -> Self {
        self.schema = schema;
        self
    }

    /// Validate `value` against the output schema and forward it.
    /// A validation failure is returned to the resolver and nothing is
    /// sent.
    pub fn emit<T: Serialize>(&self, value: T) -> Result<(), ProcedureError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let value = serde_json::to_value(value)?;
        if let Some(schema) = &self.schema {
            schema.validate(&value).map_err(|errors| {
                ProcedureError::invalid("Error validating output", errors)
            })?;
        }
        (self.sink)(value);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the subscription has been torn down.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}
