//! Demo router served by `sy-hello serve`.
//!
//! - `helloWorld`  query, input `{name}`
//! - `users/id:`   query, echoes the `id` path parameter
//! - `clock`       subscription, emits an RFC 3339 timestamp every
//!   `interval_ms` (default 1000) until unsubscribed

use std::time::Duration;

use serde_json::json;
use sy_domain::{Kind, ObjectSchema};
use sy_server::{Context, Emitter, Procedure, ProcedureError, Router};

#[derive(Clone)]
pub struct Caller(pub String);

pub fn router() -> Router {
    let public = Procedure::new().use_middleware(|ctx: Context| async move {
        let caller = ctx
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();
        Ok::<_, ProcedureError>(ctx.with(Caller(caller)))
    });

    let hello = public
        .input(ObjectSchema::new().required("name", Kind::String))
        .output(ObjectSchema::new().required("message", Kind::String))
        .query(|ctx: Context| async move {
            let name = ctx.input().and_then(|v| v["name"].as_str()).unwrap_or_default().to_string();
            tracing::debug!(caller = ?ctx.get::<Caller>().map(|c| c.0.as_str()), "greeting");
            Ok(json!({ "message": format!("Hello, {name}!") }))
        });

    let user = public
        .params(ObjectSchema::new().required("id", Kind::String))
        .query(|ctx: Context| async move { Ok(json!({ "id": ctx.param("id") })) });

    // No input schema: the input is optional as a whole.
    let clock = public.subscription(|ctx: Context, emit: Emitter| async move {
        let interval_ms = ctx
            .input()
            .and_then(|v| v["interval_ms"].as_u64())
            .unwrap_or(1000)
            .max(10);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if emit.emit(chrono::Utc::now().to_rfc3339()).is_err() {
                            break;
                        }
                    }
                    _ = emit.closed() => break,
                }
            }
        });
        Ok(move || task.abort())
    });

    Router::new()
        .route("helloWorld", hello)
        .nest("users", Router::new().route("id:", user))
        .route("clock", clock)
}
