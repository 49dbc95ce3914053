//! Shared fixtures: a demo router, an in-process server on an ephemeral
//! port, and a raw duplex socket that speaks the wire format directly.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sy_domain::{Kind, ObjectSchema};
use sy_server::{
    Context, CookieOptions, Emitter, Procedure, ProcedureError, Router, RpcServer,
    RpcServerBuilder,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Clone)]
pub struct Tenant(pub String);

/// Counts subscription teardowns.
#[derive(Clone, Default)]
pub struct Stops(Arc<AtomicUsize>);

impl Stops {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Wait until at least `n` teardowns ran.
    pub async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.count() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("teardown did not run in time");
    }
}

pub fn demo_router(stops: &Stops) -> Router {
    let public = Procedure::new();

    let hello = public
        .input(ObjectSchema::new().required("name", Kind::String))
        .query(|ctx: Context| async move {
            let name = ctx.input().and_then(|v| v["name"].as_str()).unwrap_or_default().to_string();
            Ok(json!({ "message": format!("Hello, {name}!") }))
        });

    let user = public
        .params(ObjectSchema::new().required("id", Kind::String))
        .query(|ctx: Context| async move { Ok(json!({ "id": ctx.param("id") })) });

    let slow = public.query(|_ctx: Context| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok("slow")
    });
    let fast = public.query(|_ctx: Context| async move { Ok("fast") });

    let whoami = public.query(|ctx: Context| async move {
        Ok(ctx.get::<Tenant>().map(|t| t.0.clone()))
    });

    let login = public.query(|ctx: Context| async move {
        if let Some(cookies) = ctx.cookies() {
            cookies.set("session", "abc", CookieOptions::default());
        }
        Ok(json!({ "ok": true }))
    });

    let session = public.query(|ctx: Context| async move {
        Ok(ctx.cookies().and_then(|c| c.get("session")))
    });

    let denied = public
        .use_middleware(|_ctx: Context| async move {
            Err::<Context, _>(ProcedureError::classified(401, "sign in first"))
        })
        .query(|_ctx: Context| async move { Ok(json!(null)) });

    // Emits "A" and "B" right away, "C" much later.
    let letters_stops = stops.clone();
    let letters = public.subscription(move |_ctx: Context, emit: Emitter| {
        let stops = letters_stops.clone();
        async move {
            let task = tokio::spawn(async move {
                let _ = emit.emit("A");
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = emit.emit("B");
                tokio::time::sleep(Duration::from_millis(400)).await;
                let _ = emit.emit("C");
            });
            Ok(move || {
                task.abort();
                stops.bump();
            })
        }
    });

    // Endless ticker.
    let ticks_stops = stops.clone();
    let ticks = public
        .input(ObjectSchema::new().required("room", Kind::String))
        .subscription(move |_ctx: Context, emit: Emitter| {
            let stops = ticks_stops.clone();
            async move {
                let task = tokio::spawn(async move {
                    let mut n = 0u64;
                    while !emit.is_closed() {
                        let _ = emit.emit(n);
                        n += 1;
                        tokio::time::sleep(Duration::from_millis(25)).await;
                    }
                });
                Ok(move || {
                    task.abort();
                    stops.bump();
                })
            }
        });

    Router::new()
        .route("helloWorld", hello)
        .nest("users", Router::new().route("id:", user))
        .route("slow", slow)
        .route("fast", fast)
        .route("whoami", whoami)
        .route("login", login)
        .route("session", session)
        .route("denied", denied)
        .route("letters", letters)
        .route("ticks", ticks)
}

pub fn demo_server(stops: &Stops) -> RpcServerBuilder {
    RpcServer::builder(demo_router(stops)).context(|ctx: Context| async move {
        let tenant = ctx
            .headers()
            .get("x-tenant")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("public")
            .to_string();
        Ok::<_, ProcedureError>(ctx.with(Tenant(tenant)))
    })
}

pub async fn spawn(server: RpcServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server.into_router()).await.unwrap();
    });
    addr
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw duplex socket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RawSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RawSocket {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, &[]).await
    }

    pub async fn connect_with(addr: SocketAddr, headers: &[(&'static str, &'static str)]) -> Self {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        for (name, value) in headers {
            request
                .headers_mut()
                .insert(*name, HeaderValue::from_static(*value));
        }
        let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        Self { ws }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send(&mut self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    /// Next text frame, parsed.  Panics after five seconds of silence.
    pub async fn next_frame(&mut self) -> Value {
        self.try_next_frame(Duration::from_secs(5))
            .await
            .expect("timeout waiting for frame")
    }

    /// Next text frame within `wait`, or `None`.
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(&text).unwrap());
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) => return None,
                Err(_) => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
