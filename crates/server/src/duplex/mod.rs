//! Server side of the duplex protocol.
//!
//! Flow per connection:
//! 1. Client upgrades on `ws_path`; the upgrade request's headers seed
//!    every call's base context.  Each call gets its own cookie jar
//!    parsed from those headers, so cookie writes never leak into later
//!    calls.
//! 2. Reader loop decodes each text frame into a [`CallEnvelope`] and
//!    dispatches it.  Resolvers run on their own tasks so a slow call
//!    never blocks the frames behind it.
//! 3. Writer task drains the outbound channel into the socket.
//! 4. On close (peer close, socket error or keep-alive timeout) every
//!    subscription of the connection is torn down exactly once.

mod keepalive;
mod subscriptions;

pub use keepalive::{supervise, PongTracker};
pub use subscriptions::{Reservation, SubscriptionTable};

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sy_protocol::{
    salvage_id, CallEnvelope, Method, ResponseEnvelope, STATUS_INTERNAL,
    STATUS_METHOD_NOT_ALLOWED, STATUS_NOT_FOUND, STATUS_OK,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::Context;
use crate::cookies::RequestCookies;
use crate::error::ProcedureError;
use crate::procedure::{Emitter, SubscriptionHandler, UnaryHandler};
use crate::router::Handler;
use crate::server::RpcServer;

enum Outbound {
    Frame(ResponseEnvelope),
    Ping,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET `ws_path`: upgrade to the duplex protocol.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(server): State<RpcServer>,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(socket, server, headers))
}

/// Drive one duplex connection until it closes.
pub async fn serve_connection(socket: WebSocket, server: RpcServer, headers: HeaderMap) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let closed = CancellationToken::new();

    let conn = Arc::new(Connection {
        id: Uuid::new_v4(),
        headers,
        server,
        outbound: outbound_tx,
        subscriptions: SubscriptionTable::new(),
    });
    tracing::info!(conn_id = %conn.id, "duplex connection opened");

    // Writer task: forwards outbound frames and pings to the socket.
    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = writer_closed.cancelled() => break,
                next = outbound_rx.recv() => next,
            };
            let msg = match next {
                Some(Outbound::Frame(envelope)) => match serde_json::to_string(&envelope) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!(id = envelope.id, error = %e, "failed to encode response");
                        continue;
                    }
                },
                Some(Outbound::Ping) => Message::Ping(Vec::new()),
                None => break,
            };
            if sink.send(msg).await.is_err() {
                writer_closed.cancel();
                break;
            }
        }
        let _ = sink.close().await;
    });

    let pongs = PongTracker::new();
    if let Some(cfg) = conn.server.keepalive() {
        let ping_tx = conn.outbound.clone();
        tokio::spawn(supervise(
            cfg,
            pongs.clone(),
            move || ping_tx.send(Outbound::Ping).is_ok(),
            closed.clone(),
        ));
    }

    // Reader loop.
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => conn.dispatch(&text, &closed),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => conn.dispatch(&text, &closed),
                Err(_) => conn.reject_undecodable(0, "binary frames must be UTF-8 JSON"),
            },
            Some(Ok(Message::Pong(_))) => pongs.observe(),
            // axum answers pings itself.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(conn_id = %conn.id, error = %e, "socket read failed");
                break;
            }
        }
    }

    closed.cancel();
    let torn_down = conn.subscriptions.close_all();
    let _ = writer.await;
    tracing::info!(
        conn_id = %conn.id,
        subscriptions = torn_down,
        "duplex connection closed"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Connection {
    id: Uuid,
    server: RpcServer,
    headers: HeaderMap,
    outbound: mpsc::UnboundedSender<Outbound>,
    subscriptions: SubscriptionTable,
}

impl Connection {
    fn send(&self, envelope: ResponseEnvelope) {
        // Receiver only goes away during shutdown.
        let _ = self.outbound.send(Outbound::Frame(envelope));
    }

    fn reject_undecodable(&self, id: u32, reason: &str) {
        tracing::warn!(conn_id = %self.id, id, reason, "undecodable frame");
        self.send(ResponseEnvelope::new(
            id,
            Method::Post,
            STATUS_INTERNAL,
            "",
            json!({ "message": format!("Invalid message: {reason}") }),
        ));
    }

    /// Handle one inbound frame.  Table updates happen here, on the
    /// reader, so they follow frame order; resolvers are spawned.
    fn dispatch(self: &Arc<Self>, raw: &str, closed: &CancellationToken) {
        let envelope: CallEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject_undecodable(salvage_id(raw), &e.to_string()),
        };
        let CallEnvelope { id, method, body } = envelope;
        tracing::debug!(conn_id = %self.id, id, method = %method, path = %body.path, "frame received");

        if method == Method::Unsubscribe {
            let removed = self.subscriptions.unsubscribe(id);
            tracing::debug!(conn_id = %self.id, id, removed, "unsubscribe");
            return;
        }

        let Some(matched) = self.server.routes().match_path(&body.path) else {
            let err = ProcedureError::NotFound(body.path.clone());
            self.send(ResponseEnvelope::new(id, method, STATUS_NOT_FOUND, body.path, err.to_data()));
            return;
        };

        let cookies = Arc::new(RequestCookies::from_headers(&self.headers));
        let base = Context::new(body.path.clone())
            .with_params(matched.params)
            .with_headers(self.headers.clone())
            .with_cookies(cookies.clone());

        match (method, matched.route.handler().clone()) {
            (Method::Post, Handler::Unary(handler)) => {
                let conn = self.clone();
                let closed = closed.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = closed.cancelled() => {}
                        _ = conn.run_unary(id, body.path, body.input, base, cookies, handler) => {}
                    }
                });
            }
            (Method::Subscribe, Handler::Subscription(handler)) => {
                let Some(reservation) = self.subscriptions.reserve(id) else {
                    return;
                };
                let conn = self.clone();
                tokio::spawn(async move {
                    conn.start_subscription(reservation, body.path, body.input, base, cookies, handler)
                        .await
                });
            }
            (method, _) => {
                let err = ProcedureError::classified(
                    STATUS_METHOD_NOT_ALLOWED,
                    format!("{method} is not supported by {}", body.path),
                );
                self.send(ResponseEnvelope::new(id, method, err.status(), body.path, err.to_data()));
            }
        }
    }

    async fn run_unary(
        &self,
        id: u32,
        path: String,
        input: Option<Value>,
        base: Context,
        cookies: Arc<RequestCookies>,
        handler: UnaryHandler,
    ) {
        let response = handler.call(input, base).await;
        self.discard_cookie_writes(&cookies, &path);
        self.send(ResponseEnvelope::new(id, Method::Post, response.status, path, response.data));
    }

    async fn start_subscription(
        &self,
        reservation: Reservation,
        path: String,
        input: Option<Value>,
        base: Context,
        cookies: Arc<RequestCookies>,
        handler: SubscriptionHandler,
    ) {
        let id = reservation.id;
        let sink_tx = self.outbound.clone();
        let sink_path = path.clone();
        let emitter = Emitter::new(
            move |data| {
                let frame = ResponseEnvelope::new(id, Method::Subscribe, STATUS_OK, sink_path.clone(), data);
                let _ = sink_tx.send(Outbound::Frame(frame));
            },
            reservation.cancel.clone(),
        );

        let started = handler.subscribe(input, base, emitter).await;
        self.discard_cookie_writes(&cookies, &path);

        match started {
            Ok(teardown) => {
                if self.subscriptions.activate(reservation, teardown) {
                    tracing::debug!(conn_id = %self.id, id, path = %path, "subscription started");
                } else {
                    tracing::debug!(conn_id = %self.id, id, path = %path, "subscription ended before it started");
                }
            }
            Err(err) => {
                let retired = reservation.cancel.is_cancelled();
                self.subscriptions.abandon(&reservation);
                if !retired {
                    self.send(ResponseEnvelope::new(id, Method::Subscribe, err.status(), path, err.to_data()));
                }
            }
        }
    }

    fn discard_cookie_writes(&self, cookies: &RequestCookies, path: &str) {
        let dropped = cookies.take_set_cookie_headers();
        if !dropped.is_empty() {
            tracing::debug!(
                conn_id = %self.id,
                path = %path,
                count = dropped.len(),
                "cookie writes discarded on duplex connection"
            );
        }
    }
}
