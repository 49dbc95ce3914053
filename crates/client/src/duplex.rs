//! Client side of the duplex protocol: owns the WebSocket lifecycle,
//! correlates responses with in-flight calls, and replays subscriptions
//! after every reconnect.
//!
//! ```text
//! Disconnected ─► Connecting ─► Open ─► Reconnecting ─► Connecting ─► ...
//!                                            │
//!                                            └─► Failed   (back-off exhausted)
//! ```
//!
//! POSTs issued while the socket is not open wait in a send queue and
//! flush on the next `Open`.  Subscriptions are never queued: the engine
//! keeps one entry per live subscription and sends a fresh `SUBSCRIBE`
//! for each of them whenever a connection opens.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use sy_protocol::{CallEnvelope, Method, ResponseBody, ResponseEnvelope};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;
use crate::reconnect::ReconnectBackoff;

/// Receives every message of a subscription, or the error that ended it.
pub type SubscriptionCallback = Arc<dyn Fn(Result<Value, CallError>) + Send + Sync>;

/// Stops a subscription.  Calling it more than once is impossible; dropping
/// it without calling leaves the subscription running.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    /// Reconnect attempts are exhausted.  Calls queue until
    /// [`DuplexClient::reconnect`].
    Failed,
}

struct PendingCall {
    path: String,
    reply: oneshot::Sender<Result<Value, CallError>>,
}

struct WireSubscription {
    path: String,
    input: Option<Value>,
    callback: SubscriptionCallback,
}

#[derive(Default)]
struct Shared {
    next_id: u32,
    pending: HashMap<u32, PendingCall>,
    /// Ordered so replay after reconnect is deterministic.
    subscriptions: BTreeMap<u32, WireSubscription>,
    queue: VecDeque<CallEnvelope>,
    /// Writer of the current connection; `Some` only while open.
    outbound: Option<mpsc::UnboundedSender<CallEnvelope>>,
    started: bool,
    supervising: bool,
    closed: bool,
}

impl Shared {
    fn allocate_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    /// Send on the open connection, or queue for the next one.
    fn send_or_queue(&mut self, envelope: CallEnvelope) {
        let envelope = match &self.outbound {
            Some(out) => match out.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };
        self.queue.push_back(envelope);
    }

    fn reject_pending(&mut self, err: &CallError) {
        for (id, call) in self.pending.drain() {
            tracing::debug!(id, path = %call.path, error = %err, "rejecting pending call");
            let _ = call.reply.send(Err(err.clone()));
        }
        self.queue.clear();
    }
}

struct Inner {
    url: String,
    backoff: ReconnectBackoff,
    shared: Mutex<Shared>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

/// A multiplexed duplex connection shared by every caller holding a clone.
///
/// Create via [`DuplexClientBuilder`](crate::builder::DuplexClientBuilder).
#[derive(Clone)]
pub struct DuplexClient {
    inner: Arc<Inner>,
}

impl DuplexClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::DuplexClientBuilder {
        crate::builder::DuplexClientBuilder::new()
    }

    pub(crate) fn new(url: String, backoff: ReconnectBackoff) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url,
                backoff,
                shared: Mutex::new(Shared::default()),
                state,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of subscriptions the engine will replay on the next open.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.shared.lock().subscriptions.len()
    }

    /// Issue a `POST` and wait for its response.
    ///
    /// There is no implicit timeout: while the engine is reconnecting the
    /// call stays pending.  A call the dropped connection never wrote is
    /// sent again on the next one; a call already written is not.  It is rejected with
    /// [`CallError::ConnectionFailed`] if reconnecting gives up.
    pub async fn call(&self, path: &str, input: Option<Value>) -> Result<Value, CallError> {
        let (reply, response) = oneshot::channel();
        {
            let mut shared = self.inner.shared.lock();
            if shared.closed {
                return Err(CallError::Closed);
            }
            let id = shared.allocate_id();
            tracing::trace!(id, path, "call");
            shared.pending.insert(
                id,
                PendingCall {
                    path: path.to_string(),
                    reply,
                },
            );
            shared.send_or_queue(CallEnvelope::post(id, path, input));
        }
        self.ensure_started();

        response.await.unwrap_or(Err(CallError::Closed))
    }

    /// Open a wire subscription.  Every message (and a terminal error, if
    /// the server rejects or ends it) goes to `callback`.
    pub fn subscribe(
        &self,
        path: &str,
        input: Option<Value>,
        callback: SubscriptionCallback,
    ) -> Unsubscribe {
        let id = {
            let mut shared = self.inner.shared.lock();
            if shared.closed {
                tracing::warn!(path, "subscribe on a closed client ignored");
                return Box::new(|| {});
            }
            let id = shared.allocate_id();
            if let Some(out) = &shared.outbound {
                let _ = out.send(CallEnvelope::subscribe(id, path, input.clone()));
            }
            shared.subscriptions.insert(
                id,
                WireSubscription {
                    path: path.to_string(),
                    input,
                    callback,
                },
            );
            id
        };
        self.ensure_started();

        let inner = self.inner.clone();
        Box::new(move || inner.unsubscribe(id))
    }

    /// Restart supervision after the engine entered [`ConnectionState::Failed`].
    /// Queued calls flush and subscriptions are replayed once it opens.
    pub fn reconnect(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.closed || shared.supervising {
            return;
        }
        shared.started = true;
        shared.supervising = true;
        tracing::info!(url = %self.inner.url, "manual reconnect requested");
        tokio::spawn(supervise(self.inner.clone()));
    }

    /// Shut the connection down for good.  Pending calls are rejected with
    /// [`CallError::Closed`] and every subscription is dropped.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        let mut shared = self.inner.shared.lock();
        shared.closed = true;
        shared.outbound = None;
        shared.reject_pending(&CallError::Closed);
        shared.subscriptions.clear();
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    /// Spawn the connection supervisor unless it already ran once.
    pub(crate) fn ensure_started(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.started || shared.closed {
            return;
        }
        shared.started = true;
        shared.supervising = true;
        tokio::spawn(supervise(self.inner.clone()));
    }
}

impl Inner {
    fn unsubscribe(&self, id: u32) {
        let mut shared = self.shared.lock();
        let Some(sub) = shared.subscriptions.remove(&id) else {
            return;
        };
        // Off the wire the server already dropped it with the connection.
        if let Some(out) = &shared.outbound {
            let _ = out.send(CallEnvelope::unsubscribe(id, sub.path));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn on_open(&self, out: mpsc::UnboundedSender<CallEnvelope>) {
        let mut shared = self.shared.lock();
        let queued = shared.queue.len();
        for envelope in shared.queue.drain(..) {
            let _ = out.send(envelope);
        }
        for (id, sub) in &shared.subscriptions {
            let _ = out.send(CallEnvelope::subscribe(*id, sub.path.clone(), sub.input.clone()));
        }
        tracing::info!(
            url = %self.url,
            queued,
            resubscribed = shared.subscriptions.len(),
            "duplex connection open"
        );
        shared.outbound = Some(out);
        self.set_state(ConnectionState::Open);
    }

    fn on_disconnect(&self) {
        let mut shared = self.shared.lock();
        shared.outbound = None;
        if !shared.closed {
            self.set_state(ConnectionState::Reconnecting);
        }
    }

    /// Put POSTs the dead connection never wrote back at the head of the
    /// queue.  Subscriptions replay on their own and unsubscribes are moot.
    fn requeue_unsent(&self, unsent: Vec<CallEnvelope>) {
        let mut shared = self.shared.lock();
        let posts: Vec<CallEnvelope> = unsent
            .into_iter()
            .filter(|e| e.method == Method::Post && shared.pending.contains_key(&e.id))
            .collect();
        if posts.is_empty() {
            return;
        }
        tracing::debug!(count = posts.len(), "requeueing calls the connection never sent");
        for envelope in posts.into_iter().rev() {
            shared.queue.push_front(envelope);
        }
    }

    fn on_give_up(&self, attempts: u32) {
        let mut shared = self.shared.lock();
        shared.outbound = None;
        shared.supervising = false;
        shared.reject_pending(&CallError::ConnectionFailed(attempts));
        self.set_state(ConnectionState::Failed);
    }

    fn on_frame(&self, raw: &str) {
        let envelope: ResponseEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable frame from server, dropping");
                return;
            }
        };
        let ResponseEnvelope { id, method, body } = envelope;
        tracing::trace!(id, method = %method, status = body.status, path = %body.path, "frame received");

        match method {
            Method::Post => {
                let pending = self.shared.lock().pending.remove(&id);
                match pending {
                    Some(call) => {
                        let _ = call.reply.send(outcome(body));
                    }
                    None => tracing::warn!(id, "response for unknown call id, dropping"),
                }
            }
            Method::Subscribe => {
                let callback = {
                    let mut shared = self.shared.lock();
                    if body.is_success() {
                        shared.subscriptions.get(&id).map(|s| s.callback.clone())
                    } else {
                        shared.subscriptions.remove(&id).map(|s| s.callback)
                    }
                };
                match callback {
                    Some(callback) => callback(outcome(body)),
                    None => tracing::debug!(id, "message for a finished subscription, dropping"),
                }
            }
            Method::Unsubscribe => tracing::debug!(id, "unexpected UNSUBSCRIBE frame, ignoring"),
        }
    }
}

fn outcome(body: ResponseBody) -> Result<Value, CallError> {
    if body.is_success() {
        Ok(body.data)
    } else {
        Err(CallError::Remote {
            status: body.status,
            data: body.data,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connect, run, and reconnect with back-off until shutdown or give-up.
async fn supervise(inner: Arc<Inner>) {
    let mut schedule = inner.backoff.schedule();

    loop {
        if inner.shutdown.is_cancelled() {
            return;
        }
        inner.set_state(ConnectionState::Connecting);

        let result = tokio::select! {
            r = connect_and_run(&inner) => r,
            _ = inner.shutdown.cancelled() => {
                tracing::info!(url = %inner.url, "duplex client shut down");
                return;
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(url = %inner.url, "duplex connection closed");
                schedule.reset();
            }
            Err(e) => {
                tracing::warn!(url = %inner.url, failures = schedule.failures(), error = %e, "connection attempt failed");
                inner.on_disconnect();
            }
        }

        let Some(delay) = schedule.next_delay() else {
            tracing::error!(url = %inner.url, attempts = schedule.failures(), "max reconnect attempts exhausted");
            inner.on_give_up(schedule.failures());
            return;
        };
        tracing::info!(
            url = %inner.url,
            delay_ms = delay.as_millis() as u64,
            attempt = schedule.failures(),
            "reconnecting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.shutdown.cancelled() => return,
        }
    }
}

/// One connection lifecycle.  `Err` only when the socket never opened;
/// a connection that opened and later dropped returns `Ok`.
async fn connect_and_run(inner: &Arc<Inner>) -> anyhow::Result<()> {
    tracing::debug!(url = %inner.url, "connecting");
    let (ws, _response) = tokio_tungstenite::connect_async(inner.url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<CallEnvelope>();

    // Writer task: runs until stopped or the socket fails, then hands the
    // channel back so frames it never wrote are not lost.
    let writer_stop = CancellationToken::new();
    let stop = writer_stop.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = outbound_rx.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let json = match serde_json::to_string(&envelope) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound envelope");
                    continue;
                }
            };
            tracing::trace!(id = envelope.id, method = %envelope.method, "frame sent");
            let written = tokio::select! {
                _ = stop.cancelled() => break,
                r = sink.send(Message::Text(json)) => r.is_ok(),
            };
            if !written {
                break;
            }
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), sink.close()).await;
        outbound_rx
    });

    inner.on_open(outbound_tx);

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => inner.on_frame(&text),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => inner.on_frame(text),
                Err(_) => tracing::warn!("non-UTF-8 binary frame from server, dropping"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!(url = %inner.url, "server closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(url = %inner.url, error = %e, "duplex read failed");
                break;
            }
        }
    }

    inner.on_disconnect();
    writer_stop.cancel();
    if let Ok(mut outbound_rx) = writer_task.await {
        let mut unsent = Vec::new();
        while let Ok(envelope) = outbound_rx.try_recv() {
            unsent.push(envelope);
        }
        inner.requeue_unsent(unsent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> DuplexClient {
        DuplexClient::new("ws://127.0.0.1:9/ws".into(), ReconnectBackoff::default())
    }

    #[test]
    fn ids_are_monotonic_and_skip_zero() {
        let mut shared = Shared {
            next_id: u32::MAX - 1,
            ..Default::default()
        };
        assert_eq!(shared.allocate_id(), u32::MAX);
        assert_eq!(shared.allocate_id(), 1);
        assert_eq!(shared.allocate_id(), 2);
    }

    #[test]
    fn unknown_response_ids_are_dropped() {
        let c = client();
        c.inner.on_frame(
            &json!({"id": 41, "method": "POST", "body": {"status": 200, "path": "/x", "data": 1}})
                .to_string(),
        );
        c.inner.on_frame("garbage");
        assert!(c.inner.shared.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn error_frame_ends_a_subscription() {
        let c = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        {
            let mut shared = c.inner.shared.lock();
            shared.started = true;
        }
        let _unsubscribe = c.subscribe(
            "/ticks",
            None,
            Arc::new(move |msg: Result<Value, CallError>| {
                sink.lock().push(msg.map_err(|e| e.status()))
            }),
        );
        let id = c.inner.shared.lock().next_id;

        let frame = |status: u16, data: Value| {
            json!({"id": id, "method": "SUBSCRIBE", "body": {"status": status, "path": "/ticks", "data": data}})
                .to_string()
        };
        c.inner.on_frame(&frame(200, json!(1)));
        c.inner.on_frame(&frame(400, json!({"message": "bad"})));
        c.inner.on_frame(&frame(200, json!(2)));

        assert_eq!(*seen.lock(), vec![Ok(json!(1)), Err(Some(400))]);
        assert_eq!(c.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn close_rejects_calls() {
        let c = client();
        c.inner.shared.lock().started = true;
        let pending = tokio::spawn({
            let c = c.clone();
            async move { c.call("/slow", None).await }
        });
        while c.inner.shared.lock().pending.is_empty() {
            tokio::task::yield_now().await;
        }
        c.close();
        assert!(matches!(pending.await.unwrap(), Err(CallError::Closed)));
        assert!(matches!(c.call("/x", None).await, Err(CallError::Closed)));
    }

    #[tokio::test]
    async fn unwritten_post_moves_to_the_next_connection() {
        let c = client();
        c.inner.shared.lock().started = true;
        let (dying_tx, mut dying_rx) = mpsc::unbounded_channel();
        c.inner.on_open(dying_tx);

        let pending = tokio::spawn({
            let c = c.clone();
            async move { c.call("/echo", Some(json!(1))).await }
        });
        while c.inner.shared.lock().pending.is_empty() {
            tokio::task::yield_now().await;
        }

        // The socket drops before the writer picked the frame up.
        c.inner.on_disconnect();
        let mut unsent = Vec::new();
        while let Ok(envelope) = dying_rx.try_recv() {
            unsent.push(envelope);
        }
        assert_eq!(unsent.len(), 1);
        c.inner.requeue_unsent(unsent);
        assert_eq!(c.inner.shared.lock().queue.len(), 1);

        let (next_tx, mut next_rx) = mpsc::unbounded_channel();
        c.inner.on_open(next_tx);
        let resent = next_rx.recv().await.unwrap();
        assert_eq!(resent.method, Method::Post);
        assert_eq!(resent.body.path, "/echo");

        c.inner.on_frame(
            &json!({"id": resent.id, "method": "POST", "body": {"status": 200, "path": "/echo", "data": 1}})
                .to_string(),
        );
        assert_eq!(pending.await.unwrap().unwrap(), json!(1));
    }

    #[test]
    fn requeue_skips_settled_calls_and_subscriptions() {
        let c = client();
        c.inner.requeue_unsent(vec![
            CallEnvelope::post(9, "/gone", None),
            CallEnvelope::subscribe(10, "/ticks", None),
        ]);
        assert!(c.inner.shared.lock().queue.is_empty());
    }
}
