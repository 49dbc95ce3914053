//! Keep-alive supervision for one duplex connection.
//!
//! Every `ping_interval` a ping is sent.  If no pong has been observed
//! within `pong_wait` after that ping, the connection is terminated by
//! cancelling its `closed` token.  Application traffic does not count as
//! liveness.

use std::sync::Arc;

use parking_lot::Mutex;
use sy_domain::config::KeepAliveConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Records when the last pong arrived.
#[derive(Clone)]
pub struct PongTracker {
    last: Arc<Mutex<Instant>>,
}

impl PongTracker {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn observe(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn seen_since(&self, at: Instant) -> bool {
        *self.last.lock() >= at
    }
}

impl Default for PongTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Run until `closed` is cancelled.  `ping` sends one ping and returns
/// `false` once the outbound side is gone.
pub async fn supervise(
    cfg: KeepAliveConfig,
    tracker: PongTracker,
    ping: impl Fn() -> bool,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            _ = tokio::time::sleep(cfg.ping_interval()) => {}
        }

        let sent_at = Instant::now();
        if !ping() {
            return;
        }

        tokio::select! {
            _ = closed.cancelled() => return,
            _ = tokio::time::sleep(cfg.pong_wait()) => {}
        }

        if !tracker.seen_since(sent_at) {
            tracing::warn!(
                pong_wait_ms = cfg.pong_wait_ms,
                "no pong within keep-alive window, terminating connection"
            );
            closed.cancel();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cfg() -> KeepAliveConfig {
        KeepAliveConfig {
            ping_interval_ms: 1_000,
            pong_wait_ms: 500,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_terminated() {
        let closed = CancellationToken::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = pings.clone();

        let task = tokio::spawn(supervise(
            cfg(),
            PongTracker::new(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            },
            closed.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert!(closed.is_cancelled());
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answering_peer_stays_open() {
        let closed = CancellationToken::new();
        let tracker = PongTracker::new();
        let responder = tracker.clone();

        let task = tokio::spawn(supervise(
            cfg(),
            tracker,
            move || {
                responder.observe();
                true
            },
            closed.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!closed.is_cancelled());
        closed.cancel();
        task.await.unwrap();
    }
}
