//! Shared test harness: a fully scripted in-memory transport.
//!
//! `MockTransport` stands in for the WebSocket transport. Tests script
//! connect outcomes, gate connect attempts behind an explicit release, and
//! inspect per-connection traffic (sends, subscribes, unsubscribes) through
//! `ConnRecord` handles. Each successful connect produces a fresh record, so
//! reconnect tests can compare traffic across connection generations.

use async_trait::async_trait;
use relay_link::{
    Connection, LinkError, LiveSubscription, Result, SubscriptionId, Transport, TransportEvent,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Opt-in logging for test runs: `RUST_LOG=debug cargo test -- --nocapture`.
/// Safe to call from every test; only the first call installs the logger.
pub fn init_test_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// Traffic captured on one connection, plus knobs for scripting its
/// behavior. Held by both the connection and the test.
pub struct ConnRecord {
    sent: Mutex<Vec<(String, String)>>,
    subscribed: Mutex<Vec<(String, SubscriptionId)>>,
    unsubscribed: Mutex<Vec<LiveSubscription>>,
    /// Interleaved operation log (`send:<dest>` / `subscribe:<topic>`) for
    /// asserting ordering across operation kinds.
    ops: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    torn_down: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ConnRecord {
    /// `(destination, body)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// `(topic, id)` pairs in subscribe order.
    pub fn subscribed(&self) -> Vec<(String, SubscriptionId)> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> Vec<LiveSubscription> {
        self.unsubscribed.lock().unwrap().clone()
    }

    /// Interleaved operation log.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Make every subsequent `send` on this connection fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Deliver an inbound message addressed to `id`.
    pub fn push_message(&self, id: SubscriptionId, body: impl Into<String>) {
        let _ = self.inbound_tx.send(TransportEvent::Message {
            id,
            body: body.into(),
        });
    }

    /// Close the connection from the server side.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.inbound_tx.send(TransportEvent::Closed {
            reason: reason.into(),
            code: None,
        });
    }

    /// Close the connection with a protocol close code.
    pub fn close_with_code(&self, reason: impl Into<String>, code: u16) {
        let _ = self.inbound_tx.send(TransportEvent::Closed {
            reason: reason.into(),
            code: Some(code),
        });
    }
}

struct MockInner {
    connects: AtomicUsize,
    /// Scripted outcomes for upcoming connects, oldest first. An empty
    /// script means success.
    failures: Mutex<VecDeque<LinkError>>,
    /// When gated, each connect consumes one permit before resolving.
    gate: Semaphore,
    gated: bool,
    records: Mutex<Vec<Arc<ConnRecord>>>,
}

/// Scripted transport. Cloning shares the script and records.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Transport whose connects resolve immediately (unless a failure is
    /// scripted).
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Transport whose connects block until [`release_connect`]
    /// (MockTransport::release_connect) fires. Lets a test hold the session
    /// in the connecting state.
    pub fn gated() -> Self {
        Self::build(true)
    }

    fn build(gated: bool) -> Self {
        Self {
            inner: Arc::new(MockInner {
                connects: AtomicUsize::new(0),
                failures: Mutex::new(VecDeque::new()),
                gate: Semaphore::new(0),
                gated,
                records: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Script the next connect attempt to fail with `err`.
    pub fn fail_next_connect(&self, err: LinkError) {
        self.inner.failures.lock().unwrap().push_back(err);
    }

    /// Let one gated connect attempt proceed.
    pub fn release_connect(&self) {
        self.inner.gate.add_permits(1);
    }

    /// Total connect attempts observed, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Record for the `n`-th successful connection (0-based).
    pub fn record(&self, n: usize) -> Arc<ConnRecord> {
        self.inner.records.lock().unwrap()[n].clone()
    }

    /// Number of successful connections so far.
    pub fn connection_count(&self) -> usize {
        self.inner.records.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.gated {
            let permit = self
                .inner
                .gate
                .acquire()
                .await
                .map_err(|_| LinkError::Transport("gate closed".to_string()))?;
            permit.forget();
        }
        if let Some(err) = self.inner.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let record = Arc::new(ConnRecord {
            sent: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            inbound_tx,
        });
        self.inner.records.lock().unwrap().push(record.clone());

        Ok(Box::new(MockConnection {
            record,
            inbound: inbound_rx,
            next_live: 1,
        }))
    }
}

struct MockConnection {
    record: Arc<ConnRecord>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    /// Live tokens are unique per connection, which is all a reconnecting
    /// session relies on.
    next_live: u64,
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(&mut self, topic: &str, id: SubscriptionId) -> Result<LiveSubscription> {
        self.record
            .subscribed
            .lock()
            .unwrap()
            .push((topic.to_string(), id));
        self.record
            .ops
            .lock()
            .unwrap()
            .push(format!("subscribe:{}", topic));
        let live = LiveSubscription::new(self.next_live);
        self.next_live += 1;
        Ok(live)
    }

    async fn unsubscribe(&mut self, live: LiveSubscription) -> Result<()> {
        self.record.unsubscribed.lock().unwrap().push(live);
        Ok(())
    }

    async fn send(&mut self, destination: &str, body: &str) -> Result<()> {
        if self.record.fail_sends.load(Ordering::SeqCst) {
            return Err(LinkError::Transport("scripted send failure".to_string()));
        }
        self.record
            .sent
            .lock()
            .unwrap()
            .push((destination.to_string(), body.to_string()));
        self.record
            .ops
            .lock()
            .unwrap()
            .push(format!("send:{}", destination));
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed {
                reason: "mock inbound channel dropped".to_string(),
                code: None,
            },
        }
    }

    async fn teardown(&mut self) {
        self.record.torn_down.store(true, Ordering::SeqCst);
    }
}

/// Poll `check` until it returns true or ~2s elapse. The session API is
/// fire-and-forget, so tests observe effects by waiting on the transport's
/// records rather than on return values.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
