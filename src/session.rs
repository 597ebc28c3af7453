//! Shared session manager multiplexing one connection across many callers.
//!
//! A [`Session`] is a cheap-to-clone handle; all state lives in a background
//! task that is the sole owner of the transport connection. Handles:
//!
//! - Single connection shared by all callers (never more than one live
//!   connection or in-flight handshake)
//! - One shared outcome per connect attempt: every concurrent `connect()`
//!   caller awaits the same handshake
//! - A subscription registry that survives disconnect/reconnect cycles;
//!   every surviving entry is re-established each time the session becomes
//!   connected
//! - An outbound FIFO queue for messages sent while disconnected, drained
//!   exactly once per transition into the connected state
//! - Lifecycle events (`on_connect`, `on_disconnect`, `on_error`)
//!
//! Reconnection is strictly caller-driven: after a handshake failure or a
//! lost connection the session stays disconnected until some caller issues
//! `connect()` or `send_message()` again.
//!
//! Construct the session once at startup and pass the handle to every
//! consumer:
//!
//! ```rust,no_run
//! use relay_link::Session;
//!
//! # async fn example() -> relay_link::Result<()> {
//! let session = Session::builder()
//!     .endpoint("http://localhost:8080")
//!     .build()?;
//!
//! let sub = session.subscribe("/topic/updates", |payload| {
//!     println!("update: {:?}", payload);
//! });
//!
//! session.send_message("/app/hello", &serde_json::json!({"x": 1}));
//! session.connect().await?;
//! # let _ = sub;
//! # Ok(())
//! # }
//! ```

use crate::error::{LinkError, Result};
use crate::event_handlers::{DisconnectReason, EventHandlers, SessionError};
use crate::models::{MessageCallback, Payload, SubscriptionId};
use crate::timeouts::LinkTimeouts;
use crate::transport::{Connection, LiveSubscription, Transport, TransportEvent};
use crate::ws::WsTransport;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background session task.
enum SessionCmd {
    /// Establish the connection, or join the attempt already in flight.
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    /// Tear down the connection. No-op unless connected; the registry and
    /// outbound queue are kept for a future reconnect.
    Disconnect,
    /// Register a subscription. The id was minted by the handle so the
    /// caller already holds it.
    Subscribe {
        id: SubscriptionId,
        topic: String,
        callback: MessageCallback,
    },
    /// Remove a subscription. Unknown ids are ignored.
    Unsubscribe {
        id: SubscriptionId,
    },
    /// Publish a message, queueing it if no connection is live.
    Send {
        destination: String,
        body: JsonValue,
    },
}

// ── Internal state ──────────────────────────────────────────────────────────

/// One registered subscription.
struct SubEntry {
    topic: String,
    callback: MessageCallback,
    /// Present iff connected and established on the *current* connection.
    /// Cleared whenever the connection is dropped, so a token can never
    /// outlive the connection that issued it.
    live: Option<LiveSubscription>,
}

/// A message queued while no connection was live.
struct QueuedMessage {
    destination: String,
    body: JsonValue,
}

/// The single in-flight connect attempt. All `connect()` callers that arrive
/// while this exists are appended to `waiters` and share the outcome.
struct PendingConnect {
    done_rx: oneshot::Receiver<Result<Box<dyn Connection>>>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

// ── Session (public handle) ─────────────────────────────────────────────────

/// Handle to the shared messaging session.
///
/// Clones share one underlying session; construct it once via
/// [`Session::builder`] and hand clones to every consumer. `subscribe`,
/// `unsubscribe` and `send_message` are synchronous and never fail from the
/// caller's perspective; only [`connect`](Session::connect) reports errors.
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    /// Mirrors the task's connection state for synchronous reads.
    connected: Arc<AtomicBool>,
    /// Shared counter so every handle clone mints unique subscription ids.
    next_sub_id: Arc<AtomicU64>,
}

impl Session {
    /// Create a builder for configuring the session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Establish the connection.
    ///
    /// Idempotent: resolves immediately when already connected. When an
    /// attempt is already in flight, this call awaits that same attempt, so
    /// all concurrent callers observe one shared outcome. On failure the
    /// session returns to the disconnected state and a later call may retry.
    pub async fn connect(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCmd::Connect { done: done_tx })
            .map_err(|_| LinkError::Closed)?;
        done_rx.await.map_err(|_| LinkError::Closed)?
    }

    /// Tear down the connection.
    ///
    /// No-op unless connected. Subscriptions and queued messages persist and
    /// are re-established / delivered on the next successful connect.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(SessionCmd::Disconnect);
    }

    /// Register a callback for every message on `topic`.
    ///
    /// Always succeeds, whatever the connection state: the subscription is
    /// recorded immediately and established on the transport as soon as a
    /// connection is (or becomes) live. Returns the opaque id used to
    /// [`unsubscribe`](Session::unsubscribe).
    ///
    /// Callbacks run on the session task; keep them quick and non-blocking.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        callback: impl Fn(Payload) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_sub_id.fetch_add(1, Ordering::Relaxed));
        let cmd = SessionCmd::Subscribe {
            id,
            topic: topic.into(),
            callback: Arc::new(callback),
        };
        if self.cmd_tx.send(cmd).is_err() {
            log::debug!("[relay-link] subscribe {} ignored; session has shut down", id);
        }
        id
    }

    /// Remove a subscription. Unknown ids (already removed, or never issued)
    /// are a no-op. After this call no further messages reach the callback
    /// and the topic is not re-established on future reconnects.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.cmd_tx.send(SessionCmd::Unsubscribe { id });
    }

    /// Publish `message` to `destination`.
    ///
    /// Fire-and-forget: when connected the message is sent immediately (a
    /// transport failure is logged and reported to `on_error`, never to the
    /// caller); otherwise it is queued in FIFO order and a connect attempt
    /// is triggered lazily, so a pending send is what establishes the
    /// connection when nobody called `connect()` first.
    pub fn send_message<T: Serialize>(&self, destination: impl Into<String>, message: &T) {
        let destination = destination.into();
        let body = match serde_json::to_value(message) {
            Ok(v) => v,
            Err(e) => {
                log::error!(
                    "[relay-link] Dropping message to {}: serialization failed: {}",
                    destination,
                    e
                );
                return;
            }
        };
        let cmd = SessionCmd::Send { destination, body };
        if self.cmd_tx.send(cmd).is_err() {
            log::debug!("[relay-link] send_message ignored; session has shut down");
        }
    }

    /// Whether the session currently holds a live, handshaken connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Builder for [`Session`].
///
/// Either an `endpoint` (served by the bundled [`WsTransport`]) or an
/// explicit [`transport`](SessionBuilder::transport) must be provided.
/// `build()` spawns the background task and therefore requires a running
/// tokio runtime.
pub struct SessionBuilder {
    endpoint: Option<String>,
    headers: HashMap<String, String>,
    timeouts: LinkTimeouts,
    handlers: EventHandlers,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionBuilder {
    fn new() -> Self {
        Self {
            endpoint: None,
            headers: HashMap::new(),
            timeouts: LinkTimeouts::default(),
            handlers: EventHandlers::default(),
            transport: None,
        }
    }

    /// Set the server endpoint for the bundled WebSocket transport.
    /// Accepts `http(s)` or `ws(s)` URLs.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add one opaque handshake header (auth token, client metadata).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Replace the full handshake header map.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the timeout configuration.
    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the lifecycle event handlers.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Use a custom transport instead of the bundled WebSocket one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the session and spawn its background task.
    pub fn build(self) -> Result<Session> {
        let transport = match self.transport {
            Some(t) => t,
            None => {
                let endpoint = self.endpoint.ok_or_else(|| {
                    LinkError::Configuration("endpoint (or a custom transport) is required".into())
                })?;
                Arc::new(
                    WsTransport::new(endpoint)
                        .with_headers(self.headers)
                        .with_timeouts(self.timeouts.clone())
                        .with_event_handlers(self.handlers.clone()),
                )
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(session_task(
            cmd_rx,
            transport,
            self.timeouts,
            self.handlers,
            connected.clone(),
        ));

        Ok(Session {
            cmd_tx,
            connected,
            next_sub_id: Arc::new(AtomicU64::new(1)),
        })
    }
}

// ── Background session task ─────────────────────────────────────────────────

/// Spawn the handshake for a new connect attempt. The attempt runs in its
/// own task so the session keeps processing commands while connecting; its
/// outcome comes back through the returned `PendingConnect`.
fn start_attempt(
    transport: &Arc<dyn Transport>,
    timeouts: &LinkTimeouts,
    waiters: Vec<oneshot::Sender<Result<()>>>,
) -> PendingConnect {
    let (done_tx, done_rx) = oneshot::channel();
    let transport = transport.clone();
    let connection_timeout = timeouts.connection_timeout;

    tokio::spawn(async move {
        let outcome = if LinkTimeouts::is_no_timeout(connection_timeout) {
            transport.connect().await
        } else {
            match tokio::time::timeout(connection_timeout, transport.connect()).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout(format!(
                    "Connection timeout ({:?})",
                    connection_timeout
                ))),
            }
        };
        // The session task may have exited; nothing to do then.
        let _ = done_tx.send(outcome);
    });

    PendingConnect { done_rx, waiters }
}

/// Await the in-flight attempt, or park forever when there is none.
async fn await_attempt(pending: &mut Option<PendingConnect>) -> Result<Box<dyn Connection>> {
    match pending {
        Some(p) => match (&mut p.done_rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LinkError::Transport(
                "Connect attempt ended without an outcome".to_string(),
            )),
        },
        None => std::future::pending().await,
    }
}

/// Pull the next transport event, or park forever while disconnected.
async fn next_event(conn: &mut Option<Box<dyn Connection>>) -> TransportEvent {
    match conn {
        Some(c) => c.recv().await,
        None => std::future::pending().await,
    }
}

/// Send one message over the live connection. Failures are logged and
/// reported to `on_error`; never retried, never surfaced to the caller.
async fn send_now(
    conn: &mut Box<dyn Connection>,
    destination: &str,
    body: &JsonValue,
    handlers: &EventHandlers,
) {
    let text = match serde_json::to_string(body) {
        Ok(t) => t,
        Err(e) => {
            log::error!("[relay-link] Dropping message to {}: {}", destination, e);
            return;
        }
    };
    if let Err(e) = conn.send(destination, &text).await {
        log::warn!("[relay-link] Send to {} failed: {}", destination, e);
        handlers.emit_error(SessionError::new(
            format!("Send to {} failed: {}", destination, e),
            true,
        ));
    }
}

/// Drain the outbound queue through the live connection, oldest first.
///
/// The queue is consulted fresh each iteration (never snapshotted), so a
/// message appended mid-drain is picked up by the same pass. Per-message
/// failures do not halt the drain; liveness is rechecked every iteration.
async fn drain_outbox(
    conn: &mut Option<Box<dyn Connection>>,
    outbox: &mut VecDeque<QueuedMessage>,
    handlers: &EventHandlers,
) {
    if !outbox.is_empty() {
        log::debug!("[relay-link] Draining {} queued message(s)", outbox.len());
    }
    while let Some(msg) = outbox.pop_front() {
        let Some(c) = conn.as_mut() else {
            // Connection vanished mid-drain; keep the message for the next
            // successful connect.
            outbox.push_front(msg);
            return;
        };
        send_now(c, &msg.destination, &msg.body, handlers).await;
    }
}

/// Establish a live subscription for every surviving registry entry on the
/// current connection. Runs once per transition into the connected state,
/// first connect included; `live` is overwritten unconditionally, so stale
/// tokens from earlier connections never stack.
async fn resubscribe_all(
    conn: &mut Option<Box<dyn Connection>>,
    registry: &mut HashMap<SubscriptionId, SubEntry>,
    handlers: &EventHandlers,
) {
    let Some(c) = conn.as_mut() else { return };
    if !registry.is_empty() {
        log::info!(
            "[relay-link] Establishing {} subscription(s)",
            registry.len()
        );
    }
    for (id, entry) in registry.iter_mut() {
        match c.subscribe(&entry.topic, *id).await {
            Ok(live) => entry.live = Some(live),
            Err(e) => {
                entry.live = None;
                log::warn!(
                    "[relay-link] Failed to subscribe {} on '{}': {}",
                    id,
                    entry.topic,
                    e
                );
                handlers.emit_error(SessionError::new(
                    format!("Failed to subscribe '{}': {}", entry.topic, e),
                    true,
                ));
            }
        }
    }
}

/// Mark the connection as gone: clear the flag and every live handle. The
/// registry and outbound queue are deliberately preserved.
fn clear_connection_state(
    registry: &mut HashMap<SubscriptionId, SubEntry>,
    connected: &AtomicBool,
) {
    connected.store(false, Ordering::SeqCst);
    for entry in registry.values_mut() {
        entry.live = None;
    }
}

/// The background task owning all session state.
///
/// Lifecycle per iteration, in priority order:
/// 1. Resolution of the in-flight connect attempt (drain queue, establish
///    subscriptions, then settle every waiter)
/// 2. Commands from `Session` handles
/// 3. Inbound transport events (message delivery, connection loss)
///
/// Exits when every `Session` handle has been dropped.
async fn session_task(
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    transport: Arc<dyn Transport>,
    timeouts: LinkTimeouts,
    handlers: EventHandlers,
    connected: Arc<AtomicBool>,
) {
    let mut registry: HashMap<SubscriptionId, SubEntry> = HashMap::new();
    let mut outbox: VecDeque<QueuedMessage> = VecDeque::new();
    let mut conn: Option<Box<dyn Connection>> = None;
    let mut pending: Option<PendingConnect> = None;

    loop {
        tokio::select! {
            biased;

            // The in-flight connect attempt resolved.
            outcome = await_attempt(&mut pending) => {
                let waiters = pending.take().map(|p| p.waiters).unwrap_or_default();
                match outcome {
                    Ok(c) => {
                        conn = Some(c);
                        connected.store(true, Ordering::SeqCst);
                        handlers.emit_connect();
                        // Queued messages first, then subscriptions, then
                        // settle the waiters.
                        drain_outbox(&mut conn, &mut outbox, &handlers).await;
                        resubscribe_all(&mut conn, &mut registry, &handlers).await;
                        for w in waiters {
                            let _ = w.send(Ok(()));
                        }
                    }
                    Err(e) => {
                        log::warn!("[relay-link] Connect attempt failed: {}", e);
                        handlers.emit_error(SessionError::new(
                            format!("Connect failed: {}", e),
                            true,
                        ));
                        for w in waiters {
                            let _ = w.send(Err(e.clone()));
                        }
                    }
                }
            }

            // Commands from the public API.
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle dropped: tear down and exit.
                    if let Some(mut c) = conn.take() {
                        clear_connection_state(&mut registry, &connected);
                        c.teardown().await;
                    }
                    return;
                };
                match cmd {
                    SessionCmd::Connect { done } => {
                        if conn.is_some() {
                            let _ = done.send(Ok(()));
                        } else if let Some(p) = pending.as_mut() {
                            p.waiters.push(done);
                        } else {
                            pending = Some(start_attempt(&transport, &timeouts, vec![done]));
                        }
                    }
                    SessionCmd::Disconnect => {
                        // No-op unless connected; a pending attempt cannot
                        // be cancelled.
                        if let Some(mut c) = conn.take() {
                            clear_connection_state(&mut registry, &connected);
                            c.teardown().await;
                            handlers.emit_disconnect(
                                DisconnectReason::new("Session disconnected"),
                            );
                        }
                    }
                    SessionCmd::Subscribe { id, topic, callback } => {
                        let mut entry = SubEntry { topic, callback, live: None };
                        if let Some(c) = conn.as_mut() {
                            // Already connected: establish eagerly. On
                            // failure the entry stays registered and the
                            // next connect's resubscription covers it.
                            match c.subscribe(&entry.topic, id).await {
                                Ok(live) => entry.live = Some(live),
                                Err(e) => {
                                    log::warn!(
                                        "[relay-link] Immediate subscribe {} failed: {}",
                                        id,
                                        e
                                    );
                                    handlers.emit_error(SessionError::new(
                                        format!("Subscribe '{}' failed: {}", entry.topic, e),
                                        true,
                                    ));
                                }
                            }
                        }
                        registry.insert(id, entry);
                    }
                    SessionCmd::Unsubscribe { id } => {
                        if let Some(entry) = registry.remove(&id) {
                            if let (Some(c), Some(live)) = (conn.as_mut(), entry.live) {
                                if let Err(e) = c.unsubscribe(live).await {
                                    log::warn!(
                                        "[relay-link] Unsubscribe {} failed: {}",
                                        id,
                                        e
                                    );
                                }
                            }
                        }
                        // Unknown id: already removed or never issued.
                    }
                    SessionCmd::Send { destination, body } => {
                        if let Some(c) = conn.as_mut() {
                            send_now(c, &destination, &body, &handlers).await;
                        } else {
                            outbox.push_back(QueuedMessage { destination, body });
                            if pending.is_none() {
                                log::debug!(
                                    "[relay-link] Queued send while disconnected; triggering connect"
                                );
                                pending = Some(start_attempt(&transport, &timeouts, Vec::new()));
                            }
                        }
                    }
                }
            }

            // Inbound transport events.
            event = next_event(&mut conn) => {
                match event {
                    TransportEvent::Message { id, body } => {
                        if let Some(entry) = registry.get(&id) {
                            (entry.callback)(Payload::parse(body));
                        } else {
                            log::debug!(
                                "[relay-link] Dropping message for unknown subscription {}",
                                id
                            );
                        }
                    }
                    TransportEvent::Closed { reason, code } => {
                        log::warn!("[relay-link] Connection lost: {}", reason);
                        conn = None;
                        clear_connection_state(&mut registry, &connected);
                        let disconnect = match code {
                            Some(code) => DisconnectReason::with_code(reason, code),
                            None => DisconnectReason::new(reason),
                        };
                        handlers.emit_disconnect(disconnect);
                    }
                }
            }
        }
    }
}
