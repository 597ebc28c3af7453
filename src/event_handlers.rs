//! Session lifecycle event hooks.
//!
//! The session reports connection lifecycle changes and non-fatal delivery
//! problems through optional callbacks rather than return values. Callers of
//! `send_message` never see errors, so this is where send failures, teardown
//! reasons and raw-frame traffic surface for observability.
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("session established"))
//!     .on_disconnect(|reason| println!("session lost: {}", reason))
//!     .on_error(|err| eprintln!("session error: {}", err));
//! ```

use std::fmt;
use std::sync::Arc;

/// Why the connection dropped, handed to the `on_disconnect` hook for both
/// explicit disconnects and transport loss.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description.
    pub message: String,
    /// Protocol close code, carried through when the transport saw one.
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// A reason carrying the transport's close code (1001 "going away",
    /// 1008 "policy violation", ...).
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct SessionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether the session can recover (a later connect may succeed).
    pub recoverable: bool,
}

impl SessionError {
    /// Create a new session error.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(SessionError) + Send + Sync>;

/// Type alias for the on_send / on_receive debug hooks.
pub type OnTrafficCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Session lifecycle event handlers.
///
/// All handlers are optional; the builder registers only what the caller
/// needs. Handlers are `Send + Sync` so they can fire from the session task.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_send: Option<OnTrafficCallback>,
    pub(crate) on_receive: Option<OnTrafficCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_send", &self.on_send.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create an empty handler set (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback fired each time the session becomes connected,
    /// including reconnects.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback fired when the connection is dropped, whether by
    /// an explicit `disconnect()` or by transport loss.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback fired for non-fatal session errors: failed
    /// handshakes, failed sends, failed resubscriptions. These are never
    /// surfaced to the operation that caused them (except `connect()`), so
    /// this hook is the only place to observe them besides the log.
    pub fn on_error(mut self, f: impl Fn(SessionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving every raw outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving every raw inbound frame.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_send.is_some()
            || self.on_receive.is_some()
    }

    // Dispatch, called from the session task and the bundled transport.
    // An unregistered hook is a no-op.

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: SessionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }
}
