//! Data models for the relay-link client library.
//!
//! Defines the opaque subscription token, the delivery payload handed to
//! subscriber callbacks, and the JSON envelope frames spoken by the bundled
//! WebSocket transport.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Opaque token identifying one subscription within a session.
///
/// Minted by [`Session::subscribe`](crate::Session::subscribe) and only
/// useful as the argument to [`Session::unsubscribe`](crate::Session::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Rebuild an id from its raw value, for transports that decode ids off
    /// the wire. Sessions mint their own ids; callers never need this.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value, exposed for transports that key frames by it.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Value handed to a subscriber callback for each inbound message.
///
/// Payloads are parsed as JSON; when parsing fails the raw text is delivered
/// instead of an error, so delivery is never dropped for a malformed body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Well-formed structured payload.
    Json(JsonValue),
    /// Raw body delivered as-is because it did not parse as JSON.
    Raw(String),
}

impl Payload {
    /// Parse a raw message body, falling back to [`Payload::Raw`].
    pub fn parse(body: String) -> Self {
        match serde_json::from_str::<JsonValue>(&body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(body),
        }
    }

    /// The structured value, if the body parsed as JSON.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}

/// Callback invoked for every message delivered on a subscription's topic.
pub type MessageCallback = std::sync::Arc<dyn Fn(Payload) + Send + Sync>;

// ── Wire envelope for the bundled WebSocket transport ───────────────────────

/// Client-to-server envelope frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Session handshake, sent immediately after the socket opens.
    /// The server replies with [`ServerFrame::Connected`] or
    /// [`ServerFrame::Error`].
    Connect {
        /// Opaque handshake headers (auth tokens, client metadata).
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },

    /// Register a subscription on a topic.
    Subscribe {
        /// Client-chosen subscription id; inbound messages echo it back.
        id: SubscriptionId,
        /// Topic to subscribe to.
        topic: String,
    },

    /// Remove a subscription.
    Unsubscribe {
        /// The subscription id to remove.
        id: SubscriptionId,
    },

    /// Publish a message to a destination.
    Send {
        /// Destination to publish to.
        destination: String,
        /// Serialized message body.
        body: String,
    },

    /// Graceful session shutdown.
    Disconnect,
}

/// Server-to-client envelope frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted.
    Connected {
        /// Server-assigned session identifier, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },

    /// Handshake rejected or a session-level protocol error.
    Error {
        /// Human-readable error message.
        message: String,
    },

    /// Message delivered on a subscribed topic.
    Message {
        /// The subscription this message is for.
        subscription: SubscriptionId,
        /// Topic the message arrived on, when the server includes it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        /// Raw message body.
        body: String,
    },
}
