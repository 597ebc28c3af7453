//! The transport boundary.
//!
//! The session core never talks to a socket directly; it drives an opaque
//! connection primitive through these traits. The bundled implementation is
//! [`WsTransport`](crate::ws::WsTransport); tests substitute a scripted one.
//!
//! Callback-style transport APIs (handshake success/error, per-message
//! delivery, teardown completion) are re-expressed as async results: a
//! connect attempt resolves once with a connection or an error, and inbound
//! traffic is pulled through [`Connection::recv`].

use crate::error::Result;
use crate::models::SubscriptionId;
use async_trait::async_trait;
use std::fmt;

/// Transport-issued token for an active subscription on one connection
/// instance. Invalidated when that connection is torn down; a token from a
/// previous connection must never be used against a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveSubscription(u64);

impl LiveSubscription {
    /// Mint a token. Transports choose their own numbering.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw token value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "live-{}", self.0)
    }
}

/// Inbound event pulled from a connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A message arrived for a subscription.
    Message {
        /// The subscription the message is addressed to.
        id: SubscriptionId,
        /// Raw message body; the session parses it (with raw fallback).
        body: String,
    },
    /// The connection is gone: stream ended, server close, or protocol
    /// error. The connection must not be used after this.
    Closed {
        /// Human-readable reason for diagnostics.
        reason: String,
        /// Protocol close code, when the transport received one.
        code: Option<u16>,
    },
}

/// Factory for connections: construction plus handshake in one fallible
/// step. Construction failure and handshake failure are the same error class
/// to the session.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection and complete the session-level handshake.
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// One established connection. Owned exclusively by the session task.
#[async_trait]
pub trait Connection: Send {
    /// Establish a live subscription on `topic`. Inbound messages for it are
    /// delivered through [`recv`](Connection::recv) tagged with `id`.
    async fn subscribe(&mut self, topic: &str, id: SubscriptionId) -> Result<LiveSubscription>;

    /// Tear down a live subscription.
    async fn unsubscribe(&mut self, live: LiveSubscription) -> Result<()>;

    /// Publish a serialized message to a destination.
    async fn send(&mut self, destination: &str, body: &str) -> Result<()>;

    /// Pull the next inbound event. Returns [`TransportEvent::Closed`] once
    /// the connection is gone; callers must not call `recv` again after
    /// that.
    async fn recv(&mut self) -> TransportEvent;

    /// Best-effort graceful close. Errors are swallowed; the connection is
    /// dropped afterwards regardless.
    async fn teardown(&mut self);
}
