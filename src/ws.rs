//! Bundled WebSocket transport speaking the JSON envelope protocol.
//!
//! Implements [`Transport`]/[`Connection`] over `tokio-tungstenite`. The
//! handshake is an explicit [`ClientFrame::Connect`] answered by
//! [`ServerFrame::Connected`] or [`ServerFrame::Error`]; ping/pong frames are
//! tolerated throughout. The session core never depends on this module
//! concretely; it is the default collaborator wired in by
//! [`SessionBuilder`](crate::SessionBuilder).

use crate::error::{LinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::{ClientFrame, ServerFrame, SubscriptionId};
use crate::timeouts::LinkTimeouts;
use crate::transport::{Connection, LiveSubscription, Transport, TransportEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};
use url::Url;

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Maximum accepted text frame size (64 MiB).
const MAX_TEXT_FRAME_BYTES: usize = 64 << 20;

/// Map an endpoint URL onto a ws/wss URL for the socket connection.
///
/// Accepts `http(s)` endpoints (mapped to `ws(s)`) as well as literal
/// `ws(s)` URLs. An empty or root path defaults to `/ws`.
pub(crate) fn resolve_ws_url(endpoint: &str) -> Result<String> {
    let mut url = Url::parse(endpoint.trim()).map_err(|e| {
        LinkError::Configuration(format!("Invalid endpoint '{}': {}", endpoint, e))
    })?;

    if url.host_str().is_none() {
        return Err(LinkError::Configuration(
            "endpoint must include a host".to_string(),
        ));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(LinkError::Configuration(
            "endpoint must not include username/password credentials".to_string(),
        ));
    }

    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::Configuration(format!(
                "Unsupported endpoint scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        }
    };

    url.set_scheme(ws_scheme)
        .map_err(|_| LinkError::Configuration("Failed to set WebSocket URL scheme".to_string()))?;
    url.set_fragment(None);
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }

    Ok(url.to_string())
}

/// Serialize and send one envelope frame, reporting it to the traffic hook.
async fn send_frame(
    ws: &mut WebSocketStream,
    frame: &ClientFrame,
    handlers: &EventHandlers,
) -> Result<()> {
    let payload = serde_json::to_string(frame)
        .map_err(|e| LinkError::Serialization(format!("Failed to serialize frame: {}", e)))?;
    handlers.emit_send(&payload);
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| LinkError::Transport(format!("Failed to send frame: {}", e)))
}

/// Send the Connect frame and wait for the server's handshake reply,
/// tolerating ping/pong and other non-handshake frames in between.
async fn handshake(
    ws: &mut WebSocketStream,
    headers: &HashMap<String, String>,
    handlers: &EventHandlers,
    handshake_timeout: std::time::Duration,
) -> Result<()> {
    send_frame(
        ws,
        &ClientFrame::Connect {
            headers: headers.clone(),
        },
        handlers,
    )
    .await?;

    let exchange = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    handlers.emit_receive(&text);
                    match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Connected { session }) => {
                            log::debug!(
                                "[relay-link] Handshake accepted (session={:?})",
                                session
                            );
                            return Ok(());
                        }
                        Ok(ServerFrame::Error { message }) => {
                            return Err(LinkError::Handshake(message));
                        }
                        // Keep waiting for the handshake reply.
                        Ok(_) => continue,
                        Err(e) => {
                            return Err(LinkError::Handshake(format!(
                                "Unparseable handshake reply: {}",
                                e
                            )));
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    return Err(LinkError::Handshake(
                        "Connection closed during handshake".to_string(),
                    ));
                }
                Some(Err(e)) => {
                    return Err(LinkError::Transport(format!(
                        "WebSocket error during handshake: {}",
                        e
                    )));
                }
                None => {
                    return Err(LinkError::Handshake(
                        "Connection closed before handshake completed".to_string(),
                    ));
                }
            }
        }
    };

    if LinkTimeouts::is_no_timeout(handshake_timeout) {
        exchange.await
    } else {
        tokio::time::timeout(handshake_timeout, exchange)
            .await
            .map_err(|_| {
                LinkError::Timeout(format!("Handshake timeout ({:?})", handshake_timeout))
            })?
    }
}

/// WebSocket-backed [`Transport`].
///
/// # Example
///
/// ```rust,no_run
/// use relay_link::{Session, WsTransport};
/// use std::sync::Arc;
///
/// # async fn example() -> relay_link::Result<()> {
/// let transport = WsTransport::new("https://api.example.com")
///     .with_timeouts(relay_link::LinkTimeouts::fast());
/// let session = Session::builder()
///     .transport(Arc::new(transport))
///     .build()?;
/// session.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct WsTransport {
    endpoint: String,
    headers: HashMap<String, String>,
    timeouts: LinkTimeouts,
    handlers: EventHandlers,
}

impl WsTransport {
    /// Create a transport for the given endpoint. The URL is validated at
    /// connect time.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            timeouts: LinkTimeouts::default(),
            handlers: EventHandlers::default(),
        }
    }

    /// Set the opaque handshake headers carried in the Connect frame.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the timeout configuration.
    pub fn with_timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Attach event handlers for the raw-frame traffic hooks.
    pub fn with_event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let request_url = resolve_ws_url(&self.endpoint)?;
        log::debug!("[relay-link] Opening WebSocket to {}", request_url);

        let request = request_url.into_client_request().map_err(|e| {
            LinkError::Transport(format!("Failed to build WebSocket request: {}", e))
        })?;

        let (mut ws, _response) = connect_async(request)
            .await
            .map_err(|e| LinkError::Transport(format!("Connection failed: {}", e)))?;

        handshake(
            &mut ws,
            &self.headers,
            &self.handlers,
            self.timeouts.handshake_timeout,
        )
        .await?;

        log::info!("[relay-link] WebSocket session established");
        Ok(Box::new(WsConnection {
            ws,
            handlers: self.handlers.clone(),
            teardown_timeout: self.timeouts.teardown_timeout,
            next_live: 1,
            live_ids: HashMap::new(),
        }))
    }
}

/// One established WebSocket connection.
struct WsConnection {
    ws: WebSocketStream,
    handlers: EventHandlers,
    teardown_timeout: std::time::Duration,
    next_live: u64,
    /// Live token → subscription id, needed to build Unsubscribe frames.
    live_ids: HashMap<LiveSubscription, SubscriptionId>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn subscribe(&mut self, topic: &str, id: SubscriptionId) -> Result<LiveSubscription> {
        send_frame(
            &mut self.ws,
            &ClientFrame::Subscribe {
                id,
                topic: topic.to_string(),
            },
            &self.handlers,
        )
        .await?;
        let live = LiveSubscription::new(self.next_live);
        self.next_live += 1;
        self.live_ids.insert(live, id);
        Ok(live)
    }

    async fn unsubscribe(&mut self, live: LiveSubscription) -> Result<()> {
        let id = match self.live_ids.remove(&live) {
            Some(id) => id,
            // Token from a previous connection instance; nothing to do.
            None => return Ok(()),
        };
        send_frame(&mut self.ws, &ClientFrame::Unsubscribe { id }, &self.handlers).await
    }

    async fn send(&mut self, destination: &str, body: &str) -> Result<()> {
        send_frame(
            &mut self.ws,
            &ClientFrame::Send {
                destination: destination.to_string(),
                body: body.to_string(),
            },
            &self.handlers,
        )
        .await
    }

    async fn recv(&mut self) -> TransportEvent {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_TEXT_FRAME_BYTES {
                        log::warn!(
                            "[relay-link] Dropping oversized text frame ({} bytes)",
                            text.len()
                        );
                        continue;
                    }
                    self.handlers.emit_receive(&text);
                    match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Message {
                            subscription, body, ..
                        }) => {
                            return TransportEvent::Message {
                                id: subscription,
                                body,
                            };
                        }
                        Ok(ServerFrame::Error { message }) => {
                            log::warn!("[relay-link] Server error frame: {}", message);
                        }
                        Ok(ServerFrame::Connected { .. }) => {}
                        Err(e) => {
                            log::warn!("[relay-link] Unparseable server frame: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (reason, code) = match frame {
                        Some(f) => (
                            format!("Server closed connection: {}", f.reason),
                            Some(u16::from(f.code)),
                        ),
                        None => ("Server closed connection".to_string(), None),
                    };
                    return TransportEvent::Closed { reason, code };
                }
                Some(Err(e)) => {
                    return TransportEvent::Closed {
                        reason: format!("WebSocket error: {}", e),
                        code: None,
                    };
                }
                None => {
                    return TransportEvent::Closed {
                        reason: "WebSocket stream ended".to_string(),
                        code: None,
                    };
                }
            }
        }
    }

    async fn teardown(&mut self) {
        let graceful = async {
            let _ = send_frame(&mut self.ws, &ClientFrame::Disconnect, &self.handlers).await;
            let _ = self.ws.close(None).await;
            // Drain until the close is acknowledged or the stream ends.
            while let Some(Ok(msg)) = self.ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        };
        if LinkTimeouts::is_no_timeout(self.teardown_timeout) {
            graceful.await;
        } else if tokio::time::timeout(self.teardown_timeout, graceful)
            .await
            .is_err()
        {
            log::debug!("[relay-link] Teardown timed out; dropping connection");
        }
    }
}
