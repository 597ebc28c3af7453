//! Client-side session manager for a shared real-time messaging link.
//!
//! `relay-link` multiplexes one bidirectional connection across arbitrarily
//! many uncoordinated callers. A single [`Session`] handle (cheaply cloned)
//! offers connect/disconnect, topic subscription with per-subscription
//! callbacks, and fire-and-forget publishing; messages sent while
//! disconnected are queued and flushed on connect, and subscriptions survive
//! disconnect/reconnect cycles.
//!
//! # Examples
//!
//! ```rust,no_run
//! use relay_link::Session;
//!
//! # async fn example() -> relay_link::Result<()> {
//! let session = Session::builder()
//!     .endpoint("http://localhost:8080")
//!     .header("Authorization", "Bearer token")
//!     .build()?;
//!
//! session.subscribe("/topic/orders", |payload| {
//!     println!("order update: {:?}", payload);
//! });
//!
//! session.connect().await?;
//! session.send_message("/app/orders", &serde_json::json!({"action": "refresh"}));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event_handlers;
pub mod models;
pub mod session;
pub mod timeouts;
pub mod transport;
pub mod ws;

pub use error::{LinkError, Result};
pub use event_handlers::{
    DisconnectReason, EventHandlers, OnConnectCallback, OnDisconnectCallback, OnErrorCallback,
    OnTrafficCallback, SessionError,
};
pub use models::{ClientFrame, MessageCallback, Payload, ServerFrame, SubscriptionId};
pub use session::{Session, SessionBuilder};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
pub use transport::{Connection, LiveSubscription, Transport, TransportEvent};
pub use ws::WsTransport;
