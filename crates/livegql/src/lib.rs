//! GraphQL subscriptions over WebSocket.
//!
//! This crate implements the client side of the `graphql-ws` protocol
//! (subscriptions-transport-ws): one WebSocket carries a JSON-framed
//! sub-protocol, and any number of logical subscriptions are multiplexed over
//! it by operation id ("tag").
//!
//! - **Connection lifecycle**: `connect`, the `connection_init` /
//!   `connection_ack` handshake, `connection_terminate`, and teardown on
//!   transport failure.
//! - **Subscription multiplexing**: `start` / `stop` per tag, fan-out of one
//!   server-side operation to several streams, routing of `data`, `error` and
//!   `complete` frames.
//! - **Pluggable transport**: the default [`WebSocketConnector`] uses
//!   `tokio-tungstenite`; any [`Connector`] can be supplied instead.
//!
//! # Example
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use livegql::{ClientConfig, LiveGqlClient, QueryPayload};
//!
//! let client = LiveGqlClient::new(
//!     ClientConfig::new().init_payload(serde_json::json!({"authToken": "secret"})),
//! );
//! client.connect("wss://example.com/graphql").await?;
//! client.initialize().await?;
//!
//! // Two streams sharing one server-side operation
//! let mut first = client.subscribe("subscription { count }", "counter")?;
//! let mut second = client.subscribe("subscription { count }", "counter")?;
//!
//! // Variables and typed decoding
//! #[derive(serde::Deserialize)]
//! struct Message { id: String, body: String }
//!
//! let mut messages = client.subscribe_as::<Message>(
//!     QueryPayload::new("subscription OnMessage($room: ID!) { message(room: $room) { id body } }")
//!         .variable("room", "lobby"),
//!     "messages",
//! )?;
//!
//! while let Some(item) = first.next().await {
//!     println!("count: {:?}", item?);
//! }
//!
//! client.unsubscribe("counter")?;
//! client.close_connection().await?;
//! ```
//!
//! # Logging
//!
//! The crate logs through `tracing` using the targets in [`targets`]. Install
//! a subscriber in the application to see them.

mod client;
mod connection;
mod error;
pub mod frame;
mod multiplexer;
mod state;
mod subscription;
pub mod transport;
mod websocket;

pub use client::{ClientConfig, LiveGqlClient};
pub use error::{LiveGqlError, Result};
pub use frame::{Frame, FrameKind, QueryPayload, ServerError};
pub use state::{CloseCode, ConnectionState};
pub use subscription::{Decoder, JsonDecoder, RawDecoder, SubscriptionStream};
pub use transport::{Connector, EventSender, GRAPHQL_WS_PROTOCOL, Transport, TransportEvent};
pub use websocket::WebSocketConnector;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Connection lifecycle and frame dispatch.
    pub const CONNECTION: &str = "livegql::connection";
    /// Subscription registration and routing.
    pub const MULTIPLEXER: &str = "livegql::multiplexer";
    /// WebSocket transport.
    pub const WEBSOCKET: &str = "livegql::websocket";
}
