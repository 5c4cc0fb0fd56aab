//! The transport adapter contract.
//!
//! A [`Connector`] opens a physical connection and hands back a [`Transport`]
//! used for outbound text. Everything the connection observes arrives as
//! [`TransportEvent`]s on the sender passed to [`Connector::open`], one at a
//! time and in receive order.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;

/// Sub-protocol negotiated during the WebSocket handshake.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Lifecycle and message events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport finished opening.
    Opened,
    /// A text message was received.
    Message(String),
    /// The transport closed.
    Closed {
        /// The close code; `1000` is a normal closure.
        code: u16,
        /// The close reason, possibly empty.
        reason: String,
    },
    /// The transport failed.
    Error(String),
}

/// Sender half handed to a connector for event delivery.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// An open connection able to carry outbound frames.
///
/// Implementations must not block: `send` queues the text and returns.
pub trait Transport: Send + Sync {
    /// Queue a text message. Fails if the transport is no longer open.
    fn send(&self, text: String) -> Result<()>;

    /// Request shutdown. Must eventually emit [`TransportEvent::Closed`] on success.
    fn close(&self) -> Result<()>;
}

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Open a connection to `url`, delivering events to `events`.
    ///
    /// The returned future resolves once the transport-level open succeeded
    /// and rejects on connection failure.
    fn open(&self, url: String, events: EventSender) -> BoxFuture<'static, Result<Box<dyn Transport>>>;
}
