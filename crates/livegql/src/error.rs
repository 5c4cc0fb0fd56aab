//! Error types for the subscription client.

use thiserror::Error;

use crate::frame::ServerError;

/// Guidance appended to handshake failures.
pub(crate) const PROTOCOL_HINT: &str =
    "verify that the server implements the graphql-ws (subscriptions-transport-ws) protocol";

/// Errors produced by the connection, the multiplexer, and subscription channels.
///
/// The type is `Clone` so that a single connection failure can be delivered
/// to every live subscription channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveGqlError {
    /// Socket-level failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport closed with an abnormal close code.
    #[error("connection closed abnormally (code {code}): {reason}")]
    ConnectionClosed {
        /// The WebSocket close code.
        code: u16,
        /// The close reason sent by the peer, possibly empty.
        reason: String,
    },

    /// The transport did not open within the configured timeout.
    #[error("connection timed out")]
    Timeout,

    /// The peer sent something that cannot be interpreted where a specific frame was expected.
    #[error("protocol violation: {0}; {hint}", hint = PROTOCOL_HINT)]
    Protocol(String),

    /// The server answered `connection_init` with `connection_error`.
    #[error("connection rejected by server: {0}; {hint}", hint = PROTOCOL_HINT)]
    ConnectionRejected(String),

    /// The server sent an `error` frame for a subscription.
    #[error("subscription '{tag}' failed: {message}")]
    Subscription {
        /// The operation id of the failing subscription.
        tag: String,
        /// The server-supplied error message.
        message: String,
    },

    /// A `data` frame carried GraphQL execution errors.
    #[error("GraphQL error: {}", join_messages(.0))]
    Graphql(Vec<ServerError>),

    /// The caller-supplied decoder rejected a payload.
    #[error("failed to decode payload for '{tag}': {message}")]
    Decode {
        /// The operation id of the subscription.
        tag: String,
        /// The decoder's error message.
        message: String,
    },

    /// `unsubscribe` was called with a tag that has no live subscription.
    #[error("no active subscription with tag '{0}'")]
    UnknownTag(String),

    /// An empty tag was supplied.
    #[error("subscription tag must not be empty")]
    InvalidTag,

    /// No connection has been established.
    #[error("not connected")]
    NotConnected,

    /// The operation is not valid in the current connection state.
    #[error("cannot {operation} while connection is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The connection state at the time of the call.
        state: crate::state::ConnectionState,
    },

    /// A `connection_init` handshake is already outstanding.
    #[error("a connection handshake is already in progress")]
    HandshakeInProgress,

    /// `connect` was called while a connection is still live.
    #[error("client is already connected")]
    AlreadyConnected,

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(String),

    /// The connection URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl LiveGqlError {
    /// Whether this error terminates the whole connection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectionClosed { .. } | Self::Timeout
        )
    }

    /// Whether this error reports a peer that broke the protocol during the handshake.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::ConnectionRejected(_))
    }

    /// Whether this error is scoped to a single subscription.
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            Self::Subscription { .. } | Self::Graphql(_) | Self::Decode { .. }
        )
    }

    /// Whether this error reports a misuse of the API by the caller.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::UnknownTag(_)
                | Self::InvalidTag
                | Self::NotConnected
                | Self::InvalidState { .. }
                | Self::HandshakeInProgress
                | Self::AlreadyConnected
        )
    }
}

fn join_messages(errors: &[ServerError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for LiveGqlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<url::ParseError> for LiveGqlError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

/// A specialized Result type for subscription client operations.
pub type Result<T> = std::result::Result<T, LiveGqlError>;
