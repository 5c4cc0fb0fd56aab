//! Connection lifecycle states and WebSocket close codes.

/// Current state of a subscription connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport has been opened.
    #[default]
    Disconnected,
    /// Waiting for the transport to open.
    Connecting,
    /// Transport is open; the protocol handshake has not completed.
    Ready,
    /// `connection_init` was sent; waiting for `connection_ack` or `connection_error`.
    AwaitingAck,
    /// The server acknowledged the handshake.
    Initialized,
    /// `connection_terminate` was sent and the transport is shutting down.
    Closing,
    /// The connection ended normally. Terminal.
    Closed,
    /// The connection ended with a transport error or abnormal close. Terminal.
    Failed,
}

impl ConnectionState {
    /// Whether no further transitions can occur.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether a transport session exists and frames may be sent.
    pub fn has_session(self) -> bool {
        matches!(self, Self::Ready | Self::AwaitingAck | Self::Initialized)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::AwaitingAck => write!(f, "AwaitingAck"),
            Self::Initialized => write!(f, "Initialized"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// WebSocket close codes (RFC 6455) relevant to connection teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CloseCode {
    /// Normal closure.
    #[default]
    Normal,
    /// Endpoint is going away.
    Away,
    /// Protocol error.
    Protocol,
    /// No status code was provided.
    NoStatus,
    /// Connection dropped without a close frame.
    Abnormal,
    /// Unexpected server condition.
    Error,
    /// Any other code, including application codes 4000-4999.
    Other(u16),
}

impl CloseCode {
    /// Convert to the numeric close code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::Error => 1011,
            Self::Other(code) => code,
        }
    }

    /// Create from a numeric close code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1011 => Self::Error,
            code => Self::Other(code),
        }
    }

    /// Only `1000` counts as a normal closure; everything else fails the connection.
    pub fn is_normal(self) -> bool {
        self == Self::Normal
    }
}
