//! WebSocket transport built on `tokio-tungstenite`.
//!
//! The connector negotiates the `graphql-ws` sub-protocol and spawns one task
//! per connection that owns the socket, forwards outbound text, and reports
//! inbound messages and closure as [`TransportEvent`]s.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{LiveGqlError, Result};
use crate::state::CloseCode;
use crate::targets;
use crate::transport::{Connector, EventSender, GRAPHQL_WS_PROTOCOL, Transport, TransportEvent};

/// Type alias for a connected WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Command sent to the socket task.
enum Command {
    Send(String),
    Close,
}

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    headers: HashMap<String, String>,
}

impl WebSocketConnector {
    /// Create a connector with no extra headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom header for the WebSocket handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Build the handshake request with the sub-protocol and custom headers.
    fn build_request(url: &str, headers: &HashMap<String, String>) -> Result<Request> {
        let mut request = url
            .into_client_request()
            .map_err(|e| LiveGqlError::InvalidUrl(e.to_string()))?;

        let request_headers = request.headers_mut();
        request_headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(GRAPHQL_WS_PROTOCOL),
        );
        for (name, value) in headers {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| LiveGqlError::Transport(format!("invalid header: {e}")))?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|e| LiveGqlError::Transport(format!("invalid header: {e}")))?;
            request_headers.insert(header_name, header_value);
        }

        Ok(request)
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, url: String, events: EventSender) -> BoxFuture<'static, Result<Box<dyn Transport>>> {
        let headers = self.headers.clone();
        Box::pin(async move {
            let request = Self::build_request(&url, &headers)?;
            let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| LiveGqlError::Transport(e.to_string()))?;
            tracing::debug!(target: targets::WEBSOCKET, url = %url, "WebSocket connected");

            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let _ = events.send(TransportEvent::Opened);
            tokio::spawn(run_socket(ws_stream, command_rx, events));

            Ok(Box::new(WebSocketTransport { commands: command_tx }) as Box<dyn Transport>)
        })
    }
}

/// Handle to a socket task.
struct WebSocketTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl Transport for WebSocketTransport {
    fn send(&self, text: String) -> Result<()> {
        self.commands
            .send(Command::Send(text))
            .map_err(|_| LiveGqlError::Transport("WebSocket is not open".into()))
    }

    fn close(&self) -> Result<()> {
        self.commands
            .send(Command::Close)
            .map_err(|_| LiveGqlError::Transport("WebSocket is not open".into()))
    }
}

/// Own the socket until it closes. Always ends with exactly one `Closed` or `Error` event.
async fn run_socket(
    ws_stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut closing = false;

    let terminal = loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Send(text)) if !closing => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            break TransportEvent::Error(e.to_string());
                        }
                    }
                    Some(Command::Send(_)) => {
                        tracing::trace!(target: targets::WEBSOCKET, "Dropping outbound message after close");
                    }
                    Some(Command::Close) => {
                        if !closing {
                            if let Err(e) = write.send(Message::Close(Some(close_frame()))).await {
                                tracing::debug!(target: targets::WEBSOCKET, error = %e, "Failed to send close frame");
                                break normal_close();
                            }
                            closing = true;
                        }
                    }
                    // The handle is gone, so nobody waits for the peer's close reply.
                    None => {
                        if !closing {
                            let _ = write.send(Message::Close(Some(close_frame()))).await;
                        }
                        break normal_close();
                    }
                }
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message(text));
                        }
                        Err(_) => {
                            tracing::warn!(target: targets::WEBSOCKET, "Ignoring non-UTF-8 binary message");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => TransportEvent::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.as_str().to_string(),
                            },
                            None if closing => normal_close(),
                            None => TransportEvent::Closed {
                                code: CloseCode::NoStatus.as_u16(),
                                reason: String::new(),
                            },
                        };
                    }
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break if closing {
                            normal_close()
                        } else {
                            TransportEvent::Error(e.to_string())
                        };
                    }
                    None => {
                        break if closing {
                            normal_close()
                        } else {
                            TransportEvent::Closed {
                                code: CloseCode::Abnormal.as_u16(),
                                reason: "connection dropped".into(),
                            }
                        };
                    }
                }
            }
        }
    };

    tracing::debug!(target: targets::WEBSOCKET, event = ?terminal, "WebSocket finished");
    let _ = events.send(terminal);
}

fn close_frame() -> CloseFrame {
    CloseFrame {
        code: TungsteniteCloseCode::Normal,
        reason: "".into(),
    }
}

fn normal_close() -> TransportEvent {
    TransportEvent::Closed {
        code: CloseCode::Normal.as_u16(),
        reason: String::new(),
    }
}
