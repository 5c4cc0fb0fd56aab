//! The connection lifecycle state machine.
//!
//! A [`Connection`] owns the transport handle and the subscription
//! multiplexer for one session. Transport events are consumed one at a time
//! by a dispatcher task; public operations may run concurrently from any
//! task. Lock order is always connection state first, multiplexer second.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{LiveGqlError, Result};
use crate::frame::{Frame, FrameKind, Payload, QueryPayload, ResultPayload};
use crate::multiplexer::SubscriptionMultiplexer;
use crate::state::{CloseCode, ConnectionState};
use crate::subscription::ChannelEvent;
use crate::targets;
use crate::transport::{Connector, Transport, TransportEvent};

/// A one-shot handle resolved when the matching protocol event arrives.
type Pending = oneshot::Sender<Result<()>>;

struct ConnectionInner {
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    /// The transport reported `opened`; `Ready` waits until it is also attached.
    opened: bool,
    pending_open: Option<Pending>,
    pending_ack: Option<Pending>,
    pending_close: Vec<oneshot::Sender<()>>,
}

/// One protocol session over one transport.
pub(crate) struct Connection {
    inner: Mutex<ConnectionInner>,
    multiplexer: SubscriptionMultiplexer,
    status: Arc<watch::Sender<ConnectionState>>,
}

fn send_frame(transport: &dyn Transport, frame: &Frame) -> Result<()> {
    let text = frame.encode()?;
    tracing::trace!(target: targets::CONNECTION, frame = %text, "Sending frame");
    transport.send(text)
}

impl Connection {
    pub fn new(status: Arc<watch::Sender<ConnectionState>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                transport: None,
                opened: false,
                pending_open: None,
                pending_ack: None,
                pending_close: Vec::new(),
            }),
            multiplexer: SubscriptionMultiplexer::new(),
            status,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.multiplexer
    }

    fn set_state(&self, inner: &mut ConnectionInner, next: ConnectionState) {
        if inner.state != next {
            tracing::debug!(
                target: targets::CONNECTION,
                from = %inner.state,
                to = %next,
                "Connection state changed"
            );
            inner.state = next;
            self.status.send_replace(next);
        }
    }

    /// Open the transport and wait for the `opened` event.
    pub async fn open(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
        url: String,
        timeout: Duration,
    ) -> Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                return Err(LiveGqlError::AlreadyConnected);
            }
            inner.pending_open = Some(open_tx);
            self.set_state(&mut inner, ConnectionState::Connecting);
        }

        tokio::spawn(Arc::clone(self).dispatch(events_rx));

        tracing::debug!(target: targets::CONNECTION, url = %url, "Opening transport");
        let opening = async {
            let transport = connector.open(url, events_tx).await?;
            self.attach(transport);
            open_rx.await.unwrap_or(Err(LiveGqlError::NotConnected))
        };

        let outcome = match tokio::time::timeout(timeout, opening).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LiveGqlError::Timeout),
        };
        if let Err(ref err) = outcome {
            self.finish(ConnectionState::Failed, Some(err.clone()));
        }
        outcome
    }

    fn attach(&self, transport: Box<dyn Transport>) {
        let pending = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                drop(inner);
                let _ = transport.close();
                return;
            }
            inner.transport = Some(transport);
            self.promote_to_ready(&mut inner)
        };
        if let Some(pending) = pending {
            let _ = pending.send(Ok(()));
        }
    }

    /// Enter `Ready` once the transport is both open and attached, so that
    /// anyone reacting to `Ready` can already send.
    fn promote_to_ready(&self, inner: &mut ConnectionInner) -> Option<Pending> {
        if inner.state != ConnectionState::Connecting || !inner.opened || inner.transport.is_none() {
            return None;
        }
        self.set_state(inner, ConnectionState::Ready);
        inner.pending_open.take()
    }

    /// Consume transport events in receive order until the transport goes away.
    async fn dispatch(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        if !self.state().is_terminal() {
            self.finish(
                ConnectionState::Failed,
                Some(LiveGqlError::Transport("transport event stream ended".into())),
            );
        }
    }

    /// Apply one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                let pending = {
                    let mut inner = self.inner.lock();
                    if inner.state != ConnectionState::Connecting {
                        return;
                    }
                    inner.opened = true;
                    self.promote_to_ready(&mut inner)
                };
                if let Some(pending) = pending {
                    let _ = pending.send(Ok(()));
                }
            }
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Closed { code, reason } => {
                if self.state() == ConnectionState::Closing || CloseCode::from_u16(code).is_normal() {
                    self.finish(ConnectionState::Closed, None);
                } else {
                    self.finish(
                        ConnectionState::Failed,
                        Some(LiveGqlError::ConnectionClosed { code, reason }),
                    );
                }
            }
            TransportEvent::Error(detail) => {
                if self.state() == ConnectionState::Closing {
                    tracing::debug!(target: targets::CONNECTION, error = %detail, "Transport error while closing");
                    self.finish(ConnectionState::Closed, None);
                } else {
                    self.finish(ConnectionState::Failed, Some(LiveGqlError::Transport(detail)));
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        if self.state().is_terminal() {
            tracing::trace!(target: targets::CONNECTION, "Dropped frame after teardown");
            return;
        }

        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(target: targets::CONNECTION, error = %err, "Undecodable frame");
                self.settle_handshake(Err(LiveGqlError::Protocol(format!(
                    "expected connection_ack or connection_error, received undecodable frame ({err})"
                ))));
                return;
            }
        };

        match frame.kind {
            FrameKind::ConnectionAck => {
                if !self.settle_handshake(Ok(())) {
                    tracing::debug!(target: targets::CONNECTION, "Ignoring unsolicited connection_ack");
                }
            }
            FrameKind::ConnectionError => {
                let message = match frame.payload {
                    Some(Payload::Error(detail)) => detail.message,
                    _ => "connection rejected".to_string(),
                };
                if !self.settle_handshake(Err(LiveGqlError::ConnectionRejected(message.clone()))) {
                    tracing::warn!(target: targets::CONNECTION, error = %message, "Unsolicited connection_error");
                }
            }
            FrameKind::KeepAlive => {
                tracing::trace!(target: targets::CONNECTION, "Keep-alive");
            }
            FrameKind::Data | FrameKind::Error | FrameKind::Complete => {
                self.reject_during_handshake(&frame.kind);
                self.route(frame);
            }
            kind => {
                tracing::warn!(target: targets::CONNECTION, kind = %kind, "Unexpected frame type");
                self.reject_during_handshake(&kind);
            }
        }
    }

    /// Route an operation frame to the multiplexer.
    fn route(&self, frame: Frame) {
        let Some(tag) = frame.id else {
            tracing::warn!(target: targets::CONNECTION, kind = %frame.kind, "Operation frame without id");
            return;
        };
        match frame.kind {
            FrameKind::Data => {
                let payload = match frame.payload {
                    Some(Payload::Result(result)) => result,
                    // A payload that is not a well-formed result still carries its `data` member.
                    Some(Payload::Other(value)) => ResultPayload {
                        data: value.get("data").cloned(),
                        errors: Vec::new(),
                    },
                    _ => ResultPayload::default(),
                };
                self.multiplexer.route_data(&tag, payload);
            }
            FrameKind::Error => {
                let message = match frame.payload {
                    Some(Payload::Error(detail)) => detail.message,
                    _ => "subscription failed".to_string(),
                };
                self.multiplexer.route_error(&tag, message);
            }
            FrameKind::Complete => {
                self.multiplexer.route_complete(&tag);
            }
            _ => {}
        }
    }

    /// Resolve the outstanding `initialize`, if any. Returns `false` when no handshake was pending.
    fn settle_handshake(&self, outcome: Result<()>) -> bool {
        let pending = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::AwaitingAck {
                return false;
            }
            let next = if outcome.is_ok() {
                ConnectionState::Initialized
            } else {
                ConnectionState::Ready
            };
            self.set_state(&mut inner, next);
            inner.pending_ack.take()
        };
        if let Err(ref err) = outcome {
            tracing::warn!(target: targets::CONNECTION, error = %err, "Handshake failed");
        }
        if let Some(pending) = pending {
            let _ = pending.send(outcome);
        }
        true
    }

    fn reject_during_handshake(&self, kind: &FrameKind) {
        self.settle_handshake(Err(LiveGqlError::Protocol(format!(
            "expected connection_ack or connection_error, received `{kind}`"
        ))));
    }

    /// Enter a terminal state and terminate everything that depends on the session.
    ///
    /// Only the first call has any effect.
    fn finish(&self, terminal: ConnectionState, error: Option<LiveGqlError>) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        self.set_state(&mut inner, terminal);
        let transport = inner.transport.take();
        let pending_open = inner.pending_open.take();
        let pending_ack = inner.pending_ack.take();
        let closers = std::mem::take(&mut inner.pending_close);

        let signalled = match error.clone() {
            Some(err) => {
                tracing::warn!(target: targets::CONNECTION, error = %err, "Connection failed");
                self.multiplexer.fail_all(err)
            }
            None => self.multiplexer.complete_all(),
        };
        drop(inner);
        tracing::debug!(target: targets::CONNECTION, state = %terminal, channels = signalled, "Connection terminated");

        let pending_error = error.unwrap_or(LiveGqlError::ConnectionClosed {
            code: CloseCode::Normal.as_u16(),
            reason: "connection closed".into(),
        });
        for pending in [pending_open, pending_ack].into_iter().flatten() {
            let _ = pending.send(Err(pending_error.clone()));
        }
        for closer in closers {
            let _ = closer.send(());
        }
        drop(transport);
    }

    /// Send `connection_init` and wait for the server's answer.
    pub async fn initialize(&self, params: Option<Value>) -> Result<()> {
        let answer = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Ready => {}
                ConnectionState::AwaitingAck => return Err(LiveGqlError::HandshakeInProgress),
                state => {
                    return Err(LiveGqlError::InvalidState {
                        operation: "initialize",
                        state,
                    });
                }
            }
            let transport = inner.transport.as_deref().ok_or(LiveGqlError::NotConnected)?;
            send_frame(transport, &Frame::connection_init(params))?;
            let (tx, rx) = oneshot::channel();
            inner.pending_ack = Some(tx);
            self.set_state(&mut inner, ConnectionState::AwaitingAck);
            rx
        };
        answer.await.unwrap_or(Err(LiveGqlError::NotConnected))
    }

    /// Attach a channel to `tag`, sending `start` if the tag is new.
    pub fn subscribe(
        &self,
        tag: &str,
        query: QueryPayload,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        let inner = self.inner.lock();
        if !inner.state.has_session() {
            return Err(LiveGqlError::InvalidState {
                operation: "subscribe",
                state: inner.state,
            });
        }
        let transport = inner.transport.as_deref().ok_or(LiveGqlError::NotConnected)?;
        self.multiplexer.subscribe(tag, query, |query| {
            send_frame(transport, &Frame::start(tag, query.clone()))
        })
    }

    /// Send `stop` for `tag` and complete its channels.
    pub fn unsubscribe(&self, tag: &str) -> Result<()> {
        let inner = self.inner.lock();
        let transport = inner.transport.as_deref();
        self.multiplexer.unsubscribe(tag, || {
            let transport = transport.ok_or(LiveGqlError::NotConnected)?;
            send_frame(transport, &Frame::stop(tag))
        })
    }

    /// Terminate the session. Always succeeds.
    ///
    /// Waits up to `timeout` for the transport's closed event, then forces
    /// the `Closed` state.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let closed = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() || inner.state == ConnectionState::Disconnected {
                return Ok(());
            }
            if inner.state != ConnectionState::Closing {
                if let Some(transport) = inner.transport.as_deref() {
                    if let Err(err) = send_frame(transport, &Frame::connection_terminate()) {
                        tracing::debug!(target: targets::CONNECTION, error = %err, "Failed to send connection_terminate");
                    }
                    if let Err(err) = transport.close() {
                        tracing::debug!(target: targets::CONNECTION, error = %err, "Transport close failed");
                    }
                }
                self.set_state(&mut inner, ConnectionState::Closing);
            }
            if inner.transport.is_none() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.pending_close.push(tx);
                Some(rx)
            }
        };

        if let Some(closed) = closed
            && tokio::time::timeout(timeout, closed).await.is_err()
        {
            tracing::debug!(target: targets::CONNECTION, "Transport did not report close in time");
        }
        self.finish(ConnectionState::Closed, None);
        Ok(())
    }
}
