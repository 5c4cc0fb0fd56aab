//! In-memory transport for driving the client from tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use livegql::{
    ClientConfig, ConnectionState, Connector, EventSender, LiveGqlClient, LiveGqlError, Transport,
    TransportEvent,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const URL: &str = "wss://example/graphql";
pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct MockState {
    urls: Vec<String>,
    sent: Vec<String>,
    events: Option<EventSender>,
    open_error: Option<LiveGqlError>,
    close_error: bool,
    silent_close: bool,
    closed: bool,
}

/// A fake server: records what the client sends and injects transport events.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `open` fails with `error`.
    pub fn fail_next_open(&self, error: LiveGqlError) {
        self.state.lock().open_error = Some(error);
    }

    /// `Transport::close` reports an error (and still closes).
    pub fn close_errors(&self) {
        self.state.lock().close_error = true;
    }

    /// `Transport::close` never produces a closed event.
    pub fn silent_close(&self) {
        self.state.lock().silent_close = true;
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state.lock().urls.clone()
    }

    /// Every frame the client sent, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).expect("client sent invalid JSON"))
            .collect()
    }

    /// Frames the client sent with the given `type`.
    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    pub fn emit(&self, event: TransportEvent) {
        let events = self.state.lock().events.clone();
        events
            .expect("transport not open")
            .send(event)
            .expect("connection dropped its event receiver");
    }

    /// Deliver a frame from the server.
    pub fn push(&self, frame: Value) {
        self.emit(TransportEvent::Message(frame.to_string()));
    }

    pub fn push_raw(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    pub fn close_with(&self, code: u16, reason: &str) {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Wait until the client has sent at least `count` frames.
    pub async fn wait_for_sent(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.state.lock().sent.len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("timed out waiting for outbound frames");
    }
}

pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl Connector for MockConnector {
    fn open(&self, url: String, events: EventSender) -> BoxFuture<'static, livegql::Result<Box<dyn Transport>>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut guard = state.lock();
            guard.urls.push(url);
            if let Some(error) = guard.open_error.take() {
                return Err(error);
            }
            guard.closed = false;
            let _ = events.send(TransportEvent::Opened);
            guard.events = Some(events);
            drop(guard);
            Ok(Box::new(MockTransport { state }) as Box<dyn Transport>)
        })
    }
}

struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Transport for MockTransport {
    fn send(&self, text: String) -> livegql::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LiveGqlError::Transport("socket closed".into()));
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&self) -> livegql::Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        if !state.silent_close
            && let Some(events) = state.events.as_ref()
        {
            let _ = events.send(TransportEvent::Closed {
                code: 1000,
                reason: String::new(),
            });
        }
        if state.close_error {
            Err(LiveGqlError::Transport("close failed".into()))
        } else {
            Ok(())
        }
    }
}

pub fn client(server: &MockServer) -> LiveGqlClient {
    client_with(server, ClientConfig::new())
}

pub fn client_with(server: &MockServer, config: ClientConfig) -> LiveGqlClient {
    LiveGqlClient::with_connector(config, server.connector())
}

/// Connect and complete the handshake.
pub async fn initialized(server: &MockServer, client: &LiveGqlClient) {
    client.connect(URL).await.expect("connect failed");
    let sent_before = server.sent().len();
    let (result, ()) = tokio::join!(client.initialize(), async {
        server.wait_for_sent(sent_before + 1).await;
        server.push(json!({"type": "connection_ack"}));
    });
    result.expect("handshake failed");
}

/// Next stream item, failing the test if none arrives in time.
pub async fn next_item<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for stream item")
}

/// Assert that nothing is delivered for a short while.
pub async fn assert_quiet<S: Stream + Unpin>(stream: &mut S)
where
    S::Item: std::fmt::Debug,
{
    if let Ok(item) = tokio::time::timeout(Duration::from_millis(50), stream.next()).await {
        panic!("unexpected stream item: {item:?}");
    }
}

pub async fn wait_for_state(client: &LiveGqlClient, target: ConnectionState) {
    let mut states = client.watch_state();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == target))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}
