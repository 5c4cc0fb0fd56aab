//! The public client API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::connection::Connection;
use crate::error::{LiveGqlError, Result};
use crate::frame::QueryPayload;
use crate::state::ConnectionState;
use crate::subscription::{Decoder, JsonDecoder, RawDecoder, SubscriptionStream};
use crate::transport::Connector;
use crate::websocket::WebSocketConnector;

/// Configuration for a subscription client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Payload sent with `connection_init` (e.g., auth tokens).
    pub init_payload: Option<Value>,
    /// Upper bound on opening the transport.
    pub connection_timeout: Duration,
    /// How long `close_connection` waits for the transport to report closure.
    pub close_timeout: Duration,
    /// Additional headers for the WebSocket handshake.
    pub headers: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            init_payload: None,
            connection_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            headers: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `connection_init` payload.
    pub fn init_payload(mut self, payload: impl Serialize) -> Self {
        self.init_payload = serde_json::to_value(payload).ok();
        self
    }

    /// Set the transport open timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set how long closing waits for the transport.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Add a header for the WebSocket handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A GraphQL subscription client speaking the graphql-ws protocol.
///
/// Many logical subscriptions share one connection. Subscribing twice with
/// the same tag attaches a second stream to the same server-side operation.
///
/// # Example
///
/// ```ignore
/// use futures_util::StreamExt;
/// use livegql::LiveGqlClient;
///
/// let client = LiveGqlClient::new(Default::default());
/// client.connect("wss://example.com/graphql").await?;
/// client.initialize().await?;
///
/// let mut counts = client.subscribe("subscription { count }", "counter")?;
/// while let Some(item) = counts.next().await {
///     println!("{:?}", item?);
/// }
///
/// client.unsubscribe("counter")?;
/// client.close_connection().await?;
/// ```
pub struct LiveGqlClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    connection: Mutex<Option<Arc<Connection>>>,
    status: Arc<watch::Sender<ConnectionState>>,
}

impl LiveGqlClient {
    /// Create a client that connects over WebSocket.
    pub fn new(config: ClientConfig) -> Self {
        let connector = WebSocketConnector::new().headers(config.headers.clone());
        Self::with_connector(config, connector)
    }

    /// Create a client over a custom transport.
    pub fn with_connector(config: ClientConfig, connector: impl Connector + 'static) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector: Arc::new(connector),
            connection: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current lifecycle state of the active connection.
    pub fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Open a new connection to `url`.
    ///
    /// Resolves once the transport reports it is open. Fails with
    /// [`LiveGqlError::AlreadyConnected`] while a previous connection is live;
    /// after a close or failure a fresh connection is created.
    pub async fn connect(&self, url: &str) -> Result<()> {
        url::Url::parse(url)?;

        let connection = {
            let mut current = self.connection.lock();
            if let Some(existing) = current.as_ref() {
                let state = existing.state();
                if !state.is_terminal() && state != ConnectionState::Disconnected {
                    return Err(LiveGqlError::AlreadyConnected);
                }
            }
            let connection = Connection::new(self.status.clone());
            *current = Some(connection.clone());
            connection
        };

        connection
            .open(
                self.connector.clone(),
                url.to_string(),
                self.config.connection_timeout,
            )
            .await
    }

    /// Perform the `connection_init` / `connection_ack` handshake.
    pub async fn initialize(&self) -> Result<()> {
        self.current()?
            .initialize(self.config.init_payload.clone())
            .await
    }

    /// Subscribe with the raw `data` value of each result.
    ///
    /// `tag` is the operation id on the wire. A `start` frame is sent only
    /// the first time a tag is used.
    pub fn subscribe(
        &self,
        query: impl Into<QueryPayload>,
        tag: &str,
    ) -> Result<SubscriptionStream<Value>> {
        self.subscribe_with(query, tag, RawDecoder)
    }

    /// Subscribe and decode each result with `decoder`.
    ///
    /// Decoder failures are delivered to this stream only.
    pub fn subscribe_with<T: 'static>(
        &self,
        query: impl Into<QueryPayload>,
        tag: &str,
        decoder: impl Decoder<T>,
    ) -> Result<SubscriptionStream<T>> {
        let receiver = self.current()?.subscribe(tag, query.into())?;
        Ok(SubscriptionStream::new(
            tag.to_string(),
            receiver,
            Arc::new(decoder),
        ))
    }

    /// Subscribe and deserialize each result into `T`.
    pub fn subscribe_as<T: DeserializeOwned + 'static>(
        &self,
        query: impl Into<QueryPayload>,
        tag: &str,
    ) -> Result<SubscriptionStream<T>> {
        self.subscribe_with(query, tag, JsonDecoder::<T>::new())
    }

    /// Stop the operation `tag` and complete all of its streams.
    ///
    /// Unknown tags fail with [`LiveGqlError::UnknownTag`].
    pub fn unsubscribe(&self, tag: &str) -> Result<()> {
        self.current()?.unsubscribe(tag)
    }

    /// Send `connection_terminate` and close the transport.
    ///
    /// Always succeeds; live streams are completed.
    pub async fn close_connection(&self) -> Result<()> {
        let current = self.connection.lock().clone();
        match current {
            Some(connection) => connection.close(self.config.close_timeout).await,
            None => Ok(()),
        }
    }

    /// Tags with a live server-side operation.
    pub fn active_tags(&self) -> Vec<String> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.multiplexer().tags())
            .unwrap_or_default()
    }

    /// Number of live server-side operations.
    pub fn subscription_count(&self) -> usize {
        self.connection
            .lock()
            .as_ref()
            .map_or(0, |connection| connection.multiplexer().len())
    }

    /// Number of streams attached to `tag`.
    pub fn stream_count(&self, tag: &str) -> usize {
        self.connection
            .lock()
            .as_ref()
            .map_or(0, |connection| connection.multiplexer().channel_count(tag))
    }

    fn current(&self) -> Result<Arc<Connection>> {
        self.connection
            .lock()
            .clone()
            .ok_or(LiveGqlError::NotConnected)
    }
}

impl std::fmt::Debug for LiveGqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveGqlClient")
            .field("state", &self.state())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
