//! Subscription output channels and payload decoders.

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use futures_util::stream::FusedStream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{LiveGqlError, Result};
use crate::frame::ResultPayload;

/// An event pushed by the multiplexer into one output channel.
#[derive(Debug, Clone)]
pub(crate) enum ChannelEvent {
    /// A `data` frame for the channel's tag.
    Data(ResultPayload),
    /// A subscription-level or connection-level error.
    Error(LiveGqlError),
    /// Normal end of stream.
    Complete,
}

/// Push side of an output channel, held by the multiplexer.
pub(crate) type ChannelSender = mpsc::UnboundedSender<ChannelEvent>;

/// Turns the `data` member of a result payload into an application type.
///
/// Any closure `Fn(&Value) -> Result<T, E>` with a displayable error is a decoder.
pub trait Decoder<T>: Send + Sync + 'static {
    /// Decode one payload. The error message is delivered to this channel only.
    fn decode(&self, data: &Value) -> std::result::Result<T, String>;
}

impl<T, E, F> Decoder<T> for F
where
    F: Fn(&Value) -> std::result::Result<T, E> + Send + Sync + 'static,
    E: fmt::Display,
{
    fn decode(&self, data: &Value) -> std::result::Result<T, String> {
        self(data).map_err(|e| e.to_string())
    }
}

/// Passes the raw JSON value through.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder<Value> for RawDecoder {
    fn decode(&self, data: &Value) -> std::result::Result<Value, String> {
        Ok(data.clone())
    }
}

/// Deserializes payloads with `serde`.
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    /// Create a decoder for `T`.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<T: DeserializeOwned + 'static> Decoder<T> for JsonDecoder<T> {
    fn decode(&self, data: &Value) -> std::result::Result<T, String> {
        T::deserialize(data).map_err(|e| e.to_string())
    }
}

/// The stream handed to one caller of `subscribe`.
///
/// Yields `Ok(item)` per `data` frame, `Err(..)` for subscription errors
/// (the stream continues) and ends after `complete`, `unsubscribe`, or a
/// connection teardown. A connection failure yields one final `Err` before
/// the stream ends.
///
/// Dropping the stream does not stop the server-side operation; call
/// `unsubscribe` for that.
pub struct SubscriptionStream<T> {
    tag: String,
    receiver: mpsc::UnboundedReceiver<ChannelEvent>,
    decoder: Arc<dyn Decoder<T>>,
    finished: bool,
}

impl<T: 'static> SubscriptionStream<T> {
    pub(crate) fn new(
        tag: String,
        receiver: mpsc::UnboundedReceiver<ChannelEvent>,
        decoder: Arc<dyn Decoder<T>>,
    ) -> Self {
        Self {
            tag,
            receiver,
            decoder,
            finished: false,
        }
    }

    /// The operation id this stream is attached to.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn convert(&self, result: ResultPayload) -> Result<T> {
        if !result.errors.is_empty() {
            return Err(LiveGqlError::Graphql(result.errors));
        }
        let data = result.data.unwrap_or(Value::Null);
        self.decoder
            .decode(&data)
            .map_err(|message| LiveGqlError::Decode {
                tag: self.tag.clone(),
                message,
            })
    }
}

impl<T: 'static> Stream for SubscriptionStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(ChannelEvent::Data(result))) => Poll::Ready(Some(self.convert(result))),
            Poll::Ready(Some(ChannelEvent::Error(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(Some(ChannelEvent::Complete)) | Poll::Ready(None) => {
                self.finished = true;
                self.receiver.close();
                Poll::Ready(None)
            }
        }
    }
}

impl<T: 'static> FusedStream for SubscriptionStream<T> {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl<T> fmt::Debug for SubscriptionStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("tag", &self.tag)
            .field("finished", &self.finished)
            .finish()
    }
}
