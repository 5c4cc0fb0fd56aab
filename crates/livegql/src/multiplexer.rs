//! Routing of operation frames to subscription output channels.
//!
//! One server-side operation per tag; any number of output channels per tag.
//! All mutation of the tag map happens under a single lock so that
//! registration, explicit unsubscribe, inbound routing and global teardown
//! are serialized against each other.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{LiveGqlError, Result};
use crate::frame::{QueryPayload, ResultPayload};
use crate::subscription::{ChannelEvent, ChannelSender};
use crate::targets;

/// One server-side operation and the channels attached to it.
struct Subscription {
    query: QueryPayload,
    channels: Vec<ChannelSender>,
}

impl Subscription {
    /// Deliver an event to every channel, dropping channels whose receiver is gone.
    fn broadcast(&mut self, event: ChannelEvent) {
        self.channels.retain(|channel| channel.send(event.clone()).is_ok());
    }

    fn terminate(self, event: ChannelEvent) -> usize {
        let count = self.channels.len();
        for channel in self.channels {
            let _ = channel.send(event.clone());
        }
        count
    }
}

/// Maps operation ids to their output channels.
#[derive(Default)]
pub(crate) struct SubscriptionMultiplexer {
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl SubscriptionMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new output channel to `tag`.
    ///
    /// `start` runs (under the lock) only when the tag is not yet live; if it
    /// fails nothing is registered. An existing tag just gains a channel.
    pub fn subscribe<F>(
        &self,
        tag: &str,
        query: QueryPayload,
        start: F,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>>
    where
        F: FnOnce(&QueryPayload) -> Result<()>,
    {
        if tag.is_empty() {
            return Err(LiveGqlError::InvalidTag);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.entry(tag.to_string()) {
            Entry::Occupied(mut entry) => {
                let subscription = entry.get_mut();
                subscription.channels.push(tx);
                tracing::debug!(
                    target: targets::MULTIPLEXER,
                    tag,
                    channels = subscription.channels.len(),
                    "Attached channel to live subscription"
                );
            }
            Entry::Vacant(entry) => {
                start(&query)?;
                entry.insert(Subscription {
                    query,
                    channels: vec![tx],
                });
                tracing::debug!(target: targets::MULTIPLEXER, tag, "Started subscription");
            }
        }
        Ok(rx)
    }

    /// Stop `tag`: run `stop`, complete every channel, forget the tag.
    ///
    /// Unknown tags are a usage error. If `stop` fails the tag stays registered.
    pub fn unsubscribe<F>(&self, tag: &str, stop: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.contains_key(tag) {
            return Err(LiveGqlError::UnknownTag(tag.to_string()));
        }
        stop()?;
        if let Some(subscription) = subscriptions.remove(tag) {
            tracing::debug!(
                target: targets::MULTIPLEXER,
                tag,
                operation = subscription.query.operation_name.as_deref(),
                "Stopped subscription"
            );
            subscription.terminate(ChannelEvent::Complete);
        }
        Ok(())
    }

    /// Deliver a `data` payload. Returns `false` if the tag is not live.
    pub fn route_data(&self, tag: &str, payload: ResultPayload) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.get_mut(tag) {
            Some(subscription) => {
                subscription.broadcast(ChannelEvent::Data(payload));
                true
            }
            None => {
                tracing::trace!(target: targets::MULTIPLEXER, tag, "Dropped data for unknown tag");
                false
            }
        }
    }

    /// Deliver a server `error` to one tag's channels. The tag stays live.
    pub fn route_error(&self, tag: &str, message: String) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.get_mut(tag) {
            Some(subscription) => {
                subscription.broadcast(ChannelEvent::Error(LiveGqlError::Subscription {
                    tag: tag.to_string(),
                    message,
                }));
                true
            }
            None => {
                tracing::trace!(target: targets::MULTIPLEXER, tag, "Dropped error for unknown tag");
                false
            }
        }
    }

    /// Complete one tag's channels and forget the tag.
    pub fn route_complete(&self, tag: &str) -> bool {
        let removed = self.subscriptions.lock().remove(tag);
        match removed {
            Some(subscription) => {
                subscription.terminate(ChannelEvent::Complete);
                tracing::debug!(target: targets::MULTIPLEXER, tag, "Server completed subscription");
                true
            }
            None => false,
        }
    }

    /// Error every channel of every tag and clear the map. Returns the number of channels signalled.
    pub fn fail_all(&self, error: LiveGqlError) -> usize {
        self.terminate_all(ChannelEvent::Error(error))
    }

    /// Complete every channel of every tag and clear the map. Returns the number of channels signalled.
    pub fn complete_all(&self) -> usize {
        self.terminate_all(ChannelEvent::Complete)
    }

    fn terminate_all(&self, event: ChannelEvent) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let drained = std::mem::take(&mut *subscriptions);
        let signalled: usize = drained
            .into_values()
            .map(|subscription| subscription.terminate(event.clone()))
            .sum();
        if signalled > 0 {
            tracing::debug!(target: targets::MULTIPLEXER, channels = signalled, "Terminated all subscriptions");
        }
        signalled
    }

    /// Live tags, in no particular order.
    pub fn tags(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Number of live tags.
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Number of channels attached to `tag`.
    pub fn channel_count(&self, tag: &str) -> usize {
        self.subscriptions
            .lock()
            .get(tag)
            .map_or(0, |subscription| subscription.channels.len())
    }
}
