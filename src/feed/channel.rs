//! A single subscription to the change feed.

use crate::backend::{ChangeFeed, FeedSubscription, Filter};
use crate::error::CoreError;
use crate::types::UserId;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique per [`ChangeFeedChannel::open`] call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl ChannelState {
    /// Opening or Open.
    pub fn is_live(self) -> bool {
        matches!(self, ChannelState::Opening | ChannelState::Open)
    }
}

/// Signals emitted by a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Something changed under the filter; refetch the truth.
    Changed,
    /// The subscribe handshake failed. Emitted at most once; the channel is
    /// Closed afterwards and does not retry.
    Error(CoreError),
}

/// One logical subscription bound to a target user and a table filter.
///
/// Two `open` calls always yield two independent channels; deduplication is
/// up to the owner. Dropping a channel closes it.
pub struct ChangeFeedChannel {
    id: ChannelId,
    target: UserId,
    topic: String,
    state: Arc<Mutex<ChannelState>>,
    subscription: Option<FeedSubscription>,
    events: Receiver<ChannelEvent>,
    feed: Arc<dyn ChangeFeed>,
}

impl ChangeFeedChannel {
    /// Subscribe to `table` rows matching `filter` on behalf of `target`.
    ///
    /// Returns once the handshake finished. On failure the channel is
    /// already Closed and its event stream holds a single
    /// [`ChannelEvent::Error`].
    pub fn open(
        feed: Arc<dyn ChangeFeed>,
        target: UserId,
        table: &str,
        filter: Filter,
        buffer_size: usize,
    ) -> Self {
        let id = ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::SeqCst));
        let topic = format!("{}:{}:{}", table, target, id);
        let state = Arc::new(Mutex::new(ChannelState::Opening));
        let (sender, events) = bounded(buffer_size.max(1));

        let mut channel = Self {
            id,
            target,
            topic,
            state: Arc::clone(&state),
            subscription: None,
            events,
            feed,
        };

        if channel.target.as_str().is_empty() {
            *state.lock() = ChannelState::Closed;
            let _ = sender.try_send(ChannelEvent::Error(CoreError::ChannelOpenFailed(
                "empty target user".into(),
            )));
            return channel;
        }

        let callback_state = Arc::clone(&state);
        let callback_sender = sender.clone();
        let result = channel.feed.subscribe(
            &channel.topic,
            table,
            &filter,
            Box::new(move |_event| {
                if callback_state.lock().is_live() {
                    // A full buffer already holds a pending Changed.
                    let _ = callback_sender.try_send(ChannelEvent::Changed);
                }
            }),
        );

        match result {
            Ok(subscription) => {
                channel.subscription = Some(subscription);
                *state.lock() = ChannelState::Open;
                info!(channel = %channel.id, topic = %channel.topic, %filter, "channel open");
            }
            Err(e) => {
                *state.lock() = ChannelState::Closed;
                warn!(channel = %channel.id, topic = %channel.topic, error = %e, "subscribe failed");
                let _ = sender.try_send(ChannelEvent::Error(CoreError::ChannelSubscribeError(
                    e.to_string(),
                )));
            }
        }

        channel
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn target(&self) -> &UserId {
        &self.target
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Stream of channel signals.
    pub fn events(&self) -> &Receiver<ChannelEvent> {
        &self.events
    }

    /// Tear the subscription down. Returns once the feed has confirmed;
    /// closing a Closed channel is a no-op.
    pub fn close(&mut self) {
        {
            let mut state = self.state.lock();
            if !state.is_live() {
                return;
            }
            *state = ChannelState::Closing;
        }

        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = self.feed.unsubscribe(&subscription) {
                warn!(channel = %self.id, error = %e, "unsubscribe failed");
            }
        }

        *self.state.lock() = ChannelState::Closed;
        debug!(channel = %self.id, topic = %self.topic, "channel closed");
    }
}

impl Drop for ChangeFeedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChangeFeedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeedChannel")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("topic", &self.topic)
            .field("state", &self.state())
            .finish()
    }
}
