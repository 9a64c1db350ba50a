//! Notification sync engine.

use super::fetch::NotificationSource;
use super::view::NotificationView;
use crate::backend::{BlobStore, ChangeFeed, RowStore};
use crate::config::{CoreConfig, SyncConfig};
use crate::error::{CoreError, Result};
use crate::feed::{ChangeFeedChannel, ChannelEvent, ChannelId, ChannelState};
use crate::observe::{Broadcaster, Observer, ObserverId};
use crate::types::{NotificationRecord, UserId};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Published by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// The notification list was replaced wholesale.
    Updated(Vec<NotificationRecord>),
    /// A fetch or the channel failed. The last published list stays valid.
    Error(CoreError),
}

/// The sync session for the current user.
struct ActiveSync {
    user_id: UserId,
    generation: u64,
    channel: ChangeFeedChannel,
    /// Dropping this stops the refetch worker.
    shutdown: Sender<()>,
    /// Identifies the views mounted on this sync. Kept when a dead sync is
    /// restarted for the same user, renewed on stop or user switch.
    mount_id: u64,
    /// Mounted notification views.
    views: usize,
}

pub(crate) struct EngineInner {
    store: Arc<dyn RowStore>,
    blobs: Arc<dyn BlobStore>,
    feed: Arc<dyn ChangeFeed>,
    source: NotificationSource,
    sync: SyncConfig,
    /// Serializes start/stop and owns the single channel.
    active: Mutex<Option<ActiveSync>>,
    records: RwLock<Vec<NotificationRecord>>,
    events: Broadcaster<SyncEvent>,
    /// Bumped whenever the active sync session ends; results stamped with an
    /// older generation are discarded.
    generation: AtomicU64,
}

impl EngineInner {
    fn start(self: &Arc<Self>, user_id: &UserId) -> Result<u64> {
        let mut active = self.active.lock();
        self.start_locked(&mut active, user_id)
    }

    /// Start or keep the sync for `user_id` while the lifecycle lock is held.
    /// Returns the mount id of the resulting sync.
    fn start_locked(self: &Arc<Self>, active: &mut Option<ActiveSync>, user_id: &UserId) -> Result<u64> {
        if let Some(current) = active.as_ref() {
            if &current.user_id == user_id && current.channel.state().is_live() {
                debug!(user = %user_id, "sync already running");
                return Ok(current.mount_id);
            }
        }

        // Views of a dead sync for the same user stay mounted on its successor.
        let mut carried = None;
        if let Some(previous) = active.take() {
            let switching = &previous.user_id != user_id;
            if !switching {
                carried = Some((previous.mount_id, previous.views));
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.teardown(previous);
            if switching {
                self.clear();
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mount_id, views) = carried.unwrap_or((generation, 0));
        info!(user = %user_id, generation, "starting notification sync");

        match self.load(user_id) {
            Ok(records) => self.publish_records(generation, records),
            Err(e) => {
                warn!(user = %user_id, error = %e, "initial fetch failed");
                self.publish_records(generation, Vec::new());
                self.publish_error(generation, e);
            }
        }

        let channel = ChangeFeedChannel::open(
            Arc::clone(&self.feed),
            user_id.clone(),
            &self.source.requests_table,
            self.source.filter_for(user_id),
            self.sync.event_buffer,
        );

        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let worker = Worker {
            engine: Arc::clone(self),
            user_id: user_id.clone(),
            generation,
            events: channel.events().clone(),
            shutdown: shutdown_rx,
        };
        thread::Builder::new()
            .name(format!("notify-sync-{}", channel.id()))
            .spawn(move || worker.run())
            .map_err(|e| CoreError::ChannelOpenFailed(e.to_string()))?;

        *active = Some(ActiveSync {
            user_id: user_id.clone(),
            generation,
            channel,
            shutdown,
            mount_id,
            views,
        });
        Ok(mount_id)
    }

    fn stop(&self) {
        let mut active = self.active.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            self.teardown(previous);
        }
        self.clear();
    }

    fn stop_unless(&self, user_id: Option<&UserId>) -> bool {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if Some(&current.user_id) != user_id => {}
            _ => return false,
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            self.teardown(previous);
        }
        self.clear();
        true
    }

    /// Close the channel (waiting for the feed) and stop the worker.
    fn teardown(&self, previous: ActiveSync) {
        let ActiveSync {
            user_id,
            mut channel,
            shutdown,
            ..
        } = previous;
        drop(shutdown);
        channel.close();
        info!(user = %user_id, channel = %channel.id(), "notification sync stopped");
    }

    fn clear(&self) {
        let mut records = self.records.write();
        if !records.is_empty() {
            records.clear();
            self.events.publish(SyncEvent::Updated(Vec::new()));
        }
    }

    /// Start the sync for a view and count the view, in one critical section.
    pub(crate) fn mount(self: &Arc<Self>, user_id: &UserId) -> Result<u64> {
        let mut active = self.active.lock();
        let mount_id = self.start_locked(&mut active, user_id)?;
        if let Some(current) = active.as_mut() {
            current.views += 1;
        }
        Ok(mount_id)
    }

    pub(crate) fn unmount(&self, mount_id: u64) {
        let mut active = self.active.lock();
        let last_view = match active.as_mut() {
            Some(current) if current.mount_id == mount_id => {
                current.views = current.views.saturating_sub(1);
                current.views == 0
            }
            _ => false,
        };
        if last_view {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(previous) = active.take() {
                self.teardown(previous);
            }
            self.clear();
        }
    }

    fn load(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>> {
        self.source
            .load(self.store.as_ref(), self.blobs.as_ref(), user_id)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish_records(&self, generation: u64, list: Vec<NotificationRecord>) {
        let mut records = self.records.write();
        if !self.is_current(generation) {
            debug!(generation, "discarding stale notification list");
            return;
        }
        *records = list.clone();
        self.events.publish(SyncEvent::Updated(list));
    }

    fn publish_error(&self, generation: u64, error: CoreError) {
        let _records = self.records.read();
        if self.is_current(generation) {
            self.events.publish(SyncEvent::Error(error));
        }
    }

    pub(crate) fn records(&self) -> Vec<NotificationRecord> {
        self.records.read().clone()
    }

    pub(crate) fn subscribe(&self) -> Observer<SyncEvent> {
        let records = self.records.read();
        self.events.subscribe_with(SyncEvent::Updated(records.clone()))
    }
}

/// Turns channel signals into coalesced refetches for one sync session.
struct Worker {
    engine: Arc<EngineInner>,
    user_id: UserId,
    generation: u64,
    events: Receiver<ChannelEvent>,
    shutdown: Receiver<()>,
}

impl Worker {
    fn run(self) {
        loop {
            select! {
                recv(self.shutdown) -> _ => break,
                recv(self.events) -> msg => match msg {
                    Ok(ChannelEvent::Changed) => {
                        if !self.collect_burst() {
                            break;
                        }
                        self.refetch();
                    }
                    Ok(ChannelEvent::Error(e)) => {
                        self.engine.publish_error(self.generation, e);
                    }
                    Err(_) => break,
                },
            }
        }
        debug!(user = %self.user_id, generation = self.generation, "sync worker exited");
    }

    /// Absorb further signals for the coalescing window. Returns false if
    /// the worker should exit instead of refetching.
    fn collect_burst(&self) -> bool {
        let deadline = Instant::now() + self.engine.sync.coalesce_window();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            select! {
                recv(self.shutdown) -> _ => return false,
                recv(self.events) -> msg => match msg {
                    Ok(ChannelEvent::Changed) => {}
                    Ok(ChannelEvent::Error(e)) => {
                        self.engine.publish_error(self.generation, e);
                    }
                    Err(_) => return false,
                },
                default(remaining) => break,
            }
        }

        // Anything that raced the deadline joins this refetch.
        for msg in self.events.try_iter() {
            if let ChannelEvent::Error(e) = msg {
                self.engine.publish_error(self.generation, e);
            }
        }
        true
    }

    fn refetch(&self) {
        if !self.engine.is_current(self.generation) {
            return;
        }
        match self.engine.load(&self.user_id) {
            Ok(records) => {
                debug!(user = %self.user_id, count = records.len(), "refetched notifications");
                self.engine.publish_records(self.generation, records);
            }
            Err(e) => {
                warn!(user = %self.user_id, error = %e, "refetch failed, keeping last list");
                self.engine.publish_error(self.generation, e);
            }
        }
    }
}

/// Keeps one live change-feed channel per signed-in user and a local
/// notification list in step with the remote table.
///
/// Feed signals trigger full refetches. Signals arriving within the
/// coalescing window, or while a refetch is running, collapse into a single
/// refetch. Results from a sync session that has since been stopped or
/// replaced are discarded.
pub struct NotificationSyncEngine {
    inner: Arc<EngineInner>,
}

impl NotificationSyncEngine {
    pub fn new(
        store: Arc<dyn RowStore>,
        blobs: Arc<dyn BlobStore>,
        feed: Arc<dyn ChangeFeed>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                blobs,
                feed,
                source: NotificationSource {
                    requests_table: config.tables.contact_requests.clone(),
                    users_table: config.tables.users.clone(),
                    avatar_bucket: config.buckets.avatars.clone(),
                },
                sync: config.sync.clone(),
                active: Mutex::new(None),
                records: RwLock::new(Vec::new()),
                events: Broadcaster::new(config.observer_buffer),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Begin syncing for `user_id`.
    ///
    /// A no-op while a live channel for the same user exists. A channel for
    /// another user is closed, and the close confirmed, before anything is
    /// opened for `user_id`. Fetch and channel failures are reported as
    /// [`SyncEvent::Error`]; the only error returned here is failing to start
    /// the worker thread.
    pub fn start(&self, user_id: &UserId) -> Result<()> {
        self.inner.start(user_id).map(|_| ())
    }

    /// Close the channel, if any, and clear the list.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stop the running sync unless it serves `user_id`. Returns whether a
    /// sync was stopped.
    pub fn stop_unless(&self, user_id: Option<&UserId>) -> bool {
        self.inner.stop_unless(user_id)
    }

    /// Start syncing for a notification view; the sync stops when the last
    /// view for it is dropped.
    pub fn mount_view(&self, user_id: &UserId) -> Result<NotificationView> {
        let mount_id = self.inner.mount(user_id)?;
        Ok(NotificationView::new(
            Arc::clone(&self.inner),
            user_id.clone(),
            mount_id,
        ))
    }

    /// The last published list, newest first.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.inner.records()
    }

    /// Observe list replacements and errors. The current list is queued first.
    pub fn subscribe(&self) -> Observer<SyncEvent> {
        self.inner.subscribe()
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.inner.events.unsubscribe(id);
    }

    /// User of the current sync session.
    pub fn current_user(&self) -> Option<UserId> {
        self.inner.active.lock().as_ref().map(|a| a.user_id.clone())
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.inner.active.lock().as_ref().map(|a| a.channel.id())
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| a.channel.state())
            .unwrap_or(ChannelState::Closed)
    }
}

impl Drop for NotificationSyncEngine {
    fn drop(&mut self) {
        self.inner.stop();
    }
}
