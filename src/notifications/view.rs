//! Mount guard for the notification view.

use super::engine::{EngineInner, SyncEvent};
use crate::observe::Observer;
use crate::types::{NotificationRecord, UserId};
use std::sync::Arc;

/// Held while the notification view is mounted. Dropping the last view of a
/// sync session stops it.
pub struct NotificationView {
    engine: Arc<EngineInner>,
    user_id: UserId,
    mount_id: u64,
}

impl NotificationView {
    pub(crate) fn new(engine: Arc<EngineInner>, user_id: UserId, mount_id: u64) -> Self {
        Self {
            engine,
            user_id,
            mount_id,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.engine.records()
    }

    pub fn subscribe(&self) -> Observer<SyncEvent> {
        self.engine.subscribe()
    }
}

impl std::fmt::Debug for NotificationView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationView")
            .field("user_id", &self.user_id)
            .field("mount_id", &self.mount_id)
            .finish_non_exhaustive()
    }
}

impl Drop for NotificationView {
    fn drop(&mut self) {
        self.engine.unmount(self.mount_id);
    }
}
