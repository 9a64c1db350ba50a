//! Collaborator contracts consumed by the core.
//!
//! The identity provider, relational store, blob store and change feed are
//! external services. The core depends only on the traits below; the
//! [`memory`] module provides in-process implementations used by tests and
//! local development.
//!
//! All calls are blocking. The router and the sync engine invoke them from
//! worker threads wherever a call must not hold up a state transition.

pub mod memory;
mod query;

pub use query::{Condition, Filter, Order, RowKey};

use crate::error::Result;
use crate::types::{Attachment, BlobRef, Row, Session};
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// Email/password pair for the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Identifier of a registered session listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback invoked with the new session after every auth event.
pub type SessionListener = Box<dyn Fn(Session) + Send + Sync>;

/// Remote identity provider.
pub trait IdentityProvider: Send + Sync {
    fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

    /// Register a new account. The returned session carries the new user id
    /// but need not be signed in.
    fn sign_up(&self, credentials: &Credentials) -> Result<Session>;

    fn sign_out(&self) -> Result<()>;

    fn get_session(&self) -> Result<Session>;

    fn on_session_change(&self, listener: SessionListener) -> ListenerId;

    fn remove_session_listener(&self, id: ListenerId);
}

/// Relational store with key lookups, filtered scans and inserts.
pub trait RowStore: Send + Sync {
    fn fetch_row(&self, table: &str, key: &RowKey) -> Result<Option<Row>>;

    fn fetch_rows(&self, table: &str, filter: &Filter, order: Option<&Order>) -> Result<Vec<Row>>;

    /// Insert a row, returning it as stored (with server-assigned columns).
    fn insert_row(&self, table: &str, row: Row) -> Result<Row>;
}

/// A one-shot upload target issued by the blob store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUpload {
    pub bucket: String,
    pub path: String,
    pub url: Url,
    pub token: String,
}

/// Object storage.
pub trait BlobStore: Send + Sync {
    fn create_signed_upload_url(&self, bucket: &str, path: &str) -> Result<SignedUpload>;

    fn upload(&self, target: &SignedUpload, content: &[u8], content_type: &str) -> Result<()>;

    fn resolve_public_url(&self, bucket: &str, path: &str) -> Result<Url>;

    /// Upload `attachment` to `bucket/path` through a fresh signed URL.
    fn put_signed(&self, bucket: &str, path: &str, attachment: &Attachment) -> Result<BlobRef> {
        let target = self.create_signed_upload_url(bucket, path)?;
        self.upload(&target, &attachment.content, &attachment.content_type)?;
        Ok(BlobRef::new(bucket, path))
    }
}

/// Public URL of `bucket/path`, or `None` when there is no path or the
/// store cannot resolve it. Failures are logged, not propagated.
pub(crate) fn public_url_or_none(blobs: &dyn BlobStore, bucket: &str, path: Option<&str>) -> Option<Url> {
    let path = path.filter(|p| !p.is_empty())?;
    match blobs.resolve_public_url(bucket, path) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(bucket, path, error = %e, "public url unavailable");
            None
        }
    }
}

/// Kind of row change delivered by the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change notification. The core treats it as "something changed".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedEvent {
    pub table: String,
    pub kind: ChangeKind,
}

/// Callback invoked for every matching feed event.
pub type FeedCallback = Box<dyn Fn(FeedEvent) + Send + Sync>;

/// Handle of an active feed subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedSubscription {
    pub id: u64,
    pub topic: String,
}

/// Server-pushed change feed.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to changes on `table` matching `filter`. Returns once the
    /// subscribe handshake has completed.
    fn subscribe(
        &self,
        topic: &str,
        table: &str,
        filter: &Filter,
        on_event: FeedCallback,
    ) -> Result<FeedSubscription>;

    /// Tear a subscription down. Returns once no further events will be
    /// delivered for it.
    fn unsubscribe(&self, subscription: &FeedSubscription) -> Result<()>;
}

/// The set of collaborators the core is wired to.
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RowStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub feed: Arc<dyn ChangeFeed>,
}
