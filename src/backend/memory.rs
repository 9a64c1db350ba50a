//! In-process collaborators.
//!
//! Every collaborator trait has an in-memory implementation here. They back
//! the test suite and local development, so each carries knobs for
//! exercising failure paths: injected fetch and subscribe failures, fetches
//! that block until released, call counters and an operation journal for
//! the change feed.

use super::{
    BlobStore, ChangeFeed, ChangeKind, Credentials, FeedCallback, FeedEvent, FeedSubscription,
    Filter, IdentityProvider, ListenerId, Order, RowKey, RowStore, SessionListener, SignedUpload,
};
use crate::backend::Backend;
use crate::error::{CoreError, Result};
use crate::types::{Row, Session, UserId};
use chrono::{SecondsFormat, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// All four in-memory collaborators, wired together: inserts into the row
/// store are published on the change feed.
pub struct MemoryBackend {
    pub identity: Arc<MemoryIdentity>,
    pub store: Arc<MemoryRowStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub feed: Arc<MemoryChangeFeed>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let feed = Arc::new(MemoryChangeFeed::new());
        Self {
            identity: Arc::new(MemoryIdentity::new()),
            store: Arc::new(MemoryRowStore::with_feed(Arc::clone(&feed))),
            blobs: Arc::new(MemoryBlobStore::new()),
            feed,
        }
    }

    /// Type-erased handles for wiring into a [`Client`](crate::Client).
    pub fn backend(&self) -> Backend {
        Backend {
            identity: self.identity.clone(),
            store: self.store.clone(),
            blobs: self.blobs.clone(),
            feed: self.feed.clone(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// --- Identity ---

struct Account {
    user_id: UserId,
    password: String,
}

/// Identity provider holding accounts and the current session in memory.
pub struct MemoryIdentity {
    accounts: Mutex<HashMap<String, Account>>,
    session: RwLock<Session>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Fn(Session) + Send + Sync>)>>,
    next_id: AtomicU64,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: RwLock::new(Session::signed_out()),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed an account with a known user id.
    pub fn register(&self, email: &str, password: &str, user_id: impl Into<UserId>) {
        self.accounts.lock().insert(
            email.to_string(),
            Account {
                user_id: user_id.into(),
                password: password.to_string(),
            },
        );
    }

    /// Replace the session and notify listeners, as an auth event would.
    pub fn set_session(&self, session: Session) {
        *self.session.write() = session.clone();

        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(session.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MemoryIdentity {
    fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let user_id = {
            let accounts = self.accounts.lock();
            match accounts.get(&credentials.email) {
                Some(account) if account.password == credentials.password => {
                    account.user_id.clone()
                }
                _ => return Err(CoreError::Backend("invalid login credentials".into())),
            }
        };

        let session = Session::signed_in(user_id, format!("token-{}", self.next()));
        self.set_session(session.clone());
        Ok(session)
    }

    fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&credentials.email) {
            return Err(CoreError::Backend("user already registered".into()));
        }

        let user_id = UserId(format!("user-{}", self.next()));
        accounts.insert(
            credentials.email.clone(),
            Account {
                user_id: user_id.clone(),
                password: credentials.password.clone(),
            },
        );

        // Pending confirmation: the new account is not signed in.
        Ok(Session {
            user_id: Some(user_id),
            token: String::new(),
            is_valid: false,
        })
    }

    fn sign_out(&self) -> Result<()> {
        self.set_session(Session::signed_out());
        Ok(())
    }

    fn get_session(&self) -> Result<Session> {
        Ok(self.session.read().clone())
    }

    fn on_session_change(&self, listener: SessionListener) -> ListenerId {
        let id = ListenerId(self.next());
        self.listeners.write().push((id, Arc::from(listener)));
        id
    }

    fn remove_session_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }
}

// --- Rows ---

/// Relational store keeping each table as a vector of rows.
pub struct MemoryRowStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    feed: Option<Arc<MemoryChangeFeed>>,
    next_row_id: AtomicU64,
    /// Remaining injected failures per table (`usize::MAX` = always).
    failures: Mutex<HashMap<String, usize>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl MemoryRowStore {
    /// A store that publishes no change events.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A store that publishes inserts, updates and deletes on `feed`.
    pub fn with_feed(feed: Arc<MemoryChangeFeed>) -> Self {
        Self::build(Some(feed))
    }

    fn build(feed: Option<Arc<MemoryChangeFeed>>) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            feed,
            next_row_id: AtomicU64::new(1),
            failures: Mutex::new(HashMap::new()),
            fetch_counts: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Load rows without publishing change events.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make the next `times` fetches on `table` fail.
    pub fn fail_fetches(&self, table: &str, times: usize) {
        let mut failures = self.failures.lock();
        if times == 0 {
            failures.remove(table);
        } else {
            failures.insert(table.to_string(), times);
        }
    }

    /// Make every fetch on `table` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_fetches_always(&self, table: &str) {
        self.fail_fetches(table, usize::MAX);
    }

    pub fn clear_failures(&self, table: &str) {
        self.failures.lock().remove(table);
    }

    /// Number of fetches (row or rows) issued against `table`, counted when
    /// the fetch starts.
    pub fn fetch_count(&self, table: &str) -> usize {
        self.fetch_counts.lock().get(table).copied().unwrap_or(0)
    }

    /// Block fetches on `table` until the returned hold is released or dropped.
    pub fn hold_fetches(self: &Arc<Self>, table: &str) -> FetchHold {
        self.held.lock().insert(table.to_string());
        FetchHold {
            store: Arc::clone(self),
            table: table.to_string(),
        }
    }

    /// All rows currently in `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Merge `patch` into every matching row. Returns the number updated.
    pub fn update_where(&self, table: &str, filter: &Filter, patch: &Row) -> usize {
        let updated: Vec<Row> = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table.to_string()).or_default();
            rows.iter_mut()
                .filter(|row| filter.matches(row))
                .map(|row| {
                    for (k, v) in patch {
                        row.insert(k.clone(), v.clone());
                    }
                    row.clone()
                })
                .collect()
        };
        for row in &updated {
            self.publish(table, row, ChangeKind::Update);
        }
        updated.len()
    }

    /// Remove every matching row. Returns the number removed.
    pub fn delete_where(&self, table: &str, filter: &Filter) -> usize {
        let removed: Vec<Row> = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table.to_string()).or_default();
            let (gone, kept): (Vec<Row>, Vec<Row>) =
                rows.drain(..).partition(|row| filter.matches(row));
            *rows = kept;
            gone
        };
        for row in &removed {
            self.publish(table, row, ChangeKind::Delete);
        }
        removed.len()
    }

    fn publish(&self, table: &str, row: &Row, kind: ChangeKind) {
        if let Some(feed) = &self.feed {
            feed.publish(table, row, kind);
        }
    }

    fn begin_fetch(&self, table: &str) -> Result<()> {
        *self.fetch_counts.lock().entry(table.to_string()).or_default() += 1;

        {
            let mut held = self.held.lock();
            while held.contains(table) {
                self.released.wait(&mut held);
            }
        }

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(table) {
            if *remaining != usize::MAX {
                *remaining -= 1;
            }
            if *remaining == 0 {
                failures.remove(table);
            }
            return Err(CoreError::Backend(format!("simulated fetch failure on {table}")));
        }
        Ok(())
    }
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RowStore for MemoryRowStore {
    fn fetch_row(&self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        self.begin_fetch(table)?;
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.iter().find(|row| key.matches(row)).cloned()))
    }

    fn fetch_rows(&self, table: &str, filter: &Filter, order: Option<&Order>) -> Result<Vec<Row>> {
        self.begin_fetch(table)?;
        let mut rows: Vec<Row> = self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = order {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        Ok(rows)
    }

    fn insert_row(&self, table: &str, mut row: Row) -> Result<Row> {
        if !row.contains_key("id") {
            let id = self.next_row_id.fetch_add(1, Ordering::SeqCst);
            row.insert("id".into(), Value::from(id));
        }
        if !row.contains_key("created_at") {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            row.insert("created_at".into(), Value::from(now));
        }

        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.publish(table, &row, ChangeKind::Insert);
        Ok(row)
    }
}

/// Keeps fetches on one table blocked while alive.
pub struct FetchHold {
    store: Arc<MemoryRowStore>,
    table: String,
}

impl FetchHold {
    pub fn release(self) {}
}

impl Drop for FetchHold {
    fn drop(&mut self) {
        self.store.held.lock().remove(&self.table);
        self.store.released.notify_all();
    }
}

// --- Blobs ---

struct StoredObject {
    content: Vec<u8>,
    content_type: String,
}

/// Blob store with signed one-shot upload tokens.
pub struct MemoryBlobStore {
    base_url: String,
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    /// Outstanding upload tokens.
    pending: Mutex<HashMap<String, (String, String)>>,
    nonce: AtomicU64,
    fail_public_urls: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_base_url("http://blobs.localhost/storage/v1")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            nonce: AtomicU64::new(1),
            fail_public_urls: AtomicBool::new(false),
        }
    }

    /// Make public URL resolution fail until switched back.
    pub fn set_fail_public_urls(&self, fail: bool) {
        self.fail_public_urls.store(fail, Ordering::SeqCst);
    }

    /// Content and content type of a stored object.
    pub fn object(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .read()
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| (o.content.clone(), o.content_type.clone()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    fn url_for(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| CoreError::Backend(format!("base url cannot hold paths: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn create_signed_upload_url(&self, bucket: &str, path: &str) -> Result<SignedUpload> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(bucket.as_bytes());
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
        hasher.update(nonce.to_le_bytes());
        let token = hex::encode(hasher.finalize());

        let mut url = self.url_for(&["object", "upload", "sign", bucket, path])?;
        url.query_pairs_mut().append_pair("token", &token);

        self.pending
            .lock()
            .insert(token.clone(), (bucket.to_string(), path.to_string()));

        Ok(SignedUpload {
            bucket: bucket.to_string(),
            path: path.to_string(),
            url,
            token,
        })
    }

    fn upload(&self, target: &SignedUpload, content: &[u8], content_type: &str) -> Result<()> {
        let issued = self.pending.lock().remove(&target.token);
        match issued {
            Some((bucket, path)) if bucket == target.bucket && path == target.path => {
                self.objects.write().insert(
                    (bucket, path),
                    StoredObject {
                        content: content.to_vec(),
                        content_type: content_type.to_string(),
                    },
                );
                Ok(())
            }
            _ => Err(CoreError::Backend("invalid or expired upload token".into())),
        }
    }

    fn resolve_public_url(&self, bucket: &str, path: &str) -> Result<Url> {
        if self.fail_public_urls.load(Ordering::SeqCst) {
            return Err(CoreError::Backend(format!(
                "simulated url failure for {bucket}/{path}"
            )));
        }
        self.url_for(&["object", "public", bucket, path])
    }
}

// --- Change feed ---

/// Entry in the change feed's operation journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedOp {
    Subscribed { topic: String, filter: String },
    Unsubscribed { topic: String },
}

struct FeedEntry {
    topic: String,
    table: String,
    filter: Filter,
    callback: FeedCallback,
}

/// Change feed delivering row events to matching subscriptions.
pub struct MemoryChangeFeed {
    subscriptions: RwLock<HashMap<u64, FeedEntry>>,
    next_id: AtomicU64,
    journal: Mutex<Vec<FeedOp>>,
    fail_subscribes: Mutex<usize>,
}

impl MemoryChangeFeed {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            journal: Mutex::new(Vec::new()),
            fail_subscribes: Mutex::new(0),
        }
    }

    /// Reject the next `times` subscribe handshakes.
    pub fn fail_next_subscribes(&self, times: usize) {
        *self.fail_subscribes.lock() = times;
    }

    /// Deliver a change on `table` to every subscription whose filter
    /// matches `row`.
    ///
    /// Callbacks run under the subscription read lock, so an `unsubscribe`
    /// that has returned will not see any further deliveries.
    pub fn publish(&self, table: &str, row: &Row, kind: ChangeKind) {
        let subs = self.subscriptions.read();
        for entry in subs.values() {
            if entry.table == table && entry.filter.matches(row) {
                (entry.callback)(FeedEvent {
                    table: table.to_string(),
                    kind,
                });
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .read()
            .values()
            .map(|e| e.topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Subscribe/unsubscribe operations in the order they completed.
    pub fn journal(&self) -> Vec<FeedOp> {
        self.journal.lock().clone()
    }
}

impl Default for MemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for MemoryChangeFeed {
    fn subscribe(
        &self,
        topic: &str,
        table: &str,
        filter: &Filter,
        on_event: FeedCallback,
    ) -> Result<FeedSubscription> {
        {
            let mut failures = self.fail_subscribes.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CoreError::Backend("subscribe handshake rejected".into()));
            }
        }

        let mut subs = self.subscriptions.write();
        if subs.values().any(|e| e.topic == topic) {
            return Err(CoreError::Backend(format!("topic already subscribed: {topic}")));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        subs.insert(
            id,
            FeedEntry {
                topic: topic.to_string(),
                table: table.to_string(),
                filter: filter.clone(),
                callback: on_event,
            },
        );
        self.journal.lock().push(FeedOp::Subscribed {
            topic: topic.to_string(),
            filter: filter.to_string(),
        });

        Ok(FeedSubscription {
            id,
            topic: topic.to_string(),
        })
    }

    fn unsubscribe(&self, subscription: &FeedSubscription) -> Result<()> {
        let removed = self.subscriptions.write().remove(&subscription.id);
        if removed.is_some() {
            self.journal.lock().push(FeedOp::Unsubscribed {
                topic: subscription.topic.clone(),
            });
        }
        Ok(())
    }
}
