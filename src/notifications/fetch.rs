//! Loading the notification list for one receiver.

use crate::backend::{public_url_or_none, BlobStore, Filter, Order, RowStore};
use crate::error::{CoreError, Result};
use crate::rows::{ContactRequestRow, UserRow};
use crate::types::{NotificationRecord, UserId};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;
use url::Url;

/// Where the notification rows and their sender details live.
#[derive(Clone, Debug)]
pub(crate) struct NotificationSource {
    pub requests_table: String,
    pub users_table: String,
    pub avatar_bucket: String,
}

impl NotificationSource {
    /// Filter selecting the rows addressed to `receiver`.
    pub fn filter_for(&self, receiver: &UserId) -> Filter {
        Filter::eq("receiver_id", receiver.as_str())
    }

    /// Fetch every request addressed to `receiver`, newest first, joined
    /// with sender display fields and resolved avatar URLs.
    ///
    /// Rows that cannot be mapped are skipped. A sender whose avatar URL
    /// cannot be resolved is shown without one.
    pub fn load(
        &self,
        store: &dyn RowStore,
        blobs: &dyn BlobStore,
        receiver: &UserId,
    ) -> Result<Vec<NotificationRecord>> {
        let rows = store
            .fetch_rows(
                &self.requests_table,
                &self.filter_for(receiver),
                Some(&Order::desc("created_at")),
            )
            .map_err(|e| CoreError::FetchFailed(e.to_string()))?;

        let requests: Vec<ContactRequestRow> = rows
            .into_iter()
            .filter_map(|row| match ContactRequestRow::from_row(row) {
                Ok(request) => Some(request),
                Err(e) => {
                    warn!(receiver = %receiver, error = %e, "skipping malformed request row");
                    None
                }
            })
            .collect();

        let senders = self.load_senders(store, &requests)?;
        let mut avatars: HashMap<UserId, Option<Url>> = HashMap::new();

        let mut records: Vec<NotificationRecord> = requests
            .into_iter()
            .map(|request| {
                let sender = senders.get(&request.sender_id);
                let avatar = avatars
                    .entry(request.sender_id.clone())
                    .or_insert_with(|| {
                        let path = sender.and_then(|s| s.profile_picture.as_deref());
                        public_url_or_none(blobs, &self.avatar_bucket, path)
                    })
                    .clone();

                NotificationRecord {
                    id: request.id(),
                    sender_display_name: sender.map(UserRow::display_name).unwrap_or_default(),
                    sender_city: sender.and_then(|s| s.city.clone()),
                    sender_sector: sender.and_then(|s| s.sector.clone()),
                    sender_avatar_url: avatar,
                    sender_id: request.sender_id,
                    message: request.message,
                    phone_number: request.phone_number.filter(|p| !p.is_empty()),
                    created_at: request.created_at,
                }
            })
            .collect();

        // The store orders by the raw column; enforce the typed order.
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    fn load_senders(
        &self,
        store: &dyn RowStore,
        requests: &[ContactRequestRow],
    ) -> Result<HashMap<UserId, UserRow>> {
        let ids: BTreeSet<&UserId> = requests.iter().map(|r| &r.sender_id).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let filter = Filter::is_in(
            "id",
            ids.iter().map(|id| Value::from(id.as_str())).collect(),
        );
        let rows = store
            .fetch_rows(&self.users_table, &filter, None)
            .map_err(|e| CoreError::FetchFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| UserRow::from_row(row).ok())
            .map(|user| (user.id.clone(), user))
            .collect())
    }
}
