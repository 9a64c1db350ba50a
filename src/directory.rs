//! Investor directory shown to owners.

use crate::backend::{public_url_or_none, BlobStore, Filter, Order, RowStore};
use crate::error::Result;
use crate::rows::UserRow;
use crate::types::{DirectoryEntry, Role};
use std::sync::Arc;
use tracing::warn;

pub struct Directory {
    store: Arc<dyn RowStore>,
    blobs: Arc<dyn BlobStore>,
    users_table: String,
    avatar_bucket: String,
}

impl Directory {
    pub fn new(
        store: Arc<dyn RowStore>,
        blobs: Arc<dyn BlobStore>,
        users_table: impl Into<String>,
        avatar_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blobs,
            users_table: users_table.into(),
            avatar_bucket: avatar_bucket.into(),
        }
    }

    /// All investors ordered by name.
    pub fn investors(&self) -> Result<Vec<DirectoryEntry>> {
        let rows = self.store.fetch_rows(
            &self.users_table,
            &Filter::eq("role", Role::Investor.as_tag()),
            Some(&Order::asc("full_name")),
        )?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let user = UserRow::from_row(row)
                    .map_err(|e| warn!(error = %e, "skipping malformed user row"))
                    .ok()?;
                user.into_profile(&self.avatar_bucket).ok()
            })
            .map(|profile| DirectoryEntry {
                avatar_url: public_url_or_none(
                    self.blobs.as_ref(),
                    &self.avatar_bucket,
                    profile.avatar_ref.as_ref().map(|r| r.path.as_str()),
                ),
                profile,
            })
            .collect())
    }
}
