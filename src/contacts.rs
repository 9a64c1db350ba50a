//! Contact requests from one user to another.
//!
//! Each inserted row shows up in the receiver's notification list through
//! the change feed.

use crate::accounts::require;
use crate::backend::RowStore;
use crate::error::{CoreError, Result};
use crate::rows::NewContactRequestRow;
use crate::types::{Row, UserId};
use std::sync::Arc;
use tracing::info;

/// Longest accepted phone number.
pub const MAX_PHONE_LEN: usize = 15;

pub struct ContactRequests {
    store: Arc<dyn RowStore>,
    table: String,
}

impl ContactRequests {
    pub fn new(store: Arc<dyn RowStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Insert a request from `sender` to `receiver`, returning the stored row.
    pub fn send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        message: &str,
        phone_number: Option<&str>,
    ) -> Result<Row> {
        require("sender", sender.as_str())?;
        require("receiver", receiver.as_str())?;
        require("message", message)?;

        let phone_number = phone_number.map(str::trim).filter(|p| !p.is_empty());
        if let Some(phone) = phone_number {
            if phone.chars().count() > MAX_PHONE_LEN {
                return Err(CoreError::InvalidInput(format!(
                    "phone number longer than {MAX_PHONE_LEN} characters"
                )));
            }
        }

        let row = NewContactRequestRow {
            sender_id: sender,
            receiver_id: receiver,
            message: message.trim(),
            phone_number,
        }
        .to_row()?;
        let stored = self.store.insert_row(&self.table, row)?;
        info!(sender = %sender, receiver = %receiver, "contact request sent");
        Ok(stored)
    }
}
