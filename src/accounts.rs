//! Account registration and sign-in.

use crate::backend::{BlobStore, Credentials, IdentityProvider, RowStore};
use crate::error::{CoreError, Result};
use crate::rows::UserRow;
use crate::types::{Attachment, Profile, Role, Session};
use std::sync::Arc;
use tracing::info;

/// Everything the sign-up form collects.
#[derive(Clone, Debug)]
pub struct SignUpRequest {
    pub full_name: String,
    pub city: String,
    pub sector: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub avatar: Option<Attachment>,
}

/// Sign-up, sign-in and sign-out against the identity provider.
///
/// Routing is not updated here; the session router follows the identity
/// provider's session-change events.
pub struct Accounts {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RowStore>,
    blobs: Arc<dyn BlobStore>,
    users_table: String,
    avatar_bucket: String,
}

impl Accounts {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RowStore>,
        blobs: Arc<dyn BlobStore>,
        users_table: impl Into<String>,
        avatar_bucket: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            store,
            blobs,
            users_table: users_table.into(),
            avatar_bucket: avatar_bucket.into(),
        }
    }

    /// Create the account, upload the avatar if one was picked, then insert
    /// the profile row.
    pub fn sign_up(&self, request: SignUpRequest) -> Result<Profile> {
        for (field, value) in [
            ("full name", &request.full_name),
            ("city", &request.city),
            ("sector", &request.sector),
            ("email", &request.email),
            ("password", &request.password),
        ] {
            require(field, value)?;
        }

        let session = self
            .identity
            .sign_up(&Credentials::new(request.email.trim(), request.password.as_str()))?;
        let user_id = session
            .user_id
            .filter(|id| !id.as_str().is_empty())
            .ok_or_else(|| CoreError::Backend("no user id returned".into()))?;

        let profile_picture = match &request.avatar {
            Some(avatar) => {
                let path = avatar.file_name(user_id.as_str());
                self.blobs.put_signed(&self.avatar_bucket, &path, avatar)?;
                Some(path)
            }
            None => None,
        };

        let row = UserRow {
            id: user_id.clone(),
            role: Some(request.role.as_tag().to_string()),
            full_name: Some(request.full_name.trim().to_string()),
            city: Some(request.city.trim().to_string()),
            sector: Some(request.sector.trim().to_string()),
            profile_picture,
        };
        self.store.insert_row(&self.users_table, row.to_row()?)?;
        info!(user = %user_id, role = %request.role, "account created");

        row.into_profile(&self.avatar_bucket)
            .map_err(|tag| CoreError::Backend(format!("stored unknown role {tag:?}")))
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        require("email", email)?;
        require("password", password)?;
        let session = self
            .identity
            .sign_in(&Credentials::new(email.trim(), password))?;
        if let Some(user) = session.authenticated_user() {
            info!(user = %user, "signed in");
        }
        Ok(session)
    }

    pub fn sign_out(&self) -> Result<()> {
        self.identity.sign_out()?;
        info!("signed out");
        Ok(())
    }
}

pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(CoreError::InvalidInput(format!("{field} is required")))
    } else {
        Ok(())
    }
}
