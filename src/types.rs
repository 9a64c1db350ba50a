//! Core types shared by the router, the sync engine and the services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A loosely typed row as returned by the relational store.
///
/// Rows never travel past the module that fetched them; they are mapped
/// into the typed entities below (see [`crate::rows`]).
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque user identifier issued by the identity provider.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

/// Snapshot of the identity provider's session.
///
/// Replaced wholesale on every auth event.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Session {
    pub user_id: Option<UserId>,
    pub token: String,
    pub is_valid: bool,
}

impl Session {
    /// A signed-in session for `user_id`.
    pub fn signed_in(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            token: token.into(),
            is_valid: true,
        }
    }

    /// The signed-out session.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// The user this session authenticates, if it authenticates anyone.
    pub fn authenticated_user(&self) -> Option<&UserId> {
        if self.is_valid {
            self.user_id.as_ref().filter(|id| !id.0.is_empty())
        } else {
            None
        }
    }
}

/// The two user personas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Investor,
}

impl Role {
    /// Parse the wire tag. Anything other than `owner`/`investor` is rejected.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "owner" => Some(Role::Owner),
            "investor" => Some(Role::Investor),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Investor => "investor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Reference to an object in the blob store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub bucket: String,
    pub path: String,
}

impl BlobRef {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

/// A file picked by the user, about to be uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File extension without the leading dot, e.g. `jpg`.
    pub extension: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        extension: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            extension: extension.into().trim_start_matches('.').to_string(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    /// `<stem>.<extension>`, or just the stem when there is no extension.
    pub fn file_name(&self, stem: &str) -> String {
        if self.extension.is_empty() {
            stem.to_string()
        } else {
            format!("{}.{}", stem, self.extension)
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("extension", &self.extension)
            .field("content_type", &self.content_type)
            .field("len", &self.content.len())
            .finish()
    }
}

/// Point-in-time snapshot of a user's profile row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub role: Role,
    pub display_name: String,
    pub city: String,
    pub sector: String,
    pub avatar_ref: Option<BlobRef>,
}

/// One incoming contact request, ready for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: String,
    pub sender_id: UserId,
    pub sender_display_name: String,
    pub sender_city: Option<String>,
    pub sender_sector: Option<String>,
    /// Resolved public URL of the sender's avatar.
    pub sender_avatar_url: Option<Url>,
    pub message: String,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Owner display fields attached to a project listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectOwner {
    pub user_id: UserId,
    pub display_name: String,
    pub city: Option<String>,
    pub sector: Option<String>,
    pub role: Option<Role>,
    pub avatar_url: Option<Url>,
}

/// A project as shown to investors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectListing {
    pub id: String,
    pub title: String,
    pub description: String,
    pub picture_url: Option<Url>,
    pub document_url: Option<Url>,
    pub owner: Option<ProjectOwner>,
}

/// A profile together with its resolved avatar URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub profile: Profile,
    pub avatar_url: Option<Url>,
}
