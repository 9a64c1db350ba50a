//! Mapping of store rows into typed entities.
//!
//! Rows arrive as loosely typed JSON maps. Each table has a serde shape here;
//! nothing outside this module indexes into a [`Row`] by column name.

use crate::error::{CoreError, Result};
use crate::types::{BlobRef, Profile, Role, Row, UserId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Ids arrive as integers or strings depending on the column type.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Int(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

fn decode<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}

fn encode<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CoreError::Deserialization(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// `users` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct UserRow {
    pub id: UserId,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

impl UserRow {
    pub fn from_row(row: Row) -> Result<Self> {
        decode(row)
    }

    pub fn to_row(&self) -> Result<Row> {
        encode(self)
    }

    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::from_tag)
    }

    pub fn display_name(&self) -> String {
        self.full_name.clone().unwrap_or_default()
    }

    /// Build the typed profile. Fails only on an unrecognised role, which is
    /// returned as the raw tag.
    pub fn into_profile(self, avatar_bucket: &str) -> std::result::Result<Profile, String> {
        let role = match self.role() {
            Some(role) => role,
            None => return Err(self.role.unwrap_or_default()),
        };
        Ok(Profile {
            display_name: self.display_name(),
            user_id: self.id,
            role,
            city: self.city.unwrap_or_default(),
            sector: self.sector.unwrap_or_default(),
            avatar_ref: self
                .profile_picture
                .filter(|p| !p.is_empty())
                .map(|p| BlobRef::new(avatar_bucket, p)),
        })
    }
}

/// `contact_requests` table.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ContactRequestRow {
    id: RawId,
    pub sender_id: UserId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContactRequestRow {
    pub fn from_row(row: Row) -> Result<Self> {
        decode(row)
    }

    pub fn id(&self) -> String {
        self.id.clone().into_string()
    }
}

/// Insert shape for `contact_requests`.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct NewContactRequestRow<'a> {
    pub sender_id: &'a UserId,
    pub receiver_id: &'a UserId,
    pub message: &'a str,
    pub phone_number: Option<&'a str>,
}

impl NewContactRequestRow<'_> {
    pub fn to_row(&self) -> Result<Row> {
        encode(self)
    }
}

/// `projects` table.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ProjectRow {
    id: RawId,
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
}

impl ProjectRow {
    pub fn from_row(row: Row) -> Result<Self> {
        decode(row)
    }

    pub fn id(&self) -> String {
        self.id.clone().into_string()
    }
}

/// Insert shape for `projects`.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct NewProjectRow<'a> {
    pub owner_id: &'a UserId,
    pub title: &'a str,
    pub description: &'a str,
    pub picture: Option<&'a str>,
    pub document: Option<&'a str>,
}

impl NewProjectRow<'_> {
    pub fn to_row(&self) -> Result<Row> {
        encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_user_row_into_profile() {
        let user = UserRow::from_row(row(json!({
            "id": "u1",
            "role": "owner",
            "full_name": "Ada",
            "city": "Riyadh",
            "sector": "Energy",
            "profile_picture": "u1.jpg",
            "extra": 42
        })))
        .unwrap();

        let profile = user.into_profile("pfp").unwrap();
        assert_eq!(profile.role, Role::Owner);
        assert_eq!(profile.display_name, "Ada");
        assert_eq!(profile.avatar_ref, Some(BlobRef::new("pfp", "u1.jpg")));
    }

    #[test]
    fn test_user_row_unknown_role() {
        let user = UserRow::from_row(row(json!({"id": "u1", "role": "admin"}))).unwrap();
        assert_eq!(user.into_profile("pfp").unwrap_err(), "admin");

        let user = UserRow::from_row(row(json!({"id": "u1"}))).unwrap();
        assert_eq!(user.into_profile("pfp").unwrap_err(), "");
    }

    #[test]
    fn test_user_row_requires_id() {
        let result = UserRow::from_row(row(json!({"role": "owner"})));
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }

    #[test]
    fn test_contact_request_row_ids() {
        let numeric = ContactRequestRow::from_row(row(json!({
            "id": 7,
            "sender_id": "u2",
            "receiver_id": "u1",
            "message": "hello",
            "phone_number": null,
            "created_at": "2024-03-01T10:00:00Z"
        })))
        .unwrap();
        assert_eq!(numeric.id(), "7");
        assert!(numeric.phone_number.is_none());

        let text = ContactRequestRow::from_row(row(json!({
            "id": "c-1",
            "sender_id": "u2",
            "created_at": "2024-03-01T10:00:00+03:00"
        })))
        .unwrap();
        assert_eq!(text.id(), "c-1");
        assert_eq!(text.message, "");
    }

    #[test]
    fn test_contact_request_row_bad_timestamp() {
        let result = ContactRequestRow::from_row(row(json!({
            "id": 1,
            "sender_id": "u2",
            "created_at": "yesterday"
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rows_encode() {
        let sender = UserId::from("u2");
        let receiver = UserId::from("u1");
        let encoded = NewContactRequestRow {
            sender_id: &sender,
            receiver_id: &receiver,
            message: "hi",
            phone_number: None,
        }
        .to_row()
        .unwrap();
        assert_eq!(encoded["receiver_id"], "u1");
        assert!(encoded["phone_number"].is_null());
    }
}
