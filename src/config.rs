//! Core configuration.

use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Names of the tables the core reads and writes.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub users: String,
    pub contact_requests: String,
    pub projects: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            users: "users".to_string(),
            contact_requests: "contact_requests".to_string(),
            projects: "projects".to_string(),
        }
    }
}

/// Blob store buckets.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BucketNames {
    pub avatars: String,
    pub pictures: String,
    pub documents: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            avatars: "pfp".to_string(),
            pictures: "picture".to_string(),
            documents: "document".to_string(),
        }
    }
}

/// Tuning for the notification sync engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long to keep collecting feed events after the first one before
    /// running a refetch.
    pub coalesce_window_ms: u64,

    /// Max buffered feed events per channel.
    pub event_buffer: usize,
}

impl SyncConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 50,
            event_buffer: 256,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub tables: TableNames,
    pub buckets: BucketNames,
    pub sync: SyncConfig,

    /// Max buffered values per observer before it is dropped.
    /// Default: 64
    pub observer_buffer: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tables: TableNames::default(),
            buckets: BucketNames::default(),
            sync: SyncConfig::default(),
            observer_buffer: 64,
        }
    }
}

impl CoreConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig =
            serde_json::from_str(json).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validated()
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    fn validated(self) -> Result<Self> {
        if self.observer_buffer == 0 {
            return Err(CoreError::Config("observer_buffer must be > 0".into()));
        }
        if self.sync.event_buffer == 0 {
            return Err(CoreError::Config("sync.event_buffer must be > 0".into()));
        }
        for (name, value) in [
            ("tables.users", &self.tables.users),
            ("tables.contact_requests", &self.tables.contact_requests),
            ("tables.projects", &self.tables.projects),
            ("buckets.avatars", &self.buckets.avatars),
            ("buckets.pictures", &self.buckets.pictures),
            ("buckets.documents", &self.buckets.documents),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Config(format!("{name} must not be empty")));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.tables.users, "users");
        assert_eq!(config.buckets.avatars, "pfp");
        assert_eq!(config.sync.coalesce_window(), Duration::from_millis(50));
        assert_eq!(config.observer_buffer, 64);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            CoreConfig::from_json_str(r#"{"sync": {"coalesce_window_ms": 5}}"#).unwrap();
        assert_eq!(config.sync.coalesce_window_ms, 5);
        assert_eq!(config.sync.event_buffer, 256);
        assert_eq!(config.tables.contact_requests, "contact_requests");
        assert_eq!(config.observer_buffer, 64);
    }

    #[test]
    fn test_rejects_empty_names() {
        let result = CoreConfig::from_json_str(r#"{"buckets": {"avatars": " "}}"#);
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_buffers() {
        let result = CoreConfig::from_json_str(r#"{"observer_buffer": 0}"#);
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tables": {{"users": "profiles"}}}}"#).unwrap();

        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.tables.users, "profiles");
        assert_eq!(config.tables.projects, "projects");
    }

    #[test]
    fn test_load_missing_file() {
        let result = CoreConfig::load("/nonexistent/investlink.json");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
