//! Projects published by owners and browsed by investors.

use crate::accounts::require;
use crate::backend::{public_url_or_none, BlobStore, Filter, Order, RowStore};
use crate::config::{BucketNames, CoreConfig, TableNames};
use crate::error::Result;
use crate::rows::{NewProjectRow, ProjectRow, UserRow};
use crate::types::{Attachment, ProjectListing, ProjectOwner, Row, UserId};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input of the add-project form.
#[derive(Clone, Debug)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub picture: Option<Attachment>,
    pub document: Option<Attachment>,
}

impl NewProject {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            picture: None,
            document: None,
        }
    }

    pub fn with_picture(mut self, picture: Attachment) -> Self {
        self.picture = Some(picture);
        self
    }

    pub fn with_document(mut self, document: Attachment) -> Self {
        self.document = Some(document);
        self
    }
}

pub struct Projects {
    store: Arc<dyn RowStore>,
    blobs: Arc<dyn BlobStore>,
    tables: TableNames,
    buckets: BucketNames,
}

impl Projects {
    pub fn new(store: Arc<dyn RowStore>, blobs: Arc<dyn BlobStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            blobs,
            tables: config.tables.clone(),
            buckets: config.buckets.clone(),
        }
    }

    /// Upload the attachments, then insert the project row.
    ///
    /// An upload failure aborts before anything is inserted; objects already
    /// uploaded are left in place.
    pub fn create(&self, owner: &UserId, project: NewProject) -> Result<Row> {
        require("owner", owner.as_str())?;
        require("title", &project.title)?;
        require("description", &project.description)?;

        let millis = Utc::now().timestamp_millis();
        let picture = match &project.picture {
            Some(file) => {
                let path = file.file_name(&format!("{}_project_{}", owner, millis));
                Some(self.blobs.put_signed(&self.buckets.pictures, &path, file)?.path)
            }
            None => None,
        };
        let document = match &project.document {
            Some(file) => {
                let path = file.file_name(&format!("{}_doc_{}", owner, millis));
                Some(self.blobs.put_signed(&self.buckets.documents, &path, file)?.path)
            }
            None => None,
        };

        let row = NewProjectRow {
            owner_id: owner,
            title: project.title.trim(),
            description: project.description.trim(),
            picture: picture.as_deref(),
            document: document.as_deref(),
        }
        .to_row()?;
        let stored = self.store.insert_row(&self.tables.projects, row)?;
        info!(owner = %owner, title = project.title.trim(), "project created");
        Ok(stored)
    }

    /// Every project, newest first, with owner details and resolved URLs.
    pub fn list(&self) -> Result<Vec<ProjectListing>> {
        let rows = self.store.fetch_rows(
            &self.tables.projects,
            &Filter::all(),
            Some(&Order::desc("created_at")),
        )?;

        let projects: Vec<ProjectRow> = rows
            .into_iter()
            .filter_map(|row| match ProjectRow::from_row(row) {
                Ok(project) => Some(project),
                Err(e) => {
                    warn!(error = %e, "skipping malformed project row");
                    None
                }
            })
            .collect();

        let owners = self.load_owners(&projects)?;
        debug!(projects = projects.len(), owners = owners.len(), "listing projects");

        Ok(projects
            .into_iter()
            .map(|project| ProjectListing {
                id: project.id(),
                picture_url: public_url_or_none(
                    self.blobs.as_ref(),
                    &self.buckets.pictures,
                    project.picture.as_deref(),
                ),
                document_url: public_url_or_none(
                    self.blobs.as_ref(),
                    &self.buckets.documents,
                    project.document.as_deref(),
                ),
                owner: project
                    .owner_id
                    .as_ref()
                    .and_then(|id| owners.get(id))
                    .map(|owner| self.owner_details(owner)),
                title: project.title,
                description: project.description,
            })
            .collect())
    }

    fn load_owners(&self, projects: &[ProjectRow]) -> Result<HashMap<UserId, UserRow>> {
        let ids: BTreeSet<&UserId> = projects.iter().filter_map(|p| p.owner_id.as_ref()).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let filter = Filter::is_in("id", ids.iter().map(|id| Value::from(id.as_str())).collect());
        Ok(self
            .store
            .fetch_rows(&self.tables.users, &filter, None)?
            .into_iter()
            .filter_map(|row| UserRow::from_row(row).ok())
            .map(|user| (user.id.clone(), user))
            .collect())
    }

    fn owner_details(&self, owner: &UserRow) -> ProjectOwner {
        ProjectOwner {
            user_id: owner.id.clone(),
            display_name: owner.display_name(),
            city: owner.city.clone(),
            sector: owner.sector.clone(),
            role: owner.role(),
            avatar_url: public_url_or_none(
                self.blobs.as_ref(),
                &self.buckets.avatars,
                owner.profile_picture.as_deref(),
            ),
        }
    }
}
