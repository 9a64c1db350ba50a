//! Application entry point wiring the collaborators together.

use crate::accounts::Accounts;
use crate::backend::Backend;
use crate::config::CoreConfig;
use crate::contacts::ContactRequests;
use crate::directory::Directory;
use crate::error::{CoreError, Result};
use crate::notifications::{NotificationSyncEngine, NotificationView};
use crate::projects::{NewProject, Projects};
use crate::session::{RoleResolver, RoutingState, SessionRouter};
use crate::types::{DirectoryEntry, ProjectListing, Role, Row, UserId};
use std::sync::Arc;
use tracing::{debug, info};

/// One signed-in application: session routing, the notification list, and
/// the feature services, all sharing one [`Backend`].
///
/// The client stops notification sync as soon as routing leaves the user
/// the sync serves (sign-out, a different user, or a denial).
pub struct Client {
    config: CoreConfig,
    router: Arc<SessionRouter>,
    engine: Arc<NotificationSyncEngine>,
    accounts: Accounts,
    contacts: ContactRequests,
    projects: Projects,
    directory: Directory,
}

impl Client {
    pub fn new(config: CoreConfig, backend: Backend) -> Result<Self> {
        let Backend {
            identity,
            store,
            blobs,
            feed,
        } = backend;

        let resolver = RoleResolver::new(
            Arc::clone(&store),
            config.tables.users.clone(),
            config.buckets.avatars.clone(),
        );
        let router = Arc::new(SessionRouter::new(resolver, config.observer_buffer));
        let engine = Arc::new(NotificationSyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            feed,
            &config,
        ));

        // The sync stops inside the session change that leaves its user, so
        // sign-out returns with the channel already closed.
        let served = Arc::downgrade(&engine);
        router.on_transition(move |state| {
            if let Some(engine) = served.upgrade() {
                if engine.stop_unless(state.authenticated_user()) {
                    debug!(state = ?state, "routing left the served user");
                }
            }
        });
        router.attach(Arc::clone(&identity))?;

        let client = Self {
            accounts: Accounts::new(
                identity,
                Arc::clone(&store),
                Arc::clone(&blobs),
                config.tables.users.clone(),
                config.buckets.avatars.clone(),
            ),
            contacts: ContactRequests::new(
                Arc::clone(&store),
                config.tables.contact_requests.clone(),
            ),
            projects: Projects::new(Arc::clone(&store), Arc::clone(&blobs), &config),
            directory: Directory::new(
                store,
                blobs,
                config.tables.users.clone(),
                config.buckets.avatars.clone(),
            ),
            config,
            router,
            engine,
        };
        info!(state = ?client.router.state(), "client ready");
        Ok(client)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    pub fn notifications(&self) -> &NotificationSyncEngine {
        &self.engine
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn routing_state(&self) -> RoutingState {
        self.router.state()
    }

    /// Mount the notification view for the authenticated user.
    pub fn open_notifications(&self) -> Result<NotificationView> {
        let user_id = match self.router.state() {
            RoutingState::Authenticated { profile } => profile.user_id,
            _ => return Err(CoreError::SessionInvalid),
        };
        let view = self.engine.mount_view(&user_id)?;

        // Routing may have moved on while the sync was starting, before the
        // transition hook could see it.
        if self.router.state().authenticated_user() != Some(&user_id) {
            drop(view);
            return Err(CoreError::SessionInvalid);
        }
        Ok(view)
    }

    /// Send a contact request from the authenticated user.
    pub fn send_contact_request(
        &self,
        receiver: &UserId,
        message: &str,
        phone_number: Option<&str>,
    ) -> Result<Row> {
        let profile = self.router.require_profile()?;
        self.contacts
            .send(&profile.user_id, receiver, message, phone_number)
    }

    /// Publish a project. Only owners have projects.
    pub fn create_project(&self, project: NewProject) -> Result<Row> {
        let profile = self.router.require_profile()?;
        if profile.role != Role::Owner {
            return Err(CoreError::InvalidInput("only owners can add projects".into()));
        }
        self.projects.create(&profile.user_id, project)
    }

    pub fn projects(&self) -> Result<Vec<ProjectListing>> {
        self.router.require_profile()?;
        self.projects.list()
    }

    pub fn investors(&self) -> Result<Vec<DirectoryEntry>> {
        self.router.require_profile()?;
        self.directory.investors()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.router.detach();
        self.engine.stop();
    }
}
