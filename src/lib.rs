//! # investlink
//!
//! Client core of an owner/investor matchmaking app.
//!
//! ## Core Concepts
//!
//! - **Session routing**: every identity event is turned into a
//!   [`RoutingState`]; the role comes from the user's profile row, never from
//!   the session itself
//! - **Change-feed channels**: one explicit-lifecycle subscription per
//!   signed-in user
//! - **Notification sync**: feed signals are coalesced into full refetches of
//!   the user's incoming contact requests
//! - **Services**: accounts, contact requests, projects and the investor
//!   directory on top of the same collaborators
//!
//! All external services are reached through the traits in [`backend`];
//! [`backend::memory`] implements them in-process.
//!
//! ## Example
//!
//! ```ignore
//! use investlink::{backend::memory::MemoryBackend, Client, CoreConfig};
//!
//! let backend = MemoryBackend::new();
//! let client = Client::new(CoreConfig::default(), backend.backend())?;
//!
//! client.accounts().sign_in("ines@example.com", "secret")?;
//! client.router().wait_settled(std::time::Duration::from_secs(5));
//!
//! let view = client.open_notifications()?;
//! for record in view.records() {
//!     println!("{}: {}", record.sender_display_name, record.message);
//! }
//! ```

pub mod accounts;
pub mod backend;
pub mod client;
pub mod config;
pub mod contacts;
pub mod directory;
pub mod error;
pub mod feed;
pub mod notifications;
pub mod observe;
pub mod projects;
mod rows;
pub mod session;
pub mod types;

// Re-exports
pub use accounts::{Accounts, SignUpRequest};
pub use backend::Backend;
pub use client::Client;
pub use config::{BucketNames, CoreConfig, SyncConfig, TableNames};
pub use contacts::ContactRequests;
pub use directory::Directory;
pub use error::{CoreError, Result};
pub use feed::{ChangeFeedChannel, ChannelEvent, ChannelId, ChannelState};
pub use notifications::{NotificationSyncEngine, NotificationView, SyncEvent};
pub use observe::{Broadcaster, Observer, ObserverId};
pub use projects::{NewProject, Projects};
pub use session::{DeniedReason, RoleResolver, RouterMachine, RoutingState, SessionRouter};
pub use types::*;
