//! Session-gated routing.
//!
//! The router turns identity events into exactly one live [`RoutingState`]:
//!
//! ```text
//! Unauthenticated --valid session--> Resolving --profile--> Authenticated
//!        ^                               |        \--denied--> Denied
//!        +------- invalid session (from any state) ------------+
//! ```
//!
//! Authenticated is reachable only with a valid session and a fully fetched
//! profile. A resolution that completes after the session moved on is
//! discarded by comparing its ticket (user id and epoch) with the current
//! session.
//!
//! # Example
//!
//! ```ignore
//! let router = SessionRouter::new(RoleResolver::new(store, "users", "pfp"), 64);
//! router.attach(identity)?;
//!
//! let states = router.subscribe();
//! while let Ok(state) = states.recv() {
//!     match state {
//!         RoutingState::Authenticated { profile } => show_screens(profile.role),
//!         RoutingState::Denied { reason, .. } => show_blocked(reason.as_str()),
//!         RoutingState::Resolving => show_nothing(),
//!         RoutingState::Unauthenticated => show_login(),
//!     }
//! }
//! ```

mod machine;
mod resolver;
mod router;
mod types;

pub use machine::{ResolutionTicket, RouterMachine, Transition};
pub use resolver::RoleResolver;
pub use router::SessionRouter;
pub use types::{DeniedReason, RoutingState};
