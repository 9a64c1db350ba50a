//! Routing transitions, free of threads and I/O.
//!
//! [`RouterMachine`] folds session events and resolution results into a
//! [`RoutingState`]. It never performs a lookup itself: a transition that
//! needs one hands back a [`ResolutionTicket`], and the result is fed back
//! through [`RouterMachine::on_resolved`] together with that ticket.

use super::types::{DeniedReason, RoutingState};
use crate::types::{Profile, Session, UserId};
use tracing::debug;

/// Identity of one requested resolution.
///
/// A result is applied only while its ticket is still the pending one and
/// its user is still the session's user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionTicket {
    pub user_id: UserId,
    pub epoch: u64,
}

/// Outcome of feeding one input into the machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// The routing state changed and must be published.
    pub changed: bool,
    /// A resolution must be started for this ticket.
    pub resolve: Option<ResolutionTicket>,
}

#[derive(Debug, Default)]
pub struct RouterMachine {
    state: RoutingState,
    /// User of the latest valid session, if any.
    session_user: Option<UserId>,
    pending: Option<ResolutionTicket>,
    epoch: u64,
}

impl RouterMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RoutingState {
        &self.state
    }

    pub fn session_user(&self) -> Option<&UserId> {
        self.session_user.as_ref()
    }

    pub fn pending(&self) -> Option<&ResolutionTicket> {
        self.pending.as_ref()
    }

    /// Apply a session-changed event.
    pub fn on_session(&mut self, session: &Session) -> Transition {
        match session.authenticated_user() {
            None => {
                self.session_user = None;
                if let Some(abandoned) = self.pending.take() {
                    debug!(user = %abandoned.user_id, "abandoning resolution on sign-out");
                }
                self.set_state(RoutingState::Unauthenticated)
            }
            Some(user) if self.session_user.as_ref() == Some(user) => {
                // Same user, e.g. a token refresh. Keep the current outcome.
                Transition::default()
            }
            Some(user) => {
                self.session_user = Some(user.clone());
                self.begin_resolution(user.clone())
            }
        }
    }

    /// Apply the result of the resolution identified by `ticket`.
    ///
    /// Late results (sign-out happened, a different user signed in, or a
    /// newer resolution superseded this one) are discarded.
    pub fn on_resolved(
        &mut self,
        ticket: &ResolutionTicket,
        outcome: Result<Profile, DeniedReason>,
    ) -> Transition {
        if self.session_user.as_ref() != Some(&ticket.user_id)
            || self.pending.as_ref() != Some(ticket)
        {
            debug!(
                user = %ticket.user_id,
                epoch = ticket.epoch,
                "discarding stale resolution"
            );
            return Transition::default();
        }
        self.pending = None;

        let next = match outcome {
            Ok(profile) if profile.user_id == ticket.user_id => {
                RoutingState::Authenticated { profile }
            }
            Ok(profile) => RoutingState::Denied {
                user_id: ticket.user_id.clone(),
                reason: DeniedReason::LookupFailed(format!(
                    "profile belongs to {}",
                    profile.user_id
                )),
            },
            Err(reason) => RoutingState::Denied {
                user_id: ticket.user_id.clone(),
                reason,
            },
        };
        self.set_state(next)
    }

    /// Re-run resolution after a denial, if the session is still valid.
    pub fn retry(&mut self) -> Transition {
        match (&self.state, &self.session_user) {
            (RoutingState::Denied { .. }, Some(user)) => {
                let user = user.clone();
                self.begin_resolution(user)
            }
            _ => Transition::default(),
        }
    }

    fn begin_resolution(&mut self, user_id: UserId) -> Transition {
        self.epoch += 1;
        let ticket = ResolutionTicket {
            user_id,
            epoch: self.epoch,
        };
        self.pending = Some(ticket.clone());
        Transition {
            resolve: Some(ticket),
            ..self.set_state(RoutingState::Resolving)
        }
    }

    fn set_state(&mut self, next: RoutingState) -> Transition {
        if self.state == next {
            return Transition::default();
        }
        self.state = next;
        Transition {
            changed: true,
            resolve: None,
        }
    }
}
