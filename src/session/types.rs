//! Routing state published by the session router.

use crate::error::CoreError;
use crate::types::{Profile, Role, UserId};
use std::fmt;

/// Why a signed-in user cannot proceed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeniedReason {
    /// No profile row exists for the user.
    ProfileMissing,
    /// The profile lookup itself failed (network, permission, bad row).
    LookupFailed(String),
    /// The profile carries a role other than owner/investor.
    UnknownRole(String),
}

impl DeniedReason {
    /// Stable tag for the presentation layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeniedReason::ProfileMissing => "profile-missing",
            DeniedReason::LookupFailed(_) => "lookup-failed",
            DeniedReason::UnknownRole(_) => "unknown-role",
        }
    }

    pub fn into_error(self, user_id: UserId) -> CoreError {
        match self {
            DeniedReason::ProfileMissing => CoreError::ProfileMissing(user_id),
            DeniedReason::LookupFailed(msg) => CoreError::ProfileLookupFailed(msg),
            DeniedReason::UnknownRole(tag) => {
                CoreError::ProfileLookupFailed(format!("unrecognised role {tag:?}"))
            }
        }
    }
}

impl fmt::Display for DeniedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeniedReason::ProfileMissing => f.write_str(self.as_str()),
            DeniedReason::LookupFailed(msg) => write!(f, "{}: {}", self.as_str(), msg),
            DeniedReason::UnknownRole(tag) => write!(f, "{}: {:?}", self.as_str(), tag),
        }
    }
}

/// Which screen set the presentation layer may show.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum RoutingState {
    #[default]
    Unauthenticated,
    Resolving,
    Authenticated {
        profile: Profile,
    },
    Denied {
        user_id: UserId,
        reason: DeniedReason,
    },
}

impl RoutingState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, RoutingState::Authenticated { .. })
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            RoutingState::Authenticated { profile } => Some(profile),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.profile().map(|p| p.role)
    }

    /// The user an Authenticated state is for.
    pub fn authenticated_user(&self) -> Option<&UserId> {
        self.profile().map(|p| &p.user_id)
    }
}
