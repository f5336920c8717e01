//! Snapshot of the session store's state.

use apotheca_core::RoleSet;

use super::gate;
use crate::models::{Identity, Profile, ResolvedProfile, Session};

/// What consumers read from the session store.
///
/// `profile` is `None` while resolution for the current identity is pending
/// and whenever there is no identity.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub identity: Option<Identity>,
    pub session: Option<Session>,
    pub profile: Option<ResolvedProfile>,
    /// True until the initial session check completes or times out.
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::initial()
    }
}

impl AuthState {
    /// State before the initial session check.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            identity: None,
            session: None,
            profile: None,
            loading: true,
        }
    }

    /// The current profile, whatever its provenance.
    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref().map(ResolvedProfile::profile)
    }

    /// Role gate over the current profile.
    #[must_use]
    pub fn has_role(&self, roles: impl Into<RoleSet>) -> bool {
        gate::has_role(self.profile(), roles)
    }

    #[must_use]
    pub const fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    /// Signed in, but the profile has not been resolved yet.
    #[must_use]
    pub const fn is_profile_pending(&self) -> bool {
        self.identity.is_some() && self.profile.is_none()
    }

    /// Loading is over and the profile, if one is due, has arrived.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !self.loading && !self.is_profile_pending()
    }
}
