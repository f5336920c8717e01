//! Profile resolution.
//!
//! Never fails: any problem reading the stored record yields a fallback
//! synthesized from the identity's sign-up metadata, tagged with the reason.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendError, DataApi};
use crate::models::{Identity, Profile, ResolvedProfile};

/// Maps identities to their marketplace profiles.
pub struct ProfileResolver<B> {
    backend: Arc<B>,
}

impl<B> Clone for ProfileResolver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: DataApi> ProfileResolver<B> {
    #[must_use]
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Look up the profile for `identity`, falling back on any failure.
    #[instrument(skip(self, identity), fields(identity_id = %identity.id))]
    pub async fn resolve(&self, identity: &Identity) -> ResolvedProfile {
        match self.backend.fetch_profile(identity.id).await {
            Ok(profile) if profile.id == identity.id => {
                debug!(role = ?profile.role, "Profile resolved");
                ResolvedProfile::Remote(profile)
            }
            Ok(profile) => {
                warn!(returned_id = %profile.id, "Profile lookup returned another record");
                fallback(identity, format!("lookup returned profile {}", profile.id))
            }
            Err(e @ BackendError::NotFound(_)) => {
                info!("No stored profile, using fallback");
                fallback(identity, e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Profile lookup failed, using fallback");
                fallback(identity, e.to_string())
            }
        }
    }
}

fn fallback(identity: &Identity, reason: String) -> ResolvedProfile {
    ResolvedProfile::Fallback {
        profile: Profile::fallback(identity),
        reason,
    }
}
