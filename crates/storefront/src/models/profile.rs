//! Marketplace profile types.

use serde::Serialize;

use apotheca_core::{IdentityId, RoleSet, UserRole};

use super::identity::Identity;

/// Business fields a vendor fills in. All optional; consumers leave them empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusinessDetails {
    pub business_name: Option<String>,
    pub business_license: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
}

/// A marketplace profile, keyed by the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    /// Same ID as the owning identity.
    pub id: IdentityId,
    pub full_name: Option<String>,
    /// `None` when the stored row has no role; such a profile passes no gate.
    pub role: Option<UserRole>,
    #[serde(flatten)]
    pub business: BusinessDetails,
    /// Set by an operator once a vendor's license has been verified.
    pub is_approved: bool,
}

impl Profile {
    /// Synthesize a profile from the identity's sign-up metadata.
    ///
    /// Used whenever the stored record cannot be read. The role falls back
    /// to consumer and approval is always withheld.
    #[must_use]
    pub fn fallback(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            full_name: identity.full_name_hint().map(str::to_owned),
            role: Some(identity.role_hint().unwrap_or_default()),
            business: BusinessDetails::default(),
            is_approved: false,
        }
    }

    /// Whether this profile has a role and it is in `roles`.
    #[must_use]
    pub fn has_role(&self, roles: impl Into<RoleSet>) -> bool {
        let roles = roles.into();
        self.role.is_some_and(|role| roles.contains(role))
    }
}

/// Outcome of resolving an identity's profile.
///
/// Either the stored record, or a synthesized stand-in together with the
/// reason the stored record could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "provenance", rename_all = "snake_case")]
pub enum ResolvedProfile {
    Remote(Profile),
    Fallback { profile: Profile, reason: String },
}

impl ResolvedProfile {
    /// The profile, whatever its provenance.
    #[must_use]
    pub const fn profile(&self) -> &Profile {
        match self {
            Self::Remote(profile) | Self::Fallback { profile, .. } => profile,
        }
    }

    /// Consume into the profile, whatever its provenance.
    #[must_use]
    pub fn into_profile(self) -> Profile {
        match self {
            Self::Remote(profile) | Self::Fallback { profile, .. } => profile,
        }
    }

    /// Whether this is a degraded, synthesized profile.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Why the stored record was not used, for fallbacks.
    #[must_use]
    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Remote(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}
