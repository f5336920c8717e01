//! Role gate.

use apotheca_core::RoleSet;

use crate::models::Profile;

/// Whether `profile` is loaded and its role is one of `roles`.
///
/// Accepts a single [`UserRole`](apotheca_core::UserRole) or any collection
/// convertible to a [`RoleSet`].
#[must_use]
pub fn has_role(profile: Option<&Profile>, roles: impl Into<RoleSet>) -> bool {
    profile.is_some_and(|p| p.has_role(roles))
}
