//! Marketplace roles.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Role attached to a marketplace profile.
///
/// The set is closed: anything the backend stores outside of it is treated
/// as unknown by [`UserRole::from_str`](std::str::FromStr).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Shopper buying from pharmacy vendors.
    #[default]
    Consumer,
    /// Licensed pharmacy selling on the marketplace.
    Vendor,
    /// Marketplace operator.
    Admin,
}

impl UserRole {
    /// All roles, in declaration order.
    pub const ALL: [Self; 3] = [Self::Consumer, Self::Vendor, Self::Admin];

    /// The role's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Vendor => "vendor",
            Self::Admin => "admin",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Consumer => 0b001,
            Self::Vendor => 0b010,
            Self::Admin => 0b100,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a role name outside the closed set.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid role: {0} (expected consumer, vendor or admin)")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumer" => Ok(Self::Consumer),
            "vendor" => Ok(Self::Vendor),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

/// A set of roles, used to gate behavior on "any of these roles".
///
/// Built from a single role, an array or slice of roles, or an iterator.
///
/// ```
/// use apotheca_core::{RoleSet, UserRole};
///
/// let staff = RoleSet::from([UserRole::Vendor, UserRole::Admin]);
/// assert!(staff.contains(UserRole::Admin));
/// assert!(!staff.contains(UserRole::Consumer));
/// assert!(RoleSet::from(UserRole::Vendor).contains(UserRole::Vendor));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoleSet(u8);

impl RoleSet {
    /// The empty set. Nothing passes a gate on it.
    pub const EMPTY: Self = Self(0);

    /// A set holding a single role.
    #[must_use]
    pub const fn only(role: UserRole) -> Self {
        Self(role.bit())
    }

    /// This set plus `role`.
    #[must_use]
    pub const fn with(self, role: UserRole) -> Self {
        Self(self.0 | role.bit())
    }

    /// Whether `role` is a member.
    #[must_use]
    pub const fn contains(self, role: UserRole) -> bool {
        self.0 & role.bit() != 0
    }

    /// Whether the set has no members.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the members in declaration order.
    pub fn iter(self) -> impl Iterator<Item = UserRole> {
        UserRole::ALL.into_iter().filter(move |role| self.contains(*role))
    }
}

impl From<UserRole> for RoleSet {
    fn from(role: UserRole) -> Self {
        Self::only(role)
    }
}

impl From<&[UserRole]> for RoleSet {
    fn from(roles: &[UserRole]) -> Self {
        roles.iter().copied().collect()
    }
}

impl<const N: usize> From<[UserRole; N]> for RoleSet {
    fn from(roles: [UserRole; N]) -> Self {
        roles.into_iter().collect()
    }
}

impl FromIterator<UserRole> for RoleSet {
    fn from_iter<I: IntoIterator<Item = UserRole>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(UserRole::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_default_is_consumer() {
        assert_eq!(UserRole::default(), UserRole::Consumer);
    }

    #[test]
    fn test_role_wire_names() {
        for role in UserRole::ALL {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{role}\""));
        }
    }

    #[test]
    fn test_role_rejects_unknown() {
        assert_eq!(
            "pharmacist".parse::<UserRole>(),
            Err(UnknownRole("pharmacist".to_owned()))
        );
        assert!("Vendor".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_role_set_membership() {
        let set = RoleSet::from([UserRole::Vendor, UserRole::Admin]);
        assert!(set.contains(UserRole::Vendor));
        assert!(set.contains(UserRole::Admin));
        assert!(!set.contains(UserRole::Consumer));
    }

    #[test]
    fn test_role_set_from_slice_and_single() {
        let slice: &[UserRole] = &[UserRole::Consumer];
        assert_eq!(RoleSet::from(slice), RoleSet::only(UserRole::Consumer));
        assert_eq!(RoleSet::from(UserRole::Admin), RoleSet::only(UserRole::Admin));
    }

    #[test]
    fn test_role_set_empty() {
        assert!(RoleSet::EMPTY.is_empty());
        assert!(std::iter::empty::<UserRole>().collect::<RoleSet>().is_empty());
        for role in UserRole::ALL {
            assert!(!RoleSet::EMPTY.contains(role));
        }
    }

    #[test]
    fn test_role_set_display() {
        let set = RoleSet::EMPTY.with(UserRole::Admin).with(UserRole::Consumer);
        assert_eq!(set.to_string(), "[consumer, admin]");
    }
}
