//! Identity and session types.
//!
//! Both are cached copies of what the hosted auth service owns; the
//! storefront never mutates them, it only replaces them wholesale.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use serde_json::{Map, Value};

use apotheca_core::{Email, IdentityId, UserRole};

/// Metadata key carrying the name entered at sign-up.
pub const META_FULL_NAME: &str = "full_name";
/// Metadata key carrying the role chosen at sign-up.
pub const META_ROLE: &str = "role";

/// An authenticated principal as known to the hosted auth service.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Unique ID, shared with the principal's profile record.
    pub id: IdentityId,
    /// Sign-in email, absent for principals created without one.
    pub email: Option<Email>,
    /// Free-form metadata attached at sign-up.
    pub metadata: Map<String, Value>,
}

impl Identity {
    /// Look up a non-blank string in the metadata.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Name given at sign-up, if any.
    #[must_use]
    pub fn full_name_hint(&self) -> Option<&str> {
        self.metadata_str(META_FULL_NAME)
    }

    /// Role chosen at sign-up, if it names a known role.
    #[must_use]
    pub fn role_hint(&self) -> Option<UserRole> {
        self.metadata_str(META_ROLE).and_then(|r| r.parse().ok())
    }

    /// Email for log lines, `-` when absent.
    #[must_use]
    pub fn display_email(&self) -> &str {
        self.email.as_ref().map_or("-", Email::as_str)
    }
}

/// A time-bounded credential grant for an [`Identity`].
///
/// Implements `Debug` manually to redact tokens.
#[derive(Clone)]
pub struct Session {
    /// The principal this grant belongs to.
    pub identity: Identity,
    /// Bearer token sent with authenticated requests.
    pub access_token: SecretString,
    /// Token exchanged for a new access token before expiry.
    pub refresh_token: SecretString,
    /// Token type, normally `bearer`.
    pub token_type: String,
    /// When the access token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the access token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the access token expires within `margin` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        now + margin >= self.expires_at
    }

    /// Time left until expiry at `now`, zero once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn identity(metadata: Value) -> Identity {
        Identity {
            id: IdentityId::random(),
            email: Some(Email::parse("ann@x.com").unwrap()),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    fn session(expires_at: DateTime<Utc>) -> Session {
        Session {
            identity: identity(json!({})),
            access_token: SecretString::from("access-token-value"),
            refresh_token: SecretString::from("refresh-token-value"),
            token_type: "bearer".to_owned(),
            expires_at,
        }
    }

    #[test]
    fn test_hints_read_metadata() {
        let id = identity(json!({ "full_name": "Ann", "role": "vendor" }));
        assert_eq!(id.full_name_hint(), Some("Ann"));
        assert_eq!(id.role_hint(), Some(UserRole::Vendor));
    }

    #[test]
    fn test_hints_ignore_blank_and_unknown_values() {
        let id = identity(json!({ "full_name": "   ", "role": "pharmacist" }));
        assert_eq!(id.full_name_hint(), None);
        assert_eq!(id.role_hint(), None);

        let id = identity(json!({ "full_name": 42 }));
        assert_eq!(id.full_name_hint(), None);
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let s = session(now + TimeDelta::seconds(30));
        assert!(!s.is_expired_at(now));
        assert!(s.is_expired_at(now + TimeDelta::seconds(30)));
        assert!(s.expires_within(now, TimeDelta::seconds(60)));
        assert!(!s.expires_within(now, TimeDelta::seconds(10)));
        assert_eq!(s.remaining(now + TimeDelta::seconds(40)), std::time::Duration::ZERO);
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let output = format!("{:?}", session(Utc::now()));
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("access-token-value"));
        assert!(!output.contains("refresh-token-value"));
    }
}
