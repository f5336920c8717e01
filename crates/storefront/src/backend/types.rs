//! Wire shapes of the hosted backend and their conversions to domain types.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use apotheca_core::{Email, IdentityId, UserRole};

use super::ApiError;
use crate::models::{BusinessDetails, Identity, Profile, Session};

/// Columns selected for a profile lookup.
pub const PROFILE_COLUMNS: &str =
    "id,full_name,role,business_name,business_license,contact_person,phone,is_approved";

/// Lifetime assumed when a token grant carries no expiry at all.
const DEFAULT_TOKEN_LIFETIME: TimeDelta = TimeDelta::hours(1);

// =============================================================================
// Auth service
// =============================================================================

/// A principal as returned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: IdentityId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl UserDto {
    /// Convert to an [`Identity`]. An unparseable email is dropped rather
    /// than failing the whole response.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        let email = self.email.as_deref().and_then(|raw| match Email::parse(raw) {
            Ok(email) => Some(email),
            Err(e) => {
                tracing::warn!(identity_id = %self.id, error = %e, "ignoring malformed identity email");
                None
            }
        });

        Identity {
            id: self.id,
            email,
            metadata: self.user_metadata,
        }
    }
}

impl From<&Identity> for UserDto {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.as_ref().map(|e| e.as_str().to_owned()),
            user_metadata: identity.metadata.clone(),
        }
    }
}

/// Successful token grant (password, refresh, or sign-up without confirmation).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until expiry.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix timestamp of expiry; preferred over `expires_in` when present.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: UserDto,
}

impl TokenResponse {
    /// Convert to a [`Session`], resolving relative expiry against `now`.
    #[must_use]
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + TimeDelta::seconds(secs)))
            .unwrap_or(now + DEFAULT_TOKEN_LIFETIME);

        Session {
            identity: self.user.into_identity(),
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_owned()),
            expires_at,
        }
    }
}

/// Sign-up answers with a full grant, or with the bare user while email
/// confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenResponse),
    User(UserDto),
}

/// `POST /auth/v1/token?grant_type=password` body.
#[derive(Debug, Serialize)]
pub struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// `POST /auth/v1/token?grant_type=refresh_token` body.
#[derive(Debug, Serialize)]
pub struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
}

/// `POST /auth/v1/signup` body.
#[derive(Debug, Serialize)]
pub struct SignUpBody<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub data: SignUpMetadata<'a>,
}

/// Metadata stored on the new identity.
#[derive(Debug, Serialize)]
pub struct SignUpMetadata<'a> {
    pub full_name: &'a str,
    pub role: UserRole,
}

// =============================================================================
// Data service
// =============================================================================

/// A `profiles` row. A null role stays absent and a null approval flag is
/// not approved. A role outside the closed set fails deserialization.
#[derive(Debug, Deserialize)]
pub struct ProfileRow {
    pub id: IdentityId,
    pub full_name: Option<String>,
    pub role: Option<UserRole>,
    pub business_name: Option<String>,
    pub business_license: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub is_approved: Option<bool>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            full_name: row.full_name,
            role: row.role,
            business: BusinessDetails {
                business_name: row.business_name,
                business_license: row.business_license,
                contact_person: row.contact_person,
                phone: row.phone,
            },
            is_approved: row.is_approved.unwrap_or(false),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error body of either service. The auth service uses
/// `error_code`/`msg` (older versions `error`/`error_description`); the
/// data service uses `code`/`message`.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ApiErrorBody {
    /// Normalize into an [`ApiError`] for `status`.
    #[must_use]
    pub fn into_api_error(self, status: u16) -> ApiError {
        let code = self
            .error_code
            .or_else(|| match self.code {
                Some(Value::String(code)) => Some(code),
                _ => None,
            })
            .or_else(|| self.error.clone());
        let message = self
            .msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
            .unwrap_or_else(|| "request failed".to_owned());

        ApiError {
            status,
            code,
            message,
        }
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// On-disk form of a [`Session`].
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserDto,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_owned(),
            refresh_token: session.refresh_token.expose_secret().to_owned(),
            token_type: session.token_type.clone(),
            expires_at: session.expires_at,
            user: UserDto::from(&session.identity),
        }
    }
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Self {
            identity: stored.user.into_identity(),
            access_token: SecretString::from(stored.access_token),
            refresh_token: SecretString::from(stored.refresh_token),
            token_type: stored.token_type,
            expires_at: stored.expires_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const USER_ID: &str = "0b6f7f3e-9a44-4d0c-8a55-2e3a1c0d9b71";

    fn grant_json(extra: Value) -> Value {
        let mut grant = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "token_type": "bearer",
            "user": {
                "id": USER_ID,
                "email": "ann@x.com",
                "user_metadata": { "full_name": "Ann", "role": "consumer" }
            }
        });
        if let (Some(grant), Some(extra)) = (grant.as_object_mut(), extra.as_object()) {
            grant.extend(extra.clone());
        }
        grant
    }

    #[test]
    fn test_token_response_prefers_absolute_expiry() {
        let now = Utc::now();
        let response: TokenResponse =
            serde_json::from_value(grant_json(json!({ "expires_at": 1_900_000_000, "expires_in": 5 })))
                .unwrap();
        let session = response.into_session(now);
        assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
        assert_eq!(session.identity.full_name_hint(), Some("Ann"));
        assert_eq!(session.access_token.expose_secret(), "at");
    }

    #[test]
    fn test_token_response_relative_and_default_expiry() {
        let now = Utc::now();
        let relative: TokenResponse =
            serde_json::from_value(grant_json(json!({ "expires_in": 3600 }))).unwrap();
        assert_eq!(relative.into_session(now).expires_at, now + TimeDelta::seconds(3600));

        let missing: TokenResponse = serde_json::from_value(grant_json(json!({}))).unwrap();
        assert_eq!(missing.into_session(now).expires_at, now + DEFAULT_TOKEN_LIFETIME);
    }

    #[test]
    fn test_sign_up_response_variants() {
        let grant: SignUpResponse =
            serde_json::from_value(grant_json(json!({ "expires_in": 3600 }))).unwrap();
        assert!(matches!(grant, SignUpResponse::Session(_)));

        let pending: SignUpResponse = serde_json::from_value(json!({
            "id": USER_ID,
            "email": "ann@x.com",
            "user_metadata": {}
        }))
        .unwrap();
        assert!(matches!(pending, SignUpResponse::User(_)));
    }

    #[test]
    fn test_user_dto_drops_malformed_email() {
        let dto: UserDto = serde_json::from_value(json!({ "id": USER_ID, "email": "" })).unwrap();
        let identity = dto.into_identity();
        assert_eq!(identity.email, None);
        assert!(identity.metadata.is_empty());
    }

    #[test]
    fn test_profile_row_null_role_stays_absent() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": USER_ID,
            "full_name": null,
            "role": null,
            "business_name": null,
            "business_license": null,
            "contact_person": null,
            "phone": null,
            "is_approved": null
        }))
        .unwrap();
        let profile = Profile::from(row);
        assert_eq!(profile.role, None);
        assert!(!profile.has_role(UserRole::Consumer));
        assert!(!profile.is_approved);
    }

    #[test]
    fn test_profile_row_rejects_unknown_role() {
        let row = serde_json::from_value::<ProfileRow>(json!({
            "id": USER_ID,
            "full_name": "Zed",
            "role": "superuser",
            "business_name": null,
            "business_license": null,
            "contact_person": null,
            "phone": null,
            "is_approved": true
        }));
        assert!(row.is_err());
    }

    #[test]
    fn test_api_error_body_auth_shape() {
        let body: ApiErrorBody = serde_json::from_value(json!({
            "code": 400,
            "error_code": "invalid_credentials",
            "msg": "Invalid login credentials"
        }))
        .unwrap();
        let err = body.into_api_error(400);
        assert_eq!(err.code.as_deref(), Some("invalid_credentials"));
        assert_eq!(err.message, "Invalid login credentials");
    }

    #[test]
    fn test_api_error_body_legacy_auth_shape() {
        let body: ApiErrorBody = serde_json::from_value(json!({
            "error": "invalid_grant",
            "error_description": "Invalid Refresh Token"
        }))
        .unwrap();
        let err = body.into_api_error(400);
        assert_eq!(err.code.as_deref(), Some("invalid_grant"));
        assert_eq!(err.message, "Invalid Refresh Token");
    }

    #[test]
    fn test_api_error_body_data_shape() {
        let body: ApiErrorBody = serde_json::from_value(json!({
            "code": "PGRST116",
            "message": "JSON object requested, multiple (or no) rows returned",
            "details": "The result contains 0 rows",
            "hint": null
        }))
        .unwrap();
        let err = body.into_api_error(406);
        assert_eq!(err.code.as_deref(), Some("PGRST116"));
        assert!(err.message.starts_with("JSON object requested"));
    }

    #[test]
    fn test_stored_session_keeps_identity_and_tokens() {
        let response: TokenResponse =
            serde_json::from_value(grant_json(json!({ "expires_at": 1_900_000_000 }))).unwrap();
        let session = response.into_session(Utc::now());

        let stored = StoredSession::from(&session);
        let json = serde_json::to_string(&stored).unwrap();
        let restored = Session::from(serde_json::from_str::<StoredSession>(&json).unwrap());

        assert_eq!(restored.identity, session.identity);
        assert_eq!(restored.refresh_token.expose_secret(), "rt");
        assert_eq!(restored.expires_at, session.expires_at);
    }
}
