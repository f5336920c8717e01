//! Authentication error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors returned by auth operations for the caller to display.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] apotheca_core::EmailError),

    /// Invalid credentials (wrong password or user not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// User already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// The account exists but its email address has not been confirmed.
    #[error("email not confirmed")]
    EmailNotConfirmed,

    /// Password rejected by the auth service's policy.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Too many attempts.
    #[error("too many attempts, retry after {0} seconds")]
    RateLimited(u64),

    /// Anything else the backend reported.
    #[error("backend error: {0}")]
    Backend(BackendError),
}

impl AuthError {
    /// Whether this is a problem with what the user entered, as opposed to
    /// a failure of the service.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        let classified = match &err {
            BackendError::RateLimited(secs) => Some(Self::RateLimited(*secs)),
            BackendError::Api(api) => match api.code.as_deref() {
                Some("invalid_credentials" | "invalid_grant")
                    if api.message.contains("Email not confirmed") =>
                {
                    Some(Self::EmailNotConfirmed)
                }
                Some("invalid_credentials" | "invalid_grant") => Some(Self::InvalidCredentials),
                Some("user_already_exists" | "email_exists") => Some(Self::UserAlreadyExists),
                Some("email_not_confirmed") => Some(Self::EmailNotConfirmed),
                Some("weak_password") => Some(Self::WeakPassword(api.message.clone())),
                _ => None,
            },
            _ => None,
        };
        classified.unwrap_or(Self::Backend(err))
    }
}
