//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` for binaries built on the session core, and
//! the helpers that attach user context and swallowed failures to Sentry.

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::services::auth::AuthError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An auth operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// The hosted backend failed outside an auth operation.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Input rejected before reaching the backend.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Whether the user can fix this by changing what they entered.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        match self {
            Self::Auth(err) => err.is_user_error(),
            Self::InvalidInput(_) => true,
            Self::Config(_) | Self::Backend(_) => false,
        }
    }

    /// Log the error, capturing service failures to Sentry.
    pub fn report(&self) {
        if self.is_user_error() {
            tracing::warn!(error = %self, "Operation rejected");
        } else {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Operation failed"
            );
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Report an error that was deliberately not surfaced to the caller.
///
/// `operation` is attached as a tag so these can be found and reconciled.
pub fn capture_swallowed<E>(err: &E, operation: &str)
where
    E: std::error::Error + ?Sized,
{
    sentry::with_scope(
        |scope| {
            scope.set_tag("swallowed", "true");
            scope.set_tag("operation", operation);
        },
        || sentry::capture_error(err),
    );
}

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for an auth event.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::InvalidInput("role must be consumer or vendor".to_string());
        assert_eq!(err.to_string(), "Invalid input: role must be consumer or vendor");

        let err = AppError::Auth(AuthError::InvalidCredentials);
        assert_eq!(err.to_string(), "Auth error: invalid credentials");
    }

    #[test]
    fn test_user_error_classification() {
        assert!(AppError::Auth(AuthError::UserAlreadyExists).is_user_error());
        assert!(AppError::InvalidInput("x".to_string()).is_user_error());
        assert!(!AppError::Backend(BackendError::NoSession).is_user_error());
        assert!(
            !AppError::Auth(AuthError::Backend(BackendError::Unavailable("down".to_string())))
                .is_user_error()
        );
        assert!(!AppError::Config(ConfigError::MissingEnvVar("X".to_string())).is_user_error());
    }

    #[test]
    fn test_sentry_helpers_without_client_are_noops() {
        set_sentry_user(&"0b6f7f3e", Some("ann@x.com"));
        add_breadcrumb("auth", "SIGNED_IN", &[("identity_id", "0b6f7f3e")]);
        capture_swallowed(&BackendError::NoSession, "test");
        clear_sentry_user();
    }
}
