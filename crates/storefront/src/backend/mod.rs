//! Hosted auth and data service clients.
//!
//! # Architecture
//!
//! - [`AuthApi`] and [`DataApi`] describe the two remote collaborators the
//!   session core talks to. Everything above this module is generic over them.
//! - [`HostedClient`] implements both against the hosted backend's REST
//!   endpoints (`/auth/v1/*` for credentials, `/rest/v1/*` for tables).
//! - `memory::MemoryBackend` (feature `memory`) implements both in process,
//!   for tests and offline demos.
//!
//! # Auth-change notifications
//!
//! The client owning the session announces every change on a
//! `tokio::sync::broadcast` channel. Consumers call [`AuthApi::subscribe`]
//! and react to [`AuthChange`] values in emission order.

mod client;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
mod persist;
pub mod types;

pub use client::HostedClient;

use std::future::Future;

use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::broadcast;

use apotheca_core::{AuthEvent, Email, IdentityId, UserRole};

use crate::models::{Identity, NewVendorApplication, Profile, Session};

/// Capacity of the auth-change channel. Receivers that fall further behind
/// than this see a lag error and must re-read the current session.
pub const AUTH_CHANGE_CAPACITY: usize = 32;

/// Errors that can occur when talking to the hosted backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error status.
    #[error("API error: {0}")]
    Api(ApiError),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the service.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// An operation needed a session and there is none.
    #[error("No active session")]
    NoSession,

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Client could not be constructed from its configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Reading or writing the persisted session failed.
    #[error("Session persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// The service is unreachable for a reason other than HTTP transport.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether the service rejected the caller's credentials or tokens, as
    /// opposed to failing for a transient reason.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Api(api) if matches!(api.status, 400 | 401 | 403))
    }
}

/// Error payload returned by the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Machine-readable error code (e.g. `invalid_credentials`, `PGRST116`).
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "HTTP {} ({code}): {}", self.status, self.message),
            None => write!(f, "HTTP {}: {}", self.status, self.message),
        }
    }
}

/// Email and password pair.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct Credentials {
    pub email: Email,
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Parameters of a remote sign-up call.
#[derive(Debug, Clone)]
pub struct SignUpParams {
    pub credentials: Credentials,
    /// Stored as `full_name` in the identity's metadata.
    pub full_name: String,
    /// Stored as `role` in the identity's metadata.
    pub role: UserRole,
}

/// Raw result of a remote sign-up call.
///
/// `session` is absent when the service requires email confirmation first.
#[derive(Debug, Clone, Default)]
pub struct SignUpData {
    pub identity: Option<Identity>,
    pub session: Option<Session>,
}

/// A session change announced by the auth service.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    /// The session after the change; `None` once signed out.
    pub session: Option<Session>,
}

impl AuthChange {
    /// A sign-in (or refresh, or update) carrying `session`.
    #[must_use]
    pub const fn with_session(event: AuthEvent, session: Session) -> Self {
        Self {
            event,
            session: Some(session),
        }
    }

    /// A sign-out.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            event: AuthEvent::SignedOut,
            session: None,
        }
    }
}

/// The hosted auth service.
pub trait AuthApi: Send + Sync + 'static {
    /// The current session, restoring or renewing it if the client can.
    fn current_session(
        &self,
    ) -> impl Future<Output = Result<Option<Session>, BackendError>> + Send;

    /// Receive every session change from now on.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    /// Create credentials for a new principal.
    fn sign_up(
        &self,
        params: &SignUpParams,
    ) -> impl Future<Output = Result<SignUpData, BackendError>> + Send;

    /// Exchange an email and password for a session.
    fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Session, BackendError>> + Send;

    /// End the current session. Succeeds without a call when there is none.
    fn sign_out(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// The hosted data service.
pub trait DataApi: Send + Sync + 'static {
    /// Select the single profile record keyed by `id`.
    fn fetch_profile(
        &self,
        id: IdentityId,
    ) -> impl Future<Output = Result<Profile, BackendError>> + Send;

    /// Insert a vendor application record.
    fn insert_vendor_application(
        &self,
        application: &NewVendorApplication,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
