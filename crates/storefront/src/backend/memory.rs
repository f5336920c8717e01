//! In-process backend for tests and offline demos.
//!
//! Behaves like the hosted services: sign-up writes a profile row the way
//! the hosted trigger does, the session lives in the backend, and every
//! change is broadcast. Failures and latency can be scripted per operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use apotheca_core::{AuthEvent, Email, IdentityId};

use super::{
    AUTH_CHANGE_CAPACITY, ApiError, AuthApi, AuthChange, BackendError, Credentials, DataApi,
    SignUpData, SignUpParams,
};
use crate::models::identity::{META_FULL_NAME, META_ROLE};
use crate::models::{Identity, NewVendorApplication, Profile, Session};

/// Lifetime of issued access tokens.
const TOKEN_LIFETIME: TimeDelta = TimeDelta::hours(1);

/// In-memory stand-in for the hosted auth and data services.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<AuthChange>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Email, UserRecord>,
    profiles: HashMap<IdentityId, Profile>,
    session: Option<Session>,
    applications: Vec<NewVendorApplication>,
    application_attempts: usize,
    require_email_confirmation: bool,
    faults: Faults,
}

struct UserRecord {
    identity: Identity,
    password: SecretString,
}

#[derive(Default)]
struct Faults {
    session_error: Option<String>,
    session_hangs: bool,
    session_latency: Option<Duration>,
    profile_error: Option<String>,
    profile_latency: Option<Duration>,
    application_error: Option<String>,
    sign_out_error: Option<String>,
}

fn unavailable(message: &str) -> BackendError {
    BackendError::Unavailable(message.to_owned())
}

fn api_error(status: u16, code: &str, message: &str) -> BackendError {
    BackendError::Api(ApiError {
        status,
        code: Some(code.to_owned()),
        message: message.to_owned(),
    })
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(AUTH_CHANGE_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                changes,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Register a principal without going through sign-up. No profile row
    /// is written.
    pub fn seed_identity(&self, email: &Email, password: &str, metadata: Map<String, Value>) -> Identity {
        let identity = Identity {
            id: IdentityId::random(),
            email: Some(email.clone()),
            metadata,
        };
        self.state().users.insert(
            email.clone(),
            UserRecord {
                identity: identity.clone(),
                password: SecretString::from(password.to_owned()),
            },
        );
        identity
    }

    /// Store or replace a profile row.
    pub fn put_profile(&self, profile: Profile) {
        self.state().profiles.insert(profile.id, profile);
    }

    /// Delete a profile row.
    pub fn remove_profile(&self, id: IdentityId) {
        self.state().profiles.remove(&id);
    }

    /// Issue a session for `identity` as if it had signed in elsewhere,
    /// without announcing it.
    pub fn set_session_silently(&self, identity: &Identity) -> Session {
        let session = issue_session(identity.clone());
        self.state().session = Some(session.clone());
        session
    }

    /// Issue a session for `identity` and announce it with `event`.
    pub fn emit_signed_in(&self, identity: &Identity, event: AuthEvent) -> Session {
        let session = issue_session(identity.clone());
        self.state().session = Some(session.clone());
        self.emit(AuthChange::with_session(event, session.clone()));
        session
    }

    /// Drop the session and announce the sign-out.
    pub fn emit_signed_out(&self) {
        self.state().session = None;
        self.emit(AuthChange::signed_out());
    }

    /// Broadcast an arbitrary change without touching backend state.
    pub fn emit(&self, change: AuthChange) {
        let event = change.event;
        if self.inner.changes.send(change).is_err() {
            debug!(%event, "No auth-change subscribers");
        }
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// When set, sign-up returns an identity but no session.
    pub fn require_email_confirmation(&self, required: bool) {
        self.state().require_email_confirmation = required;
    }

    pub fn fail_session_fetch(&self, message: Option<&str>) {
        self.state().faults.session_error = message.map(str::to_owned);
    }

    /// Make session fetches never complete.
    pub fn hang_session_fetch(&self, hang: bool) {
        self.state().faults.session_hangs = hang;
    }

    pub fn delay_session_fetch(&self, latency: Option<Duration>) {
        self.state().faults.session_latency = latency;
    }

    pub fn fail_profile_fetch(&self, message: Option<&str>) {
        self.state().faults.profile_error = message.map(str::to_owned);
    }

    pub fn delay_profile_fetch(&self, latency: Option<Duration>) {
        self.state().faults.profile_latency = latency;
    }

    pub fn fail_vendor_application(&self, message: Option<&str>) {
        self.state().faults.application_error = message.map(str::to_owned);
    }

    pub fn fail_sign_out(&self, message: Option<&str>) {
        self.state().faults.sign_out_error = message.map(str::to_owned);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Vendor applications successfully inserted so far.
    #[must_use]
    pub fn vendor_applications(&self) -> Vec<NewVendorApplication> {
        self.state().applications.clone()
    }

    /// Insert attempts, successful or not.
    #[must_use]
    pub fn vendor_application_attempts(&self) -> usize {
        self.state().application_attempts
    }

    #[must_use]
    pub fn profile(&self, id: IdentityId) -> Option<Profile> {
        self.state().profiles.get(&id).cloned()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.state().session.clone()
    }
}

fn issue_session(identity: Identity) -> Session {
    Session {
        identity,
        access_token: SecretString::from(format!("mem-access-{}", uuid::Uuid::new_v4())),
        refresh_token: SecretString::from(format!("mem-refresh-{}", uuid::Uuid::new_v4())),
        token_type: "bearer".to_owned(),
        expires_at: Utc::now() + TOKEN_LIFETIME,
    }
}

async fn maybe_sleep(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

impl AuthApi for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let (latency, hangs) = {
            let state = self.state();
            (state.faults.session_latency, state.faults.session_hangs)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        maybe_sleep(latency).await;

        let state = self.state();
        if let Some(message) = &state.faults.session_error {
            return Err(unavailable(message));
        }
        Ok(state.session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.inner.changes.subscribe()
    }

    async fn sign_up(&self, params: &SignUpParams) -> Result<SignUpData, BackendError> {
        let email = &params.credentials.email;
        let (session, identity) = {
            let mut state = self.state();
            if state.users.contains_key(email) {
                return Err(api_error(422, "user_already_exists", "User already registered"));
            }

            let mut metadata = Map::new();
            metadata.insert(META_FULL_NAME.to_owned(), Value::from(params.full_name.clone()));
            metadata.insert(META_ROLE.to_owned(), Value::from(params.role.as_str()));
            let identity = Identity {
                id: IdentityId::random(),
                email: Some(email.clone()),
                metadata,
            };

            state.users.insert(
                email.clone(),
                UserRecord {
                    identity: identity.clone(),
                    password: params.credentials.password.clone(),
                },
            );

            let mut profile = Profile::fallback(&identity);
            profile.role = Some(params.role);
            state.profiles.insert(identity.id, profile);

            if state.require_email_confirmation {
                (None, identity)
            } else {
                let session = issue_session(identity.clone());
                state.session = Some(session.clone());
                (Some(session), identity)
            }
        };

        if let Some(session) = &session {
            self.emit(AuthChange::with_session(AuthEvent::SignedIn, session.clone()));
        }
        Ok(SignUpData {
            identity: Some(identity),
            session,
        })
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, BackendError> {
        let session = {
            let mut state = self.state();
            let identity = state
                .users
                .get(&credentials.email)
                .filter(|user| {
                    user.password.expose_secret() == credentials.password.expose_secret()
                })
                .map(|user| user.identity.clone())
                .ok_or_else(|| {
                    api_error(400, "invalid_credentials", "Invalid login credentials")
                })?;
            let session = issue_session(identity);
            state.session = Some(session.clone());
            session
        };

        self.emit(AuthChange::with_session(AuthEvent::SignedIn, session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        {
            let mut state = self.state();
            if let Some(message) = &state.faults.sign_out_error {
                return Err(unavailable(message));
            }
            if state.session.take().is_none() {
                return Ok(());
            }
        }

        self.emit(AuthChange::signed_out());
        Ok(())
    }
}

impl DataApi for MemoryBackend {
    async fn fetch_profile(&self, id: IdentityId) -> Result<Profile, BackendError> {
        let latency = self.state().faults.profile_latency;
        maybe_sleep(latency).await;

        let state = self.state();
        if let Some(message) = &state.faults.profile_error {
            return Err(unavailable(message));
        }
        state
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("profile {id}")))
    }

    async fn insert_vendor_application(
        &self,
        application: &NewVendorApplication,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.application_attempts += 1;
        if let Some(message) = &state.faults.application_error {
            return Err(unavailable(message));
        }
        state.applications.push(application.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use apotheca_core::UserRole;

    use super::*;

    fn credentials(email: &str, password: &str) -> Credentials {
        Credentials {
            email: Email::parse(email).unwrap(),
            password: SecretString::from(password.to_owned()),
        }
    }

    fn params(email: &str, role: UserRole) -> SignUpParams {
        SignUpParams {
            credentials: credentials(email, "correct-horse"),
            full_name: "Bob".to_owned(),
            role,
        }
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_and_session() {
        let backend = MemoryBackend::new();
        let mut changes = backend.subscribe();

        let data = backend.sign_up(&params("b@x.com", UserRole::Vendor)).await.unwrap();
        let identity = data.identity.unwrap();
        assert!(data.session.is_some());
        assert_eq!(identity.role_hint(), Some(UserRole::Vendor));

        let profile = backend.profile(identity.id).unwrap();
        assert_eq!(profile.role, Some(UserRole::Vendor));
        assert!(!profile.is_approved);

        let change = changes.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedIn);
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_is_rejected() {
        let backend = MemoryBackend::new();
        backend.sign_up(&params("b@x.com", UserRole::Consumer)).await.unwrap();
        let err = backend
            .sign_up(&params("b@x.com", UserRole::Consumer))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Api(ApiError { status: 422, .. })));
    }

    #[tokio::test]
    async fn test_email_confirmation_withholds_session() {
        let backend = MemoryBackend::new();
        backend.require_email_confirmation(true);
        let data = backend.sign_up(&params("c@x.com", UserRole::Consumer)).await.unwrap();
        assert!(data.identity.is_some());
        assert!(data.session.is_none());
        assert!(backend.session().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_checks_password() {
        let backend = MemoryBackend::new();
        let email = Email::parse("a@x.com").unwrap();
        backend.seed_identity(&email, "right-password", Map::new());

        let err = backend
            .sign_in_with_password(&credentials("a@x.com", "wrong-password"))
            .await
            .unwrap_err();
        assert!(err.is_auth_rejection());

        let session = backend
            .sign_in_with_password(&credentials("a@x.com", "right-password"))
            .await
            .unwrap();
        assert_eq!(session.identity.email.as_ref(), Some(&email));
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_silent() {
        let backend = MemoryBackend::new();
        let mut changes = backend.subscribe();
        backend.sign_out().await.unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.fetch_profile(IdentityId::random()).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_emit_reaches_late_subscribers_only_after_subscribing() {
        let backend = MemoryBackend::new();
        let email = Email::parse("ann@x.com").unwrap();
        let identity = backend.seed_identity(&email, "pw", Map::new());

        // Nobody listening yet; the change is dropped.
        backend.emit_signed_in(&identity, AuthEvent::SignedIn);

        let mut changes = backend.subscribe();
        assert!(changes.try_recv().is_err());
        backend.emit_signed_out();
        let change = changes.try_recv().unwrap();
        assert_eq!(change.event, AuthEvent::SignedOut);
        assert!(change.session.is_none());
        assert!(backend.session().is_none());
    }
}
