//! Session store.
//!
//! The single source of truth for the current identity, session, profile
//! and loading flag of one mounted consumer.
//!
//! # Lifecycle
//!
//! 1. [`SessionStore::new`] builds the store around a backend. Nothing runs yet.
//! 2. [`SessionStore::initialize`] subscribes to the backend's auth changes,
//!    starts the initial session check and arms the loading deadline.
//! 3. Consumers read [`SessionStore::state`] or watch [`SessionStore::subscribe`].
//! 4. [`SessionStore::teardown`] stops every background task. Later updates
//!    are dropped.
//!
//! Background tasks keep the store alive until teardown, so a store that
//! was initialized must be torn down.
//!
//! # Profiles
//!
//! Every auth change re-runs profile resolution in its own task. Resolutions
//! are not serialized; a result is applied only if its identity is still the
//! current one, so a late result for a previous user never lands.

pub mod gate;
mod state;

pub use gate::has_role;
pub use state::AuthState;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use apotheca_core::{Email, RoleSet};

use crate::backend::{AuthApi, AuthChange, DataApi, SignUpData};
use crate::config::SessionConfig;
use crate::error::{add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::models::{Identity, Session};
use crate::services::{AuthError, AuthService, ProfileResolver, SignUpRequest};

/// Reactive auth state for one consumer.
///
/// Cheap to clone; clones share state and lifecycle.
pub struct SessionStore<B> {
    inner: Arc<StoreInner<B>>,
}

impl<B> Clone for SessionStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<B> {
    backend: Arc<B>,
    auth: AuthService<B>,
    resolver: ProfileResolver<B>,
    config: SessionConfig,
    state: watch::Sender<AuthState>,
    /// Cancelled by teardown. Every state write checks it.
    shutdown: CancellationToken,
    /// Cancelled once loading is over; child of `shutdown`.
    loading_gate: CancellationToken,
    tasks: TaskTracker,
    initialized: AtomicBool,
    /// Set on every session write after initialization. The initial
    /// snapshot is dropped once this is set.
    session_changed: AtomicBool,
}

impl<B: AuthApi + DataApi> SessionStore<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, config: SessionConfig) -> Self {
        let shutdown = CancellationToken::new();
        let loading_gate = shutdown.child_token();
        let (state, _) = watch::channel(AuthState::initial());

        Self {
            inner: Arc::new(StoreInner {
                auth: AuthService::new(Arc::clone(&backend)),
                resolver: ProfileResolver::new(Arc::clone(&backend)),
                backend,
                config,
                state,
                shutdown,
                loading_gate,
                tasks: TaskTracker::new(),
                initialized: AtomicBool::new(false),
                session_changed: AtomicBool::new(false),
            }),
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Current snapshot.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Receive every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Role gate over the current profile.
    #[must_use]
    pub fn has_role(&self, roles: impl Into<RoleSet>) -> bool {
        self.inner.state.borrow().has_role(roles)
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wait until `loading` is false. Returns early on teardown.
    pub async fn ready(&self) -> AuthState {
        self.wait_until(|state| !state.loading).await
    }

    /// Wait until loading is over and any due profile has been resolved.
    /// Returns early on teardown.
    pub async fn settled(&self) -> AuthState {
        self.wait_until(AuthState::is_settled).await
    }

    /// Wait until `predicate` holds for the current state. Returns early on
    /// teardown with whatever the state is then.
    pub async fn wait_until(&self, predicate: impl FnMut(&AuthState) -> bool) -> AuthState {
        let mut rx = self.subscribe();
        tokio::select! {
            result = rx.wait_for(predicate) => match result {
                Ok(state) => state.clone(),
                Err(_) => self.state(),
            },
            () = self.inner.shutdown.cancelled() => self.state(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start tracking the backend's session. Returns immediately.
    ///
    /// Calling it again, or after teardown, does nothing.
    pub fn initialize(&self) {
        if self.is_torn_down() {
            warn!("Session store initialized after teardown, ignoring");
            return;
        }
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            warn!("Session store already initialized");
            return;
        }

        // Subscribe before the initial check so no change slips in between.
        let changes = self.inner.backend.subscribe();

        self.spawn(self.clone().listen(changes));
        self.spawn(self.clone().load_initial_session());
        self.spawn(self.clone().loading_deadline());
        debug!(
            loading_timeout_ms = self.inner.config.loading_timeout.as_millis(),
            "Session store initialized"
        );
    }

    /// Stop reacting to the backend and wait for background tasks to end.
    ///
    /// Idempotent.
    pub async fn teardown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Tearing down session store");
            self.inner.shutdown.cancel();
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tasks.spawn(task);
    }

    // =========================================================================
    // Auth operations
    // =========================================================================

    /// Register a new principal. See [`AuthService::sign_up`].
    ///
    /// # Errors
    ///
    /// Returns the auth service's rejection of the sign-up.
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpData, AuthError> {
        self.inner.auth.sign_up(request).await
    }

    /// Sign in. The new session arrives through the auth-change stream.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email/password is wrong.
    pub async fn sign_in(&self, email: &Email, password: &SecretString) -> Result<(), AuthError> {
        self.inner.auth.sign_in(email, password).await
    }

    /// Sign out and clear identity, session and profile.
    ///
    /// Signing out without a session succeeds and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the backend failure and leaves the state untouched.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.auth.sign_out().await?;
        self.replace_session(None);
        Ok(())
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    async fn listen(self, mut changes: broadcast::Receiver<AuthChange>) {
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                received = changes.recv() => match received {
                    Ok(change) => self.on_auth_change(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth changes lagged, re-reading session");
                        tokio::select! {
                            () = self.inner.shutdown.cancelled() => break,
                            () = self.resync() => {}
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Auth change stream closed");
                        break;
                    }
                },
            }
        }
    }

    async fn load_initial_session(self) {
        let result = tokio::select! {
            () = self.inner.shutdown.cancelled() => return,
            result = self.inner.backend.current_session() => result,
        };

        match result {
            Ok(session) => {
                debug!(signed_in = session.is_some(), "Initial session loaded");
                let changed = &self.inner.session_changed;
                if !self.write_session(session, || changed.load(Ordering::SeqCst)) {
                    debug!("Session changed during the initial check, keeping the newer state");
                }
            }
            Err(e) => {
                warn!(error = %e, "Initial session check failed, continuing signed out");
            }
        }
        self.finish_loading();
    }

    async fn loading_deadline(self) {
        let timeout = self.inner.config.loading_timeout;
        tokio::select! {
            () = self.inner.loading_gate.cancelled() => {}
            () = tokio::time::sleep(timeout) => {
                if self.apply(|state| std::mem::replace(&mut state.loading, false)) {
                    warn!(
                        timeout_ms = timeout.as_millis(),
                        "Session check still pending, releasing loading flag"
                    );
                }
            }
        }
    }

    async fn resync(&self) {
        match self.inner.backend.current_session().await {
            Ok(session) => self.replace_session(session),
            Err(e) => warn!(error = %e, "Session re-read failed, keeping current state"),
        }
    }

    fn on_auth_change(&self, change: AuthChange) {
        let identity = change.session.as_ref().map(|s| &s.identity);
        let email = identity.map_or("-", Identity::display_email);
        info!(event = %change.event, email, "Auth change");

        let event = change.event.to_string();
        match identity {
            Some(identity) => {
                let id = identity.id.to_string();
                add_breadcrumb("auth", &event, &[("identity_id", &id)]);
            }
            None => add_breadcrumb("auth", &event, &[]),
        }

        self.replace_session(change.session);
        self.finish_loading();
    }

    // =========================================================================
    // State writes
    // =========================================================================

    /// Apply `update` unless the store has been torn down. `update` returns
    /// whether it changed anything.
    fn apply(&self, update: impl FnOnce(&mut AuthState) -> bool) -> bool {
        let shutdown = &self.inner.shutdown;
        let applied = self.inner.state.send_if_modified(|state| {
            if shutdown.is_cancelled() {
                return false;
            }
            update(state)
        });
        if !applied && shutdown.is_cancelled() {
            debug!("Session store torn down, dropping update");
        }
        applied
    }

    fn finish_loading(&self) {
        self.apply(|state| std::mem::replace(&mut state.loading, false));
        self.inner.loading_gate.cancel();
    }

    /// Replace session and identity. The profile survives only if the
    /// identity stayed the same; a new identity gets a fresh resolution.
    fn replace_session(&self, session: Option<Session>) {
        self.inner.session_changed.store(true, Ordering::SeqCst);
        self.write_session(session, || false);
    }

    /// Write `session` unless `superseded` holds under the state lock.
    /// Returns false only when superseded.
    fn write_session(&self, session: Option<Session>, superseded: impl FnOnce() -> bool) -> bool {
        let identity = session.as_ref().map(|s| s.identity.clone());
        let next_id = identity.as_ref().map(|i| i.id);

        let mut dropped = false;
        let applied = self.apply(|state| {
            if superseded() {
                dropped = true;
                return false;
            }
            if state.session.is_none() && session.is_none() && state.profile.is_none() {
                return false;
            }
            if state.identity.as_ref().map(|i| i.id) != next_id {
                state.profile = None;
            }
            state.identity.clone_from(&identity);
            state.session = session;
            true
        });
        if !applied {
            return !dropped;
        }

        match identity {
            Some(identity) => {
                set_sentry_user(&identity.id, identity.email.as_ref().map(Email::as_str));
                self.spawn_resolution(identity);
            }
            None => clear_sentry_user(),
        }
        true
    }

    fn spawn_resolution(&self, identity: Identity) {
        let store = self.clone();
        self.spawn(async move {
            let resolved = tokio::select! {
                () = store.inner.shutdown.cancelled() => return,
                resolved = store.inner.resolver.resolve(&identity) => resolved,
            };

            let applied = store.apply(|state| {
                if state.identity.as_ref().map(|i| i.id) != Some(identity.id) {
                    return false;
                }
                state.profile = Some(resolved);
                true
            });
            if !applied {
                debug!(identity_id = %identity.id, "Dropping profile for a stale identity");
            }
        });
    }
}
