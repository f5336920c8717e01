//! REST client for the hosted auth and data services.
//!
//! One [`HostedClient`] owns the current session. It restores it from the
//! session file on first use, renews it shortly before expiry, and announces
//! every change on its broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use apotheca_core::{AuthEvent, IdentityId};

use super::persist::SessionFile;
use super::types::{
    ApiErrorBody, PROFILE_COLUMNS, PasswordGrant, ProfileRow, RefreshGrant, SignUpBody,
    SignUpMetadata, SignUpResponse, TokenResponse,
};
use super::{
    AUTH_CHANGE_CAPACITY, AuthApi, AuthChange, BackendError, Credentials, DataApi, SignUpData,
    SignUpParams,
};
use crate::config::BackendConfig;
use crate::models::{NewVendorApplication, Profile, Session};

/// Sessions this close to expiry are renewed before being handed out.
const REFRESH_MARGIN: TimeDelta = TimeDelta::seconds(60);

/// Pause before the auto-refresh task retries a failed renewal.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(10);

/// PostgREST answers a single-object request matching no rows with 406.
const PGRST_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Client for the hosted backend.
///
/// Cheap to clone; clones share the session and the change channel.
#[derive(Clone)]
pub struct HostedClient {
    inner: Arc<HostedClientInner>,
}

struct HostedClientInner {
    http: reqwest::Client,
    base: Url,
    anon_key: SecretString,
    email_redirect_to: Option<Url>,
    slot: Mutex<SessionSlot>,
    changes: broadcast::Sender<AuthChange>,
    session_file: Option<SessionFile>,
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    /// Whether the session file has been read yet.
    restored: bool,
}

impl HostedClient {
    /// Create a client from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the anon key is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut apikey = HeaderValue::from_str(config.anon_key.expose_secret())
            .map_err(|e| BackendError::Config(format!("anon key: {e}")))?;
        apikey.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("apikey", apikey);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        let (changes, _) = broadcast::channel(AUTH_CHANGE_CAPACITY);

        Ok(Self {
            inner: Arc::new(HostedClientInner {
                http,
                base: config.url.clone(),
                anon_key: config.anon_key.clone(),
                email_redirect_to: config.email_redirect_to.clone(),
                slot: Mutex::new(SessionSlot::default()),
                changes,
                session_file: config.session_file.clone().map(SessionFile::new),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.inner.base.join(path)?)
    }

    /// Bearer token for data requests: the session's access token, or the
    /// anon key when signed out.
    async fn bearer(&self) -> String {
        let slot = self.inner.slot.lock().await;
        slot.session.as_ref().map_or_else(
            || self.inner.anon_key.expose_secret().to_owned(),
            |s| s.access_token.expose_secret().to_owned(),
        )
    }

    /// Send a request, turning error statuses into [`BackendError`]s.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(BackendError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Backend returned non-success status"
            );
            let parsed = serde_json::from_str::<ApiErrorBody>(&body).unwrap_or_default();
            return Err(BackendError::Api(parsed.into_api_error(status.as_u16())));
        }

        Ok(response)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &impl Serialize,
    ) -> Result<Session, BackendError> {
        let url = self.endpoint("auth/v1/token")?;
        let request = self
            .inner
            .http
            .post(url)
            .query(&[("grant_type", grant_type)])
            .bearer_auth(self.inner.anon_key.expose_secret())
            .json(body);

        let text = self.send(request).await?.text().await?;
        let grant: TokenResponse = serde_json::from_str(&text)?;
        Ok(grant.into_session(Utc::now()))
    }

    /// Read the session file once per client.
    async fn ensure_restored(&self, slot: &mut SessionSlot) {
        if slot.restored {
            return;
        }
        slot.restored = true;

        if let Some(file) = &self.inner.session_file {
            match file.load().await {
                Ok(session) => slot.session = session,
                Err(e) => {
                    warn!(path = %file.path().display(), error = %e, "Failed to read session file");
                }
            }
        }
    }

    /// Replace the session, persist it, and announce the change.
    async fn commit(&self, slot: &mut SessionSlot, session: Option<Session>, event: AuthEvent) {
        slot.session.clone_from(&session);
        slot.restored = true;

        if let Some(file) = &self.inner.session_file {
            let result = match &session {
                Some(session) => file.save(session).await,
                None => file.clear().await,
            };
            if let Err(e) = result {
                warn!(path = %file.path().display(), error = %e, "Failed to persist session");
            }
        }

        debug!(%event, "Auth state changed");
        if self.inner.changes.send(AuthChange { event, session }).is_err() {
            debug!("No auth-change subscribers");
        }
    }

    /// Exchange the refresh token. A rejected token ends the session.
    async fn refresh_locked(
        &self,
        slot: &mut SessionSlot,
        session: &Session,
    ) -> Result<Session, BackendError> {
        let grant = RefreshGrant {
            refresh_token: session.refresh_token.expose_secret(),
        };
        match self.token_grant("refresh_token", &grant).await {
            Ok(fresh) => {
                self.commit(slot, Some(fresh.clone()), AuthEvent::TokenRefreshed)
                    .await;
                Ok(fresh)
            }
            Err(e) => {
                if e.is_auth_rejection() {
                    warn!(
                        identity_id = %session.identity.id,
                        error = %e,
                        "Refresh token rejected, signing out"
                    );
                    self.commit(slot, None, AuthEvent::SignedOut).await;
                }
                Err(e)
            }
        }
    }

    /// Renew the current session now.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NoSession`] when signed out, or the renewal
    /// failure. A rejected refresh token also signs the client out.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<Session, BackendError> {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_restored(&mut slot).await;
        let session = slot.session.clone().ok_or(BackendError::NoSession)?;
        self.refresh_locked(&mut slot, &session).await
    }

    /// Keep the session renewed in the background until `shutdown` fires.
    ///
    /// Renews [`REFRESH_MARGIN`] before expiry and retries transient
    /// failures after a pause. Idles while signed out.
    pub fn spawn_auto_refresh(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let client = self.clone();
        let mut changes = self.subscribe();

        tokio::spawn(async move {
            loop {
                let delay = match client.current_session().await {
                    Ok(Some(session)) => Some(
                        session
                            .remaining(Utc::now())
                            .saturating_sub(REFRESH_MARGIN.to_std().unwrap_or_default()),
                    ),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(error = %e, "Session check failed, retrying later");
                        Some(REFRESH_RETRY_DELAY)
                    }
                };

                tokio::select! {
                    () = shutdown.cancelled() => break,
                    change = changes.recv() => {
                        if matches!(change, Err(broadcast::error::RecvError::Closed)) {
                            break;
                        }
                    }
                    () = sleep_for(delay) => {
                        match client.refresh_session().await {
                            Ok(session) => {
                                debug!(expires_at = %session.expires_at, "Session renewed");
                            }
                            Err(e) if e.is_auth_rejection() || matches!(e, BackendError::NoSession) => {}
                            Err(e) => {
                                warn!(error = %e, "Session renewal failed");
                                tokio::select! {
                                    () = shutdown.cancelled() => break,
                                    () = tokio::time::sleep(REFRESH_RETRY_DELAY) => {}
                                }
                            }
                        }
                    }
                }
            }
            debug!("Auto-refresh stopped");
        })
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

impl AuthApi for HostedClient {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_restored(&mut slot).await;

        let Some(session) = slot.session.clone() else {
            return Ok(None);
        };
        let now = Utc::now();
        if !session.expires_within(now, REFRESH_MARGIN) {
            return Ok(Some(session));
        }

        match self.refresh_locked(&mut slot, &session).await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(e) if e.is_auth_rejection() => Ok(None),
            Err(e) if !session.is_expired_at(now) => {
                warn!(error = %e, "Early renewal failed, keeping current session");
                Ok(Some(session))
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.inner.changes.subscribe()
    }

    #[instrument(skip(self, params), fields(email = %params.credentials.email, role = %params.role))]
    async fn sign_up(&self, params: &SignUpParams) -> Result<SignUpData, BackendError> {
        let mut url = self.endpoint("auth/v1/signup")?;
        if let Some(redirect) = &self.inner.email_redirect_to {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }

        let body = SignUpBody {
            email: params.credentials.email.as_str(),
            password: params.credentials.password.expose_secret(),
            data: SignUpMetadata {
                full_name: &params.full_name,
                role: params.role,
            },
        };
        let request = self
            .inner
            .http
            .post(url)
            .bearer_auth(self.inner.anon_key.expose_secret())
            .json(&body);

        let text = self.send(request).await?.text().await?;
        match serde_json::from_str::<SignUpResponse>(&text)? {
            SignUpResponse::Session(grant) => {
                let session = grant.into_session(Utc::now());
                let mut slot = self.inner.slot.lock().await;
                self.commit(&mut slot, Some(session.clone()), AuthEvent::SignedIn)
                    .await;
                Ok(SignUpData {
                    identity: Some(session.identity.clone()),
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => {
                debug!("Sign-up awaiting email confirmation");
                Ok(SignUpData {
                    identity: Some(user.into_identity()),
                    session: None,
                })
            }
        }
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, BackendError> {
        let grant = PasswordGrant {
            email: credentials.email.as_str(),
            password: credentials.password.expose_secret(),
        };
        let session = self.token_grant("password", &grant).await?;

        let mut slot = self.inner.slot.lock().await;
        self.commit(&mut slot, Some(session.clone()), AuthEvent::SignedIn)
            .await;
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_restored(&mut slot).await;
        let Some(session) = slot.session.clone() else {
            return Ok(());
        };

        let url = self.endpoint("auth/v1/logout")?;
        let request = self
            .inner
            .http
            .post(url)
            .bearer_auth(session.access_token.expose_secret());

        match self.send(request).await {
            Ok(_) => {}
            Err(BackendError::Api(api)) if matches!(api.status, 401 | 403 | 404) => {
                debug!(status = api.status, "Session already invalid on the server");
            }
            Err(e) => return Err(e),
        }

        self.commit(&mut slot, None, AuthEvent::SignedOut).await;
        Ok(())
    }
}

impl DataApi for HostedClient {
    #[instrument(skip(self), fields(identity_id = %id))]
    async fn fetch_profile(&self, id: IdentityId) -> Result<Profile, BackendError> {
        let mut url = self.endpoint("rest/v1/profiles")?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{id}"))
            .append_pair("select", PROFILE_COLUMNS);

        let request = self
            .inner
            .http
            .get(url)
            .bearer_auth(self.bearer().await)
            .header(ACCEPT, PGRST_OBJECT);

        let response = match self.send(request).await {
            Err(BackendError::Api(api)) if api.status == 406 => {
                return Err(BackendError::NotFound(format!("profile {id}")));
            }
            other => other?,
        };

        let text = response.text().await?;
        let row: ProfileRow = serde_json::from_str(&text)?;
        Ok(Profile::from(row))
    }

    #[instrument(skip(self, application), fields(user_id = %application.user_id))]
    async fn insert_vendor_application(
        &self,
        application: &NewVendorApplication,
    ) -> Result<(), BackendError> {
        let url = self.endpoint("rest/v1/vendor_applications")?;
        let request = self
            .inner
            .http
            .post(url)
            .bearer_auth(self.bearer().await)
            .header("Prefer", "return=minimal")
            .json(application);

        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(url: &str) -> BackendConfig {
        BackendConfig::new(url, SecretString::from("anon-key-for-tests-3f9a1c")).unwrap()
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let client = HostedClient::new(&config("https://proj.example.co/base")).unwrap();
        assert_eq!(
            client.endpoint("auth/v1/token").unwrap().as_str(),
            "https://proj.example.co/base/auth/v1/token"
        );
    }

    #[tokio::test]
    async fn test_signed_out_client_uses_anon_bearer() {
        let client = HostedClient::new(&config("https://proj.example.co")).unwrap();
        assert_eq!(client.bearer().await, "anon-key-for-tests-3f9a1c");
        assert!(client.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_without_session_skips_network() {
        // Unroutable base: any request would fail.
        let client = HostedClient::new(&config("http://127.0.0.1:9")).unwrap();
        let mut changes = client.subscribe();
        client.sign_out().await.unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_no_session() {
        let client = HostedClient::new(&config("http://127.0.0.1:9")).unwrap();
        assert!(matches!(
            client.refresh_session().await,
            Err(BackendError::NoSession)
        ));
    }
}
