//! Integration tests for the Apotheca storefront session core.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p apotheca-integration-tests
//! ```
//!
//! Nothing external is needed: the hosted backend is replaced either by the
//! in-memory backend or by [`StandIn`], a local `axum` server speaking the
//! same REST dialect as the hosted auth and data services.
//!
//! # Test Categories
//!
//! - `session_store` - store lifecycle, loading deadline, notifications
//! - `auth_operations` - sign-up side effects, sign-in, sign-out
//! - `hosted_client` - wire behavior of `HostedClient` against the stand-in

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use apotheca_core::{Email, IdentityId, UserRole};
use apotheca_storefront::backend::memory::MemoryBackend;
use apotheca_storefront::models::{BusinessDetails, BusinessInfo, Identity, Profile};
use apotheca_storefront::{BackendConfig, HostedClient};

/// Anon key the stand-in expects in the `apikey` header.
pub const ANON_KEY: &str = "stand-in-public-key-7c2f9e41";

// =============================================================================
// Fixtures
// =============================================================================

/// Business details of a vendor signing up.
#[must_use]
pub fn vendor_business() -> BusinessInfo {
    BusinessInfo {
        business_name: "Bob Pharmacy".to_string(),
        business_license: "PH-2231".to_string(),
        business_address: "1 Main St".to_string(),
        business_description: Some("Compounding".to_string()),
        contact_person: "Bob".to_string(),
    }
}

/// A stored, approved vendor profile for `id`.
#[must_use]
pub fn approved_vendor(id: IdentityId) -> Profile {
    Profile {
        id,
        full_name: Some("Bob".to_string()),
        role: Some(UserRole::Vendor),
        business: BusinessDetails {
            business_name: Some("Bob Pharmacy".to_string()),
            business_license: Some("PH-2231".to_string()),
            contact_person: Some("Bob".to_string()),
            phone: Some("555-0100".to_string()),
        },
        is_approved: true,
    }
}

/// Register `email` with password `pw` in the in-memory backend.
pub fn seed_identity(backend: &MemoryBackend, email: &str, metadata: Value) -> Identity {
    let email = Email::parse(email).expect("valid fixture email");
    backend.seed_identity(&email, "pw", metadata.as_object().cloned().unwrap_or_default())
}

// =============================================================================
// Stand-in server
// =============================================================================

/// A request as seen by the stand-in.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub apikey: Option<String>,
    pub bearer: Option<String>,
}

/// A registered user.
#[derive(Debug, Clone)]
pub struct StandInUser {
    pub id: Uuid,
    pub email: String,
    pub password: String,
    pub metadata: Value,
}

/// Everything the stand-in knows. Tests read and script it directly.
#[derive(Debug)]
pub struct StandInState {
    pub users: HashMap<String, StandInUser>,
    pub profiles: HashMap<Uuid, Value>,
    pub applications: Vec<Value>,
    pub requests: Vec<RecordedRequest>,
    pub access_tokens: HashMap<String, Uuid>,
    pub refresh_tokens: HashMap<String, Uuid>,
    /// Lifetime of issued access tokens, in seconds.
    pub expires_in: i64,
    pub require_email_confirmation: bool,
    pub reject_applications: bool,
    /// Answer password grants with 429 and this `Retry-After`.
    pub rate_limit_sign_in: Option<u64>,
}

impl Default for StandInState {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            profiles: HashMap::new(),
            applications: Vec::new(),
            requests: Vec::new(),
            access_tokens: HashMap::new(),
            refresh_tokens: HashMap::new(),
            expires_in: 3600,
            require_email_confirmation: false,
            reject_applications: false,
            rate_limit_sign_in: None,
        }
    }
}

type Shared = Arc<Mutex<StandInState>>;

fn lock(state: &Shared) -> MutexGuard<'_, StandInState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local server answering the hosted backend's auth and REST endpoints.
pub struct StandIn {
    pub url: String,
    state: Shared,
    server: tokio::task::JoinHandle<()>,
}

impl StandIn {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(StandInState::default()));
        let app = router(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind stand-in listener");
        let addr = listener.local_addr().expect("stand-in address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stand-in server");
        });

        Self {
            url: format!("http://{addr}"),
            state,
            server,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, StandInState> {
        lock(&self.state)
    }

    /// Backend configuration pointing at this stand-in.
    #[must_use]
    pub fn config(&self) -> BackendConfig {
        BackendConfig::new(&self.url, SecretString::from(ANON_KEY)).expect("stand-in config")
    }

    /// A fresh client for this stand-in.
    #[must_use]
    pub fn client(&self) -> HostedClient {
        HostedClient::new(&self.config()).expect("stand-in client")
    }

    /// Requests received for `path`, oldest first.
    #[must_use]
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// Store a profile row as the hosted database would return it.
    pub fn put_profile(&self, profile: &Profile) {
        let row = json!({
            "id": profile.id,
            "full_name": profile.full_name,
            "role": profile.role,
            "business_name": profile.business.business_name,
            "business_license": profile.business.business_license,
            "contact_person": profile.business.contact_person,
            "phone": profile.business.phone,
            "is_approved": profile.is_approved,
        });
        self.state().profiles.insert(*profile.id.as_uuid(), row);
    }

    /// Invalidate every refresh token issued so far.
    pub fn revoke_refresh_tokens(&self) {
        self.state().refresh_tokens.clear();
    }
}

impl Drop for StandIn {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/auth/v1/signup", post(sign_up))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/profiles", get(select_profile))
        .route("/rest/v1/vendor_applications", post(insert_application))
        .with_state(state)
}

fn record(state: &Shared, method: Method, uri: &Uri, headers: &HeaderMap) {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let bearer = header_str(header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string));

    lock(state).requests.push(RecordedRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        apikey: header_str("apikey"),
        bearer,
    });
}

fn auth_error(status: StatusCode, code: &str, msg: &str) -> Response {
    (
        status,
        Json(json!({ "code": status.as_u16(), "error_code": code, "msg": msg })),
    )
        .into_response()
}

fn user_json(user: &StandInUser) -> Value {
    json!({
        "id": user.id,
        "aud": "authenticated",
        "email": user.email,
        "user_metadata": user.metadata,
    })
}

fn issue_grant(state: &mut StandInState, user: &StandInUser) -> Value {
    let access = format!("access-{}", Uuid::new_v4());
    let refresh = format!("refresh-{}", Uuid::new_v4());
    state.access_tokens.insert(access.clone(), user.id);
    state.refresh_tokens.insert(refresh.clone(), user.id);

    json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": state.expires_in,
        "refresh_token": refresh,
        "user": user_json(user),
    })
}

#[derive(Deserialize)]
struct SignUpBody {
    email: String,
    password: String,
    #[serde(default)]
    data: Value,
}

async fn sign_up(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<SignUpBody>,
) -> Response {
    record(&state, method, &uri, &headers);
    let mut guard = lock(&state);

    if guard.users.contains_key(&body.email) {
        return auth_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "user_already_exists",
            "User already registered",
        );
    }

    let user = StandInUser {
        id: Uuid::new_v4(),
        email: body.email.clone(),
        password: body.password,
        metadata: body.data.clone(),
    };
    guard.users.insert(body.email, user.clone());

    // What the `on_auth_user_created` trigger does in the hosted database.
    guard.profiles.insert(
        user.id,
        json!({
            "id": user.id,
            "full_name": body.data.get("full_name"),
            "role": body.data.get("role"),
            "business_name": null,
            "business_license": null,
            "contact_person": null,
            "phone": null,
            "is_approved": false,
        }),
    );

    if guard.require_email_confirmation {
        Json(user_json(&user)).into_response()
    } else {
        Json(issue_grant(&mut guard, &user)).into_response()
    }
}

#[derive(Deserialize)]
struct GrantQuery {
    grant_type: String,
}

#[derive(Deserialize)]
struct GrantBody {
    email: Option<String>,
    password: Option<String>,
    refresh_token: Option<String>,
}

async fn token(
    State(state): State<Shared>,
    Query(query): Query<GrantQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<GrantBody>,
) -> Response {
    record(&state, method, &uri, &headers);
    let mut guard = lock(&state);

    match query.grant_type.as_str() {
        "password" => {
            if let Some(retry_after) = guard.rate_limit_sign_in {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after.to_string())],
                    Json(json!({ "code": 429, "error_code": "over_request_rate_limit", "msg": "Request rate limit reached" })),
                )
                    .into_response();
            }
            let user = body
                .email
                .as_deref()
                .and_then(|email| guard.users.get(email))
                .filter(|user| Some(&user.password) == body.password.as_ref())
                .cloned();
            match user {
                Some(user) => Json(issue_grant(&mut guard, &user)).into_response(),
                None => auth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_credentials",
                    "Invalid login credentials",
                ),
            }
        }
        "refresh_token" => {
            let user_id = body
                .refresh_token
                .as_deref()
                .and_then(|token| guard.refresh_tokens.remove(token));
            let user = user_id.and_then(|id| guard.users.values().find(|u| u.id == id).cloned());
            match user {
                Some(user) => Json(issue_grant(&mut guard, &user)).into_response(),
                None => auth_error(
                    StatusCode::BAD_REQUEST,
                    "refresh_token_not_found",
                    "Invalid Refresh Token: Refresh Token Not Found",
                ),
            }
        }
        other => auth_error(
            StatusCode::BAD_REQUEST,
            "validation_failed",
            &format!("unsupported grant_type {other}"),
        ),
    }
}

async fn logout(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> StatusCode {
    record(&state, method, &uri, &headers);
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let mut guard = lock(&state);
    match token.and_then(|t| guard.access_tokens.remove(&t)) {
        Some(user_id) => {
            guard.refresh_tokens.retain(|_, id| *id != user_id);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::UNAUTHORIZED,
    }
}

async fn select_profile(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, method, &uri, &headers);

    let wants_object = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/vnd.pgrst.object+json");
    let id = query
        .get("id")
        .and_then(|filter| filter.strip_prefix("eq."))
        .and_then(|raw| raw.parse::<Uuid>().ok());

    let row = id.and_then(|id| lock(&state).profiles.get(&id).cloned());
    match (row, wants_object) {
        (Some(row), true) => Json(row).into_response(),
        (Some(row), false) => Json(json!([row])).into_response(),
        (None, true) => (
            StatusCode::NOT_ACCEPTABLE,
            Json(json!({
                "code": "PGRST116",
                "details": "The result contains 0 rows",
                "hint": null,
                "message": "JSON object requested, multiple (or no) rows returned"
            })),
        )
            .into_response(),
        (None, false) => Json(json!([])).into_response(),
    }
}

async fn insert_application(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, method, &uri, &headers);
    let mut guard = lock(&state);

    if guard.reject_applications {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "code": "42501",
                "details": null,
                "hint": null,
                "message": "new row violates row-level security policy for table \"vendor_applications\""
            })),
        )
            .into_response();
    }

    guard.applications.push(body);
    StatusCode::CREATED.into_response()
}
