//! Integration tests for sign-up, sign-in and sign-out through the session
//! store, against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;

use apotheca_core::{ApplicationStatus, Email, UserRole};
use apotheca_integration_tests::{approved_vendor, seed_identity, vendor_business};
use apotheca_storefront::backend::memory::MemoryBackend;
use apotheca_storefront::models::ResolvedProfile;
use apotheca_storefront::services::{AuthError, SignUpRequest};
use apotheca_storefront::{SessionConfig, SessionStore};

async fn ready_store(backend: &Arc<MemoryBackend>) -> SessionStore<MemoryBackend> {
    let store = SessionStore::new(Arc::clone(backend), SessionConfig::default());
    store.initialize();
    store.ready().await;
    store
}

fn request(email: &str, name: &str, role: UserRole) -> SignUpRequest {
    SignUpRequest::new(email, SecretString::from("pw"), name, role).expect("valid request")
}

fn password() -> SecretString {
    SecretString::from("pw")
}

// =============================================================================
// Sign-Up
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_consumer_sign_up_signs_in_without_application() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ready_store(&backend).await;

    let data = store
        .sign_up(request("ann@x.com", "Ann", UserRole::Consumer).with_business(vendor_business()))
        .await
        .expect("sign-up succeeds");
    let identity = data.identity.expect("identity returned");
    assert!(data.session.is_some());
    assert_eq!(backend.vendor_application_attempts(), 0);

    let state = store.wait_until(|s| s.profile.is_some()).await;
    assert_eq!(state.identity.as_ref().map(|i| i.id), Some(identity.id));
    let profile = state.profile().expect("profile");
    assert_eq!(profile.role, Some(UserRole::Consumer));
    assert_eq!(profile.full_name.as_deref(), Some("Ann"));

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_vendor_sign_up_files_pending_application() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ready_store(&backend).await;

    let data = store
        .sign_up(request("bob@x.com", "Bob", UserRole::Vendor).with_business(vendor_business()))
        .await
        .expect("sign-up succeeds");
    let identity = data.identity.expect("identity returned");

    let applications = backend.vendor_applications();
    assert_eq!(applications.len(), 1);
    let application = applications.first().expect("one application");
    assert_eq!(application.user_id, identity.id);
    assert_eq!(application.email.as_str(), "bob@x.com");
    assert_eq!(application.business_name, "Bob Pharmacy");
    assert_eq!(application.business_license, "PH-2231");
    assert_eq!(application.business_address, "1 Main St");
    assert_eq!(application.business_description.as_deref(), Some("Compounding"));
    assert_eq!(application.contact_person, "Bob");
    assert_eq!(application.status, ApplicationStatus::Pending);

    let state = store.wait_until(|s| s.profile.is_some()).await;
    let profile = state.profile().expect("profile");
    assert_eq!(profile.role, Some(UserRole::Vendor));
    assert!(!profile.is_approved);

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_vendor_sign_up_survives_application_failure() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_vendor_application(Some("row-level security"));
    let store = ready_store(&backend).await;

    let data = store
        .sign_up(request("bob@x.com", "Bob", UserRole::Vendor).with_business(vendor_business()))
        .await
        .expect("sign-up reported as successful");

    assert!(data.identity.is_some());
    assert!(data.session.is_some());
    assert_eq!(backend.vendor_application_attempts(), 1);
    assert!(backend.vendor_applications().is_empty());

    let state = store.wait_until(|s| s.profile.is_some()).await;
    assert!(state.has_role(UserRole::Vendor));

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_up_awaiting_confirmation_stays_signed_out() {
    let backend = Arc::new(MemoryBackend::new());
    backend.require_email_confirmation(true);
    let store = ready_store(&backend).await;

    let data = store
        .sign_up(request("bob@x.com", "Bob", UserRole::Vendor).with_business(vendor_business()))
        .await
        .expect("sign-up succeeds");

    assert!(data.identity.is_some());
    assert!(data.session.is_none());
    // The identity exists, so the application is still filed.
    assert_eq!(backend.vendor_applications().len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = store.state();
    assert!(!state.is_signed_in());
    assert!(state.identity.is_none());

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_sign_up_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    seed_identity(&backend, "ann@x.com", json!({}));
    let store = ready_store(&backend).await;

    let err = store
        .sign_up(request("ann@x.com", "Ann", UserRole::Consumer))
        .await
        .expect_err("duplicate email");
    assert!(matches!(err, AuthError::UserAlreadyExists));
    assert!(err.is_user_error());
    assert!(!store.state().is_signed_in());

    store.teardown().await;
}

#[test]
fn test_sign_up_request_validates_email() {
    let err = SignUpRequest::new("ann-at-x", password(), "Ann", UserRole::Consumer)
        .expect_err("malformed email");
    assert!(matches!(err, AuthError::InvalidEmail(_)));
}

// =============================================================================
// Sign-In
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_in_state_arrives_by_notification() {
    let backend = Arc::new(MemoryBackend::new());
    let identity = seed_identity(&backend, "bob@x.com", json!({}));
    backend.put_profile(approved_vendor(identity.id));
    let store = ready_store(&backend).await;

    let email = Email::parse("bob@x.com").expect("valid email");
    store.sign_in(&email, &password()).await.expect("sign-in");

    let state = store.wait_until(|s| s.profile.is_some()).await;
    assert_eq!(state.identity.map(|i| i.id), Some(identity.id));
    assert!(matches!(state.profile, Some(ResolvedProfile::Remote(_))));
    assert!(store.has_role(UserRole::Vendor));

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wrong_password_leaves_state_untouched() {
    let backend = Arc::new(MemoryBackend::new());
    seed_identity(&backend, "bob@x.com", json!({}));
    let store = ready_store(&backend).await;

    let email = Email::parse("bob@x.com").expect("valid email");
    let err = store
        .sign_in(&email, &SecretString::from("wrong"))
        .await
        .expect_err("wrong password");
    assert!(matches!(err, AuthError::InvalidCredentials));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = store.state();
    assert!(!state.loading);
    assert!(state.identity.is_none());
    assert!(state.session.is_none());
    assert!(backend.session().is_none());

    store.teardown().await;
}

// =============================================================================
// Sign-Out
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_sign_out_keeps_session() {
    let backend = Arc::new(MemoryBackend::new());
    let identity = seed_identity(&backend, "ann@x.com", json!({}));
    backend.set_session_silently(&identity);
    let store = ready_store(&backend).await;
    store.settled().await;

    backend.fail_sign_out(Some("offline"));
    let err = store.sign_out().await.expect_err("sign-out fails");
    assert!(matches!(err, AuthError::Backend(_)));
    assert!(!err.is_user_error());

    let state = store.state();
    assert!(state.is_signed_in());
    assert!(state.profile.is_some());

    backend.fail_sign_out(None);
    store.sign_out().await.expect("sign-out succeeds");

    // Cleared on return, before the notification is processed.
    let state = store.state();
    assert!(state.identity.is_none());
    assert!(state.session.is_none());
    assert!(state.profile.is_none());

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_without_session_changes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ready_store(&backend).await;

    let mut rx = store.subscribe();
    rx.borrow_and_update();

    store.sign_out().await.expect("no-op sign-out");
    store.sign_out().await.expect("repeated sign-out");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!rx.has_changed().expect("store alive"));

    store.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_after_sign_out_resolves_new_identity() {
    let backend = Arc::new(MemoryBackend::new());
    let ann = seed_identity(&backend, "ann@x.com", json!({}));
    let bob = seed_identity(&backend, "bob@x.com", json!({}));
    backend.put_profile(approved_vendor(bob.id));
    backend.set_session_silently(&ann);
    let store = ready_store(&backend).await;
    store.settled().await;

    store.sign_out().await.expect("sign-out");
    let email = Email::parse("bob@x.com").expect("valid email");
    store.sign_in(&email, &password()).await.expect("sign-in");

    let state = store
        .wait_until(|s| s.profile().is_some_and(|p| p.id == bob.id))
        .await;
    assert_eq!(state.identity.map(|i| i.id), Some(bob.id));
    assert!(store.has_role(UserRole::Vendor));
    assert!(!store.state().profile().is_some_and(|p| p.id == ann.id));

    store.teardown().await;
}
