//! Offline walkthrough against the in-memory backend.

use std::sync::Arc;

use secrecy::SecretString;

use apotheca_core::{Email, IdentityId, UserRole};
use apotheca_storefront::backend::memory::MemoryBackend;
use apotheca_storefront::error::AppError;
use apotheca_storefront::models::BusinessInfo;
use apotheca_storefront::services::{AuthError, SignUpRequest};
use apotheca_storefront::{AuthState, SessionConfig, SessionStore};

type Store = SessionStore<MemoryBackend>;

async fn settled_as(store: &Store, id: IdentityId) -> AuthState {
    store
        .wait_until(|state| {
            state.is_settled() && state.identity.as_ref().map(|i| i.id) == Some(id)
        })
        .await
}

#[allow(clippy::print_stdout)]
fn report(step: &str, store: &Store, state: &AuthState) {
    println!("\n== {step}");
    super::print_state(state);
    println!(
        "  gates:           consumer={} vendor={} vendor|admin={}",
        store.has_role(UserRole::Consumer),
        store.has_role(UserRole::Vendor),
        store.has_role([UserRole::Vendor, UserRole::Admin]),
    );
}

/// Run the walkthrough.
#[allow(clippy::print_stdout)]
pub async fn run() -> Result<(), AppError> {
    let backend = Arc::new(MemoryBackend::new());
    let store = SessionStore::new(Arc::clone(&backend), SessionConfig::default());

    store.initialize();
    let state = store.ready().await;
    report("initialized", &store, &state);

    // Consumer sign-up: no vendor application.
    let data = store
        .sign_up(SignUpRequest::new(
            "ann@example.com",
            SecretString::from("ann-password"),
            "Ann",
            UserRole::Consumer,
        )?)
        .await?;
    if let Some(identity) = &data.identity {
        let state = settled_as(&store, identity.id).await;
        report("consumer signed up", &store, &state);
    }
    store.sign_out().await?;
    report("signed out", &store, &store.state());

    // Vendor sign-up whose application insert fails: sign-up still succeeds.
    backend.fail_vendor_application(Some("vendor_applications insert denied"));
    let request = SignUpRequest::new(
        "bob@example.com",
        SecretString::from("bob-password"),
        "Bob",
        UserRole::Vendor,
    )?
    .with_business(BusinessInfo {
        business_name: "Bob Pharmacy".to_string(),
        business_license: "PH-2231".to_string(),
        business_address: "1 Main St".to_string(),
        business_description: Some("Compounding and delivery".to_string()),
        contact_person: "Bob".to_string(),
    });
    let data = store.sign_up(request).await?;
    println!(
        "\n   vendor application attempts: {}, stored: {}",
        backend.vendor_application_attempts(),
        backend.vendor_applications().len()
    );
    if let Some(identity) = &data.identity {
        let state = settled_as(&store, identity.id).await;
        report("vendor signed up", &store, &state);
    }
    store.sign_out().await?;

    // Profile lookups failing: sign-in still yields a usable fallback.
    backend.fail_profile_fetch(Some("connection reset"));
    let email = Email::parse("bob@example.com").map_err(AuthError::from)?;
    store
        .sign_in(&email, &SecretString::from("bob-password"))
        .await?;
    let state = store
        .wait_until(|state| state.profile.as_ref().is_some_and(|p| p.is_fallback()))
        .await;
    report("vendor signed in, profile service down", &store, &state);

    store.sign_out().await?;
    store.sign_out().await?;
    report("signed out twice", &store, &store.state());

    store.teardown().await;
    Ok(())
}
