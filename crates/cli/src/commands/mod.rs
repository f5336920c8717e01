//! Command implementations.

pub mod auth;
pub mod demo;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;

use apotheca_core::UserRole;
use apotheca_storefront::error::AppError;
use apotheca_storefront::{AuthState, HostedClient, StorefrontConfig};

/// Where the session is kept between invocations when
/// `APOTHECA_SESSION_FILE` is unset.
const DEFAULT_SESSION_FILE: &str = ".apotheca/session.json";

/// Load configuration and build the hosted client.
pub fn connect() -> Result<(StorefrontConfig, Arc<HostedClient>), AppError> {
    let mut config = StorefrontConfig::from_env()?;
    if config.backend.session_file.is_none() {
        config.backend.session_file = Some(PathBuf::from(DEFAULT_SESSION_FILE));
    }

    let client = HostedClient::new(&config.backend)?;
    tracing::debug!(backend = %config.backend.url, "Hosted client ready");
    Ok((config, Arc::new(client)))
}

/// One-line summary of a state snapshot.
pub fn summarize(state: &AuthState) -> String {
    if state.loading {
        return "loading".to_string();
    }
    let Some(identity) = &state.identity else {
        return "signed out".to_string();
    };

    let profile = match &state.profile {
        None => "profile pending".to_string(),
        Some(resolved) => {
            let profile = resolved.profile();
            format!(
                "{} ({}{})",
                profile.role.map_or("no role", UserRole::as_str),
                if profile.is_approved { "approved" } else { "not approved" },
                if resolved.is_fallback() { ", fallback" } else { "" },
            )
        }
    };
    format!("signed in as {} [{}], {profile}", identity.display_email(), identity.id)
}

/// Print a detailed state report.
#[allow(clippy::print_stdout)]
pub fn print_state(state: &AuthState) {
    println!("{}", summarize(state));

    if let Some(session) = &state.session {
        println!("  session expires: {}", session.expires_at.to_rfc3339());
    }
    if let Some(resolved) = &state.profile {
        let profile = resolved.profile();
        if let Some(name) = &profile.full_name {
            println!("  name:            {name}");
        }
        if let Some(business) = &profile.business.business_name {
            println!("  business:        {business}");
        }
        if let Some(reason) = resolved.fallback_reason() {
            println!("  fallback reason: {reason}");
        }
    }
}
