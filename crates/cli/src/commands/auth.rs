//! Sign-up, sign-in and sign-out against the hosted backend.
//!
//! # Environment Variables
//!
//! - `APOTHECA_BACKEND_URL`, `APOTHECA_ANON_KEY` - hosted backend
//! - `APOTHECA_PASSWORD` - password when `--password` is omitted
//! - `APOTHECA_SESSION_FILE` - session file (default `.apotheca/session.json`)

use secrecy::SecretString;

use apotheca_core::{Email, UserRole};
use apotheca_storefront::error::AppError;
use apotheca_storefront::models::BusinessInfo;
use apotheca_storefront::services::{AuthError, AuthService, SignUpRequest};

use crate::SignupArgs;

/// Business details from the sign-up flags, if any were given.
fn business_info(args: &SignupArgs) -> Option<BusinessInfo> {
    Some(BusinessInfo {
        business_name: args.business_name.clone()?,
        business_license: args.business_license.clone()?,
        business_address: args.business_address.clone()?,
        business_description: args.business_description.clone(),
        contact_person: args.contact_person.clone()?,
    })
}

/// Register a new account.
#[allow(clippy::print_stdout)]
pub async fn sign_up(args: SignupArgs) -> Result<(), AppError> {
    if args.role == UserRole::Admin {
        return Err(AppError::InvalidInput(
            "admin accounts cannot be created by sign-up".to_string(),
        ));
    }

    let business = business_info(&args);
    if business.is_some() && args.role != UserRole::Vendor {
        tracing::warn!(role = %args.role, "Ignoring business details for a non-vendor account");
    }

    let mut request = SignUpRequest::new(
        &args.email,
        SecretString::from(args.password),
        args.name,
        args.role,
    )?;
    if let Some(business) = business {
        request = request.with_business(business);
    }

    let (_config, client) = super::connect()?;
    let data = AuthService::new(client).sign_up(request).await?;

    match (&data.identity, &data.session) {
        (Some(identity), Some(_)) => println!("Signed up and signed in as {}", identity.id),
        (Some(identity), None) => {
            println!("Signed up as {}; confirm your email before signing in", identity.id);
        }
        (None, _) => println!("Sign-up accepted"),
    }
    Ok(())
}

/// Sign in and persist the session.
#[allow(clippy::print_stdout)]
pub async fn sign_in(email: &str, password: String) -> Result<(), AppError> {
    let email = Email::parse(email).map_err(AuthError::from)?;
    let password = SecretString::from(password);

    let (_config, client) = super::connect()?;
    AuthService::new(client).sign_in(&email, &password).await?;

    println!("Signed in as {email}");
    Ok(())
}

/// Sign out of the persisted session.
#[allow(clippy::print_stdout)]
pub async fn sign_out() -> Result<(), AppError> {
    let (_config, client) = super::connect()?;
    AuthService::new(client).sign_out().await?;

    println!("Signed out");
    Ok(())
}
