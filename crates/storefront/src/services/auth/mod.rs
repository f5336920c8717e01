//! Authentication service.
//!
//! Sign-up, sign-in and sign-out against the hosted auth service. Session
//! state is not touched here: the backend announces every change and the
//! session store reacts to it.

mod error;

pub use error::AuthError;

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{error, info, instrument};

use apotheca_core::{Email, UserRole};

use crate::backend::{AuthApi, Credentials, DataApi, SignUpData, SignUpParams};
use crate::models::{BusinessInfo, Identity, NewVendorApplication};

/// Everything collected by the sign-up form.
#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: Email,
    pub password: SecretString,
    pub full_name: String,
    pub role: UserRole,
    /// Only acted on when `role` is vendor.
    pub business: Option<BusinessInfo>,
}

impl SignUpRequest {
    /// Build a request from raw form input.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` if the email format is invalid.
    pub fn new(
        email: &str,
        password: SecretString,
        full_name: impl Into<String>,
        role: UserRole,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            email: Email::parse(email)?,
            password,
            full_name: full_name.into(),
            role,
            business: None,
        })
    }

    /// Attach vendor business details.
    #[must_use]
    pub fn with_business(mut self, business: BusinessInfo) -> Self {
        self.business = Some(business);
        self
    }
}

/// Authentication service.
pub struct AuthService<B> {
    backend: Arc<B>,
}

impl<B> Clone for AuthService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: AuthApi + DataApi> AuthService<B> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Register a new principal.
    ///
    /// A vendor who supplied business details also gets a pending vendor
    /// application. That insert is best effort: its failure is logged and
    /// reported, and the sign-up result is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the auth service's rejection of the sign-up, classified.
    #[instrument(skip(self, request), fields(email = %request.email, role = %request.role))]
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpData, AuthError> {
        let SignUpRequest {
            email,
            password,
            full_name,
            role,
            business,
        } = request;

        let params = SignUpParams {
            credentials: Credentials {
                email: email.clone(),
                password,
            },
            full_name,
            role,
        };
        let data = self.backend.sign_up(&params).await?;

        info!(
            identity_id = ?data.identity.as_ref().map(|i| i.id),
            confirmed = data.session.is_some(),
            "Sign-up accepted"
        );

        if role == UserRole::Vendor
            && let Some(business) = &business
            && let Some(identity) = &data.identity
        {
            self.submit_vendor_application(identity, email, business)
                .await;
        }

        Ok(data)
    }

    async fn submit_vendor_application(
        &self,
        identity: &Identity,
        email: Email,
        business: &BusinessInfo,
    ) {
        let application = NewVendorApplication::pending(identity.id, email, business);
        match self.backend.insert_vendor_application(&application).await {
            Ok(()) => {
                info!(
                    identity_id = %identity.id,
                    business_name = %application.business_name,
                    "Vendor application submitted"
                );
            }
            Err(e) => {
                error!(
                    identity_id = %identity.id,
                    business_name = %application.business_name,
                    error = %e,
                    "Vendor application could not be created"
                );
                crate::error::capture_swallowed(&e, "vendor_application");
            }
        }
    }

    /// Sign in with email and password.
    ///
    /// The new session reaches subscribers through the backend's
    /// auth-change notification.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email/password is wrong.
    #[instrument(skip(self, email, password), fields(email = %email))]
    pub async fn sign_in(&self, email: &Email, password: &SecretString) -> Result<(), AuthError> {
        let credentials = Credentials {
            email: email.clone(),
            password: password.clone(),
        };
        let session = self.backend.sign_in_with_password(&credentials).await?;
        info!(identity_id = %session.identity.id, "Signed in");
        Ok(())
    }

    /// End the current session. A no-op without one.
    ///
    /// # Errors
    ///
    /// Returns the backend failure; the session is then still active.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.backend.sign_out().await?;
        Ok(())
    }
}
