//! Business logic services over the hosted backend.
//!
//! # Services
//!
//! - `auth` - Sign-up (with the vendor application side effect), sign-in,
//!   sign-out
//! - `profile` - Identity to profile resolution with fallback
//!
//! Both are generic over the backend traits in [`crate::backend`] and hold
//! it behind an `Arc`, so the session store and the services share one
//! client.

pub mod auth;
pub mod profile;

pub use auth::{AuthError, AuthService, SignUpRequest};
pub use profile::ProfileResolver;
