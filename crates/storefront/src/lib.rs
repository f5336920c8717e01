//! Apotheca storefront session core.
//!
//! Tracks who is signed in to the storefront and what they may see:
//! the hosted backend's current session, the marketplace profile behind
//! it, and the auth operations that change them.
//!
//! # Modules
//!
//! - [`backend`] - hosted auth and data services, and an in-memory stand-in
//! - [`services`] - auth operations and profile resolution
//! - [`session`] - the reactive session store and the role gate
//! - [`config`], [`error`], [`telemetry`] - configuration, errors, logging

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod telemetry;

pub use backend::HostedClient;
pub use config::{BackendConfig, SessionConfig, StorefrontConfig};
pub use session::{AuthState, SessionStore};
