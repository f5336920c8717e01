//! Apotheca Core - Shared types library.
//!
//! This crate provides common types used across all Apotheca components:
//! - `storefront` - Client-side session core of the marketplace storefront
//! - `cli` - Command-line driver for the session core
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no network access,
//! no async runtime. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for identity IDs, emails, roles and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
