//! Core types for Apotheca.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod role;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use role::{RoleSet, UnknownRole, UserRole};
pub use status::*;
