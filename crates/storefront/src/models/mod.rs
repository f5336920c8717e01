//! Domain models for the storefront session core.
//!
//! These are validated domain objects, separate from the backend's wire
//! shapes (see `backend::types`).

pub mod identity;
pub mod profile;
pub mod vendor_application;

pub use identity::{Identity, Session};
pub use profile::{BusinessDetails, Profile, ResolvedProfile};
pub use vendor_application::{BusinessInfo, NewVendorApplication};
