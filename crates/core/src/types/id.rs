//! Newtype IDs for type-safe entity references.
//!
//! Every record the hosted backend owns is keyed by a UUID. Use the
//! `define_id!` macro to create wrappers that keep IDs of different record
//! kinds apart.

pub use uuid::Uuid;

/// Macro to define a type-safe UUID wrapper.
///
/// Creates a newtype wrapper around [`Uuid`] with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]` (hyphenated string form)
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - Conversion methods: `new()`, `random()`, `as_uuid()`
/// - `Display`, `FromStr`, and `From<Uuid>` implementations
///
/// # Example
///
/// ```rust
/// # use apotheca_core::define_id;
/// define_id!(ApplicationId);
/// define_id!(ListingId);
///
/// let application = ApplicationId::random();
/// let listing = ListingId::new(*application.as_uuid());
///
/// // These are different types, so this won't compile:
/// // let _: ApplicationId = listing;
/// # let _ = listing;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name($crate::types::id::Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn new(id: $crate::types::id::Uuid) -> Self {
                Self(id)
            }

            /// Generate a fresh random (v4) ID.
            #[must_use]
            pub fn random() -> Self {
                Self($crate::types::id::Uuid::new_v4())
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &$crate::types::id::Uuid {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::types::id::IdParseError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                $crate::types::id::Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| $crate::types::id::IdParseError(s.to_owned()))
            }
        }

        impl From<$crate::types::id::Uuid> for $name {
            fn from(id: $crate::types::id::Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $crate::types::id::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Error returned when a string is not a valid UUID.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid id: {0:?}")]
pub struct IdParseError(pub String);

// Identity IDs are issued by the hosted auth service; profiles share them.
define_id!(IdentityId);
