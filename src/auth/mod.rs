//! Identity verification for storefront callers.
//!
//! Tokens are issued elsewhere; this module only checks them.

mod identity;

pub use identity::{
    AuthError, Claims, Identity, IdentityVerifier, JwtIdentityVerifier, MaybeIdentity, ADMIN_ROLE,
};
