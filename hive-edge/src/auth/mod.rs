//! Trust chain: token verification, revocation, and the session service

pub mod claims;
pub mod handlers;
pub mod revocation;
pub mod verifier;

pub use claims::{Claims, Principal, AUTH_PROVIDER};
pub use revocation::{fingerprint, RevocationStore};
pub use verifier::{TokenVerifier, VerifiedToken, VerifyFailure};
