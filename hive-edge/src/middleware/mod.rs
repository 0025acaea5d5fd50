//! Explicit middleware composition
//!
//! Request order: correlation → JSON body guard → trust → version
//! negotiation → rate limit → handler. Filters produce typed errors; the
//! correlation layer is the single top-level mapper onto the uniform error
//! body.

pub mod auth;
pub mod body_guard;
pub mod correlation;
pub mod rate_limit;
pub mod version;

pub use auth::authenticate;
pub use body_guard::json_guard;
pub use correlation::correlation;
pub use rate_limit::enforce as rate_limit;
pub use version::negotiate as negotiate_version;
