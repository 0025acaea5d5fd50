//! Multi-dimensional rate limiting backed by the shared cache

pub mod engine;
pub mod quota;

pub use engine::{CheckRequest, RateLimitEngine};
pub use quota::{ApiKeyTier, Decision, Dimension, QuotaSpec};
