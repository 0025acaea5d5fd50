//! HTTP and WebSocket forwarding with per-target circuit breaking

pub mod breaker;
pub mod handler;
pub mod http;
pub mod ws;

pub use breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
pub use http::ProxyClient;
