//! Real-time collaborative fan-out over topic-keyed pub/sub

pub mod frames;
pub mod handler;
pub mod hub;

pub use frames::{Frame, Topic};
pub use hub::{AllowAll, BroadcastHub, PermissionGate, PublishOutcome, Subscription};
