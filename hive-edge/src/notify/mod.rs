//! Notification delivery core: intake, classification, rendering, fan-out

pub mod digest;
pub mod handlers;
pub mod model;
pub mod service;
pub mod store;

pub use digest::spawn_digest_scheduler;
pub use model::{Channel, Notification, NotificationRequest, NotificationType, Page, Priority};
pub use service::{DigestCadence, NotificationService, Preferences};
pub use store::{CacheNotificationStore, NotificationStore};
