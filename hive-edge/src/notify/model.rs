//! Notification domain types and intake validation

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};

/// Closed set of notification types the platform emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Welcome,
    PasswordReset,
    EmailVerification,
    HiveInvitation,
    BuddyRequest,
    SessionReminder,
    AchievementUnlocked,
    ForumReply,
    SystemAnnouncement,
    DigestSummary,
}

impl NotificationType {
    pub const ALL: &'static [NotificationType] = &[
        Self::Welcome,
        Self::PasswordReset,
        Self::EmailVerification,
        Self::HiveInvitation,
        Self::BuddyRequest,
        Self::SessionReminder,
        Self::AchievementUnlocked,
        Self::ForumReply,
        Self::SystemAnnouncement,
        Self::DigestSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::EmailVerification => "EMAIL_VERIFICATION",
            Self::HiveInvitation => "HIVE_INVITATION",
            Self::BuddyRequest => "BUDDY_REQUEST",
            Self::SessionReminder => "SESSION_REMINDER",
            Self::AchievementUnlocked => "ACHIEVEMENT_UNLOCKED",
            Self::ForumReply => "FORUM_REPLY",
            Self::SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
            Self::DigestSummary => "DIGEST_SUMMARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery priority, mapped onto the broker's 0-9 priority range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn broker_priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 4,
            Self::High => 7,
            Self::Urgent => 9,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Delivery channels a notification can fan out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    InApp,
    Email,
    Push,
}

impl Channel {
    /// Routing-key fragment for this channel
    pub fn routing_segment(&self) -> &'static str {
        match self {
            Self::InApp => "created",
            Self::Email => "email",
            Self::Push => "push",
        }
    }
}

/// Intake request for a new notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// Recipient user ID
    pub recipient_id: String,

    /// Notification type; must be in the closed set
    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    pub title: String,

    /// Body content; limited HTML allowed
    pub content: String,

    #[serde(default)]
    pub priority: Priority,

    /// Preferred template language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Template variables for channel rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,

    /// Optional deep link attached to the notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,

    /// Routing hints and auxiliary payload
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl NotificationRequest {
    /// Email routing hint carried in metadata
    pub fn user_email(&self) -> Option<&str> {
        self.metadata.get("userEmail").and_then(|v| v.as_str())
    }
}

/// A persisted notification record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub priority: Priority,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub archived: bool,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Materialize a record from a validated request
    pub fn from_request(request: &NotificationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: request.recipient_id.clone(),
            notification_type: request.notification_type,
            title: request.title.clone(),
            content: request.content.clone(),
            action_url: request.action_url.clone(),
            priority: request.priority,
            read: false,
            read_at: None,
            archived: false,
            data: request.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A page of notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

// Content that is rejected outright, anywhere
static XSS_DENY: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)<\s*script").expect("deny pattern"),
        Regex::new(r"(?i)javascript\s*:").expect("deny pattern"),
        Regex::new(r"(?i)\bon[a-z]+\s*=").expect("deny pattern"),
        Regex::new(r"(?i)<\s*iframe").expect("deny pattern"),
        Regex::new(r"(?i)data\s*:\s*text/html").expect("deny pattern"),
    ]
});

// Tags permitted in notification content
static ALLOWED_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(b|i|em|strong|p|br|ul|ol|li|span)\s*/?>").expect("allowed tag pattern")
});

// Any remaining markup after the allow-list is removed; a bare `<` with
// whitespace is ordinary text, not a tag
static RESIDUAL_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[a-zA-Z]").expect("markup pattern"));

fn has_xss(value: &str) -> bool {
    XSS_DENY.iter().any(|p| p.is_match(value))
}

/// Whether a value contains markup outside the content allow-list
fn has_disallowed_markup(value: &str) -> bool {
    let stripped = ALLOWED_TAGS.replace_all(value, "");
    RESIDUAL_MARKUP.is_match(&stripped)
}

/// Validate an intake request against the configured limits
///
/// Every violation is a 400; the first failure reported wins.
pub fn validate_request(request: &NotificationRequest, config: &NotificationConfig) -> Result<()> {
    if request.recipient_id.trim().is_empty() {
        return Err(Error::Validation("recipientId must not be empty".to_string()));
    }

    let title_len = request.title.chars().count();
    if title_len == 0 || title_len > config.max_title_len {
        return Err(Error::Validation(format!(
            "title must be between 1 and {} characters",
            config.max_title_len
        )));
    }
    if has_xss(&request.title) || has_disallowed_markup(&request.title) {
        return Err(Error::Validation(
            "title contains disallowed content".to_string(),
        ));
    }

    let content_len = request.content.chars().count();
    if content_len == 0 || content_len > config.max_content_len {
        return Err(Error::Validation(format!(
            "content must be between 1 and {} characters",
            config.max_content_len
        )));
    }
    if has_xss(&request.content) {
        return Err(Error::Validation(
            "content contains disallowed content".to_string(),
        ));
    }
    if has_disallowed_markup(&request.content) {
        return Err(Error::Validation(
            "content contains markup outside the allowed set".to_string(),
        ));
    }

    if let Some(url) = &request.action_url {
        if url.chars().count() > config.max_action_url_len {
            return Err(Error::Validation(format!(
                "actionUrl must not exceed {} characters",
                config.max_action_url_len
            )));
        }
        if has_xss(url) {
            return Err(Error::Validation(
                "actionUrl contains disallowed content".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with('/')) {
            return Err(Error::Validation(
                "actionUrl must be an http(s) or relative URL".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NotificationRequest {
        NotificationRequest {
            recipient_id: "user-123".to_string(),
            notification_type: NotificationType::HiveInvitation,
            title: "You were invited".to_string(),
            content: "Join <b>Deep Focus</b> hive today".to_string(),
            priority: Priority::Normal,
            language: None,
            variables: None,
            action_url: Some("/hives/42".to_string()),
            metadata: HashMap::new(),
        }
    }

    fn config() -> NotificationConfig {
        NotificationConfig::default()
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_request(&request(), &config()).is_ok());
    }

    #[test]
    fn test_empty_recipient_rejected() {
        let mut r = request();
        r.recipient_id = "  ".to_string();
        assert!(validate_request(&r, &config()).is_err());
    }

    #[test]
    fn test_title_length_limit() {
        let mut r = request();
        r.title = "x".repeat(200);
        assert!(validate_request(&r, &config()).is_ok());
        r.title = "x".repeat(201);
        assert!(validate_request(&r, &config()).is_err());
    }

    #[test]
    fn test_content_length_limit() {
        let mut r = request();
        r.content = "x".repeat(5000);
        assert!(validate_request(&r, &config()).is_ok());
        r.content = "x".repeat(5001);
        assert!(validate_request(&r, &config()).is_err());
    }

    #[test]
    fn test_action_url_limit_and_scheme() {
        let mut r = request();
        r.action_url = Some(format!("https://hive.example/{}", "x".repeat(500)));
        assert!(validate_request(&r, &config()).is_err());

        r.action_url = Some("ftp://files".to_string());
        assert!(validate_request(&r, &config()).is_err());

        r.action_url = Some("https://hive.example/a".to_string());
        assert!(validate_request(&r, &config()).is_ok());
    }

    #[test]
    fn test_script_injection_rejected() {
        let mut r = request();
        r.title = "<script>alert(1)</script>".to_string();
        assert!(validate_request(&r, &config()).is_err());

        let mut r = request();
        r.content = "hello <SCRIPT src=x>".to_string();
        assert!(validate_request(&r, &config()).is_err());

        let mut r = request();
        r.content = "click <a href=\"javascript:alert(1)\">here</a>".to_string();
        assert!(validate_request(&r, &config()).is_err());

        let mut r = request();
        r.content = "<img src=x onerror=alert(1)>".to_string();
        assert!(validate_request(&r, &config()).is_err());
    }

    #[test]
    fn test_title_allows_no_markup_at_all() {
        let mut r = request();
        r.title = "hello <b>world</b>".to_string();
        // Allowed tags are stripped, so a title of only allowed tags passes;
        // the platform treats titles as plain text with the same allow-list.
        assert!(validate_request(&r, &config()).is_ok());

        r.title = "hello <u>world</u>".to_string();
        assert!(validate_request(&r, &config()).is_err());
    }

    #[test]
    fn test_content_allowlist() {
        let mut r = request();
        r.content = "<p>Hi <strong>there</strong><br/>bye</p>".to_string();
        assert!(validate_request(&r, &config()).is_ok());

        r.content = "<u>underline</u>".to_string();
        assert!(validate_request(&r, &config()).is_err());

        r.content = "a < b and b > c".to_string();
        assert!(validate_request(&r, &config()).is_ok());
    }

    #[test]
    fn test_type_serde_shape() {
        let json = serde_json::to_string(&NotificationType::PasswordReset).unwrap();
        assert_eq!(json, "\"PASSWORD_RESET\"");
        let parsed: NotificationType = serde_json::from_str("\"HIVE_INVITATION\"").unwrap();
        assert_eq!(parsed, NotificationType::HiveInvitation);
        assert!(serde_json::from_str::<NotificationType>("\"NOT_A_TYPE\"").is_err());
    }

    #[test]
    fn test_priority_broker_mapping() {
        assert_eq!(Priority::Low.broker_priority(), 1);
        assert_eq!(Priority::Normal.broker_priority(), 4);
        assert_eq!(Priority::High.broker_priority(), 7);
        assert_eq!(Priority::Urgent.broker_priority(), 9);
        assert!(Priority::High >= Priority::High);
        assert!(Priority::Urgent > Priority::Normal);
    }

    #[test]
    fn test_user_email_hint() {
        let mut r = request();
        assert!(r.user_email().is_none());
        r.metadata.insert(
            "userEmail".to_string(),
            Value::String("u@example.com".to_string()),
        );
        assert_eq!(r.user_email(), Some("u@example.com"));
    }

    #[test]
    fn test_notification_from_request() {
        let n = Notification::from_request(&request());
        assert_eq!(n.owner_id, "user-123");
        assert!(!n.read);
        assert!(!n.archived);
        assert!(n.read_at.is_none());
        assert_eq!(n.notification_type, NotificationType::HiveInvitation);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let r: NotificationRequest = serde_json::from_value(serde_json::json!({
            "recipientId": "user-9",
            "type": "PASSWORD_RESET",
            "title": "Reset your password",
            "content": "Use the link to reset",
            "metadata": {"userEmail": "u@example.com"}
        }))
        .unwrap();
        assert_eq!(r.recipient_id, "user-9");
        assert_eq!(r.notification_type, NotificationType::PasswordReset);
        assert_eq!(r.priority, Priority::Normal);
        assert_eq!(r.user_email(), Some("u@example.com"));
    }
}
