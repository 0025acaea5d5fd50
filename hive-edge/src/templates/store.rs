//! Template catalogue keyed by (notification type, language)
//!
//! Read-dominant: lookups take a consistent snapshot pointer; writes clone
//! the map and swap it atomically, matching the process-wide ownership of
//! the other hot-reloadable tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::render::{extract_placeholders, substitute};
use crate::error::Error;
use crate::notify::model::NotificationType;

/// A stored template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub language: String,
    pub subject: String,
    pub body: String,
    /// Derived at write time from the placeholders of subject + body
    pub required_variables: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rendered output of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedTemplate {
    pub subject: String,
    pub body: String,
}

/// Create/bulk-create payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplate {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub language: String,
    pub subject: String,
    pub body: String,
}

/// Update payload (by template id)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplate {
    pub subject: String,
    pub body: String,
}

/// Template store failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    NotFound {
        notification_type: NotificationType,
        language: String,
    },
    UnknownId(Uuid),
    Duplicate {
        notification_type: NotificationType,
        language: String,
    },
    Validation {
        missing: Vec<String>,
    },
}

impl From<TemplateError> for Error {
    fn from(error: TemplateError) -> Self {
        match error {
            TemplateError::NotFound {
                notification_type,
                language,
            } => Error::NotFound(format!(
                "No template for type {} and language {}",
                notification_type, language
            )),
            TemplateError::UnknownId(id) => Error::NotFound(format!("No template with id {}", id)),
            TemplateError::Duplicate {
                notification_type,
                language,
            } => Error::Validation(format!(
                "A template for type {} and language {} already exists",
                notification_type, language
            )),
            TemplateError::Validation { missing } => Error::Validation(format!(
                "Missing template variables: {}",
                missing.join(", ")
            )),
        }
    }
}

type Catalogue = HashMap<(NotificationType, String), Template>;

/// Process-wide template store with atomic snapshot swap
pub struct TemplateStore {
    default_language: String,
    inner: RwLock<Arc<Catalogue>>,
}

impl TemplateStore {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            inner: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// A store pre-seeded with the built-in English catalogue
    pub fn with_defaults(default_language: impl Into<String>) -> Self {
        let store = Self::new(default_language);
        for (notification_type, subject, body) in seed_catalogue() {
            let created = store.create(CreateTemplate {
                notification_type,
                language: "en".to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            debug_assert!(created.is_ok());
        }
        store
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    fn snapshot(&self) -> Arc<Catalogue> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn swap(&self, catalogue: Catalogue) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(catalogue);
    }

    /// Create a template; (type, language) must be unique
    pub fn create(&self, request: CreateTemplate) -> Result<Template, TemplateError> {
        let language = normalize_language(&request.language);
        let key = (request.notification_type, language.clone());

        let snapshot = self.snapshot();
        if snapshot.contains_key(&key) {
            return Err(TemplateError::Duplicate {
                notification_type: request.notification_type,
                language,
            });
        }

        let mut required = extract_placeholders(&request.subject);
        required.extend(extract_placeholders(&request.body));

        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4(),
            notification_type: request.notification_type,
            language,
            subject: request.subject,
            body: request.body,
            required_variables: required,
            created_at: now,
            updated_at: now,
        };

        let mut next: Catalogue = (*snapshot).clone();
        next.insert(key, template.clone());
        self.swap(next);

        tracing::info!(
            r#type = %template.notification_type,
            language = %template.language,
            "Template created"
        );
        Ok(template)
    }

    /// Update subject and body by template id
    pub fn update(&self, id: Uuid, request: UpdateTemplate) -> Result<Template, TemplateError> {
        let snapshot = self.snapshot();
        let key = snapshot
            .iter()
            .find(|(_, t)| t.id == id)
            .map(|(k, _)| k.clone())
            .ok_or(TemplateError::UnknownId(id))?;

        let mut next: Catalogue = (*snapshot).clone();
        let template = next.get_mut(&key).expect("key just found");
        template.subject = request.subject;
        template.body = request.body;
        let mut required = extract_placeholders(&template.subject);
        required.extend(extract_placeholders(&template.body));
        template.required_variables = required;
        template.updated_at = Utc::now();

        let updated = template.clone();
        self.swap(next);
        Ok(updated)
    }

    /// Delete by template id
    pub fn delete(&self, id: Uuid) -> Result<(), TemplateError> {
        let snapshot = self.snapshot();
        let key = snapshot
            .iter()
            .find(|(_, t)| t.id == id)
            .map(|(k, _)| k.clone())
            .ok_or(TemplateError::UnknownId(id))?;

        let mut next: Catalogue = (*snapshot).clone();
        next.remove(&key);
        self.swap(next);
        Ok(())
    }

    /// Find a template by (type, language); no fallback applied
    pub fn find(&self, notification_type: NotificationType, language: &str) -> Option<Template> {
        self.snapshot()
            .get(&(notification_type, normalize_language(language)))
            .cloned()
    }

    /// All templates, unordered
    pub fn list(&self) -> Vec<Template> {
        self.snapshot().values().cloned().collect()
    }

    /// Languages available for a type
    pub fn list_languages(&self, notification_type: NotificationType) -> Vec<String> {
        let mut languages: Vec<String> = self
            .snapshot()
            .keys()
            .filter(|(t, _)| *t == notification_type)
            .map(|(_, l)| l.clone())
            .collect();
        languages.sort();
        languages
    }

    /// Template count per type
    pub fn statistics(&self) -> HashMap<String, usize> {
        let mut stats = HashMap::new();
        for (notification_type, _) in self.snapshot().keys() {
            *stats
                .entry(notification_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Best-effort bulk create; failures are reported per item
    pub fn bulk_create(
        &self,
        requests: Vec<CreateTemplate>,
    ) -> (Vec<Template>, Vec<String>) {
        let mut created = Vec::new();
        let mut errors = Vec::new();
        for request in requests {
            let label = format!("{}/{}", request.notification_type, request.language);
            match self.create(request) {
                Ok(template) => created.push(template),
                Err(e) => errors.push(format!("{}: {}", label, Error::from(e))),
            }
        }
        (created, errors)
    }

    /// The placeholder set of a stored template
    pub fn extract_variables(
        &self,
        notification_type: NotificationType,
        language: &str,
    ) -> Result<BTreeSet<String>, TemplateError> {
        let template = self.lookup_with_fallback(notification_type, language)?;
        Ok(template.required_variables.clone())
    }

    /// Check a variable map against a template without rendering
    pub fn validate_variables(
        &self,
        notification_type: NotificationType,
        language: &str,
        variables: &HashMap<String, String>,
    ) -> Result<Vec<String>, TemplateError> {
        let template = self.lookup_with_fallback(notification_type, language)?;
        Ok(template
            .required_variables
            .iter()
            .filter(|name| !variables.contains_key(*name))
            .cloned()
            .collect())
    }

    /// Render a template for (type, language, variables)
    ///
    /// A missing language falls back to the default language; a missing
    /// template fails; unsupplied referenced variables fail listing every
    /// missing name.
    pub fn render(
        &self,
        notification_type: NotificationType,
        language: Option<&str>,
        variables: &HashMap<String, String>,
    ) -> Result<ProcessedTemplate, TemplateError> {
        let language = language.unwrap_or(&self.default_language);
        let template = self.lookup_with_fallback(notification_type, language)?;

        let (subject, mut missing) = substitute(&template.subject, variables);
        let (body, body_missing) = substitute(&template.body, variables);
        missing.extend(body_missing);

        if !missing.is_empty() {
            return Err(TemplateError::Validation {
                missing: missing.into_iter().collect(),
            });
        }

        Ok(ProcessedTemplate { subject, body })
    }

    fn lookup_with_fallback(
        &self,
        notification_type: NotificationType,
        language: &str,
    ) -> Result<Template, TemplateError> {
        let language = normalize_language(language);
        let snapshot = self.snapshot();

        if let Some(template) = snapshot.get(&(notification_type, language.clone())) {
            return Ok(template.clone());
        }

        let fallback = normalize_language(&self.default_language);
        if language != fallback {
            if let Some(template) = snapshot.get(&(notification_type, fallback)) {
                tracing::debug!(
                    r#type = %notification_type,
                    requested = %language,
                    "Falling back to default language template"
                );
                return Ok(template.clone());
            }
        }

        Err(TemplateError::NotFound {
            notification_type,
            language,
        })
    }
}

fn normalize_language(language: &str) -> String {
    language.trim().to_ascii_lowercase()
}

/// Built-in English catalogue seeded at startup
fn seed_catalogue() -> Vec<(NotificationType, &'static str, &'static str)> {
    vec![
        (
            NotificationType::Welcome,
            "Welcome to the hive, {username}",
            "Hi {username}, your account is ready. Start your first focus session today.",
        ),
        (
            NotificationType::PasswordReset,
            "Reset your password",
            "Hi {username}, use the link below to reset your password. The link expires in {expiryMinutes} minutes.",
        ),
        (
            NotificationType::EmailVerification,
            "Verify your email address",
            "Hi {username}, confirm {email} to activate your account.",
        ),
        (
            NotificationType::HiveInvitation,
            "{inviter} invited you to {hiveName}",
            "Hi {username}, {inviter} wants you to join the hive {hiveName}.",
        ),
        (
            NotificationType::BuddyRequest,
            "New buddy request from {requester}",
            "Hi {username}, {requester} wants to be your focus buddy.",
        ),
        (
            NotificationType::SessionReminder,
            "Your session starts soon",
            "Hi {username}, your focus session in {hiveName} starts at {startTime}.",
        ),
        (
            NotificationType::AchievementUnlocked,
            "Achievement unlocked: {achievement}",
            "Congratulations {username}, you earned {achievement}.",
        ),
        (
            NotificationType::ForumReply,
            "New reply in {threadTitle}",
            "Hi {username}, {author} replied to {threadTitle}.",
        ),
        (
            NotificationType::SystemAnnouncement,
            "{title}",
            "{message}",
        ),
        (
            NotificationType::DigestSummary,
            "Your activity summary",
            "Hi {username}, you have {count} new notifications waiting.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store() -> TemplateStore {
        TemplateStore::with_defaults("en")
    }

    #[test]
    fn test_seed_covers_every_type() {
        let store = store();
        for notification_type in NotificationType::ALL {
            assert!(
                store.find(*notification_type, "en").is_some(),
                "missing seed for {}",
                notification_type
            );
        }
    }

    #[test]
    fn test_create_and_duplicate() {
        let store = TemplateStore::new("en");
        let created = store
            .create(CreateTemplate {
                notification_type: NotificationType::Welcome,
                language: "fi".to_string(),
                subject: "Tervetuloa, {username}".to_string(),
                body: "Hei {username}".to_string(),
            })
            .unwrap();
        assert_eq!(
            created.required_variables.iter().collect::<Vec<_>>(),
            vec!["username"]
        );

        let duplicate = store.create(CreateTemplate {
            notification_type: NotificationType::Welcome,
            language: "FI".to_string(),
            subject: "x".to_string(),
            body: "y".to_string(),
        });
        assert!(matches!(duplicate, Err(TemplateError::Duplicate { .. })));
    }

    #[test]
    fn test_update_recomputes_required_variables() {
        let store = TemplateStore::new("en");
        let created = store
            .create(CreateTemplate {
                notification_type: NotificationType::Welcome,
                language: "en".to_string(),
                subject: "Hello {username}".to_string(),
                body: "Body".to_string(),
            })
            .unwrap();

        let updated = store
            .update(
                created.id,
                UpdateTemplate {
                    subject: "Hello {name}".to_string(),
                    body: "See {link}".to_string(),
                },
            )
            .unwrap();
        assert_eq!(
            updated.required_variables.iter().collect::<Vec<_>>(),
            vec!["link", "name"]
        );

        let missing = store.update(
            Uuid::new_v4(),
            UpdateTemplate {
                subject: "s".to_string(),
                body: "b".to_string(),
            },
        );
        assert!(matches!(missing, Err(TemplateError::UnknownId(_))));
    }

    #[test]
    fn test_delete() {
        let store = TemplateStore::new("en");
        let created = store
            .create(CreateTemplate {
                notification_type: NotificationType::Welcome,
                language: "en".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
            })
            .unwrap();
        store.delete(created.id).unwrap();
        assert!(store.find(NotificationType::Welcome, "en").is_none());
        assert!(matches!(
            store.delete(created.id),
            Err(TemplateError::UnknownId(_))
        ));
    }

    #[test]
    fn test_render_with_language_fallback() {
        let store = store();
        let rendered = store
            .render(
                NotificationType::Welcome,
                Some("sv"),
                &vars(&[("username", "ada")]),
            )
            .unwrap();
        assert!(rendered.subject.contains("ada"));
    }

    #[test]
    fn test_render_missing_template() {
        let store = TemplateStore::new("en");
        let result = store.render(NotificationType::Welcome, Some("en"), &vars(&[]));
        assert!(matches!(result, Err(TemplateError::NotFound { .. })));
    }

    #[test]
    fn test_render_lists_all_missing_variables() {
        let store = TemplateStore::new("en");
        store
            .create(CreateTemplate {
                notification_type: NotificationType::SessionReminder,
                language: "en".to_string(),
                subject: "{a} at {b}".to_string(),
                body: "{c}".to_string(),
            })
            .unwrap();

        let result = store.render(NotificationType::SessionReminder, None, &vars(&[("b", "1")]));
        match result {
            Err(TemplateError::Validation { missing }) => {
                assert_eq!(missing, vec!["a".to_string(), "c".to_string()]);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_statistics_and_languages() {
        let store = TemplateStore::new("en");
        for language in ["en", "fi", "sv"] {
            store
                .create(CreateTemplate {
                    notification_type: NotificationType::Welcome,
                    language: language.to_string(),
                    subject: "s".to_string(),
                    body: "b".to_string(),
                })
                .unwrap();
        }
        store
            .create(CreateTemplate {
                notification_type: NotificationType::ForumReply,
                language: "en".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
            })
            .unwrap();

        let stats = store.statistics();
        assert_eq!(stats.get("WELCOME"), Some(&3));
        assert_eq!(stats.get("FORUM_REPLY"), Some(&1));

        assert_eq!(
            store.list_languages(NotificationType::Welcome),
            vec!["en", "fi", "sv"]
        );
    }

    #[test]
    fn test_bulk_create_is_best_effort() {
        let store = TemplateStore::new("en");
        let (created, errors) = store.bulk_create(vec![
            CreateTemplate {
                notification_type: NotificationType::Welcome,
                language: "en".to_string(),
                subject: "a".to_string(),
                body: "b".to_string(),
            },
            // Duplicate of the one above
            CreateTemplate {
                notification_type: NotificationType::Welcome,
                language: "en".to_string(),
                subject: "c".to_string(),
                body: "d".to_string(),
            },
            CreateTemplate {
                notification_type: NotificationType::ForumReply,
                language: "en".to_string(),
                subject: "e".to_string(),
                body: "f".to_string(),
            },
        ]);
        assert_eq!(created.len(), 2);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_validate_variables() {
        let store = store();
        let missing = store
            .validate_variables(
                NotificationType::PasswordReset,
                "en",
                &vars(&[("username", "ada")]),
            )
            .unwrap();
        assert_eq!(missing, vec!["expiryMinutes".to_string()]);

        let missing = store
            .validate_variables(
                NotificationType::PasswordReset,
                "en",
                &vars(&[("username", "ada"), ("expiryMinutes", "30")]),
            )
            .unwrap();
        assert!(missing.is_empty());
    }
}
