//! Form definitions and the per-form submission session.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::csrf::CsrfToken;
use crate::error::SecurityError;
use crate::monitor::{SecurityMonitor, SecuritySignal};
use crate::submit::{FormData, SecureSubmitter};
use crate::validate::{validate_email, validate_message, validate_name};

/// Key under which a CAPTCHA problem is reported in [`FieldErrors`].
pub const CAPTCHA_ERROR_KEY: &str = "captcha";

/// Key under which a refused submission is reported in [`FieldErrors`].
pub const SUBMIT_ERROR_KEY: &str = "submit";

/// Input control type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Email,
    Textarea,
    Select,
}

impl FieldKind {
    /// Whether the user types free text into this kind of field.
    pub fn is_free_text(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Email | FieldKind::Textarea)
    }
}

/// A caller-supplied field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl FormField {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            required: false,
            options: None,
            placeholder: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// The standard name / email / message contact form.
    pub fn contact_form() -> Vec<FormField> {
        vec![
            FormField::new("name", "Name", FieldKind::Text).required(),
            FormField::new("email", "Email", FieldKind::Email).required(),
            FormField::new("message", "Message", FieldKind::Textarea).required(),
        ]
    }

    /// First failing rule for `value`, if any.
    fn check(&self, value: &str) -> Option<String> {
        if value.trim().is_empty() {
            return self.required.then(|| format!("{} is required", self.label));
        }
        if self.kind == FieldKind::Email && !validate_email(value) {
            return Some("Please enter a valid email address".into());
        }
        if self.name == "name" && !validate_name(value) {
            return Some("Please enter a valid name (2-50 characters, letters only)".into());
        }
        if self.kind == FieldKind::Textarea && !validate_message(value) {
            return Some("Message must be between 10 and 2000 characters".into());
        }
        if self.kind == FieldKind::Select {
            if let Some(options) = &self.options {
                if !options.iter().any(|o| o == value) {
                    return Some("Please select a valid option".into());
                }
            }
        }
        None
    }
}

/// Field name to user-facing error message.
pub type FieldErrors = BTreeMap<String, String>;

/// Result of [`FormSession::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormOutcome {
    /// Accepted and delivered. The form has a fresh CSRF token.
    Submitted,
    /// Field or CAPTCHA problems; nothing was sent.
    Invalid(FieldErrors),
    /// The host should show the CAPTCHA challenge and resubmit once verified.
    ChallengeRequired,
    /// The submitter refused the submission.
    Rejected(String),
}

/// State of one rendered form: fields, CSRF token and CAPTCHA progress.
pub struct FormSession {
    fields: Vec<FormField>,
    endpoint: String,
    submitter: Arc<SecureSubmitter>,
    monitor: Option<Arc<SecurityMonitor>>,
    csrf_token: CsrfToken,
    captcha_token: Option<String>,
    challenge_shown: bool,
    errors: FieldErrors,
}

impl FormSession {
    pub fn new(
        fields: Vec<FormField>,
        endpoint: impl Into<String>,
        submitter: Arc<SecureSubmitter>,
    ) -> Result<Self, SecurityError> {
        Ok(Self {
            fields,
            endpoint: endpoint.into(),
            submitter,
            monitor: None,
            csrf_token: CsrfToken::generate()?,
            captcha_token: None,
            challenge_shown: false,
            errors: FieldErrors::new(),
        })
    }

    /// Feed field edits to the monitor as [`SecuritySignal::InputChanged`].
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn challenge_shown(&self) -> bool {
        self.challenge_shown
    }

    /// Record a user edit: clears that field's error and screens the value.
    pub fn field_changed(&mut self, name: &str, value: &str) {
        self.errors.remove(name);
        if let (Some(monitor), Some(field)) =
            (&self.monitor, self.fields.iter().find(|f| f.name == name))
        {
            monitor.observe(SecuritySignal::InputChanged {
                field_name: field.name.clone(),
                kind: field.kind,
                value: value.to_string(),
            });
        }
    }

    /// Check every field; the first failing rule per field wins.
    pub fn validate(&self, values: &FormData) -> FieldErrors {
        self.fields
            .iter()
            .filter_map(|field| {
                let value = values.get(&field.name).map(String::as_str).unwrap_or("");
                field.check(value).map(|msg| (field.name.clone(), msg))
            })
            .collect()
    }

    /// Called by the CAPTCHA widget once the user passes the challenge.
    pub fn captcha_verified(&mut self, token: impl Into<String>) {
        self.captcha_token = Some(token.into());
        self.errors.remove(CAPTCHA_ERROR_KEY);
    }

    /// Validate, gate on the CAPTCHA, then submit.
    ///
    /// Taking `&mut self` means a session cannot submit twice concurrently.
    pub async fn submit(&mut self, values: &FormData) -> FormOutcome {
        let errors = self.validate(values);
        if !errors.is_empty() {
            self.errors = errors.clone();
            return FormOutcome::Invalid(errors);
        }

        if self.captcha_token.is_none() {
            if !self.challenge_shown {
                self.challenge_shown = true;
                self.errors.clear();
                return FormOutcome::ChallengeRequired;
            }
            let mut errors = FieldErrors::new();
            errors.insert(
                CAPTCHA_ERROR_KEY.into(),
                "Please complete the CAPTCHA verification".into(),
            );
            self.errors = errors.clone();
            return FormOutcome::Invalid(errors);
        }

        let result = self
            .submitter
            .submit(values, &self.endpoint, Some(&self.csrf_token))
            .await;

        if result.success {
            self.errors.clear();
            self.captcha_token = None;
            self.challenge_shown = false;
            match CsrfToken::generate() {
                Ok(token) => self.csrf_token = token,
                Err(e) => warn!(error = %e, "Keeping previous CSRF token"),
            }
            debug!(endpoint = %self.endpoint, "Form session submitted");
            FormOutcome::Submitted
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "Submission failed. Please try again.".into());
            self.errors.clear();
            self.errors.insert(SUBMIT_ERROR_KEY.into(), message.clone());
            FormOutcome::Rejected(message)
        }
    }
}

impl std::fmt::Debug for FormSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("fields", &self.fields)
            .field("endpoint", &self.endpoint)
            .field("challenge_shown", &self.challenge_shown)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintGenerator;
    use crate::monitor::{MonitorConfig, SecurityEventType};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::submit::StubSubmissionSink;

    fn values(pairs: &[(&str, &str)]) -> FormData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn session_with_sink(sink: Arc<StubSubmissionSink>) -> FormSession {
        let submitter = SecureSubmitter::new(
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            FingerprintGenerator::without_environment(),
            sink,
        );
        let mut fields = FormField::contact_form();
        fields.push(
            FormField::new("topic", "Topic", FieldKind::Select)
                .with_options(["support", "sales"]),
        );
        FormSession::new(fields, "/api/contact", Arc::new(submitter)).unwrap()
    }

    fn valid_values() -> FormData {
        values(&[
            ("name", "Ann Lee"),
            ("email", "ann@x.com"),
            ("message", "Hello, I need help with sleep tracking."),
        ])
    }

    #[test]
    fn test_validation_messages() {
        let session = session_with_sink(Arc::new(StubSubmissionSink::new()));

        let errors = session.validate(&values(&[("name", "  "), ("topic", "other")]));
        assert_eq!(errors["name"], "Name is required");
        assert_eq!(errors["email"], "Email is required");
        assert_eq!(errors["message"], "Message is required");
        assert_eq!(errors["topic"], "Please select a valid option");

        let errors = session.validate(&values(&[
            ("name", "J4ne"),
            ("email", "jane"),
            ("message", "short"),
        ]));
        assert_eq!(
            errors["name"],
            "Please enter a valid name (2-50 characters, letters only)"
        );
        assert_eq!(errors["email"], "Please enter a valid email address");
        assert_eq!(
            errors["message"],
            "Message must be between 10 and 2000 characters"
        );
        assert!(!errors.contains_key("topic"));

        assert!(session.validate(&valid_values()).is_empty());
    }

    #[tokio::test]
    async fn test_captcha_flow() {
        let sink = Arc::new(StubSubmissionSink::new());
        let mut session = session_with_sink(sink.clone());
        let first_token = session.csrf_token().as_str().to_string();

        assert_eq!(
            session.submit(&valid_values()).await,
            FormOutcome::ChallengeRequired
        );
        assert!(session.challenge_shown());

        match session.submit(&valid_values()).await {
            FormOutcome::Invalid(errors) => assert_eq!(
                errors[CAPTCHA_ERROR_KEY],
                "Please complete the CAPTCHA verification"
            ),
            other => panic!("unexpected outcome: {other:?}"),
        }

        session.captcha_verified("captcha-ok");
        assert!(session.errors().is_empty());
        assert_eq!(session.submit(&valid_values()).await, FormOutcome::Submitted);

        assert!(!session.challenge_shown());
        assert_ne!(session.csrf_token().as_str(), first_token);
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0].csrf_token.as_ref().map(CsrfToken::as_str),
            Some(first_token.as_str())
        );
    }

    #[tokio::test]
    async fn test_invalid_values_never_reach_captcha() {
        let mut session = session_with_sink(Arc::new(StubSubmissionSink::new()));
        let outcome = session.submit(&values(&[("name", "Ann")])).await;
        assert!(matches!(outcome, FormOutcome::Invalid(_)));
        assert!(!session.challenge_shown());
    }

    #[tokio::test]
    async fn test_rejection_is_reported_as_submit_error() {
        let sink = Arc::new(StubSubmissionSink::expecting(
            CsrfToken::from_presented("not-this-form"),
        ));
        let mut session = session_with_sink(sink);
        session.captcha_verified("captcha-ok");

        let outcome = session.submit(&valid_values()).await;
        assert_eq!(
            outcome,
            FormOutcome::Rejected("An error occurred. Please try again.".into())
        );
        assert!(session.errors().contains_key(SUBMIT_ERROR_KEY));
    }

    #[test]
    fn test_field_changes_are_screened() {
        let monitor = Arc::new(SecurityMonitor::new(MonitorConfig::default()));
        let mut session =
            session_with_sink(Arc::new(StubSubmissionSink::new())).with_monitor(monitor.clone());

        session.field_changed("message", "<script>steal()</script>");
        session.field_changed("message", "hello there");
        session.field_changed("unknown-field", "javascript:x");

        let events = monitor.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::SuspiciousInput);
    }

    #[test]
    fn test_field_definition_serde() {
        let field: FormField = serde_json::from_str(
            r#"{"name":"topic","label":"Topic","kind":"select","options":["a","b"]}"#,
        )
        .unwrap();
        assert_eq!(field.kind, FieldKind::Select);
        assert!(!field.required);
        assert_eq!(field.options.as_deref(), Some(&["a".to_string(), "b".to_string()][..]));
    }
}
