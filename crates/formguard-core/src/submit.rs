//! Secure form submission.
//!
//! [`SecureSubmitter`] rate-limits by client fingerprint, sanitizes and
//! validates the well-known contact fields, then hands the sanitized data to
//! a [`SubmissionSink`]. Every failure is reported through [`SubmitResult`];
//! nothing escapes as an error or panic.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::csrf::CsrfToken;
use crate::error::SecurityError;
use crate::fingerprint::FingerprintGenerator;
use crate::monitor::{SecurityMonitor, SecuritySignal};
use crate::rate_limit::RateLimiter;
use crate::sanitize::{sanitize, sanitize_message};
use crate::validate::{validate_email, validate_message, validate_name};

/// Field name to raw value.
pub type FormData = BTreeMap<String, String>;

/// Why a submission was refused. The display text is shown to the user.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitRejection {
    #[error("Too many requests. Please try again later.")]
    RateLimited,
    #[error("Invalid email address.")]
    InvalidEmail,
    #[error("Invalid name format.")]
    InvalidName,
    #[error("Message must be between 10 and 2000 characters.")]
    InvalidMessage,
    #[error("An error occurred. Please try again.")]
    Internal,
}

/// Outcome of one submit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub rejection: Option<SubmitRejection>,
}

impl SubmitResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            rejection: None,
        }
    }

    pub fn rejected(reason: SubmitRejection) -> Self {
        Self {
            success: false,
            error: Some(reason.to_string()),
            rejection: Some(reason),
        }
    }
}

/// What the sink receives for an accepted submission.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub endpoint: String,
    /// Sanitized field values.
    pub fields: FormData,
    pub csrf_token: Option<CsrfToken>,
    pub submitted_at: DateTime<Utc>,
}

/// Delivers sanitized submissions (the network layer).
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn deliver(&self, request: SubmissionRequest) -> Result<(), SecurityError>;
}

/// In-process sink that accepts everything and keeps a copy.
///
/// With [`expecting`](Self::expecting) it also checks the CSRF token the way
/// a receiving server would.
#[derive(Default)]
pub struct StubSubmissionSink {
    expected_token: Option<CsrfToken>,
    delivered: Mutex<Vec<SubmissionRequest>>,
}

impl StubSubmissionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expecting(token: CsrfToken) -> Self {
        Self {
            expected_token: Some(token),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<SubmissionRequest> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl SubmissionSink for StubSubmissionSink {
    async fn deliver(&self, request: SubmissionRequest) -> Result<(), SecurityError> {
        if let Some(expected) = &self.expected_token {
            expected.check(request.csrf_token.as_ref().map(CsrfToken::as_str))?;
        }
        debug!(
            endpoint = %request.endpoint,
            fields = request.fields.len(),
            "Stub sink accepted submission"
        );
        self.delivered.lock().push(request);
        Ok(())
    }
}

/// Rate-limited, sanitizing form submitter.
pub struct SecureSubmitter {
    limiter: Arc<RateLimiter>,
    fingerprints: FingerprintGenerator,
    sink: Arc<dyn SubmissionSink>,
    monitor: Option<Arc<SecurityMonitor>>,
    clock: Arc<dyn Clock>,
}

impl SecureSubmitter {
    pub fn new(
        limiter: Arc<RateLimiter>,
        fingerprints: FingerprintGenerator,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        Self {
            limiter,
            fingerprints,
            sink,
            monitor: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Report each submit attempt to the monitor as a [`SecuritySignal::FormSubmitted`].
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn submit(
        &self,
        form: &FormData,
        endpoint: &str,
        csrf_token: Option<&CsrfToken>,
    ) -> SubmitResult {
        if let Some(monitor) = &self.monitor {
            monitor.observe(SecuritySignal::FormSubmitted);
        }

        match self.try_submit(form, endpoint, csrf_token).await {
            Ok(()) => SubmitResult::ok(),
            Err(reason) => {
                debug!(%reason, endpoint, "Submission rejected");
                SubmitResult::rejected(reason)
            }
        }
    }

    async fn try_submit(
        &self,
        form: &FormData,
        endpoint: &str,
        csrf_token: Option<&CsrfToken>,
    ) -> Result<(), SubmitRejection> {
        let fingerprint = self.fingerprints.client_fingerprint();
        if !self.limiter.check(&fingerprint) {
            return Err(SubmitRejection::RateLimited);
        }

        let fields: FormData = form
            .iter()
            .map(|(name, value)| (name.clone(), sanitize_field(name, value)))
            .collect();

        // Validators sanitize on their own; the raw value keeps the
        // message length check honest past the truncation limit.
        let present = |name: &str| fields.get(name).map_or(false, |v| !v.is_empty());
        let raw = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();

        if present("email") && !validate_email(raw("email")) {
            return Err(SubmitRejection::InvalidEmail);
        }
        if present("name") && !validate_name(raw("name")) {
            return Err(SubmitRejection::InvalidName);
        }
        if present("message") && !validate_message(raw("message")) {
            return Err(SubmitRejection::InvalidMessage);
        }

        let request = SubmissionRequest {
            endpoint: endpoint.to_string(),
            fields,
            csrf_token: csrf_token.cloned(),
            submitted_at: self.clock.now(),
        };
        let field_count = request.fields.len();

        // A panicking sink is contained here, under any executor.
        let delivery = AssertUnwindSafe(self.sink.deliver(request))
            .catch_unwind()
            .await;
        match delivery {
            Ok(Ok(())) => {
                info!(endpoint, fields = field_count, "Form submission accepted");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, endpoint, "Form submission failed");
                Err(SubmitRejection::Internal)
            }
            Err(_) => {
                warn!(endpoint, "Form submission sink panicked");
                Err(SubmitRejection::Internal)
            }
        }
    }
}

impl std::fmt::Debug for SecureSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSubmitter")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

fn sanitize_field(name: &str, value: &str) -> String {
    if name == "message" {
        sanitize_message(value)
    } else {
        sanitize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitConfig;

    struct FailingSink;

    #[async_trait]
    impl SubmissionSink for FailingSink {
        async fn deliver(&self, _request: SubmissionRequest) -> Result<(), SecurityError> {
            Err(SecurityError::SubmissionFailed("connection refused".into()))
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl SubmissionSink for PanickingSink {
        async fn deliver(&self, _request: SubmissionRequest) -> Result<(), SecurityError> {
            panic!("sink bug");
        }
    }

    fn form(pairs: &[(&str, &str)]) -> FormData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn submitter(sink: Arc<dyn SubmissionSink>) -> SecureSubmitter {
        SecureSubmitter::new(
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            FingerprintGenerator::without_environment(),
            sink,
        )
    }

    fn valid_form() -> FormData {
        form(&[
            ("name", "Ann Lee"),
            ("email", "ann@x.com"),
            ("message", "Hello, I need help with sleep tracking."),
        ])
    }

    #[tokio::test]
    async fn test_accepts_valid_form_and_forwards_sanitized_fields() {
        let sink = Arc::new(StubSubmissionSink::new());
        let submitter = submitter(sink.clone());

        let mut data = valid_form();
        data.insert("company".into(), "<b>Acme</b>".into());
        let result = submitter.submit(&data, "/api/contact", None).await;

        assert_eq!(result, SubmitResult::ok());
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].endpoint, "/api/contact");
        assert_eq!(delivered[0].fields["company"], "Acme");
    }

    #[tokio::test]
    async fn test_field_rejections_in_order() {
        let submitter = submitter(Arc::new(StubSubmissionSink::new()));

        let mut data = valid_form();
        data.insert("email".into(), "nope".into());
        data.insert("name".into(), "J".into());
        let result = submitter.submit(&data, "/c", None).await;
        assert_eq!(result.error.as_deref(), Some("Invalid email address."));

        let mut data = valid_form();
        data.insert("name".into(), "Jane123".into());
        let result = submitter.submit(&data, "/c", None).await;
        assert_eq!(result.error.as_deref(), Some("Invalid name format."));

        let mut data = valid_form();
        data.insert("message".into(), "a".repeat(2001));
        let result = submitter.submit(&data, "/c", None).await;
        assert_eq!(result.rejection, Some(SubmitRejection::InvalidMessage));
    }

    #[tokio::test]
    async fn test_absent_fields_are_not_validated() {
        let submitter = submitter(Arc::new(StubSubmissionSink::new()));
        let data = form(&[("email", ""), ("topic", "billing")]);
        assert!(submitter.submit(&data, "/c", None).await.success);
    }

    #[tokio::test]
    async fn test_rate_limited_after_five() {
        let submitter = submitter(Arc::new(StubSubmissionSink::new()));
        for _ in 0..5 {
            assert!(submitter.submit(&valid_form(), "/c", None).await.success);
        }
        let result = submitter.submit(&valid_form(), "/c", None).await;
        assert_eq!(
            result.error.as_deref(),
            Some("Too many requests. Please try again later.")
        );
    }

    #[tokio::test]
    async fn test_sink_failure_is_generic() {
        let submitter = submitter(Arc::new(FailingSink));
        let result = submitter.submit(&valid_form(), "/c", None).await;
        assert_eq!(
            result.error.as_deref(),
            Some("An error occurred. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_sink_panic_is_contained() {
        let submitter = submitter(Arc::new(PanickingSink));
        let result = submitter.submit(&valid_form(), "/c", None).await;
        assert_eq!(result.rejection, Some(SubmitRejection::Internal));
    }

    #[test]
    fn test_submit_runs_without_tokio_runtime() {
        let sink = Arc::new(StubSubmissionSink::new());
        let accepting = submitter(sink.clone());
        let result = futures::executor::block_on(accepting.submit(&valid_form(), "/c", None));
        assert!(result.success);
        assert_eq!(sink.delivered().len(), 1);

        let panicking = submitter(Arc::new(PanickingSink));
        let result = futures::executor::block_on(panicking.submit(&valid_form(), "/c", None));
        assert_eq!(
            result.error.as_deref(),
            Some("An error occurred. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_csrf_token_is_forwarded() {
        let token = CsrfToken::generate().unwrap();
        let sink = Arc::new(StubSubmissionSink::expecting(token.clone()));
        let submitter = submitter(sink.clone());

        assert!(submitter.submit(&valid_form(), "/c", Some(&token)).await.success);
        assert!(!submitter.submit(&valid_form(), "/c", None).await.success);

        let forged = CsrfToken::from_presented("0".repeat(64));
        assert!(!submitter.submit(&valid_form(), "/c", Some(&forged)).await.success);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[test]
    fn test_result_json_shape() {
        let ok = serde_json::to_value(SubmitResult::ok()).unwrap();
        assert_eq!(ok, serde_json::json!({ "success": true }));

        let failed = serde_json::to_value(SubmitResult::rejected(SubmitRejection::InvalidName)).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({ "success": false, "error": "Invalid name format." })
        );
    }
}
