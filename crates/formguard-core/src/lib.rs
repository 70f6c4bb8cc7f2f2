#![forbid(unsafe_code)]

//! FormGuard core
//!
//! Protection primitives for public-facing forms:
//! - Input sanitization and field validation
//! - Fixed-window rate limiting keyed by a client fingerprint
//! - Environment fingerprinting (bucketing key, not an identity)
//! - CSRF token generation and verification
//! - Security event monitoring with PII scrubbing
//! - Secure submission orchestration and form sessions
//! - Cookie consent state and consent-gated analytics
//!
//! Everything here runs on the client side of the trust boundary. None of it
//! replaces server-side validation, rate limiting or CSRF checks.

pub mod analytics;
pub mod clock;
pub mod config;
pub mod consent;
pub mod csrf;
pub mod error;
pub mod fingerprint;
pub mod form;
pub mod monitor;
pub mod rate_limit;
pub mod sanitize;
pub mod submit;
pub mod validate;

#[cfg(test)]
mod proptests;

pub use analytics::{Analytics, AnalyticsEvent, AnalyticsSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FormGuardConfig};
pub use consent::{Consent, ConsentState, ConsentStore};
pub use csrf::CsrfToken;
pub use error::SecurityError;
pub use fingerprint::{
    EnvironmentSignals, FingerprintGenerator, FingerprintProfile, NoEnvironment, SignalSnapshot,
    StaticSignals,
};
pub use form::{FieldErrors, FieldKind, FormField, FormOutcome, FormSession};
pub use monitor::{
    spawn_cleanup, EventReporter, MonitorConfig, SecurityEvent, SecurityEventType,
    SecurityMonitor, SecuritySignal, SecurityStats,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use sanitize::sanitize;
pub use submit::{FormData, SecureSubmitter, SubmissionSink, SubmitRejection, SubmitResult};
pub use validate::{validate_email, validate_message, validate_name};
