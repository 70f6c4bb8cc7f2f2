//! Security event monitoring.
//!
//! [`SecurityMonitor`] keeps a bounded, PII-scrubbed buffer of recent
//! security-relevant events and forwards each one to an [`EventReporter`].
//! Hosts feed it through [`SecurityMonitor::observe`] with typed
//! [`SecuritySignal`]s; the monitor has no knowledge of where they come from.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::SecurityError;
use crate::fingerprint::NO_ENVIRONMENT;
use crate::form::FieldKind;
use crate::sanitize::{contains_injection_pattern, truncate_chars};

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").unwrap();
    static ref SSN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref CARD: Regex = Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").unwrap();
}

/// Longest script-error message or filename written to the log.
const SCRIPT_ERROR_LOG_LEN: usize = 100;

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityEventType {
    PolicyViolation,
    RateLimitHit,
    SuspiciousInput,
    RapidSubmission,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::PolicyViolation => "policyViolation",
            SecurityEventType::RateLimitHit => "rateLimitHit",
            SecurityEventType::SuspiciousInput => "suspiciousInput",
            SecurityEventType::RapidSubmission => "rapidSubmission",
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat event details: string keys to scalar values.
pub type EventDetails = BTreeMap<String, serde_json::Value>;

/// A recorded security event. Details are already scrubbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub details: EventDetails,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
}

impl SecurityEvent {
    /// ISO-8601 timestamp with millisecond precision.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Signals a host environment feeds into the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecuritySignal {
    /// A content-security-policy violation was reported.
    PolicyViolation {
        blocked_uri: String,
        violated_directive: String,
        document_uri: String,
    },
    /// A form field's value changed.
    InputChanged {
        field_name: String,
        kind: FieldKind,
        value: String,
    },
    /// A form was submitted.
    FormSubmitted,
    /// An uncaught script error surfaced in the host.
    ScriptError { message: String, filename: String },
}

/// Receives every event the monitor records.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: &SecurityEvent) -> Result<(), SecurityError>;
}

/// Forwards events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl EventReporter for TracingReporter {
    fn report(&self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let details = serde_json::to_string(&event.details)
            .map_err(|e| SecurityError::ReportFailed(e.to_string()))?;
        info!(
            event_type = %event.event_type,
            fingerprint = %event.fingerprint,
            details = %details,
            "Security event"
        );
        Ok(())
    }
}

/// Appends events as JSON lines to a file.
///
/// [`report`](EventReporter::report) only queues the serialized line. A
/// dedicated writer thread owns the file, so callers on async tasks never
/// wait on disk I/O. Dropping the reporter drains the queue and joins the
/// writer.
pub struct JsonLinesReporter {
    path: PathBuf,
    queue: Mutex<Option<mpsc::Sender<String>>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl JsonLinesReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel::<String>();
        let writer_path = path.clone();
        let writer = thread::Builder::new()
            .name("formguard-events".into())
            .spawn(move || write_lines(&writer_path, rx));

        let (queue, writer) = match writer {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Event writer thread unavailable");
                (None, None)
            }
        };
        Self {
            path,
            queue: Mutex::new(queue),
            writer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventReporter for JsonLinesReporter {
    fn report(&self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let line = serde_json::to_string(event)
            .map_err(|e| SecurityError::ReportFailed(format!("serialize: {e}")))?;

        let queue = self.queue.lock();
        let sender = queue
            .as_ref()
            .ok_or_else(|| SecurityError::ReportFailed("event writer stopped".into()))?;
        sender
            .send(line)
            .map_err(|_| SecurityError::ReportFailed("event writer stopped".into()))
    }
}

impl Drop for JsonLinesReporter {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop once the queue is drained.
        self.queue.get_mut().take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!(path = %self.path.display(), "Event writer thread panicked");
            }
        }
    }
}

/// Writer loop: append each queued line, reopening the file after a failure.
fn write_lines(path: &Path, lines: mpsc::Receiver<String>) {
    let mut file: Option<File> = None;
    for line in lines {
        if file.is_none() {
            match open_append(path) {
                Ok(opened) => file = Some(opened),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Dropping security event line");
                    continue;
                }
            }
        }
        if let Some(out) = file.as_mut() {
            if let Err(e) = writeln!(out, "{line}") {
                warn!(error = %e, path = %path.display(), "Security event write failed");
                file = None;
            }
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Monitor limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Buffer capacity; the oldest events are evicted beyond it.
    pub max_events: usize,
    /// Events older than this are dropped by [`SecurityMonitor::cleanup`].
    pub retention: Duration,
    /// Submissions closer together than this are flagged.
    pub rapid_submission: Duration,
    /// Longest scrubbed string kept in event details.
    pub detail_max_len: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            rapid_submission: Duration::from_millis(2000),
            detail_max_len: 200,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), SecurityError> {
        let problem = if self.max_events == 0 {
            "monitor.max_events"
        } else if self.retention.is_zero() {
            "monitor.retention_days"
        } else if self.detail_max_len == 0 {
            "monitor.detail_max_len"
        } else {
            return Ok(());
        };
        Err(SecurityError::InvalidConfig(format!(
            "{problem} must be greater than 0"
        )))
    }
}

/// Type and timestamp of a recent event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentEvent {
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub timestamp: String,
}

/// Anonymized buffer statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub total_events: usize,
    pub event_types: BTreeMap<SecurityEventType, usize>,
    pub recent_events: Vec<RecentEvent>,
}

const RECENT_EVENTS: usize = 10;

/// Bounded, thread-safe buffer of security events.
pub struct SecurityMonitor {
    config: MonitorConfig,
    events: Mutex<VecDeque<SecurityEvent>>,
    last_submission_ms: Mutex<Option<i64>>,
    fingerprint: String,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn EventReporter>,
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.max_events.min(1024))),
            config,
            last_submission_ms: Mutex::new(None),
            fingerprint: NO_ENVIRONMENT.to_string(),
            clock,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Fingerprint attached to every event this monitor records.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn EventReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Scrub, record and report an event. Never fails.
    pub fn log_event(&self, event_type: SecurityEventType, details: EventDetails) {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            event_type,
            details: self.scrub(details),
            timestamp: self.clock.now(),
            fingerprint: self.fingerprint.clone(),
        };

        {
            let mut events = self.events.lock();
            events.push_back(event.clone());
            while events.len() > self.config.max_events {
                events.pop_front();
            }
        }

        if let Err(e) = self.reporter.report(&event) {
            debug!(error = %e, event_type = %event_type, "Security event report dropped");
        }
    }

    /// Translate a host signal into zero or one recorded events.
    pub fn observe(&self, signal: SecuritySignal) {
        match signal {
            SecuritySignal::PolicyViolation {
                blocked_uri,
                violated_directive,
                document_uri,
            } => {
                let mut details = EventDetails::new();
                details.insert("blockedURI".into(), blocked_uri.into());
                details.insert("violatedDirective".into(), violated_directive.into());
                details.insert("documentURI".into(), document_uri.into());
                self.log_event(SecurityEventType::PolicyViolation, details);
            }
            SecuritySignal::InputChanged {
                field_name,
                kind,
                value,
            } => {
                if !kind.is_free_text() || !contains_injection_pattern(&value) {
                    return;
                }
                let field_name = if field_name.is_empty() {
                    "unknown".to_string()
                } else {
                    field_name
                };
                warn!(field = %field_name, "Suspicious input pattern");

                let mut details = EventDetails::new();
                details.insert("fieldName".into(), field_name.into());
                details.insert("pattern".into(), "xss_attempt".into());
                details.insert("length".into(), value.chars().count().into());
                self.log_event(SecurityEventType::SuspiciousInput, details);
            }
            SecuritySignal::FormSubmitted => {
                let now = self.clock.now_ms();
                let previous = self.last_submission_ms.lock().replace(now);
                let threshold = i64::try_from(self.config.rapid_submission.as_millis())
                    .unwrap_or(i64::MAX);

                if let Some(previous) = previous {
                    let diff = now - previous;
                    if diff < threshold {
                        let mut details = EventDetails::new();
                        details.insert("timeDiff".into(), diff.into());
                        self.log_event(SecurityEventType::RapidSubmission, details);
                    }
                }
            }
            SecuritySignal::ScriptError { message, filename } => {
                if message.contains("script") || message.contains("eval") {
                    let mut message = message;
                    let mut filename = filename;
                    truncate_chars(&mut message, SCRIPT_ERROR_LOG_LEN);
                    truncate_chars(&mut filename, SCRIPT_ERROR_LOG_LEN);
                    warn!(%message, %filename, "Potential security issue detected");
                }
            }
        }
    }

    /// Total count, per-type counts and the ten most recent events.
    pub fn stats(&self) -> SecurityStats {
        let events = self.events.lock();

        let mut event_types = BTreeMap::new();
        for event in events.iter() {
            *event_types.entry(event.event_type).or_insert(0) += 1;
        }

        let recent_events = events
            .iter()
            .skip(events.len().saturating_sub(RECENT_EVENTS))
            .map(|e| RecentEvent {
                event_type: e.event_type,
                timestamp: e.timestamp_iso(),
            })
            .collect();

        SecurityStats {
            total_events: events.len(),
            event_types,
            recent_events,
        }
    }

    /// Drop events older than the retention period. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        let removed = before - events.len();
        if removed > 0 {
            debug!(removed, remaining = events.len(), "Pruned expired security events");
        }
        removed
    }

    /// Snapshot of the buffered events, oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn scrub(&self, details: EventDetails) -> EventDetails {
        details
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(text) => {
                    let text = EMAIL.replace_all(&text, "[EMAIL]");
                    let text = SSN.replace_all(&text, "[SSN]");
                    let mut text = CARD.replace_all(&text, "[CARD]").into_owned();
                    truncate_chars(&mut text, self.config.detail_max_len);
                    (key, serde_json::Value::String(text))
                }
                other => (key, other),
            })
            .collect()
    }
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl std::fmt::Debug for SecurityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMonitor")
            .field("config", &self.config)
            .field("fingerprint", &self.fingerprint)
            .field("events", &self.len())
            .finish_non_exhaustive()
    }
}

/// Run [`SecurityMonitor::cleanup`] every `interval` until the task is aborted.
pub fn spawn_cleanup(monitor: Arc<SecurityMonitor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            monitor.cleanup();
        }
    })
}
