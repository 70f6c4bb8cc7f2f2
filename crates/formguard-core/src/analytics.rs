//! Consent-gated, fire-and-forget analytics events.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::consent::Consent;

/// Flat string/number properties attached to an event.
pub type AnalyticsProps = BTreeMap<String, Value>;

const UNKNOWN: &str = "unknown";

/// Typed analytics events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsEvent {
    PageView { page: String },
    ButtonClick { button: String, location: Option<String> },
    FormSubmission { form: String },
    Navigation { from: String, to: String },
    Conversion { event: String, value: Option<String> },
    LanguageChange { from: String, to: String },
    PricingInterest { plan: String, action: String },
    DownloadAttempt { source: String },
}

impl AnalyticsEvent {
    /// Event name as the collector knows it.
    pub fn name(&self) -> &'static str {
        match self {
            AnalyticsEvent::PageView { .. } => "pageview",
            AnalyticsEvent::ButtonClick { .. } => "Button Click",
            AnalyticsEvent::FormSubmission { .. } => "Form Submission",
            AnalyticsEvent::Navigation { .. } => "Navigation",
            AnalyticsEvent::Conversion { .. } => "Conversion",
            AnalyticsEvent::LanguageChange { .. } => "Language Change",
            AnalyticsEvent::PricingInterest { .. } => "Pricing Interest",
            AnalyticsEvent::DownloadAttempt { .. } => "Download Attempt",
        }
    }

    pub fn props(&self) -> AnalyticsProps {
        fn or_unknown(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or(UNKNOWN)
        }

        let pairs: Vec<(&str, &str)> = match self {
            AnalyticsEvent::PageView { page } => vec![("page", page.as_str())],
            AnalyticsEvent::ButtonClick { button, location } => {
                vec![("button", button.as_str()), ("location", or_unknown(location))]
            }
            AnalyticsEvent::FormSubmission { form } => vec![("form", form.as_str())],
            AnalyticsEvent::Navigation { from, to } | AnalyticsEvent::LanguageChange { from, to } => {
                vec![("from", from.as_str()), ("to", to.as_str())]
            }
            AnalyticsEvent::Conversion { event, value } => {
                vec![("event", event.as_str()), ("value", or_unknown(value))]
            }
            AnalyticsEvent::PricingInterest { plan, action } => {
                vec![("plan", plan.as_str()), ("action", action.as_str())]
            }
            AnalyticsEvent::DownloadAttempt { source } => vec![("source", source.as_str())],
        };

        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect()
    }
}

/// Outbound analytics collector. Emission is fire-and-forget.
pub trait AnalyticsSink: Send + Sync {
    fn emit(&self, name: &str, props: &AnalyticsProps);
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalyticsSink;

impl AnalyticsSink for TracingAnalyticsSink {
    fn emit(&self, name: &str, props: &AnalyticsProps) {
        let props = serde_json::to_string(props).unwrap_or_default();
        info!(event = name, %props, "Analytics event");
    }
}

/// Keeps every emitted event.
#[derive(Debug, Default)]
pub struct MemoryAnalyticsSink {
    events: Mutex<Vec<(String, AnalyticsProps)>>,
}

impl MemoryAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, AnalyticsProps)> {
        self.events.lock().clone()
    }
}

impl AnalyticsSink for MemoryAnalyticsSink {
    fn emit(&self, name: &str, props: &AnalyticsProps) {
        self.events.lock().push((name.to_string(), props.clone()));
    }
}

impl<S: AnalyticsSink + ?Sized> AnalyticsSink for Arc<S> {
    fn emit(&self, name: &str, props: &AnalyticsProps) {
        (**self).emit(name, props);
    }
}

/// Emits events only while the user has accepted analytics.
pub struct Analytics<S: AnalyticsSink> {
    consent: Arc<Consent>,
    sink: S,
}

impl<S: AnalyticsSink> Analytics<S> {
    pub fn new(consent: Arc<Consent>, sink: S) -> Self {
        Self { consent, sink }
    }

    pub fn consent(&self) -> &Consent {
        &self.consent
    }

    /// Emit a typed event. Returns whether it was sent.
    pub fn record(&self, event: &AnalyticsEvent) -> bool {
        self.track(event.name(), event.props())
    }

    /// Emit an arbitrary event. Returns whether it was sent.
    pub fn track(&self, name: &str, props: AnalyticsProps) -> bool {
        if !self.consent.analytics_allowed() {
            debug!(event = name, "Analytics suppressed without consent");
            return false;
        }
        self.sink.emit(name, &props);
        true
    }
}
