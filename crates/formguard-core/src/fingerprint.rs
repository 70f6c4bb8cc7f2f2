//! Best-effort client fingerprinting.
//!
//! The fingerprint is a low-entropy bucketing key for rate limiting and event
//! correlation. It is not cryptographic and is trivially spoofed by a hostile
//! client, so it must never gate anything security-relevant on its own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Fingerprint reported when no client environment is available.
pub const NO_ENVIRONMENT: &str = "server";

const CANVAS_DIGEST_LEN: usize = 100;

/// Snapshot of the environment signals a fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub user_agent: String,
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Minutes behind UTC, as reported by the client (UTC+1 is `-60`).
    pub timezone_offset_minutes: i32,
    /// Digest of a rendered test canvas, if the host can produce one.
    #[serde(default)]
    pub canvas_digest: String,
}

/// Provider of environment signals.
///
/// Hosts without a client environment (servers, batch jobs) use
/// [`NoEnvironment`].
pub trait EnvironmentSignals: Send + Sync {
    fn snapshot(&self) -> Option<SignalSnapshot>;
}

/// Null provider: there is no client environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnvironment;

impl EnvironmentSignals for NoEnvironment {
    fn snapshot(&self) -> Option<SignalSnapshot> {
        None
    }
}

/// Provider returning a fixed, host-supplied snapshot.
#[derive(Debug, Clone)]
pub struct StaticSignals(pub SignalSnapshot);

impl EnvironmentSignals for StaticSignals {
    fn snapshot(&self) -> Option<SignalSnapshot> {
        Some(self.0.clone())
    }
}

/// Which signals go into the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintProfile {
    /// Rate-limit key: user agent (100 chars), locale, screen, timezone, canvas.
    RateLimit,
    /// Event correlation: user agent (50 chars), locale, screen, timezone.
    Monitoring,
}

impl FingerprintProfile {
    fn user_agent_len(self) -> usize {
        match self {
            FingerprintProfile::RateLimit => 100,
            FingerprintProfile::Monitoring => 50,
        }
    }

    fn includes_canvas(self) -> bool {
        matches!(self, FingerprintProfile::RateLimit)
    }
}

/// Computes fingerprints from an [`EnvironmentSignals`] provider.
#[derive(Clone)]
pub struct FingerprintGenerator {
    signals: Arc<dyn EnvironmentSignals>,
}

impl FingerprintGenerator {
    pub fn new(signals: Arc<dyn EnvironmentSignals>) -> Self {
        Self { signals }
    }

    /// Generator for hosts without a client environment.
    pub fn without_environment() -> Self {
        Self::new(Arc::new(NoEnvironment))
    }

    /// Fingerprint used as the rate-limit key.
    pub fn client_fingerprint(&self) -> String {
        self.generate(FingerprintProfile::RateLimit)
    }

    /// Fingerprint attached to security events.
    pub fn monitoring_fingerprint(&self) -> String {
        self.generate(FingerprintProfile::Monitoring)
    }

    pub fn generate(&self, profile: FingerprintProfile) -> String {
        match self.signals.snapshot() {
            Some(snapshot) => fingerprint_snapshot(&snapshot, profile),
            None => NO_ENVIRONMENT.to_string(),
        }
    }
}

impl std::fmt::Debug for FingerprintGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintGenerator").finish_non_exhaustive()
    }
}

/// Fingerprint a snapshot under the given profile.
pub fn fingerprint_snapshot(snapshot: &SignalSnapshot, profile: FingerprintProfile) -> String {
    let mut parts = vec![
        prefix(&snapshot.user_agent, profile.user_agent_len()).to_string(),
        snapshot.language.clone(),
        format!("{}x{}", snapshot.screen_width, snapshot.screen_height),
        snapshot.timezone_offset_minutes.to_string(),
    ];
    if profile.includes_canvas() {
        parts.push(prefix(&snapshot.canvas_digest, CANVAS_DIGEST_LEN).to_string());
    }

    to_base36(i64::from(rolling_hash(&parts.join("|"))).unsigned_abs())
}

/// `hash = hash * 31 + unit` over UTF-16 code units with 32-bit wraparound.
pub fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
