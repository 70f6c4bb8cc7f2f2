//! Fixed-window request counting per identifier.
//!
//! Each identifier owns one counter that admits `max_requests` calls until
//! its window closes, then starts over at one. A burst straddling a window
//! boundary can see close to twice the limit admitted; that is accepted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::SecurityError;
use crate::monitor::{EventDetails, SecurityEventType, SecurityMonitor};

/// Characters of the identifier kept in rate-limit events.
const IDENTIFIER_PREFIX_LEN: usize = 8;

/// Rate limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_millis(900_000),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.max_requests == 0 {
            return Err(SecurityError::InvalidConfig(
                "rate_limit.max_requests must be greater than 0".into(),
            ));
        }
        if self.window.as_millis() == 0 {
            return Err(SecurityError::InvalidConfig(
                "rate_limit.window_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Counter state for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    /// Epoch milliseconds at which the current window closes.
    pub reset_time_ms: i64,
}

/// Process-wide fixed-window limiter keyed by identifier.
///
/// The read-decide-write sequence for an identifier runs under that key's
/// shard lock, so concurrent callers never lose increments.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
            monitor: None,
        }
    }

    /// Record rejected requests as `rateLimitHit` events.
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request using the configured limits.
    pub fn check(&self, identifier: &str) -> bool {
        self.check_with(identifier, self.config.max_requests, self.config.window)
    }

    /// Admit or reject one request with explicit limits.
    pub fn check_with(&self, identifier: &str, max_requests: u32, window: Duration) -> bool {
        let now = self.clock.now_ms();
        let window_ms = i64::try_from(window.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);

        let attempts = match self.entries.entry(identifier.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitEntry {
                    count: 1,
                    reset_time_ms: now.saturating_add(window_ms),
                });
                return true;
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now >= entry.reset_time_ms {
                    debug!(window_ms, "Rate limit window rolled over");
                    *entry = RateLimitEntry {
                        count: 1,
                        reset_time_ms: now.saturating_add(window_ms),
                    };
                    return true;
                }
                if entry.count < max_requests {
                    entry.count += 1;
                    return true;
                }
                entry.count
            }
        };

        // Shard lock is released before reporting.
        let prefix: String = identifier.chars().take(IDENTIFIER_PREFIX_LEN).collect();
        warn!(
            identifier = %prefix,
            attempts,
            max_requests,
            window_ms,
            "Rate limit exceeded"
        );
        if let Some(monitor) = &self.monitor {
            let mut details = EventDetails::new();
            details.insert("identifier".into(), prefix.into());
            details.insert("attempts".into(), attempts.into());
            details.insert("window".into(), window_ms.into());
            monitor.log_event(SecurityEventType::RateLimitHit, details);
        }
        false
    }

    /// Like [`check`](Self::check), but returns the time left in the window on rejection.
    pub fn check_or_err(&self, identifier: &str) -> Result<(), SecurityError> {
        if self.check(identifier) {
            return Ok(());
        }
        Err(SecurityError::RateLimited {
            identifier: identifier.chars().take(IDENTIFIER_PREFIX_LEN).collect(),
            retry_after: self.retry_after(identifier).unwrap_or_default(),
        })
    }

    /// Time until the identifier's current window closes, if it has one.
    pub fn retry_after(&self, identifier: &str) -> Option<Duration> {
        let entry = self.entry(identifier)?;
        let remaining = entry.reset_time_ms - self.clock.now_ms();
        u64::try_from(remaining).ok().map(Duration::from_millis)
    }

    pub fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.entries.get(identifier).map(|e| *e)
    }

    /// Forget an identifier's counter.
    pub fn reset(&self, identifier: &str) {
        self.entries.remove(identifier);
    }

    pub fn reset_all(&self) {
        self.entries.clear();
    }

    /// Drop entries whose window has closed. Returns how many were removed.
    ///
    /// Entries are otherwise kept for the life of the limiter.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.reset_time_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::monitor::MonitorConfig;

    fn limiter(max_requests: u32, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        let config = RateLimitConfig {
            max_requests,
            window: Duration::from_millis(window_ms),
        };
        (RateLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_allows_up_to_limit() {
        let (limiter, clock) = limiter(5, 1000);
        for _ in 0..5 {
            assert!(limiter.check("client"));
            clock.advance(Duration::from_millis(100));
        }
        assert!(!limiter.check("client"));
    }

    #[test]
    fn test_fresh_window_after_expiry() {
        let (limiter, clock) = limiter(5, 1000);
        for _ in 0..6 {
            limiter.check("client");
        }
        assert!(!limiter.check("client"));

        clock.advance(Duration::from_millis(1000));
        assert!(limiter.check("client"));
        let entry = limiter.entry("client").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.reset_time_ms, 1_000_000 + 2000);
    }

    #[test]
    fn test_reset_time_after_creation() {
        let (limiter, clock) = limiter(3, 500);
        limiter.check("a");
        let entry = limiter.entry("a").unwrap();
        assert!(entry.reset_time_ms > clock.now_ms());
    }

    #[test]
    fn test_count_capped_while_rejecting() {
        let (limiter, _) = limiter(2, 1000);
        for _ in 0..10 {
            limiter.check("a");
        }
        assert_eq!(limiter.entry("a").unwrap().count, 2);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (limiter, _) = limiter(1, 1000);
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_explicit_limits() {
        let (limiter, clock) = limiter(5, 1000);
        assert!(limiter.check_with("a", 1, Duration::from_millis(50)));
        assert!(!limiter.check_with("a", 1, Duration::from_millis(50)));
        clock.advance(Duration::from_millis(50));
        assert!(limiter.check_with("a", 1, Duration::from_millis(50)));
    }

    #[test]
    fn test_hit_logs_truncated_identifier() {
        let (limiter, _) = limiter(1, 1000);
        let monitor = Arc::new(SecurityMonitor::new(MonitorConfig::default()));
        let limiter = limiter.with_monitor(monitor.clone());

        assert!(limiter.check("0123456789abcdef"));
        assert!(!limiter.check("0123456789abcdef"));

        let events = monitor.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::RateLimitHit);
        assert_eq!(events[0].details["identifier"], "01234567");
        assert_eq!(events[0].details["attempts"], 1);
        assert_eq!(events[0].details["window"], 1000);
    }

    #[test]
    fn test_check_or_err_reports_retry_after() {
        let (limiter, clock) = limiter(1, 1000);
        assert!(limiter.check_or_err("a").is_ok());
        clock.advance(Duration::from_millis(400));

        match limiter.check_or_err("a") {
            Err(SecurityError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_millis(600));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reset_and_prune() {
        let (limiter, clock) = limiter(1, 1000);
        limiter.check("a");
        limiter.check("b");
        limiter.reset("a");
        assert!(limiter.check("a"));

        clock.advance(Duration::from_millis(1000));
        assert_eq!(limiter.prune_expired(), 2);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());
        let zero_window = RateLimitConfig {
            max_requests: 5,
            window: Duration::from_micros(500),
        };
        assert!(matches!(
            zero_window.validate(),
            Err(SecurityError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_concurrent_checks_do_not_lose_updates() {
        let (limiter, _) = limiter(100, 60_000);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.check("shared")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 100);
        assert_eq!(limiter.entry("shared").unwrap().count, 100);
    }
}
