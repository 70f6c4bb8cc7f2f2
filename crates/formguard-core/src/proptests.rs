//! Property-based tests for the form protection primitives.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use crate::clock::ManualClock;
    use crate::csrf::CsrfToken;
    use crate::fingerprint::{fingerprint_snapshot, rolling_hash, FingerprintProfile, SignalSnapshot};
    use crate::monitor::{EventDetails, MonitorConfig, SecurityEventType, SecurityMonitor};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::sanitize::{sanitize, sanitize_message, MAX_INPUT_LEN, MAX_MESSAGE_LEN};

    fn snapshot_strategy() -> impl Strategy<Value = SignalSnapshot> {
        (
            ".{0,150}",
            "[a-z]{2}(-[A-Z]{2})?",
            1u32..8000,
            1u32..8000,
            -720i32..=840,
            ".{0,150}",
        )
            .prop_map(|(user_agent, language, w, h, tz, canvas)| SignalSnapshot {
                user_agent,
                language,
                screen_width: w,
                screen_height: h,
                timezone_offset_minutes: tz,
                canvas_digest: canvas,
            })
    }

    // Sanitized output never carries angle brackets, even around a script tag.
    proptest! {
        #[test]
        fn property_sanitize_strips_brackets(prefix in ".{0,200}", body in ".{0,200}", suffix in ".{0,200}") {
            let input = format!("{prefix}<script>{body}</script>{suffix}");
            let out = sanitize(&input);
            prop_assert!(!out.contains('<'));
            prop_assert!(!out.contains('>'));
        }
    }

    // Output is bounded regardless of input length.
    proptest! {
        #[test]
        fn property_sanitize_bounded(input in ".{0,3000}") {
            prop_assert!(sanitize(&input).chars().count() <= MAX_INPUT_LEN);
            prop_assert!(sanitize_message(&input).chars().count() <= MAX_MESSAGE_LEN);
        }
    }

    // No javascript: prefix survives sanitization in any letter case.
    proptest! {
        #[test]
        fn property_sanitize_removes_js_protocol(noise in "[a-zA-Z: ]{0,40}") {
            let input = format!("{noise}JaVaScRiPt:{noise}javascript:alert(1)");
            let out = sanitize(&input).to_lowercase();
            prop_assert!(!out.contains("javascript:"));
        }
    }

    // The buffer never exceeds its capacity and keeps the newest events.
    proptest! {
        #[test]
        fn property_monitor_buffer_capped(max_events in 1usize..50, logged in 0usize..200) {
            let config = MonitorConfig { max_events, ..MonitorConfig::default() };
            let monitor = SecurityMonitor::with_clock(config, Arc::new(ManualClock::at_millis(0)));

            for seq in 0..logged {
                let mut details = EventDetails::new();
                details.insert("seq".into(), seq.into());
                monitor.log_event(SecurityEventType::RateLimitHit, details);
            }

            let events = monitor.events();
            prop_assert_eq!(events.len(), logged.min(max_events));
            if let Some(last) = events.last() {
                prop_assert_eq!(last.details["seq"].as_u64(), Some(logged as u64 - 1));
            }
        }
    }

    // Within one window exactly min(calls, limit) requests are admitted,
    // and the next window admits again.
    proptest! {
        #[test]
        fn property_fixed_window_admission(max_requests in 1u32..20, calls in 0u32..60, window_ms in 1u64..10_000) {
            let clock = Arc::new(ManualClock::at_millis(0));
            let config = RateLimitConfig { max_requests, window: Duration::from_millis(window_ms) };
            let limiter = RateLimiter::with_clock(config, clock.clone());

            let admitted = (0..calls).filter(|_| limiter.check("id")).count() as u32;
            prop_assert_eq!(admitted, calls.min(max_requests));

            clock.advance(Duration::from_millis(window_ms));
            prop_assert!(limiter.check("id"));
            prop_assert_eq!(limiter.entry("id").map(|e| e.count), Some(1));
        }
    }

    // Fingerprints are deterministic base-36 strings.
    proptest! {
        #[test]
        fn property_fingerprint_deterministic(snapshot in snapshot_strategy()) {
            for profile in [FingerprintProfile::RateLimit, FingerprintProfile::Monitoring] {
                let first = fingerprint_snapshot(&snapshot, profile);
                prop_assert_eq!(&first, &fingerprint_snapshot(&snapshot, profile));
                prop_assert!(!first.is_empty());
                prop_assert!(first.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
            }
        }
    }

    // The rolling hash equals `h * 31 + unit` reduced to signed 32 bits.
    proptest! {
        #[test]
        fn property_rolling_hash_wraps_to_i32(input in ".{0,64}") {
            let mut model: i64 = 0;
            for unit in input.encode_utf16() {
                model = (model * 31 + i64::from(unit)).rem_euclid(1 << 32);
            }
            let expected = if model >= 1 << 31 { model - (1 << 32) } else { model };
            prop_assert_eq!(i64::from(rolling_hash(&input)), expected);
        }
    }

    // Tokens are always 64 lowercase hex characters.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn property_csrf_token_shape(_seed in any::<u8>()) {
            let token = CsrfToken::generate().unwrap();
            prop_assert_eq!(token.as_str().len(), 64);
            prop_assert!(token.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            prop_assert!(token.verify(token.as_str()));
        }
    }
}
