//! Sliding-window rate limit and input validation

use super::GateError;
use crate::clock::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Length of the rate window
const WINDOW_SECS: i64 = 60;
/// Senders idle this long are dropped during cleanup
const STALE_AFTER_SECS: i64 = 300;
/// Cleanup runs every this many checks
const CLEANUP_EVERY: u64 = 100;

#[derive(Default)]
struct Windows {
    by_sender: HashMap<String, VecDeque<DateTime<Utc>>>,
    checks: u64,
}

/// Per-sender sliding-window limiter plus message validation
pub struct RateGate {
    windows: Mutex<Windows>,
    limit: usize,
    max_input_chars: usize,
    clock: Arc<dyn Clock>,
}

impl RateGate {
    /// Allow `limit` messages per sender per minute, each at most
    /// `max_input_chars` characters long.
    #[must_use]
    pub fn new(limit: usize, max_input_chars: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(Windows::default()),
            limit,
            max_input_chars,
            clock,
        }
    }

    /// Admit or reject a message.
    ///
    /// The sender's window is pruned to the trailing minute first; a sender
    /// already at the limit is rejected without recording the attempt.
    /// Admitted messages are then validated and returned trimmed.
    ///
    /// # Errors
    ///
    /// Returns a [`GateError`] whose text is meant for the sender.
    pub fn check(&self, sender: &str, message: &str) -> Result<String, GateError> {
        let now = self.clock.now();
        let window_start = now - TimeDelta::seconds(WINDOW_SECS);

        {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            windows.checks += 1;
            if windows.checks.is_multiple_of(CLEANUP_EVERY) {
                Self::cleanup(&mut windows, now);
            }

            let window = windows.by_sender.entry(sender.to_string()).or_default();
            while window.front().is_some_and(|t| *t <= window_start) {
                window.pop_front();
            }
            if window.len() >= self.limit {
                info!(sender = %crate::utils::truncate_str(sender, 20), "Rate limit exceeded");
                return Err(GateError::RateLimited);
            }
            window.push_back(now);
        }

        let clean = message.trim();
        if clean.is_empty() {
            return Err(GateError::Empty);
        }
        if clean.chars().count() > self.max_input_chars {
            return Err(GateError::TooLong {
                max: self.max_input_chars,
            });
        }
        Ok(clean.to_string())
    }

    /// Number of senders currently tracked
    #[must_use]
    pub fn tracked_senders(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_sender
            .len()
    }

    fn cleanup(windows: &mut Windows, now: DateTime<Utc>) {
        let stale_before = now - TimeDelta::seconds(STALE_AFTER_SECS);
        let before = windows.by_sender.len();
        windows
            .by_sender
            .retain(|_, window| window.back().is_some_and(|last| *last > stale_before));
        debug!(
            dropped = before - windows.by_sender.len(),
            "Rate windows cleaned up"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn gate(limit: usize) -> (RateGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (RateGate::new(limit, 50, clock.clone()), clock)
    }

    #[test]
    fn test_limit_plus_one_is_rejected_then_window_rolls() {
        let (gate, clock) = gate(3);
        for _ in 0..3 {
            assert!(gate.check("alice", "hi").is_ok());
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(gate.check("alice", "hi"), Err(GateError::RateLimited));

        // First admitted message was at t=0; the window must fully pass it
        clock.advance(Duration::from_secs(58));
        assert_eq!(gate.check("alice", "hi"), Ok("hi".to_string()));
    }

    #[test]
    fn test_rejected_attempts_do_not_extend_window() {
        let (gate, clock) = gate(1);
        assert!(gate.check("bob", "a").is_ok());
        for _ in 0..10 {
            clock.advance(Duration::from_secs(5));
            assert!(gate.check("bob", "a").is_err());
        }
        clock.advance(Duration::from_secs(10));
        assert!(gate.check("bob", "a").is_ok());
    }

    #[test]
    fn test_senders_are_independent() {
        let (gate, _) = gate(1);
        assert!(gate.check("a", "x").is_ok());
        assert!(gate.check("a", "x").is_err());
        assert!(gate.check("b", "x").is_ok());
    }

    #[test]
    fn test_validation() {
        let (gate, _) = gate(100);
        assert_eq!(gate.check("a", "   "), Err(GateError::Empty));
        assert_eq!(
            gate.check("a", &"x".repeat(51)),
            Err(GateError::TooLong { max: 50 })
        );
        assert_eq!(gate.check("a", "  watch WATCH above 1  "), Ok("watch WATCH above 1".into()));
    }

    #[test]
    fn test_rate_limit_checked_before_validation() {
        let (gate, _) = gate(1);
        assert_eq!(gate.check("a", ""), Err(GateError::Empty));
        assert_eq!(gate.check("a", "hello"), Err(GateError::RateLimited));
    }

    #[test]
    fn test_stale_senders_are_cleaned_up() {
        let (gate, clock) = gate(1000);
        for i in 0..50 {
            assert!(gate.check(&format!("idle-{i}"), "x").is_ok());
        }
        clock.advance(Duration::from_secs(301));
        for _ in 0..50 {
            assert!(gate.check("active", "x").is_ok());
        }
        assert_eq!(gate.tracked_senders(), 1);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            GateError::RateLimited.to_string(),
            "Rate limit exceeded. Please wait a moment."
        );
        assert_eq!(
            GateError::TooLong { max: 2000 }.to_string(),
            "Message too long (max 2000 chars)."
        );
    }
}
