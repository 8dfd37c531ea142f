//! Request and error counters

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error rate (percent) at which the agent reports itself degraded
const DEGRADED_ERROR_RATE_PCT: f64 = 10.0;

/// Process health counters
pub struct Health {
    started_at: DateTime<Utc>,
    requests: AtomicU64,
    errors: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Point-in-time health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// `healthy` or `degraded`
    pub status: &'static str,
    /// Seconds since start
    pub uptime_seconds: i64,
    /// Handled requests
    pub requests: u64,
    /// Failed requests
    pub errors: u64,
    /// Failed share of requests, in percent
    pub error_rate_pct: f64,
}

impl Health {
    /// Start counting from now
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            started_at: clock.now(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            clock,
        }
    }

    /// Record one handled request
    pub fn record(&self, success: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current report
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let error_rate_pct = if requests == 0 {
            0.0
        } else {
            errors as f64 / requests as f64 * 100.0
        };

        HealthReport {
            status: if error_rate_pct < DEGRADED_ERROR_RATE_PCT {
                "healthy"
            } else {
                "degraded"
            },
            uptime_seconds: (self.clock.now() - self.started_at).num_seconds(),
            requests,
            errors,
            error_rate_pct,
        }
    }
}

impl HealthReport {
    /// One-line summary for status replies
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Health: {} | Uptime: {}s | Requests: {} | Error rate: {:.1}%",
            self.status, self.uptime_seconds, self.requests, self.error_rate_pct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_status_flips_at_ten_percent() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let health = Health::new(clock.clone());
        assert_eq!(health.report().status, "healthy");

        for _ in 0..9 {
            health.record(true);
        }
        health.record(false);
        clock.advance(Duration::from_secs(42));

        let report = health.report();
        assert_eq!(report.status, "degraded");
        assert_eq!(report.requests, 10);
        assert_eq!(report.errors, 1);
        assert_eq!(report.uptime_seconds, 42);

        health.record(true);
        assert_eq!(health.report().status, "healthy");
    }
}
