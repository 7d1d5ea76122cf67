//! Request counters exposed at `/metrics` in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct ApiMetrics {
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
    start_time: Instant,
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn export(&self) -> String {
        format!(
            r#"# HELP rewards_api_requests_total Total HTTP requests served
# TYPE rewards_api_requests_total counter
rewards_api_requests_total {}

# HELP rewards_api_errors_total Total HTTP requests answered with a 5xx
# TYPE rewards_api_errors_total counter
rewards_api_errors_total {}

# HELP rewards_api_uptime_seconds API process uptime in seconds
# TYPE rewards_api_uptime_seconds counter
rewards_api_uptime_seconds {}
"#,
            self.requests_total.load(Ordering::Relaxed),
            self.errors_total.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_and_errors_independently() {
        let metrics = ApiMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_error();
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.errors_total.load(Ordering::Relaxed), 1);
    }
}
