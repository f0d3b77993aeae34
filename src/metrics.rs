// Session metrics module
//
// Lightweight counters for the capture pipeline, logged on shutdown

use crate::models::{CancelReason, SessionOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Capture pipeline metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
#[derive(Debug)]
pub struct Metrics {
    /// Sessions that delivered text
    pub sessions_delivered: AtomicU64,

    /// Sessions cancelled by the user
    pub sessions_cancelled: AtomicU64,

    /// Sessions whose recognition came back empty
    pub sessions_empty: AtomicU64,

    /// Sessions that failed
    pub sessions_failed: AtomicU64,

    /// Capture requests dropped because a session was active
    pub busy_rejections: AtomicU64,

    /// Total time spent in sessions, in milliseconds
    pub total_session_time_ms: AtomicU64,

    /// Application start time
    start_time: Instant,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            sessions_delivered: AtomicU64::new(0),
            sessions_cancelled: AtomicU64::new(0),
            sessions_empty: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            total_session_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome and duration of a finished session
    pub fn record_outcome(&self, outcome: &SessionOutcome, duration: Duration) {
        let counter = match outcome {
            SessionOutcome::Delivered { .. } => &self.sessions_delivered,
            SessionOutcome::Cancelled(CancelReason::UserCancelled) => &self.sessions_cancelled,
            SessionOutcome::Cancelled(CancelReason::EmptyResult) => &self.sessions_empty,
            SessionOutcome::Failed { .. } => &self.sessions_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_session_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a dropped capture request
    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of sessions that reached a terminal state
    pub fn sessions_finished(&self) -> u64 {
        self.sessions_delivered.load(Ordering::Relaxed)
            + self.sessions_cancelled.load(Ordering::Relaxed)
            + self.sessions_empty.load(Ordering::Relaxed)
            + self.sessions_failed.load(Ordering::Relaxed)
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average session time in milliseconds
    pub fn avg_session_time_ms(&self) -> f64 {
        let total = self.total_session_time_ms.load(Ordering::Relaxed);
        let count = self.sessions_finished();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Session Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Sessions: {} delivered, {} cancelled, {} empty, {} failed",
            self.sessions_delivered.load(Ordering::Relaxed),
            self.sessions_cancelled.load(Ordering::Relaxed),
            self.sessions_empty.load(Ordering::Relaxed),
            self.sessions_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Busy rejections: {}, avg session time: {:.2}ms",
            self.busy_rejections.load(Ordering::Relaxed),
            self.avg_session_time_ms()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.sessions_finished(), 0);
        assert_eq!(metrics.avg_session_time_ms(), 0.0);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = Metrics::new();

        metrics.record_outcome(
            &SessionOutcome::Delivered {
                text: "x".to_string(),
            },
            Duration::from_millis(100),
        );
        metrics.record_outcome(
            &SessionOutcome::Cancelled(CancelReason::EmptyResult),
            Duration::from_millis(200),
        );
        metrics.record_busy();

        assert_eq!(metrics.sessions_delivered.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.sessions_empty.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.busy_rejections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.avg_session_time_ms(), 150.0);
    }
}
