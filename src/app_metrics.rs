use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Application-level counters for the ingestion and classification jobs.
/// Shared between job threads, hence atomics.
#[derive(Default)]
pub struct AppMetrics {
    /// Position reports received from the fleet API
    pub positions_fetched: AtomicU64,
    /// Track points written to the track store
    pub points_appended: AtomicU64,
    /// Track points the store refused
    pub append_failures: AtomicU64,
    /// Whole fleet fetches that failed
    pub fetch_failures: AtomicU64,
    pub vessels_classified: AtomicU64,
    /// Published records that actually changed
    pub status_changes: AtomicU64,
    pub publish_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub positions_fetched: u64,
    pub points_appended: u64,
    pub append_failures: u64,
    pub fetch_failures: u64,
    pub vessels_classified: u64,
    pub status_changes: u64,
    pub publish_failures: u64,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            positions_fetched: self.positions_fetched.load(Ordering::Relaxed),
            points_appended: self.points_appended.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            vessels_classified: self.vessels_classified.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero, returning what they held
    pub fn take(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            positions_fetched: self.positions_fetched.swap(0, Ordering::Relaxed),
            points_appended: self.points_appended.swap(0, Ordering::Relaxed),
            append_failures: self.append_failures.swap(0, Ordering::Relaxed),
            fetch_failures: self.fetch_failures.swap(0, Ordering::Relaxed),
            vessels_classified: self.vessels_classified.swap(0, Ordering::Relaxed),
            status_changes: self.status_changes.swap(0, Ordering::Relaxed),
            publish_failures: self.publish_failures.swap(0, Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    pub fn log(&self) {
        info!(
            "[Metrics] Positions fetched: {}, Points appended: {}, Append failures: {}, Fetch failures: {}, Vessels classified: {}, Status changes: {}, Publish failures: {}",
            self.positions_fetched,
            self.points_appended,
            self.append_failures,
            self.fetch_failures,
            self.vessels_classified,
            self.status_changes,
            self.publish_failures
        );
    }
}

/// Manages periodic logging of application metrics
pub struct MetricsLogger {
    last_log: Instant,
    log_interval: Duration,
}

impl MetricsLogger {
    pub fn new(log_interval: Duration) -> Self {
        Self {
            last_log: Instant::now(),
            log_interval,
        }
    }

    /// Check if it's time to log metrics, and if so, log them and reset
    /// Returns true if metrics were logged
    pub fn check_and_log(&mut self, metrics: &AppMetrics) -> bool {
        if self.last_log.elapsed() >= self.log_interval {
            metrics.take().log();
            self.last_log = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let metrics = AppMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_take_clears_all_counters() {
        let metrics = AppMetrics::new();
        AppMetrics::add(&metrics.positions_fetched, 100);
        AppMetrics::add(&metrics.points_appended, 90);
        AppMetrics::add(&metrics.append_failures, 2);
        AppMetrics::add(&metrics.status_changes, 5);

        let taken = metrics.take();
        assert_eq!(taken.positions_fetched, 100);
        assert_eq!(taken.points_appended, 90);
        assert_eq!(taken.append_failures, 2);
        assert_eq!(taken.status_changes, 5);

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_logger_interval() {
        let mut logger = MetricsLogger::new(Duration::from_millis(50));
        let metrics = AppMetrics::new();

        // Should not log immediately
        assert!(!logger.check_and_log(&metrics));

        std::thread::sleep(Duration::from_millis(60));
        assert!(logger.check_and_log(&metrics));

        // Should not log immediately after
        assert!(!logger.check_and_log(&metrics));
    }
}
