//! Progress tracking utilities
//!
//! Thread-safe progress tracker for logging progress at regular intervals.
//! The tracker maintains an internal count and logs when interval boundaries
//! are crossed.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::logging::format_count;

/// Thread-safe progress tracker for logging progress at regular intervals.
///
/// Maintains an internal count and logs progress messages when the count
/// crosses interval boundaries. Safe to use from multiple threads.
///
/// # Example
/// ```
/// use fgdup_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Processed records").with_interval(100);
///
/// for _ in 0..250 {
///     tracker.log_if_needed(1); // Logs at 100, 200
/// }
/// tracker.log_final(); // Logs "Processed records 250 (complete)"
/// ```
pub struct ProgressTracker {
    /// The logging interval - progress is logged when count crosses multiples of this.
    interval: u64,
    /// Message prefix for log output.
    message: String,
    /// Internal count of items processed (thread-safe).
    count: AtomicU64,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified message.
    ///
    /// The tracker starts with a count of 0 and a default interval of 1,000,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 1_000_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Set the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Add to the count and log if an interval boundary was crossed.
    ///
    /// Thread-safe; atomically adds `additional` to the internal count and
    /// logs once for each interval boundary crossed.
    pub fn log_if_needed(&self, additional: u64) {
        let previous = self.count.fetch_add(additional, Ordering::Relaxed);
        let current = previous + additional;
        if previous / self.interval != current / self.interval {
            info!("{} {}", self.message, format_count((current / self.interval) * self.interval));
        }
    }

    /// Log the final count if it is not exactly on an interval boundary.
    pub fn log_final(&self) {
        let current = self.count.load(Ordering::Relaxed);
        if current % self.interval != 0 {
            info!("{} {} (complete)", self.message, format_count(current));
        }
    }

    /// Returns the current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let tracker = ProgressTracker::new("Test").with_interval(10);
        tracker.log_if_needed(5);
        tracker.log_if_needed(7);
        assert_eq!(tracker.count(), 12);
    }

    #[test]
    fn test_final_log_does_not_change_count() {
        let tracker = ProgressTracker::new("Test").with_interval(10);
        tracker.log_if_needed(10);
        tracker.log_final();
        assert_eq!(tracker.count(), 10);
    }

    #[test]
    fn test_multithreaded_counts() {
        use std::sync::Arc;

        let tracker = Arc::new(ProgressTracker::new("Test").with_interval(1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.log_if_needed(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.count(), 400);
    }
}
