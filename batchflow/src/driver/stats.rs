//! Live measurement for load-generation runs.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// How many samples the latency window keeps.
const WINDOW_CAPACITY: usize = 100;

/// Progress rows are logged at most this often.
const LOG_INTERVAL_SECS: u64 = 5;

/// Average/max/min over the last N pushed values.
#[derive(Debug)]
pub struct RollingWindow {
    values: Mutex<VecDeque<u64>>,
    capacity: usize,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

impl RollingWindow {
    /// Creates a window keeping the last `capacity` values.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Pushes a value, evicting the oldest when the window is full.
    pub fn push(&self, value: u64) {
        let mut values = self.values.lock();
        if values.len() == self.capacity {
            values.pop_front();
        }
        values.push_back(value);
    }

    /// Returns the average of the windowed values, zero when empty.
    #[must_use]
    pub fn average(&self) -> u64 {
        let values = self.values.lock();
        if values.is_empty() {
            return 0;
        }
        let sum: u64 = values.iter().sum();
        sum / values.len() as u64
    }

    /// Returns the maximum windowed value, zero when empty.
    #[must_use]
    pub fn max(&self) -> u64 {
        self.values.lock().iter().copied().max().unwrap_or(0)
    }

    /// Returns the minimum windowed value, zero when empty.
    #[must_use]
    pub fn min(&self) -> u64 {
        self.values.lock().iter().copied().min().unwrap_or(0)
    }
}

/// Per-run live counters with rate-limited progress logging.
///
/// All mutation is atomic or windowed behind a short lock, so workers update
/// the same instance without coordination; totals are read once at the end of
/// the run.
#[derive(Debug)]
pub struct MeasurementStats {
    mode: String,
    size_metric_title: String,
    success: AtomicUsize,
    failure: AtomicUsize,
    size_metric: AtomicU64,
    exec_time: RollingWindow,
    started: tokio::time::Instant,
    last_log_secs: AtomicU64,
    header_printed: AtomicBool,
    document_count: AtomicUsize,
}

impl MeasurementStats {
    /// Creates a new stats collector for the given mode label.
    #[must_use]
    pub fn new(mode: impl Into<String>, size_metric_title: Option<&str>) -> Self {
        Self {
            mode: mode.into(),
            size_metric_title: size_metric_title.unwrap_or("N/A").to_string(),
            success: AtomicUsize::new(0),
            failure: AtomicUsize::new(0),
            size_metric: AtomicU64::new(0),
            exec_time: RollingWindow::default(),
            started: tokio::time::Instant::now(),
            last_log_secs: AtomicU64::new(0),
            header_printed: AtomicBool::new(false),
            document_count: AtomicUsize::new(0),
        }
    }

    /// Sets the expected number of documents for the current batch.
    pub fn set_document_count(&self, count: usize) {
        self.document_count.store(count, Ordering::Relaxed);
    }

    /// Increments and returns the success count.
    pub fn increment_success_count(&self) -> usize {
        self.success.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Increments and returns the failure count.
    pub fn increment_failure_count(&self) -> usize {
        self.failure.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds to the size metric and returns the new total.
    pub fn add_to_size_metric(&self, value: u64) -> u64 {
        self.size_metric.fetch_add(value, Ordering::Relaxed) + value
    }

    /// Records one execution latency.
    pub fn push_exec_time_millis(&self, millis: u64) {
        self.exec_time.push(millis);
    }

    /// Returns the success count.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.success.load(Ordering::Relaxed)
    }

    /// Returns the failure count.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failure.load(Ordering::Relaxed)
    }

    /// Returns the elapsed wall-clock time since construction.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }

    /// Logs a progress row.
    ///
    /// Rate-limited to one row per [`LOG_INTERVAL_SECS`], except that the
    /// last document of a batch always logs a final row.
    pub fn log_progress(&self) {
        if !self.header_printed.swap(true, Ordering::Relaxed) {
            info!("+--------------------+--------+--------+--------+----------+--------------------+--------+--------+--------+");
            info!(
                "|mode                |elapsed |success |failure | speed    |{:<20}|average |max     |min     |",
                self.size_metric_title
            );
            info!("|                    |        |pcs     |pcs     | call/min |                    |ms      |ms      |ms      |");
            info!("+--------------------+--------+--------+--------+----------+--------------------+--------+--------+--------+");
        }

        let current = self.duration().as_secs();
        let last = self.last_log_secs.load(Ordering::Relaxed);
        let processed = self.success_count() + self.failure_count();
        let last_document = processed == self.document_count.load(Ordering::Relaxed);

        let due = current >= last + LOG_INTERVAL_SECS
            && self
                .last_log_secs
                .compare_exchange(last, current, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok();
        if !(last_document || due) {
            return;
        }

        let success = self.success_count();
        let failure = self.failure_count();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let speed = if current == 0 {
            0
        } else {
            (success as f64 / (current as f64 / 60.0)) as u64
        };

        info!(
            "|{:<20}|{}|{:>8}|{:>8}|{:>10}|{:>20}|{:>8}|{:>8}|{:>8}|",
            self.mode,
            format_interval(current),
            success,
            failure,
            speed,
            self.size_metric.load(Ordering::Relaxed),
            self.exec_time.average(),
            self.exec_time.max(),
            self.exec_time.min()
        );
    }
}

fn format_interval(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{hours:02}:{mins:02}:{secs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_average_max_min() {
        let window = RollingWindow::new(3);
        assert_eq!(window.average(), 0);

        window.push(10);
        window.push(20);
        window.push(30);
        assert_eq!(window.average(), 20);
        assert_eq!(window.max(), 30);
        assert_eq!(window.min(), 10);
    }

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let window = RollingWindow::new(2);
        window.push(100);
        window.push(10);
        window.push(20);

        // 100 has been evicted.
        assert_eq!(window.max(), 20);
        assert_eq!(window.min(), 10);
    }

    #[tokio::test]
    async fn test_counters() {
        let stats = MeasurementStats::new("SERVICE", None);
        assert_eq!(stats.increment_success_count(), 1);
        assert_eq!(stats.increment_success_count(), 2);
        assert_eq!(stats.increment_failure_count(), 1);
        assert_eq!(stats.add_to_size_metric(5), 5);
        assert_eq!(stats.add_to_size_metric(7), 12);
        assert_eq!(stats.success_count(), 2);
        assert_eq!(stats.failure_count(), 1);
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "00:00:00");
        assert_eq!(format_interval(3661), "01:01:01");
        assert_eq!(format_interval(7322), "02:02:02");
    }
}
