// Session metrics
//
// Lightweight counters shared between the pipeline worker and the session.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters for one interactive session
///
/// Uses atomic operations so the blocking worker can record without locks.
/// Logged once on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Number of pipeline runs started
    pub runs_started: AtomicUsize,

    /// Number of runs stopped by a cancel request
    pub runs_cancelled: AtomicUsize,

    /// Files whose content was rewritten
    pub files_updated: AtomicUsize,

    /// Files left untouched (already correct or no tag)
    pub files_skipped: AtomicUsize,

    /// Files that failed to read or write
    pub files_failed: AtomicUsize,

    /// Time spent reading, transforming and writing files, in microseconds
    pub total_io_time_us: AtomicU64,

    /// Records the worker could not deliver because the session went away
    pub records_dropped: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicUsize::new(0),
            runs_cancelled: AtomicUsize::new(0),
            files_updated: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            total_io_time_us: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_updated(&self) {
        self.files_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_io_time(&self, duration: Duration) {
        self.total_io_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_processed(&self) -> usize {
        self.files_updated.load(Ordering::Relaxed)
            + self.files_skipped.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average I/O time per processed file in milliseconds
    pub fn avg_io_time_ms(&self) -> f64 {
        let total_us = self.total_io_time_us.load(Ordering::Relaxed);
        let count = self.files_processed();
        if count > 0 {
            total_us as f64 / 1000.0 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Session Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Runs: {} started, {} cancelled",
            self.runs_started.load(Ordering::Relaxed),
            self.runs_cancelled.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Files: {} updated, {} skipped, {} failed",
            self.files_updated.load(Ordering::Relaxed),
            self.files_skipped.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "I/O time: {:.2}s (avg: {:.2}ms per file), undelivered records: {}",
            self.total_io_time_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            self.avg_io_time_ms(),
            self.records_dropped.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
