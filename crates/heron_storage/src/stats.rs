//! Buffer engine observability: lock-free counters plus `metrics` emission.
//!
//! The atomics are the source of truth (tests and admin surfaces read the
//! snapshot); the `metrics` facade mirrors them for whatever exporter the
//! host process installs.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Which flush-predicate branch fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdBranch {
    AllMin,
    TimeMax,
    RowsMax,
    BytesMax,
}

/// Counters and gauges for one buffer table.
#[derive(Debug)]
pub struct BufferStats {
    /// Table label attached to emitted metrics.
    table: String,
    pub flushes: AtomicU64,
    pub flush_errors: AtomicU64,
    /// Oversize blocks written straight to the destination.
    pub bypass_writes: AtomicU64,
    pub passed_all_min_thresholds: AtomicU64,
    pub passed_time_max_threshold: AtomicU64,
    pub passed_rows_max_threshold: AtomicU64,
    pub passed_bytes_max_threshold: AtomicU64,
    /// Signed so transient over-decrements in concurrent paths can't wrap.
    buffered_rows: AtomicI64,
    buffered_bytes: AtomicI64,
}

/// Point-in-time snapshot of buffer stats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStatsSnapshot {
    pub flushes: u64,
    pub flush_errors: u64,
    pub bypass_writes: u64,
    pub passed_all_min_thresholds: u64,
    pub passed_time_max_threshold: u64,
    pub passed_rows_max_threshold: u64,
    pub passed_bytes_max_threshold: u64,
    pub buffered_rows: i64,
    pub buffered_bytes: i64,
}

impl BufferStats {
    pub fn new(table: String) -> Self {
        Self {
            table,
            flushes: AtomicU64::new(0),
            flush_errors: AtomicU64::new(0),
            bypass_writes: AtomicU64::new(0),
            passed_all_min_thresholds: AtomicU64::new(0),
            passed_time_max_threshold: AtomicU64::new(0),
            passed_rows_max_threshold: AtomicU64::new(0),
            passed_bytes_max_threshold: AtomicU64::new(0),
            buffered_rows: AtomicI64::new(0),
            buffered_bytes: AtomicI64::new(0),
        }
    }

    /// Rows/bytes entered a shard (append or rollback reinstatement).
    pub fn add_buffered(&self, rows: usize, bytes: usize) {
        self.buffered_rows.fetch_add(rows as i64, Ordering::Relaxed);
        self.buffered_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
        metrics::gauge!("heron_buffer_rows", "table" => self.table.clone())
            .set(self.buffered_rows.load(Ordering::Relaxed) as f64);
        metrics::gauge!("heron_buffer_bytes", "table" => self.table.clone())
            .set(self.buffered_bytes.load(Ordering::Relaxed) as f64);
    }

    /// Rows/bytes left a shard (flush swap-out).
    pub fn sub_buffered(&self, rows: usize, bytes: usize) {
        self.buffered_rows.fetch_sub(rows as i64, Ordering::Relaxed);
        self.buffered_bytes.fetch_sub(bytes as i64, Ordering::Relaxed);
        metrics::gauge!("heron_buffer_rows", "table" => self.table.clone())
            .set(self.buffered_rows.load(Ordering::Relaxed) as f64);
        metrics::gauge!("heron_buffer_bytes", "table" => self.table.clone())
            .set(self.buffered_bytes.load(Ordering::Relaxed) as f64);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("heron_buffer_flushes_total", "table" => self.table.clone()).increment(1);
    }

    pub fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("heron_buffer_flush_errors_total", "table" => self.table.clone())
            .increment(1);
    }

    pub fn record_bypass_write(&self) {
        self.bypass_writes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("heron_buffer_bypass_writes_total", "table" => self.table.clone())
            .increment(1);
    }

    pub fn record_threshold(&self, branch: ThresholdBranch) {
        let (counter, name) = match branch {
            ThresholdBranch::AllMin => (
                &self.passed_all_min_thresholds,
                "heron_buffer_passed_all_min_thresholds_total",
            ),
            ThresholdBranch::TimeMax => (
                &self.passed_time_max_threshold,
                "heron_buffer_passed_time_max_threshold_total",
            ),
            ThresholdBranch::RowsMax => (
                &self.passed_rows_max_threshold,
                "heron_buffer_passed_rows_max_threshold_total",
            ),
            ThresholdBranch::BytesMax => (
                &self.passed_bytes_max_threshold,
                "heron_buffer_passed_bytes_max_threshold_total",
            ),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(name, "table" => self.table.clone()).increment(1);
    }

    pub fn buffered_rows(&self) -> i64 {
        self.buffered_rows.load(Ordering::Relaxed)
    }

    pub fn buffered_bytes(&self) -> i64 {
        self.buffered_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            bypass_writes: self.bypass_writes.load(Ordering::Relaxed),
            passed_all_min_thresholds: self.passed_all_min_thresholds.load(Ordering::Relaxed),
            passed_time_max_threshold: self.passed_time_max_threshold.load(Ordering::Relaxed),
            passed_rows_max_threshold: self.passed_rows_max_threshold.load(Ordering::Relaxed),
            passed_bytes_max_threshold: self.passed_bytes_max_threshold.load(Ordering::Relaxed),
            buffered_rows: self.buffered_rows.load(Ordering::Relaxed),
            buffered_bytes: self.buffered_bytes.load(Ordering::Relaxed),
        }
    }
}
