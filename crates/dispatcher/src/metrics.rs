//! Sink metrics for observability

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Events written
    write_count: AtomicU64,
    /// Events the sink failed to write
    failure_count: AtomicU64,
    /// Events dropped because the queue was full
    dropped_count: AtomicU64,
    /// Unix millis of the last successful write, 0 if none
    last_write_ms: AtomicI64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Count a successful write at the current time
    pub fn record_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.last_write_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_write(&self) -> Option<DateTime<Utc>> {
        match self.last_write_ms.load(Ordering::Relaxed) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            last_write: self.last_write(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub last_write: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_writes() {
        let metrics = SinkMetrics::new();
        assert!(metrics.snapshot().last_write.is_none());

        metrics.record_write();
        metrics.inc_dropped_count();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.write_count, 1);
        assert_eq!(snapshot.dropped_count, 1);
        assert!(snapshot.last_write.is_some());
    }
}
