//! Scan Statistics
//!
//! Live counters for an active scan. The running scan holds the
//! mutable cell behind a mutex; everyone else observes snapshots.
//! Invariants: scanned + skipped <= total, progress is non-decreasing
//! until reset and reaches 100 exactly once, at completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Progress is held below this while a scan is running; completion
/// sets 100.
const RUNNING_PROGRESS_CAP: u32 = 99;

#[derive(Debug, Clone, Default)]
pub struct ScanStatistics {
    pub total_files: u64,
    pub scanned_files: u64,
    pub skipped_files: u64,
    pub total_bytes: u64,
    pub scanned_bytes: u64,
    pub threats_found: u64,
    pub progress_percent: u32,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl ScanStatistics {
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Instant::now) - start)
    }

    fn recompute_progress(&mut self) {
        if self.total_files == 0 {
            return;
        }
        let processed = self.scanned_files + self.skipped_files;
        let percent = ((processed * 100) / self.total_files) as u32;
        let percent = percent.min(RUNNING_PROGRESS_CAP);
        // Never move backwards, even if totals are revised.
        if percent > self.progress_percent {
            self.progress_percent = percent;
        }
    }
}

/// The shared mutable cell owned by the running scan.
#[derive(Clone, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<ScanStatistics>>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all counters and stamp the start time.
    pub fn begin(&self) {
        let mut stats = self.inner.lock();
        *stats = ScanStatistics {
            started_at: Some(Instant::now()),
            ..Default::default()
        };
    }

    pub fn add_discovered(&self, count: u64, bytes: u64) {
        let mut stats = self.inner.lock();
        stats.total_files += count;
        stats.total_bytes += bytes;
    }

    pub fn record_scanned(&self, bytes: u64) {
        let mut stats = self.inner.lock();
        stats.scanned_files += 1;
        stats.scanned_bytes += bytes;
        stats.recompute_progress();
    }

    pub fn record_skipped(&self) {
        let mut stats = self.inner.lock();
        stats.skipped_files += 1;
        stats.recompute_progress();
    }

    pub fn record_threat(&self) {
        self.inner.lock().threats_found += 1;
    }

    /// Stamp the end time and publish the single progress=100 point.
    pub fn finish(&self) {
        let mut stats = self.inner.lock();
        stats.finished_at = Some(Instant::now());
        stats.progress_percent = 100;
    }

    pub fn snapshot(&self) -> ScanStatistics {
        self.inner.lock().clone()
    }
}
