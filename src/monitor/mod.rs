//! Real-Time File Monitor
//!
//! Subscribes to directory change notifications for each watched
//! root, admits or rejects each reported path, and enqueues admitted
//! paths by priority. A fixed pool of worker threads drains the queue
//! and calls the Threat Engine; severity >= 8 findings are
//! auto-quarantined. The notification side never scans.

pub mod filter;
pub mod queue;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::ScanEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventSink, ThreatEvent};
use queue::ScanQueue;

/// Findings at or above this severity are quarantined automatically.
const AUTO_QUARANTINE_SEVERITY: u8 = 8;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_SCAN_DELAY_MS: u64 = 100;

/// Point-in-time view of the monitor's activity counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorCounts {
    pub events_seen: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub scanned: u64,
    pub threats_found: u64,
    pub quarantined: u64,
}

#[derive(Default)]
struct Counters {
    events_seen: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    scanned: AtomicU64,
    threats_found: AtomicU64,
    quarantined: AtomicU64,
}

/// State shared between the notification callback and the workers.
struct MonitorShared {
    queue: ScanQueue,
    running: AtomicBool,
    real_time: AtomicBool,
    counters: Counters,
}

impl MonitorShared {
    /// Admission path: filter, classify, enqueue. Runs on the
    /// notification thread, so nothing here may block on I/O.
    fn admit(&self, path: &Path) {
        if !self.running.load(Ordering::SeqCst) || !self.real_time.load(Ordering::SeqCst) {
            return;
        }
        self.counters.events_seen.fetch_add(1, Ordering::Relaxed);

        if filter::should_skip(path) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let priority = filter::scan_priority(path);
        if self.queue.push(path.to_path_buf(), priority) {
            self.counters.admitted.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "queued for scan: {} (priority {})",
                path.display(),
                priority
            );
        }
    }
}

pub struct FileMonitor {
    engine: Arc<dyn ScanEngine>,
    events: Arc<EventSink>,
    shared: Arc<MonitorShared>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watches: Mutex<HashSet<PathBuf>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    scan_delay: Duration,
}

impl FileMonitor {
    pub fn new(
        engine: Arc<dyn ScanEngine>,
        events: Arc<EventSink>,
        worker_count: usize,
        scan_delay_ms: u64,
    ) -> Self {
        Self {
            engine,
            events,
            shared: Arc::new(MonitorShared {
                queue: ScanQueue::new(),
                running: AtomicBool::new(false),
                real_time: AtomicBool::new(true),
                counters: Counters::default(),
            }),
            watcher: Mutex::new(None),
            watches: Mutex::new(HashSet::new()),
            workers: Mutex::new(Vec::new()),
            worker_count: worker_count.max(1),
            scan_delay: Duration::from_millis(scan_delay_ms),
        }
    }

    /// Set up the change subscription and start the worker pool.
    /// Watches added before initialization are applied here.
    pub fn initialize(&self, watch_roots: &[PathBuf]) -> EngineResult<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if is_scan_trigger(&event.kind) {
                        for path in &event.paths {
                            shared.admit(path);
                        }
                    }
                }
                Err(err) => log::debug!("watch notification error: {}", err),
            },
            Config::default(),
        )
        .map_err(|e| watch_error(Path::new("<watcher>"), e))?;

        *self.watcher.lock() = Some(watcher);

        for root in watch_roots {
            if let Err(err) = self.add_watch(root) {
                log::warn!("cannot watch {}: {}", root.display(), err);
            }
        }

        let mut workers = self.workers.lock();
        for index in 0..self.worker_count {
            let engine = Arc::clone(&self.engine);
            let events = Arc::clone(&self.events);
            let shared = Arc::clone(&self.shared);
            let delay = self.scan_delay;
            workers.push(
                std::thread::Builder::new()
                    .name(format!("fs-monitor-worker-{}", index))
                    .spawn(move || worker_loop(engine, events, shared, delay))
                    .map_err(|e| EngineError::unreadable("<worker>", e))?,
            );
        }

        log::info!(
            "file monitor running: {} watches, {} workers, {}ms settle delay",
            self.watches.lock().len(),
            self.worker_count,
            self.scan_delay.as_millis()
        );
        Ok(())
    }

    pub fn add_watch(&self, path: &Path) -> EngineResult<()> {
        if !path.is_dir() {
            return Err(EngineError::NotFound(path.display().to_string()));
        }

        let mut watches = self.watches.lock();
        if !watches.insert(path.to_path_buf()) {
            return Ok(());
        }

        if let Some(watcher) = self.watcher.lock().as_mut() {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| watch_error(path, e))?;
            log::info!("watching {}", path.display());
        }
        Ok(())
    }

    pub fn remove_watch(&self, path: &Path) -> EngineResult<()> {
        if !self.watches.lock().remove(path) {
            return Err(EngineError::NotFound(path.display().to_string()));
        }
        if let Some(watcher) = self.watcher.lock().as_mut() {
            watcher.unwatch(path).map_err(|e| watch_error(path, e))?;
            log::info!("stopped watching {}", path.display());
        }
        Ok(())
    }

    pub fn set_real_time_protection(&self, enabled: bool) {
        let previous = self.shared.real_time.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            log::info!(
                "real-time protection {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn real_time_protection(&self) -> bool {
        self.shared.real_time.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> MonitorCounts {
        let c = &self.shared.counters;
        MonitorCounts {
            events_seen: c.events_seen.load(Ordering::Relaxed),
            admitted: c.admitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            scanned: c.scanned.load(Ordering::Relaxed),
            threats_found: c.threats_found.load(Ordering::Relaxed),
            quarantined: c.quarantined.load(Ordering::Relaxed),
        }
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().len()
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Inject a path directly, bypassing the change subscription and
    /// its admission filter: a deliberate request is scanned even
    /// where ambient churn would be ignored. Used by the service for
    /// on-demand "scan soon" requests.
    pub fn enqueue(&self, path: &Path) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        let priority = filter::scan_priority(path);
        if self.shared.queue.push(path.to_path_buf(), priority) {
            self.shared.counters.admitted.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Stop the subscription, wake every worker, and join the pool.
    /// No new enqueues are accepted afterwards.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("file monitor shutting down");

        self.shared.queue.close();
        *self.watcher.lock() = None;

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }

        log::info!("file monitor shutdown complete");
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Creation and content/metadata modification wake the scanner;
/// renames and removals do not.
fn is_scan_trigger(kind: &EventKind) -> bool {
    use notify::event::ModifyKind;
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Name(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

fn watch_error(path: &Path, err: notify::Error) -> EngineError {
    EngineError::unreadable(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    )
}

fn worker_loop(
    engine: Arc<dyn ScanEngine>,
    events: Arc<EventSink>,
    shared: Arc<MonitorShared>,
    delay: Duration,
) {
    while let Some(request) = shared.queue.pop() {
        // Give a still-writing file a moment to settle, then confirm
        // it survived.
        std::thread::sleep(delay);
        if !request.path.exists() {
            continue;
        }

        match engine.scan_path(&request.path) {
            Ok(Some(finding)) => {
                shared.counters.scanned.fetch_add(1, Ordering::Relaxed);
                shared.counters.threats_found.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "real-time detection: {} in {} (severity {})",
                    finding.threat_name,
                    finding.path.display(),
                    finding.severity
                );

                let event = ThreatEvent::from_finding(&finding);
                if finding.severity >= AUTO_QUARANTINE_SEVERITY {
                    match engine.quarantine(&finding.path, &finding.threat_name) {
                        Ok(_) => {
                            shared.counters.quarantined.fetch_add(1, Ordering::Relaxed);
                            events.emit(&event.quarantined());
                        }
                        Err(err) => {
                            // The file stays in place; the operator
                            // still hears about the detection.
                            log::error!(
                                "auto-quarantine failed for {}: {}",
                                finding.path.display(),
                                err
                            );
                            events.emit(&event.degraded());
                        }
                    }
                } else {
                    events.emit(&event);
                }
            }
            Ok(None) => {
                shared.counters.scanned.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if err.is_skippable() => {
                log::debug!("real-time scan skipped {}: {}", request.path.display(), err);
            }
            Err(err) => {
                log::error!("real-time scan failed {}: {}", request.path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::quarantine::QuarantineEntry;
    use crate::engine::ThreatFinding;
    use crate::error::EngineResult;
    use chrono::Utc;
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    /// Severity is encoded in the file name: `sev9.bin` scans as a
    /// severity-9 threat, anything else is clean.
    struct FakeEngine {
        quarantines: AtomicUsize,
        fail_quarantine: bool,
    }

    impl FakeEngine {
        fn new(fail_quarantine: bool) -> Arc<Self> {
            Arc::new(Self {
                quarantines: AtomicUsize::new(0),
                fail_quarantine,
            })
        }
    }

    impl ScanEngine for FakeEngine {
        fn scan_path(&self, path: &Path) -> EngineResult<Option<ThreatFinding>> {
            let name = path.file_stem().unwrap_or_default().to_string_lossy();
            let severity = name
                .strip_prefix("sev")
                .and_then(|s| s.parse::<u8>().ok());
            Ok(severity.map(|severity| ThreatFinding {
                path: path.to_path_buf(),
                threat_name: format!("Fake.Sev{}", severity),
                severity,
                file_size: 1,
                detected_at: Utc::now(),
            }))
        }

        fn quarantine(&self, path: &Path, _threat_name: &str) -> EngineResult<QuarantineEntry> {
            if self.fail_quarantine {
                return Err(EngineError::io_quarantine(
                    path,
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ));
            }
            self.quarantines.fetch_add(1, Ordering::SeqCst);
            Ok(QuarantineEntry {
                id: "fake".into(),
                original_path: path.to_path_buf(),
                quarantine_path: path.with_extension("q"),
                threat_name: "Fake".into(),
                quarantined_at: 0,
                original_size: 1,
                sha256: String::new(),
            })
        }

        fn restore_entry(&self, _id: &str, _destination: &Path) -> EngineResult<()> {
            Ok(())
        }

        fn update_database(&self) -> EngineResult<u32> {
            Ok(1)
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        panic!("condition not reached within timeout");
    }

    fn monitor_over(engine: Arc<FakeEngine>, events: Arc<EventSink>) -> FileMonitor {
        let monitor = FileMonitor::new(engine, events, 1, 0);
        monitor.initialize(&[]).unwrap();
        monitor
    }

    #[test]
    fn worker_scans_enqueued_files() {
        let dir = tempfile::tempdir().unwrap();
        let clean = dir.path().join("benign.bin");
        fs::write(&clean, b"ok").unwrap();

        let engine = FakeEngine::new(false);
        let monitor = monitor_over(Arc::clone(&engine), Arc::new(EventSink::new()));

        assert!(monitor.enqueue(&clean));
        wait_until(|| monitor.counts().scanned == 1);
        assert_eq!(monitor.counts().threats_found, 0);
        monitor.shutdown();
    }

    #[test]
    fn high_severity_is_auto_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let hot = dir.path().join("sev9.exe");
        fs::write(&hot, b"payload").unwrap();

        let engine = FakeEngine::new(false);
        let events = Arc::new(EventSink::new());
        let quarantined_events = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&quarantined_events);
            events.subscribe(move |event| {
                if event.auto_quarantined {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let monitor = monitor_over(Arc::clone(&engine), events);
        monitor.enqueue(&hot);

        wait_until(|| monitor.counts().quarantined == 1);
        assert_eq!(engine.quarantines.load(Ordering::SeqCst), 1);
        assert_eq!(quarantined_events.load(Ordering::SeqCst), 1);
        monitor.shutdown();
    }

    #[test]
    fn low_severity_is_reported_without_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let warm = dir.path().join("sev5.doc");
        fs::write(&warm, b"macro").unwrap();

        let engine = FakeEngine::new(false);
        let events = Arc::new(EventSink::new());
        let plain_events = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&plain_events);
            events.subscribe(move |event| {
                assert!(!event.auto_quarantined);
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let monitor = monitor_over(Arc::clone(&engine), events);
        monitor.enqueue(&warm);

        wait_until(|| monitor.counts().threats_found == 1);
        wait_until(|| plain_events.load(Ordering::SeqCst) == 1);
        assert_eq!(engine.quarantines.load(Ordering::SeqCst), 0);
        monitor.shutdown();
    }

    #[test]
    fn quarantine_failure_degrades_the_event() {
        let dir = tempfile::tempdir().unwrap();
        let hot = dir.path().join("sev10.exe");
        fs::write(&hot, b"payload").unwrap();

        let events = Arc::new(EventSink::new());
        let degraded = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&degraded);
            events.subscribe(move |event| {
                if event.quarantine_failed {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let monitor = monitor_over(FakeEngine::new(true), events);
        monitor.enqueue(&hot);

        wait_until(|| degraded.load(Ordering::SeqCst) == 1);
        assert!(hot.exists());
        monitor.shutdown();
    }

    #[test]
    fn notification_path_applies_admission_filter() {
        let engine = FakeEngine::new(false);
        let monitor = monitor_over(Arc::clone(&engine), Arc::new(EventSink::new()));

        // Exercise the notification-side admission directly.
        monitor.shared.admit(&PathBuf::from(r"C:\data\notes.txt"));
        assert_eq!(monitor.counts().rejected, 1);
        assert_eq!(monitor.counts().admitted, 0);

        monitor.shared.admit(&PathBuf::from(r"C:\data\tool.exe"));
        assert_eq!(monitor.counts().admitted, 1);
        monitor.shutdown();
    }

    #[test]
    fn shutdown_rejects_new_enqueues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("after.exe");
        fs::write(&path, b"x").unwrap();

        let monitor = monitor_over(FakeEngine::new(false), Arc::new(EventSink::new()));
        monitor.shutdown();

        assert!(!monitor.enqueue(&path));
        assert!(!monitor.is_running());
    }

    #[test]
    fn watch_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_over(FakeEngine::new(false), Arc::new(EventSink::new()));

        monitor.add_watch(dir.path()).unwrap();
        assert_eq!(monitor.watch_count(), 1);
        // Adding the same root twice is a no-op.
        monitor.add_watch(dir.path()).unwrap();
        assert_eq!(monitor.watch_count(), 1);

        monitor.remove_watch(dir.path()).unwrap();
        assert_eq!(monitor.watch_count(), 0);
        assert!(monitor.remove_watch(dir.path()).is_err());
        monitor.shutdown();
    }

    #[test]
    fn vanished_file_is_not_scanned_as_threat() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("sev9.exe");
        fs::write(&ghost, b"x").unwrap();

        let engine = FakeEngine::new(false);
        // Generous delay so we can delete the file before the worker
        // re-stats it.
        let monitor = FileMonitor::new(
            Arc::clone(&engine) as Arc<dyn ScanEngine>,
            Arc::new(EventSink::new()),
            1,
            200,
        );
        monitor.initialize(&[]).unwrap();

        monitor.enqueue(&ghost);
        fs::remove_file(&ghost).unwrap();

        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(monitor.counts().threats_found, 0);
        monitor.shutdown();
    }
}
