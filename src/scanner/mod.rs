//! Scanner
//!
//! Walks file / folder / drive / preset targets, filters each
//! candidate, hands it to the Threat Engine, and emits progress and
//! threat events. One async scan may run at a time; cancellation is
//! cooperative and checked before every file open.

pub mod stats;
pub mod targets;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::engine::{ScanEngine, ThreatFinding, DEFAULT_MAX_SCAN_SIZE};
use crate::events::{EventSink, ThreatEvent};
use stats::{ScanStatistics, SharedStats};
pub use targets::ScanKind;

/// Terminal status of a bulk scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOutcome {
    Success,
    Failed,
    Cancelled,
    AccessDenied,
}

/// Findings plus the terminal status of the operation that produced
/// them.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub findings: Vec<ThreatFinding>,
}

/// Configuration for a scan operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub max_file_size: u64,
    pub follow_symlinks: bool,
    /// Carried for the pluggable extractor port; without one, archives
    /// are scanned as raw bytes.
    pub scan_archives: bool,
    /// Extension allow-list; empty allows everything.
    pub extensions: Vec<String>,
    /// Case-insensitive path prefixes to skip entirely.
    pub exclusions: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_SCAN_SIZE,
            follow_symlinks: false,
            scan_archives: false,
            extensions: Vec::new(),
            exclusions: targets::default_exclusions(),
        }
    }
}

impl ScanOptions {
    fn allows_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

pub type ProgressCallback = Box<dyn Fn(&Path, u32, &ScanStatistics) + Send + Sync>;

/// How one top-level target ended; feeds the outcome aggregation.
enum RootOutcome {
    Ok,
    Failed,
    Denied,
}

pub struct Scanner {
    engine: Arc<dyn ScanEngine>,
    events: Arc<EventSink>,
    options: RwLock<ScanOptions>,
    stats: SharedStats,
    cancel_requested: Arc<AtomicBool>,
    is_scanning: Arc<AtomicBool>,
    progress: RwLock<Option<ProgressCallback>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(engine: Arc<dyn ScanEngine>, events: Arc<EventSink>) -> Self {
        Self {
            engine,
            events,
            options: RwLock::new(ScanOptions::default()),
            stats: SharedStats::new(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            is_scanning: Arc::new(AtomicBool::new(false)),
            progress: RwLock::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn set_options(&self, options: ScanOptions) {
        *self.options.write() = options;
    }

    pub fn options(&self) -> ScanOptions {
        self.options.read().clone()
    }

    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&Path, u32, &ScanStatistics) + Send + Sync + 'static,
    {
        *self.progress.write() = Some(Box::new(callback));
    }

    pub fn statistics(&self) -> ScanStatistics {
        self.stats.snapshot()
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation and wait for a running async
    /// scan to wind down. Partial findings are returned by the scan
    /// that was cancelled.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    // ------------------------------------------------------------------
    // Synchronous operations
    // ------------------------------------------------------------------

    pub fn scan_file(&self, path: &Path) -> ScanReport {
        log::info!("starting file scan: {}", path.display());
        self.run_scan(&[path.to_path_buf()])
    }

    pub fn scan_folder(&self, path: &Path) -> ScanReport {
        log::info!("starting folder scan: {}", path.display());
        self.run_scan(&[path.to_path_buf()])
    }

    pub fn scan_drive(&self, drive: &str) -> ScanReport {
        let root = targets::drive_root(drive);
        log::info!("starting drive scan: {}", root.display());
        self.run_scan(&[root])
    }

    pub fn scan_system(&self) -> ScanReport {
        log::info!("starting system scan");
        self.run_scan(&targets::system_paths())
    }

    pub fn quick_scan(&self) -> ScanReport {
        log::info!("starting quick scan");
        self.run_scan(&targets::quick_scan_paths())
    }

    pub fn full_scan(&self) -> ScanReport {
        log::info!("starting full scan");
        self.run_scan(&targets::available_drives())
    }

    pub fn custom_scan(&self, paths: &[PathBuf]) -> ScanReport {
        log::info!("starting custom scan of {} targets", paths.len());
        self.run_scan(paths)
    }

    pub fn scan_kind(&self, kind: &ScanKind, targets: &[PathBuf]) -> ScanReport {
        match kind {
            ScanKind::File | ScanKind::Folder => match targets.first() {
                Some(path) => self.run_scan(std::slice::from_ref(path)),
                None => ScanReport {
                    outcome: ScanOutcome::Failed,
                    findings: Vec::new(),
                },
            },
            ScanKind::Drive => match targets.first() {
                Some(path) => self.scan_drive(&path.to_string_lossy()),
                None => ScanReport {
                    outcome: ScanOutcome::Failed,
                    findings: Vec::new(),
                },
            },
            ScanKind::System => self.scan_system(),
            ScanKind::Quick => self.quick_scan(),
            ScanKind::Full => self.full_scan(),
            ScanKind::Custom => self.custom_scan(targets),
        }
    }

    // ------------------------------------------------------------------
    // Async operation
    // ------------------------------------------------------------------

    /// Accept at most one async scan at a time. Returns false without
    /// side effects when a scan is already running.
    pub fn start_async(self: &Arc<Self>, kind: ScanKind, targets: Vec<PathBuf>) -> bool {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            log::warn!("async scan rejected: a scan is already in progress");
            return false;
        }
        self.cancel_requested.store(false, Ordering::SeqCst);

        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let scanner = Arc::clone(self);
        *worker = Some(std::thread::spawn(move || {
            let report = scanner.scan_kind(&kind, &targets);
            log::info!(
                "async {} scan finished: {:?}, {} findings",
                kind.as_str(),
                report.outcome,
                report.findings.len()
            );
            scanner.is_scanning.store(false, Ordering::SeqCst);
        }));

        true
    }

    // ------------------------------------------------------------------
    // Walk + scan
    // ------------------------------------------------------------------

    fn run_scan(&self, roots: &[PathBuf]) -> ScanReport {
        self.stats.begin();
        let options = self.options();

        let mut findings = Vec::new();
        let mut root_outcomes = Vec::with_capacity(roots.len());
        let mut cancelled = false;

        for root in roots {
            if self.cancel_requested.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            let outcome = self.scan_root(root, &options, &mut findings, &mut cancelled);
            root_outcomes.push(outcome);
            if cancelled {
                break;
            }
        }

        self.stats.finish();

        let outcome = if cancelled {
            ScanOutcome::Cancelled
        } else if !root_outcomes.is_empty()
            && root_outcomes.iter().all(|o| matches!(o, RootOutcome::Denied))
        {
            ScanOutcome::AccessDenied
        } else if !root_outcomes.is_empty()
            && root_outcomes
                .iter()
                .all(|o| !matches!(o, RootOutcome::Ok))
        {
            ScanOutcome::Failed
        } else {
            ScanOutcome::Success
        };

        let snap = self.stats.snapshot();
        log::info!(
            "scan complete: {:?} in {:?} ({} scanned, {} skipped of {} files, {} threats)",
            outcome,
            snap.elapsed().unwrap_or_default(),
            snap.scanned_files,
            snap.skipped_files,
            snap.total_files,
            snap.threats_found
        );

        ScanReport { outcome, findings }
    }

    fn scan_root(
        &self,
        root: &Path,
        options: &ScanOptions,
        findings: &mut Vec<ThreatFinding>,
        cancelled: &mut bool,
    ) -> RootOutcome {
        if targets::is_excluded(root, &options.exclusions) {
            log::debug!("skipping excluded target {}", root.display());
            return RootOutcome::Ok;
        }

        let metadata = match std::fs::metadata(root) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                log::warn!("access denied to scan target {}", root.display());
                return RootOutcome::Denied;
            }
            Err(err) => {
                log::warn!("scan target unavailable {}: {}", root.display(), err);
                return RootOutcome::Failed;
            }
        };

        let files = if metadata.is_file() {
            self.stats.add_discovered(1, metadata.len());
            vec![(root.to_path_buf(), metadata.len())]
        } else {
            let mut root_denied = false;
            let files = self.discover(root, options, cancelled, &mut root_denied);
            if root_denied {
                log::warn!("access denied to scan target {}", root.display());
                return RootOutcome::Denied;
            }
            files
        };

        if *cancelled {
            return RootOutcome::Ok;
        }

        for (path, size) in files {
            if self.cancel_requested.load(Ordering::SeqCst) {
                *cancelled = true;
                return RootOutcome::Ok;
            }
            self.scan_one(&path, size, options, findings);
        }

        RootOutcome::Ok
    }

    /// Discovery pass: collect regular files under `root` and account
    /// for the totals before any file is opened, so progress only ever
    /// moves forward during the scan pass.
    fn discover(
        &self,
        root: &Path,
        options: &ScanOptions,
        cancelled: &mut bool,
        root_denied: &mut bool,
    ) -> Vec<(PathBuf, u64)> {
        let mut files = Vec::new();
        let exclusions = options.exclusions.clone();

        let walker = walkdir::WalkDir::new(root)
            .follow_links(options.follow_symlinks)
            .into_iter()
            .filter_entry(move |entry| !targets::is_excluded(entry.path(), &exclusions));

        for item in walker {
            if self.cancel_requested.load(Ordering::SeqCst) {
                *cancelled = true;
                break;
            }
            match item {
                Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                    Ok(metadata) => {
                        self.stats.add_discovered(1, metadata.len());
                        files.push((entry.into_path(), metadata.len()));
                    }
                    Err(_) => {
                        self.stats.add_discovered(1, 0);
                        self.stats.record_skipped();
                    }
                },
                Ok(_) => {}
                Err(err) => {
                    if err.depth() == 0
                        && err
                            .io_error()
                            .is_some_and(|io| io.kind() == ErrorKind::PermissionDenied)
                    {
                        *root_denied = true;
                        break;
                    }
                    log::debug!("walk error under {}: {}", root.display(), err);
                    self.stats.add_discovered(1, 0);
                    self.stats.record_skipped();
                }
            }
        }

        files
    }

    fn scan_one(
        &self,
        path: &Path,
        size: u64,
        options: &ScanOptions,
        findings: &mut Vec<ThreatFinding>,
    ) {
        if size > options.max_file_size || !options.allows_extension(path) {
            self.stats.record_skipped();
            return;
        }

        match self.engine.scan_path(path) {
            Ok(verdict) => {
                self.stats.record_scanned(size);
                if let Some(finding) = verdict {
                    self.stats.record_threat();
                    self.events.emit(&ThreatEvent::from_finding(&finding));
                    findings.push(finding);
                }
            }
            Err(err) if err.is_skippable() => {
                log::debug!("skipped {}: {}", path.display(), err);
                self.stats.record_skipped();
            }
            Err(err) => {
                log::error!("scan failure on {}: {}", path.display(), err);
                self.stats.record_skipped();
            }
        }

        if let Some(callback) = self.progress.read().as_ref() {
            let snapshot = self.stats.snapshot();
            callback(path, snapshot.progress_percent, &snapshot);
        }
    }
}
