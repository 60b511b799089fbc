//! Threat Engine
//!
//! Given a path, decide whether the file is a threat. Signature
//! matching runs against the active snapshot first; heuristics run
//! only when no signature fires and they are enabled. The engine owns
//! the Signature Store and the Quarantine Store; Scanner, File
//! Monitor, and Scheduled Scanner hold shared handles.

pub mod heuristics;
pub mod quarantine;
pub mod signature;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use heuristics::HeuristicRule;
use quarantine::{QuarantineEntry, QuarantineStore};
use signature::SignatureStore;

/// Default cap on how much of a file the engine will read and match.
pub const DEFAULT_MAX_SCAN_SIZE: u64 = 100 * 1024 * 1024;

/// Emitted when a scan identifies a malicious file. A finding is a
/// value; producing one never mutates the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatFinding {
    pub path: PathBuf,
    pub threat_name: String,
    pub severity: u8,
    pub file_size: u64,
    pub detected_at: DateTime<Utc>,
}

/// The capability surface Scanner and File Monitor depend on. Tests
/// substitute a deterministic implementation.
pub trait ScanEngine: Send + Sync {
    /// `Ok(None)` on clean, `Ok(Some(..))` on detection. `Unreadable`
    /// and `TooLarge` errors are skips, not threats.
    fn scan_path(&self, path: &Path) -> EngineResult<Option<ThreatFinding>>;

    fn quarantine(&self, path: &Path, threat_name: &str) -> EngineResult<QuarantineEntry>;

    fn restore_entry(&self, id: &str, destination: &Path) -> EngineResult<()>;

    fn update_database(&self) -> EngineResult<u32>;
}

pub struct ThreatEngine {
    signatures: SignatureStore,
    quarantine: Mutex<QuarantineStore>,
    heuristic_rules: Vec<HeuristicRule>,
    heuristics_enabled: AtomicBool,
    max_scan_size: AtomicU64,
}

impl ThreatEngine {
    /// Build the engine over its two stores. Both directories are
    /// created if missing; a bad signature database bootstraps the
    /// default rule set rather than failing startup.
    pub fn new(database_path: &Path, quarantine_root: &Path) -> EngineResult<Self> {
        let signatures = SignatureStore::open(database_path);
        let quarantine = QuarantineStore::open(quarantine_root)?;

        log::info!(
            "threat engine ready: {} signatures (version {}), {} quarantined items",
            signatures.active_snapshot().len(),
            signatures.version(),
            quarantine.len()
        );

        Ok(Self {
            signatures,
            quarantine: Mutex::new(quarantine),
            heuristic_rules: heuristics::default_rules(),
            heuristics_enabled: AtomicBool::new(true),
            max_scan_size: AtomicU64::new(DEFAULT_MAX_SCAN_SIZE),
        })
    }

    pub fn configure(&self, heuristics_enabled: bool) {
        let previous = self
            .heuristics_enabled
            .swap(heuristics_enabled, Ordering::Relaxed);
        if previous != heuristics_enabled {
            log::info!(
                "heuristic analysis {}",
                if heuristics_enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn heuristics_enabled(&self) -> bool {
        self.heuristics_enabled.load(Ordering::Relaxed)
    }

    pub fn set_max_scan_size(&self, bytes: u64) {
        self.max_scan_size.store(bytes, Ordering::Relaxed);
    }

    pub fn max_scan_size(&self) -> u64 {
        self.max_scan_size.load(Ordering::Relaxed)
    }

    pub fn database_version(&self) -> u32 {
        self.signatures.version()
    }

    /// Depth-first recursive scan of a directory tree. Unreadable
    /// entries are skipped; findings are returned in walk order.
    pub fn scan_directory(&self, dir: &Path) -> EngineResult<Vec<ThreatFinding>> {
        if !dir.is_dir() {
            return Err(EngineError::NotFound(dir.display().to_string()));
        }

        let mut findings = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            match self.scan_path(entry.path()) {
                Ok(Some(finding)) => findings.push(finding),
                Ok(None) => {}
                Err(err) if err.is_skippable() => {
                    log::debug!("skipping {}: {}", entry.path().display(), err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(findings)
    }

    pub fn enumerate_quarantine(&self) -> Vec<QuarantineEntry> {
        self.quarantine.lock().enumerate()
    }

    pub fn purge_quarantined(&self, id: &str) -> EngineResult<()> {
        self.quarantine.lock().purge(id)
    }

    /// Match a buffer against the active snapshot and, if nothing
    /// fires and heuristics are on, against the heuristic rules.
    fn scan_buffer(&self, path: &Path, data: &[u8]) -> Option<(String, u8)> {
        let snapshot = self.signatures.active_snapshot();
        if let Some(sig) = snapshot.match_buffer(data) {
            return Some((sig.name.clone(), sig.severity));
        }

        if self.heuristics_enabled() {
            if let Some(rule) = heuristics::evaluate(&self.heuristic_rules, path, data) {
                return Some((rule.name.clone(), rule.severity));
            }
        }

        None
    }
}

impl ScanEngine for ThreatEngine {
    fn scan_path(&self, path: &Path) -> EngineResult<Option<ThreatFinding>> {
        let metadata =
            fs::metadata(path).map_err(|_| EngineError::NotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(EngineError::NotFound(path.display().to_string()));
        }

        let file_size = metadata.len();
        if file_size == 0 {
            return Ok(None);
        }

        let limit = self.max_scan_size();
        if file_size > limit {
            return Err(EngineError::TooLarge {
                path: path.to_path_buf(),
                size: file_size,
                limit,
            });
        }

        let data = fs::read(path).map_err(|e| EngineError::unreadable(path, e))?;

        match self.scan_buffer(path, &data) {
            Some((threat_name, severity)) => {
                log::warn!(
                    "threat detected: {} in {} (severity {})",
                    threat_name,
                    path.display(),
                    severity
                );
                Ok(Some(ThreatFinding {
                    path: path.to_path_buf(),
                    threat_name,
                    severity,
                    file_size,
                    detected_at: Utc::now(),
                }))
            }
            None => Ok(None),
        }
    }

    fn quarantine(&self, path: &Path, threat_name: &str) -> EngineResult<QuarantineEntry> {
        self.quarantine.lock().admit(path, threat_name)
    }

    fn restore_entry(&self, id: &str, destination: &Path) -> EngineResult<()> {
        self.quarantine.lock().restore(id, destination)
    }

    /// Re-publish the active rules under an incremented version. A
    /// real definitions feed arrives through the cloud port; this
    /// keeps the version counter and persistence behavior in place.
    fn update_database(&self) -> EngineResult<u32> {
        let version = self.signatures.bump_version()?;
        log::info!("signature database updated to version {}", version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::signature::{save_database, Signature, SignatureSet};
    use super::*;
    use std::fs;

    fn engine_in(dir: &tempfile::TempDir) -> ThreatEngine {
        ThreatEngine::new(
            &dir.path().join("Database/signatures.db"),
            &dir.path().join("Quarantine"),
        )
        .unwrap()
    }

    fn engine_with_rules(dir: &tempfile::TempDir, rules: Vec<Signature>) -> ThreatEngine {
        let db = dir.path().join("Database/signatures.db");
        fs::create_dir_all(db.parent().unwrap()).unwrap();
        save_database(&db, &SignatureSet::new(1, rules)).unwrap();
        ThreatEngine::new(&db, &dir.path().join("Quarantine")).unwrap()
    }

    #[test]
    fn empty_file_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();
        assert!(engine.scan_path(&path).unwrap().is_none());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        assert!(matches!(
            engine.scan_path(&dir.path().join("gone.bin")),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn floating_signature_detected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(
            &dir,
            vec![Signature::floating(
                "Test.EICAR",
                b"X5O!P%@AP[4\\PZX54(P^)",
                10,
            )],
        );

        let path = dir.path().join("eicar.txt");
        fs::write(&path, b"X5O!P%@AP[4\\PZX54(P^)\n").unwrap();

        let finding = engine.scan_path(&path).unwrap().unwrap();
        assert_eq!(finding.threat_name, "Test.EICAR");
        assert_eq!(finding.severity, 10);
        assert_eq!(finding.file_size, 22);
    }

    #[test]
    fn fixed_signature_respects_offset() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(
            &dir,
            vec![Signature::fixed("PE.Magic", &[0x4D, 0x5A], 0, 3)],
        );
        // Disable heuristics so entropy noise cannot interfere.
        engine.configure(false);

        let hit = dir.path().join("prog.bin");
        let mut content = b"MZ".to_vec();
        content.extend(std::iter::repeat(0xAAu8).take(4096));
        fs::write(&hit, &content).unwrap();
        let finding = engine.scan_path(&hit).unwrap().unwrap();
        assert_eq!(finding.threat_name, "PE.Magic");
        assert_eq!(finding.severity, 3);

        let miss = dir.path().join("shifted.bin");
        fs::write(&miss, b"ZZMZ trailing").unwrap();
        assert!(engine.scan_path(&miss).unwrap().is_none());
    }

    #[test]
    fn size_guard_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(&dir, vec![Signature::floating("X", b"zzz", 5)]);
        engine.configure(false);
        engine.set_max_scan_size(1024);

        let at_limit = dir.path().join("exactly.bin");
        fs::write(&at_limit, vec![0x20u8; 1024]).unwrap();
        assert!(engine.scan_path(&at_limit).unwrap().is_none());

        let over = dir.path().join("over.bin");
        fs::write(&over, vec![0x20u8; 1025]).unwrap();
        assert!(matches!(
            engine.scan_path(&over),
            Err(EngineError::TooLarge { size: 1025, limit: 1024, .. })
        ));
    }

    #[test]
    fn heuristics_run_only_when_signatures_miss() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(
            &dir,
            vec![Signature::floating("Sig.Wins", b"payload", 9)],
        );

        // Tiny .exe that also carries the signature pattern: the
        // signature verdict takes precedence.
        let path = dir.path().join("tiny.exe");
        fs::write(&path, b"payload").unwrap();
        let finding = engine.scan_path(&path).unwrap().unwrap();
        assert_eq!(finding.threat_name, "Sig.Wins");
    }

    #[test]
    fn tiny_executable_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(&dir, vec![Signature::floating("S", b"not-here", 5)]);

        let path = dir.path().join("tiny.exe");
        fs::write(&path, vec![0x41u8; 512]).unwrap();

        let finding = engine.scan_path(&path).unwrap().unwrap();
        assert_eq!(finding.threat_name, "Heuristic.Suspicious.TinyExecutable");
        assert_eq!(finding.severity, 6);
    }

    #[test]
    fn heuristics_disabled_means_clean() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(&dir, vec![Signature::floating("S", b"not-here", 5)]);
        engine.configure(false);

        let path = dir.path().join("tiny.exe");
        fs::write(&path, vec![0x41u8; 512]).unwrap();
        assert!(engine.scan_path(&path).unwrap().is_none());
    }

    #[test]
    fn scan_directory_collects_findings() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(&dir, vec![Signature::floating("Marker", b"EVIL!", 8)]);
        engine.configure(false);

        let tree = dir.path().join("tree/sub");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("bad.bin"), b"EVIL! bytes").unwrap();
        fs::write(tree.join("ok.bin"), b"benign").unwrap();
        fs::write(dir.path().join("tree/also_bad.bin"), b"xx EVIL!").unwrap();

        let findings = engine.scan_directory(&dir.path().join("tree")).unwrap();
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn quarantine_round_trip_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_rules(&dir, vec![Signature::floating("Q", b"quarantine-me", 9)]);
        engine.configure(false);

        let path = dir.path().join("victim.bin");
        fs::write(&path, b"quarantine-me now").unwrap();

        let finding = engine.scan_path(&path).unwrap().unwrap();
        let entry = engine.quarantine(&path, &finding.threat_name).unwrap();
        assert!(!path.exists());
        assert_eq!(engine.enumerate_quarantine().len(), 1);

        engine.restore_entry(&entry.id, &path).unwrap();
        assert!(path.exists());

        // The restored file reproduces the original detection.
        let again = engine.scan_path(&path).unwrap().unwrap();
        assert_eq!(again.threat_name, finding.threat_name);
        assert_eq!(again.severity, finding.severity);
    }

    #[test]
    fn update_database_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        assert_eq!(engine.database_version(), 1);
        assert_eq!(engine.update_database().unwrap(), 2);
        assert_eq!(engine.database_version(), 2);
    }
}
