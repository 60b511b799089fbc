//! End-to-end scenarios exercising the full detection-and-response
//! pipeline: signature store on disk, threat engine, scanner, monitor
//! worker pool, and quarantine round-trips.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferroshield::engine::signature::{save_database, Signature, SignatureSet};
use ferroshield::engine::{ScanEngine, ThreatEngine};
use ferroshield::events::EventSink;
use ferroshield::monitor::queue::ScanQueue;
use ferroshield::monitor::FileMonitor;
use ferroshield::scanner::{ScanOutcome, Scanner};

const EICAR_PATTERN: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)";

fn engine_with(dir: &Path, rules: Vec<Signature>) -> Arc<ThreatEngine> {
    let db = dir.join("Database/signatures.db");
    fs::create_dir_all(db.parent().unwrap()).unwrap();
    save_database(&db, &SignatureSet::new(1, rules)).unwrap();
    Arc::new(ThreatEngine::new(&db, &dir.join("Quarantine")).unwrap())
}

fn sha256_of(path: &Path) -> String {
    ferroshield::engine::quarantine::hash_file(path).unwrap()
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

#[test]
fn eicar_style_floating_signature() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        dir.path(),
        vec![Signature::floating("TEST.EICAR", EICAR_PATTERN, 10)],
    );

    let sample = dir.path().join("eicar.com.txt");
    let mut content = EICAR_PATTERN.to_vec();
    content.push(b'\n');
    fs::write(&sample, &content).unwrap();

    let finding = engine.scan_path(&sample).unwrap().unwrap();
    assert_eq!(finding.threat_name, "TEST.EICAR");
    assert_eq!(finding.severity, 10);
    assert_eq!(finding.file_size, content.len() as u64);
}

#[test]
fn fixed_offset_signature_matches_only_at_offset() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        dir.path(),
        vec![Signature::fixed("PE.MAGIC", &[0x4D, 0x5A], 0, 3)],
    );
    engine.configure(false);

    let pe = dir.path().join("prog.bin");
    let mut content = b"MZ".to_vec();
    content.extend((0..4096u32).map(|i| (i % 251) as u8));
    fs::write(&pe, &content).unwrap();
    let finding = engine.scan_path(&pe).unwrap().unwrap();
    assert_eq!(finding.threat_name, "PE.MAGIC");
    assert_eq!(finding.severity, 3);

    let shifted = dir.path().join("shifted.bin");
    fs::write(&shifted, b"ZZMZ").unwrap();
    assert!(engine.scan_path(&shifted).unwrap().is_none());
}

#[test]
fn tiny_executable_heuristic_fires() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        dir.path(),
        vec![Signature::floating("Unrelated", b"nope-not-present", 5)],
    );

    let tiny = dir.path().join("tiny.exe");
    fs::write(&tiny, vec![0x42u8; 512]).unwrap();

    let finding = engine.scan_path(&tiny).unwrap().unwrap();
    assert_eq!(finding.threat_name, "Heuristic.Suspicious.TinyExecutable");
    assert_eq!(finding.severity, 6);
}

#[test]
fn quarantine_round_trip_preserves_bytes_and_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        dir.path(),
        vec![Signature::floating("Worm.Test", b"severity nine payload", 9)],
    );
    engine.configure(false);

    let victim = dir.path().join("dropper.bin");
    fs::write(&victim, b"carrier of severity nine payload !!").unwrap();
    let pre_hash = sha256_of(&victim);

    let finding = engine.scan_path(&victim).unwrap().unwrap();
    assert_eq!(finding.severity, 9);

    let entry = engine.quarantine(&victim, &finding.threat_name).unwrap();
    assert!(!victim.exists());

    let entries = engine.enumerate_quarantine();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].threat_name, "Worm.Test");

    engine.restore_entry(&entry.id, &victim).unwrap();
    assert!(victim.exists());
    assert_eq!(sha256_of(&victim), pre_hash);

    // The restored file reproduces the original finding.
    let again = engine.scan_path(&victim).unwrap().unwrap();
    assert_eq!(again.threat_name, "Worm.Test");
}

#[test]
fn priority_queue_dispatch_order() {
    // Workers stopped: enqueue a.txt (p=1), b.exe (p=10), c.ps1 (p=7)
    // in that order, then drain with a single consumer.
    let queue = ScanQueue::new();
    queue.push("a.txt".into(), 1);
    queue.push("b.exe".into(), 10);
    queue.push("c.ps1".into(), 7);

    let order: Vec<_> = std::iter::from_fn(|| queue.try_pop())
        .map(|r| r.path.to_string_lossy().to_string())
        .collect();
    assert_eq!(order, ["b.exe", "c.ps1", "a.txt"]);
}

#[test]
fn monitor_worker_quarantines_real_detection() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        dir.path(),
        vec![Signature::floating("Ransom.Live", b"encrypt-everything", 10)],
    );
    engine.configure(false);

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

    let monitor = FileMonitor::new(
        Arc::clone(&engine) as Arc<dyn ScanEngine>,
        events,
        2,
        10,
    );
    monitor.initialize(&[]).unwrap();

    let dropped = dir.path().join("payload.exe");
    fs::write(&dropped, b"prefix encrypt-everything suffix").unwrap();
    assert!(monitor.enqueue(&dropped));

    wait_until(|| quarantined_events.load(Ordering::SeqCst) == 1);
    assert!(!dropped.exists());
    assert_eq!(engine.enumerate_quarantine().len(), 1);
    monitor.shutdown();
}

#[test]
fn scanner_pipeline_over_real_engine() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        dir.path(),
        vec![Signature::floating("Marker.A", b"-!infected!-", 7)],
    );
    engine.configure(false);

    let tree = dir.path().join("scan-me/depth");
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("one.bin"), b"clean content").unwrap();
    fs::write(tree.join("two.bin"), b"here is -!infected!- data").unwrap();
    fs::write(dir.path().join("scan-me/three.bin"), b"also clean").unwrap();

    let scanner = Scanner::new(
        Arc::clone(&engine) as Arc<dyn ScanEngine>,
        Arc::new(EventSink::new()),
    );
    let report = scanner.scan_folder(&dir.path().join("scan-me"));

    assert_eq!(report.outcome, ScanOutcome::Success);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].threat_name, "Marker.A");

    let stats = scanner.statistics();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.scanned_files, 3);
    assert_eq!(stats.progress_percent, 100);
    assert!(stats.scanned_bytes <= stats.total_bytes);
}

#[test]
fn database_survives_restart_with_same_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("Database/signatures.db");
    fs::create_dir_all(db.parent().unwrap()).unwrap();
    let set = SignatureSet::new(
        3,
        vec![
            Signature::fixed("Boot.Sector", &[0xEB, 0x3C, 0x90], 0, 8),
            Signature::floating("Macro.Downloader", b"AutoOpen", 6),
        ],
    );
    save_database(&db, &set).unwrap();
    let before = fs::read(&db).unwrap();

    // Opening the engine must not rewrite a healthy database.
    let engine = ThreatEngine::new(&db, &dir.path().join("Quarantine")).unwrap();
    assert_eq!(engine.database_version(), 3);
    drop(engine);

    assert_eq!(fs::read(&db).unwrap(), before);
}
