//! FerroShield service entry point.
//!
//! Wires the engine, scanner, monitor, and scheduler together from
//! the persisted configuration and runs until the host stops the
//! process. IPC command handling lives in the enclosing service
//! wrapper; this binary is the core brought up standalone.

use std::sync::Arc;
use std::time::Duration;

use ferroshield::config::{self, ServiceConfig};
use ferroshield::engine::{ScanEngine, ThreatEngine};
use ferroshield::events::EventSink;
use ferroshield::monitor::FileMonitor;
use ferroshield::scanner::Scanner;
use ferroshield::scheduler::ScheduledScanner;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("starting FerroShield core service");

    let data_dir = config::data_dir();
    let cfg = ServiceConfig::load(&data_dir);

    let engine = match ThreatEngine::new(
        &config::database_path(&data_dir),
        &cfg.quarantine_root(&data_dir),
    ) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            log::error!("cannot initialize threat engine: {}", err);
            std::process::exit(1);
        }
    };
    engine.configure(cfg.heuristics_enabled);
    engine.set_max_scan_size(cfg.max_file_size);

    let events = Arc::new(EventSink::new());
    events.subscribe(|event| {
        log::warn!(
            "THREAT {} at {} (severity {}, quarantined: {})",
            event.threat_name,
            event.path.display(),
            event.severity,
            event.auto_quarantined
        );
    });

    let scan_engine: Arc<dyn ScanEngine> = Arc::clone(&engine) as Arc<dyn ScanEngine>;

    let scanner = Arc::new(Scanner::new(Arc::clone(&scan_engine), Arc::clone(&events)));
    scanner.set_options(ferroshield::ScanOptions {
        max_file_size: cfg.max_file_size,
        scan_archives: cfg.scan_archives,
        extensions: cfg.extensions.clone(),
        exclusions: cfg.exclusions.clone(),
        ..Default::default()
    });

    let monitor = FileMonitor::new(
        Arc::clone(&scan_engine),
        Arc::clone(&events),
        cfg.worker_count,
        cfg.scan_delay_ms,
    );
    monitor.set_real_time_protection(cfg.real_time_protection);
    let watch_roots: Vec<_> = dirs::home_dir().into_iter().collect();
    if let Err(err) = monitor.initialize(&watch_roots) {
        log::error!("file monitor failed to start: {}", err);
    }

    let scheduler = ScheduledScanner::new(Arc::clone(&scanner), scan_engine);
    if let Err(err) = scheduler.set_schedule(cfg.schedule.clone()) {
        log::warn!("persisted schedule rejected: {}", err);
    }
    scheduler.initialize();

    log::info!(
        "service ready (database version {}, {} quarantined items)",
        engine.database_version(),
        engine.enumerate_quarantine().len()
    );

    // The host service manager owns the process lifetime.
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
