//! FerroShield Core
//!
//! On-host antivirus engine: signature and heuristic detection,
//! tamper-resistant reversible quarantine, real-time directory
//! monitoring with a prioritized worker pool, bulk scanning of files,
//! folders, drives and presets, and a calendar-driven scheduled
//! scanner.
//!
//! The [`engine::ThreatEngine`] owns the signature and quarantine
//! stores; [`scanner::Scanner`], [`monitor::FileMonitor`], and
//! [`scheduler::ScheduledScanner`] share it through the
//! [`engine::ScanEngine`] capability trait. Threat detections reach
//! the enclosing process through the [`events::EventSink`] callback
//! port.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferroshield::config;
//! use ferroshield::engine::{ScanEngine, ThreatEngine};
//! use ferroshield::events::EventSink;
//! use ferroshield::scanner::Scanner;
//!
//! let data_dir = config::data_dir();
//! let engine: Arc<dyn ScanEngine> = Arc::new(
//!     ThreatEngine::new(
//!         &config::database_path(&data_dir),
//!         &data_dir.join("Quarantine"),
//!     )
//!     .expect("engine init"),
//! );
//! let scanner = Scanner::new(engine, Arc::new(EventSink::new()));
//! let report = scanner.quick_scan();
//! println!("{} findings", report.findings.len());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod monitor;
pub mod scanner;
pub mod scheduler;

pub use config::ServiceConfig;
pub use engine::{ScanEngine, ThreatEngine, ThreatFinding};
pub use error::{EngineError, EngineResult};
pub use events::{EventSink, ThreatEvent};
pub use monitor::FileMonitor;
pub use scanner::{ScanKind, ScanOptions, ScanOutcome, ScanReport, Scanner};
pub use scheduler::{ScheduleConfig, ScheduledScanner};
