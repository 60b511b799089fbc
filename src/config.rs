//! Service Configuration
//!
//! The options recognized by the enclosing process, persisted as JSON
//! in the service data directory. Loading falls back to defaults on
//! any error; saving is best-effort and logged.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_MAX_SCAN_SIZE;
use crate::error::{EngineError, EngineResult};
use crate::monitor::{DEFAULT_SCAN_DELAY_MS, DEFAULT_WORKER_COUNT};
use crate::scanner::targets;
use crate::scheduler::ScheduleConfig;

const CONFIG_FILE: &str = "config.json";
const DATABASE_DIR: &str = "Database";
const DATABASE_FILE: &str = "signatures.db";
const QUARANTINE_DIR: &str = "Quarantine";
const APP_DIR: &str = "FerroShield";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub real_time_protection: bool,
    pub heuristics_enabled: bool,
    pub scan_archives: bool,
    pub auto_update: bool,
    pub schedule: ScheduleConfig,
    /// Overrides the default quarantine root when set.
    pub quarantine_root: Option<PathBuf>,
    pub exclusions: Vec<String>,
    /// Extension allow-list for bulk scans; empty allows all.
    pub extensions: Vec<String>,
    pub max_file_size: u64,
    pub worker_count: usize,
    pub scan_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            real_time_protection: true,
            heuristics_enabled: true,
            scan_archives: false,
            auto_update: true,
            schedule: ScheduleConfig::default(),
            quarantine_root: None,
            exclusions: targets::default_exclusions(),
            extensions: Vec::new(),
            max_file_size: DEFAULT_MAX_SCAN_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            scan_delay_ms: DEFAULT_SCAN_DELAY_MS,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.schedule.validate()?;
        if self.worker_count == 0 {
            return Err(EngineError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(EngineError::InvalidConfig(
                "max file size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Load from `dir/config.json`, falling back to defaults when the
    /// file is missing, unparsable, or invalid.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => {
                log::info!("no configuration at {}, using defaults", path.display());
                return Self::default();
            }
        };

        match serde_json::from_slice::<Self>(&data) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(err) => {
                    log::warn!("configuration rejected ({}), using defaults", err);
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!("configuration unparsable ({}), using defaults", err);
                Self::default()
            }
        }
    }

    pub fn save(&self, dir: &Path) -> EngineResult<()> {
        self.validate()?;
        fs::create_dir_all(dir).map_err(|e| EngineError::unreadable(dir, e))?;
        let path = dir.join(CONFIG_FILE);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        fs::write(&path, json).map_err(|e| EngineError::unreadable(&path, e))?;
        Ok(())
    }

    /// `<data>/Quarantine` unless overridden.
    pub fn quarantine_root(&self, data_dir: &Path) -> PathBuf {
        self.quarantine_root
            .clone()
            .unwrap_or_else(|| data_dir.join(QUARANTINE_DIR))
    }
}

/// The service data directory: `<platform data dir>/FerroShield`.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// `<data>/Database/signatures.db`.
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_DIR).join(DATABASE_FILE)
}
