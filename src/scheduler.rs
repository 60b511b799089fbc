//! Scheduled Scanner
//!
//! Computes the next calendar fire time from the configured schedule
//! and drives the Scanner when it arrives. The trigger loop wakes at
//! most once per minute; the scan itself always runs off the loop
//! thread so wakeups are never blocked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::ScanEngine;
use crate::error::{EngineError, EngineResult};
use crate::scanner::{ScanKind, Scanner};

/// A fresh scan is not started within this many hours of the previous
/// one.
const MIN_SCAN_SPACING_HOURS: i64 = 1;

/// Width of the fire window around the computed time.
const FIRE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleKind {
    Disabled,
    Daily,
    Weekly,
    Monthly,
}

/// Calendar schedule for unattended scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub kind: ScheduleKind,
    /// Hour of day, 0..=23.
    pub hour: u8,
    /// 0 = Sunday, used by WEEKLY.
    pub day_of_week: u8,
    /// 1..=31, used by MONTHLY; clamped to the target month's length.
    pub day_of_month: u8,
    pub enabled: bool,
    pub scan_kind: ScanKind,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::Disabled,
            hour: 2,
            day_of_week: 0,
            day_of_month: 1,
            enabled: false,
            scan_kind: ScanKind::Quick,
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.hour > 23 {
            return Err(EngineError::InvalidConfig(format!(
                "schedule hour {} outside 0..=23",
                self.hour
            )));
        }
        if self.day_of_week > 6 {
            return Err(EngineError::InvalidConfig(format!(
                "schedule day-of-week {} outside 0..=6",
                self.day_of_week
            )));
        }
        if !(1..=31).contains(&self.day_of_month) {
            return Err(EngineError::InvalidConfig(format!(
                "schedule day-of-month {} outside 1..=31",
                self.day_of_month
            )));
        }
        if !matches!(
            self.scan_kind,
            ScanKind::Quick | ScanKind::Full | ScanKind::System
        ) {
            return Err(EngineError::InvalidConfig(format!(
                "schedule scan kind {:?} must be quick, full, or system",
                self.scan_kind
            )));
        }
        Ok(())
    }
}

// ============================================================================
// NEXT-FIRE COMPUTATION
// ============================================================================

fn local_at(date: NaiveDate, hour: u8) -> Option<DateTime<Local>> {
    let naive = date.and_hms_opt(hour as u32, 0, 0)?;
    // Around a DST transition the local time may be ambiguous or
    // absent; take the earliest valid interpretation.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

fn clamp_day(year: i32, month: u32, day: u8) -> u32 {
    let next_month_start = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let last_day = next_month_start
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28);
    (day as u32).min(last_day)
}

/// The next wall-clock instant the schedule should fire, strictly
/// after `now`. `None` when the schedule cannot fire.
pub fn next_fire(config: &ScheduleConfig, now: DateTime<Local>) -> Option<DateTime<Local>> {
    if !config.enabled || config.kind == ScheduleKind::Disabled {
        return None;
    }

    let today = now.date_naive();
    match config.kind {
        ScheduleKind::Disabled => None,

        ScheduleKind::Daily => {
            let candidate = local_at(today, config.hour)?;
            if candidate > now {
                Some(candidate)
            } else {
                local_at(today.succ_opt()?, config.hour)
            }
        }

        ScheduleKind::Weekly => {
            let today_dow = now.weekday().num_days_from_sunday();
            let days_ahead =
                (config.day_of_week as u32 + 7 - today_dow) % 7;
            let date = today + Duration::days(days_ahead as i64);
            let candidate = local_at(date, config.hour)?;
            if candidate > now {
                Some(candidate)
            } else {
                local_at(date + Duration::days(7), config.hour)
            }
        }

        ScheduleKind::Monthly => {
            let day = clamp_day(now.year(), now.month(), config.day_of_month);
            let date = NaiveDate::from_ymd_opt(now.year(), now.month(), day)?;
            let candidate = local_at(date, config.hour)?;
            if candidate > now {
                return Some(candidate);
            }
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            let day = clamp_day(year, month, config.day_of_month);
            local_at(NaiveDate::from_ymd_opt(year, month, day)?, config.hour)
        }
    }
}

/// True when `now` sits inside the one-minute fire window: either the
/// next fire is at most a minute ahead, or it passed within the last
/// minute (the loop wakes at minute granularity and must not miss a
/// fire that lands between wakeups).
pub fn is_due(config: &ScheduleConfig, now: DateTime<Local>) -> bool {
    if let Some(upcoming) = next_fire(config, now) {
        if (upcoming - now).num_seconds() <= FIRE_WINDOW_SECS {
            return true;
        }
    }
    if let Some(recent) = next_fire(config, now - Duration::seconds(FIRE_WINDOW_SECS)) {
        if recent <= now {
            return true;
        }
    }
    false
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct ScheduledScanner {
    scanner: Arc<Scanner>,
    engine: Arc<dyn ScanEngine>,
    config: Arc<Mutex<ScheduleConfig>>,
    running: Arc<AtomicBool>,
    scan_in_progress: Arc<AtomicBool>,
    last_scan: Arc<Mutex<Option<DateTime<Local>>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledScanner {
    pub fn new(scanner: Arc<Scanner>, engine: Arc<dyn ScanEngine>) -> Self {
        Self {
            scanner,
            engine,
            config: Arc::new(Mutex::new(ScheduleConfig::default())),
            running: Arc::new(AtomicBool::new(false)),
            scan_in_progress: Arc::new(AtomicBool::new(false)),
            last_scan: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }

    /// Start the trigger loop.
    pub fn initialize(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scanner = Arc::clone(&self.scanner);
        let engine = Arc::clone(&self.engine);
        let config = Arc::clone(&self.config);
        let running = Arc::clone(&self.running);
        let scan_in_progress = Arc::clone(&self.scan_in_progress);
        let last_scan = Arc::clone(&self.last_scan);

        *self.thread.lock() = Some(
            std::thread::Builder::new()
                .name("scheduled-scanner".into())
                .spawn(move || {
                    log::info!("scheduled scanner loop started");
                    while running.load(Ordering::SeqCst) {
                        let config_now = config.lock().clone();
                        let now = Local::now();

                        if should_fire(
                            &config_now,
                            now,
                            &scan_in_progress,
                            &scanner,
                            &last_scan.lock(),
                        ) {
                            log::info!(
                                "schedule fired: {} scan",
                                config_now.scan_kind.as_str()
                            );
                            spawn_scan(
                                Arc::clone(&scanner),
                                Arc::clone(&engine),
                                config_now.scan_kind.clone(),
                                Arc::clone(&scan_in_progress),
                                Arc::clone(&last_scan),
                            );
                        }

                        // Wake at most once per minute, but notice
                        // shutdown quickly.
                        for _ in 0..120 {
                            if !running.load(Ordering::SeqCst) {
                                break;
                            }
                            std::thread::sleep(StdDuration::from_millis(500));
                        }
                    }
                    log::info!("scheduled scanner loop stopped");
                })
                .expect("scheduler thread spawn"),
        );
    }

    /// Replace the schedule. An invalid configuration is rejected and
    /// the previous one stays in effect.
    pub fn set_schedule(&self, config: ScheduleConfig) -> EngineResult<()> {
        config.validate()?;

        match next_fire(&config, Local::now()) {
            Some(at) if config.enabled => {
                log::info!("schedule updated, next scan at {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
            _ => log::info!("schedule updated: disabled"),
        }

        *self.config.lock() = config;
        Ok(())
    }

    pub fn schedule(&self) -> ScheduleConfig {
        self.config.lock().clone()
    }

    pub fn next_scheduled(&self) -> Option<DateTime<Local>> {
        next_fire(&self.config.lock(), Local::now())
    }

    /// Start a scan immediately, subject to the single-concurrent-scan
    /// invariant.
    pub fn trigger_now(&self, kind: ScanKind) -> EngineResult<()> {
        if self.scan_in_progress.load(Ordering::SeqCst) || self.scanner.is_scanning() {
            return Err(EngineError::ScanInProgress);
        }

        log::info!("manually triggered {} scan", kind.as_str());
        spawn_scan(
            Arc::clone(&self.scanner),
            Arc::clone(&self.engine),
            kind,
            Arc::clone(&self.scan_in_progress),
            Arc::clone(&self.last_scan),
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_scan(&self) -> Option<DateTime<Local>> {
        *self.last_scan.lock()
    }

    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScheduledScanner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn should_fire(
    config: &ScheduleConfig,
    now: DateTime<Local>,
    scan_in_progress: &AtomicBool,
    scanner: &Scanner,
    last_scan: &Option<DateTime<Local>>,
) -> bool {
    if !config.enabled || config.kind == ScheduleKind::Disabled {
        return false;
    }
    if scan_in_progress.load(Ordering::SeqCst) || scanner.is_scanning() {
        return false;
    }
    if let Some(last) = last_scan {
        if now - *last < Duration::hours(MIN_SCAN_SPACING_HOURS) {
            return false;
        }
    }
    is_due(config, now)
}

/// Run the scan on its own thread so the trigger loop keeps waking.
fn spawn_scan(
    scanner: Arc<Scanner>,
    engine: Arc<dyn ScanEngine>,
    kind: ScanKind,
    scan_in_progress: Arc<AtomicBool>,
    last_scan: Arc<Mutex<Option<DateTime<Local>>>>,
) {
    if scan_in_progress.swap(true, Ordering::SeqCst) {
        log::warn!("scan already in progress, skipping trigger");
        return;
    }

    std::thread::Builder::new()
        .name("scheduled-scan".into())
        .spawn(move || {
            let report = scanner.scan_kind(&kind, &[]);
            log::info!(
                "scheduled {} scan finished: {:?}, {} findings",
                kind.as_str(),
                report.outcome,
                report.findings.len()
            );

            // Unattended response: isolate anything severe enough
            // that waiting for an operator would be irresponsible.
            for finding in &report.findings {
                if finding.severity >= 8 {
                    match engine.quarantine(&finding.path, &finding.threat_name) {
                        Ok(_) => log::info!(
                            "auto-quarantined {} after scheduled scan",
                            finding.path.display()
                        ),
                        Err(err) => log::error!(
                            "scheduled-scan quarantine failed for {}: {}",
                            finding.path.display(),
                            err
                        ),
                    }
                }
            }

            *last_scan.lock() = Some(Local::now());
            scan_in_progress.store(false, Ordering::SeqCst);
        })
        .expect("scheduled scan thread spawn");
}
