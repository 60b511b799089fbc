//! Threat Event Stream
//!
//! When a threat is identified (by the Scanner or a File Monitor
//! worker) a structured event is delivered to every registered
//! callback. The transport behind the callback is the enclosing
//! process's business: IPC, UI channel, telemetry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::ThreatFinding;

/// Structured record emitted for every identified threat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub threat_name: String,
    pub path: PathBuf,
    pub severity: u8,
    pub file_size: u64,
    pub detected_at: DateTime<Utc>,
    /// The file was moved to quarantine as part of this detection.
    pub auto_quarantined: bool,
    /// Quarantine was attempted but failed; the file is still in place.
    pub quarantine_failed: bool,
}

impl ThreatEvent {
    pub fn from_finding(finding: &ThreatFinding) -> Self {
        Self {
            threat_name: finding.threat_name.clone(),
            path: finding.path.clone(),
            severity: finding.severity,
            file_size: finding.file_size,
            detected_at: finding.detected_at,
            auto_quarantined: false,
            quarantine_failed: false,
        }
    }

    pub fn quarantined(mut self) -> Self {
        self.auto_quarantined = true;
        self
    }

    pub fn degraded(mut self) -> Self {
        self.auto_quarantined = false;
        self.quarantine_failed = true;
        self
    }
}

type Callback = Box<dyn Fn(&ThreatEvent) + Send + Sync>;

/// Fan-out sink for threat events.
///
/// Subscribers are invoked synchronously on the emitting thread, so
/// callbacks must be cheap; heavy consumers should hand off to their
/// own channel.
#[derive(Default)]
pub struct EventSink {
    callbacks: RwLock<Vec<Callback>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ThreatEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Box::new(callback));
    }

    pub fn emit(&self, event: &ThreatEvent) {
        let callbacks = self.callbacks.read();
        if callbacks.is_empty() {
            log::debug!(
                "no event subscribers, dropping threat event for {}",
                event.path.display()
            );
            return;
        }
        for cb in callbacks.iter() {
            cb(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len()
    }
}
