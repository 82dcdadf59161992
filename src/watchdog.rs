//! Watchdog state and the reactivation trigger
//!
//! Two liveness concerns share one counter: the passive per-tick check run
//! by the event loop, and the active repair cycle fired by the admin trigger
//! message or the HTTP surface. Only the active path increments the counter.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Fixed admin text that fires the full repair cycle.
static REACTIVATION_TRIGGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)réactiver le bot automatique").expect("Invalid trigger regex"));

/// Whether an inbound message is the reactivation trigger.
pub fn is_reactivation_trigger(text: &str) -> bool {
    REACTIVATION_TRIGGER.is_match(text)
}

/// Process-wide repair bookkeeping. Lives for the whole process, owned by
/// the daemon and passed explicitly; reset only by a restart.
#[derive(Debug, Clone)]
pub struct ReactivationState {
    pub count: u64,
    pub auto_enabled: bool,
    pub last_trigger: Option<DateTime<Utc>>,
}

impl Default for ReactivationState {
    fn default() -> Self {
        Self {
            count: 0,
            auto_enabled: true,
            last_trigger: None,
        }
    }
}

impl ReactivationState {
    /// Record the start of an active repair cycle.
    pub fn record_trigger(&mut self) -> u64 {
        self.count += 1;
        self.last_trigger = Some(Utc::now());
        self.count
    }
}

/// Outcome of one active repair cycle, reported to the admin and returned
/// by the HTTP trigger endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub reactivation_count: u64,
    pub sessions_restored: usize,
    pub sessions_failed: usize,
    pub primary_reconnected: bool,
    pub triggered_at: DateTime<Utc>,
}
