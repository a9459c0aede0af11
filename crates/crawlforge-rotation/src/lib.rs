//! # CrawlForge Rotation
//!
//! Rotation Manager (§4.2): tracks per-database usage, selects the target
//! database for each write, emits capacity alerts, and drives a small
//! consecutive-failure/consecutive-success health state machine.
//!
//! Grounded in the teacher's counter-and-mutex bookkeeping style
//! (`riptide-persistence::state::StateManager`) and its circuit-breaker
//! state machine (`riptide-reliability::circuit_breaker`), specialized to
//! this spec's exact transition rules rather than reusing the generic
//! three-state breaker: §4.2 requires a `Down` database to land in
//! `Warning` (not `Healthy`) after recovery, which the generic breaker
//! does not model.

use chrono::{DateTime, Datelike, Duration, Utc};
use crawlforge_types::{DatabaseStatus, DatabaseUsage};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

/// Handle identifying the chosen write target. Carries just enough to
/// route a write; callers look the full `DatabaseUsage` up via
/// `RotationManager::snapshot` if needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    pub name: String,
}

#[derive(Debug, Clone)]
struct Tracked {
    usage: DatabaseUsage,
    consecutive_failures: u32,
    consecutive_successes: u32,
    write_period: (i32, u32),
}

/// Exclude any database at or above this usage fraction from selection,
/// even if its derived `status` is still `Healthy`/`Warning` (§4.2).
const SELECTION_EXCLUSION_THRESHOLD: f64 = 0.85;
const DOWN_FAILURE_THRESHOLD: u32 = 3;
const RECOVERY_SUCCESS_THRESHOLD: u32 = 2;
const DOWN_PROBE_INTERVAL: Duration = Duration::seconds(60);

pub struct RotationManager {
    dbs: RwLock<HashMap<String, Tracked>>,
}

impl RotationManager {
    pub fn new(initial: Vec<DatabaseUsage>) -> Self {
        let now = Utc::now();
        let dbs = initial
            .into_iter()
            .map(|usage| {
                let name = usage.name.clone();
                (
                    name,
                    Tracked {
                        usage,
                        consecutive_failures: 0,
                        consecutive_successes: 0,
                        write_period: (now.year(), now.month()),
                    },
                )
            })
            .collect();
        Self { dbs: RwLock::new(dbs) }
    }

    /// Select the healthy database with the lowest `max(writes_used/limit,
    /// bytes_used/quota)`, excluding anything at or above 85% usage on
    /// either axis even if currently marked healthy.
    pub fn choose_write_target(&self) -> Option<DatabaseHandle> {
        let dbs = self.dbs.read();
        dbs.values()
            .filter(|t| t.usage.status != DatabaseStatus::Down)
            .filter(|t| t.usage.usage_fraction() < SELECTION_EXCLUSION_THRESHOLD)
            .min_by(|a, b| {
                a.usage
                    .usage_fraction()
                    .partial_cmp(&b.usage.usage_fraction())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|t| DatabaseHandle { name: t.usage.name.clone() })
    }

    /// Update in-memory write/byte counters for `db`, resetting the
    /// monthly write counter on the first write of a new calendar month
    /// (UTC).
    pub fn record_write(&self, db: &str, n_rows: u64, n_bytes: u64) {
        let mut dbs = self.dbs.write();
        let Some(tracked) = dbs.get_mut(db) else {
            warn!(db, "record_write for unknown database");
            return;
        };
        let now = Utc::now();
        let period = (now.year(), now.month());
        if period != tracked.write_period {
            tracked.usage.writes_this_month = 0;
            tracked.write_period = period;
        }
        tracked.usage.writes_this_month += n_rows;
        tracked.usage.bytes_used += n_bytes;
        tracked.usage.refresh_usage_status();
    }

    /// Record the outcome of a health probe against `db`. Three
    /// consecutive failures mark it `Down`; two consecutive successes
    /// while `Down` restore `Warning` (never straight to `Healthy`).
    pub fn record_health_probe(&self, db: &str, ok: bool, rtt_ms: u64) {
        let mut dbs = self.dbs.write();
        let Some(tracked) = dbs.get_mut(db) else {
            warn!(db, "record_health_probe for unknown database");
            return;
        };
        tracked.usage.last_health_check = Utc::now();

        if ok {
            tracked.consecutive_failures = 0;
            tracked.consecutive_successes += 1;
            if tracked.usage.status == DatabaseStatus::Down {
                if tracked.consecutive_successes >= RECOVERY_SUCCESS_THRESHOLD {
                    info!(db, rtt_ms, "database recovered, marking warning");
                    tracked.usage.status = DatabaseStatus::Warning;
                    tracked.consecutive_successes = 0;
                }
            } else {
                tracked.usage.refresh_usage_status();
            }
        } else {
            tracked.consecutive_successes = 0;
            tracked.consecutive_failures += 1;
            if tracked.consecutive_failures >= DOWN_FAILURE_THRESHOLD {
                warn!(db, "database marked down after consecutive failures");
                tracked.usage.status = DatabaseStatus::Down;
            }
        }
    }

    /// Databases currently `Down` whose last probe is old enough to
    /// re-probe (§4.2: every 60s).
    pub fn databases_due_for_probe(&self) -> Vec<String> {
        let now = Utc::now();
        self.dbs
            .read()
            .values()
            .filter(|t| t.usage.status == DatabaseStatus::Down)
            .filter(|t| due(t.usage.last_health_check, now))
            .map(|t| t.usage.name.clone())
            .collect()
    }

    /// Snapshot for the Monitoring API (§4.9 `/databases`).
    pub fn snapshot(&self) -> Vec<DatabaseUsage> {
        self.dbs.read().values().map(|t| t.usage.clone()).collect()
    }
}

fn due(last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last >= DOWN_PROBE_INTERVAL
}
