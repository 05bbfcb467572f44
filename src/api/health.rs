//! Shared health state for the /health endpoint.
//! Updated by the scheduler loop, read by the API.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::types::TickSummary;

#[derive(Default)]
pub struct HealthState {
    /// True once the scheduler loop has started.
    running: AtomicBool,
    /// Unix millis of the last completed tick (0 = none).
    last_tick_at_ms: AtomicI64,
    last_candidates: AtomicU64,
    last_snapshots: AtomicU64,
    last_stats_called: AtomicU64,
    last_stats_failed: AtomicU64,
    last_fetch_failures: AtomicU64,
    last_skipped: AtomicU64,
    total_snapshots: AtomicU64,
    total_stats_called: AtomicU64,
    total_fetch_failures: AtomicU64,
    /// Ticks aborted in a row; reset by the next good tick.
    consecutive_failures: AtomicU64,
    cooldown_entries: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, v: bool) {
        self.running.store(v, Ordering::Relaxed);
    }

    pub fn record_tick(&self, at: DateTime<Utc>, summary: &TickSummary) {
        self.last_tick_at_ms.store(at.timestamp_millis(), Ordering::Relaxed);
        self.last_candidates.store(summary.candidates as u64, Ordering::Relaxed);
        self.last_snapshots.store(u64::from(summary.snapshots_upserted), Ordering::Relaxed);
        self.last_stats_called.store(u64::from(summary.stats_called), Ordering::Relaxed);
        self.last_stats_failed.store(u64::from(summary.stats_failed), Ordering::Relaxed);
        self.last_fetch_failures.store(u64::from(summary.fetch_failures), Ordering::Relaxed);
        self.last_skipped.store(u64::from(summary.skipped), Ordering::Relaxed);
        self.total_snapshots
            .fetch_add(u64::from(summary.snapshots_upserted), Ordering::Relaxed);
        self.total_stats_called
            .fetch_add(u64::from(summary.stats_called), Ordering::Relaxed);
        self.total_fetch_failures
            .fetch_add(u64::from(summary.fetch_failures), Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_cooldown_entries(&self, n: usize) {
        self.cooldown_entries.store(n as u64, Ordering::Relaxed);
    }

    pub fn report(&self) -> HealthReport {
        let last_tick_ms = self.last_tick_at_ms.load(Ordering::Relaxed);
        let last_tick_at = (last_tick_ms > 0)
            .then(|| DateTime::<Utc>::from_timestamp_millis(last_tick_ms))
            .flatten();
        HealthReport {
            running: self.running.load(Ordering::Relaxed),
            last_tick_at,
            last_tick: last_tick_at.map(|_| self.last_summary()),
            total_snapshots_upserted: self.total_snapshots.load(Ordering::Relaxed),
            total_stats_called: self.total_stats_called.load(Ordering::Relaxed),
            total_fetch_failures: self.total_fetch_failures.load(Ordering::Relaxed),
            consecutive_failed_ticks: self.consecutive_failures.load(Ordering::Relaxed),
            cooldown_entries: self.cooldown_entries.load(Ordering::Relaxed),
        }
    }

    fn last_summary(&self) -> TickSummary {
        let load = |v: &AtomicU64| u32::try_from(v.load(Ordering::Relaxed)).unwrap_or(u32::MAX);
        TickSummary {
            candidates: self.last_candidates.load(Ordering::Relaxed) as usize,
            snapshots_upserted: load(&self.last_snapshots),
            stats_called: load(&self.last_stats_called),
            stats_failed: load(&self.last_stats_failed),
            fetch_failures: load(&self.last_fetch_failures),
            skipped: load(&self.last_skipped),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthReport {
    pub running: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Summary of the last completed tick; absent until one completes.
    pub last_tick: Option<TickSummary>,
    pub total_snapshots_upserted: u64,
    pub total_stats_called: u64,
    pub total_fetch_failures: u64,
    pub consecutive_failed_ticks: u64,
    pub cooldown_entries: u64,
}
