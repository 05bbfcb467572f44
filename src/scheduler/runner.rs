use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::config::Config;
use crate::error::Result;
use crate::scheduler::{CandidateWindowSelector, PhaseDecider};
use crate::types::TickSummary;

/// Drives ticks forever: select candidates, evaluate each, sleep, repeat.
///
/// Games are evaluated concurrently up to `concurrency`; one game's provider
/// failure never affects the others. A store error fails the tick once every
/// in-flight game has finished, and the loop cools down for `idle` before
/// trying again.
pub struct Scheduler {
    selector: CandidateWindowSelector,
    decider: PhaseDecider,
    health: Arc<HealthState>,
    concurrency: usize,
    idle: Duration,
    busy: Duration,
}

impl Scheduler {
    pub fn new(
        cfg: &Config,
        selector: CandidateWindowSelector,
        decider: PhaseDecider,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            selector,
            decider,
            health,
            concurrency: cfg.scheduler_concurrency.max(1),
            idle: cfg.idle_interval(),
            busy: cfg.busy_sleep(),
        }
    }

    pub async fn run(self) {
        info!(
            concurrency = self.concurrency,
            idle_secs = self.idle.as_secs_f64(),
            busy_secs = self.busy.as_secs_f64(),
            "Scheduler started"
        );
        self.health.set_running(true);

        loop {
            let now = Utc::now();
            let pause = match self.tick(now).await {
                Ok(summary) if summary.candidates == 0 => {
                    debug!("No candidates, idling");
                    self.health.record_tick(now, &summary);
                    self.idle
                }
                Ok(summary) => {
                    info!(
                        event = "TICK",
                        candidates = summary.candidates,
                        snapshots_upserted = summary.snapshots_upserted,
                        stats_called = summary.stats_called,
                        stats_failed = summary.stats_failed,
                        fetch_failures = summary.fetch_failures,
                        skipped = summary.skipped,
                        "tick done: candidates={} games_upserted={} stats_called={}",
                        summary.candidates, summary.snapshots_upserted, summary.stats_called,
                    );
                    self.health.record_tick(now, &summary);
                    self.busy
                }
                Err(e) => {
                    error!("Tick failed: {e}");
                    self.health.record_failure();
                    self.idle
                }
            };
            self.health.set_cooldown_entries(self.decider.throttle().tracked());
            tokio::time::sleep(pause).await;
        }
    }

    /// One pass over the current candidates at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let ids = self.selector.select(now).await?;
        let mut summary = TickSummary {
            candidates: ids.len(),
            ..TickSummary::default()
        };
        if ids.is_empty() {
            return Ok(summary);
        }

        let decider = &self.decider;
        let mut results = stream::iter(ids)
            .map(|game_id| async move { decider.evaluate(game_id, now).await })
            .buffer_unordered(self.concurrency);

        // Drain every evaluation so no game is cancelled between its provider
        // call and its marker write; the first store error is reported after.
        let mut first_err = None;
        while let Some(result) = results.next().await {
            match result {
                Ok(outcome) => summary.absorb(&outcome),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    } else {
                        debug!("Further store error in the same tick: {e}");
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
