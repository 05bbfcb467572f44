use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::LIVE_FAILURE_FLOOR_SECS;
use crate::db::{GameStore, PollStateStore};
use crate::error::Result;
use crate::fetcher::SnapshotUpserter;
use crate::scheduler::throttle::StatsThrottle;
use crate::types::{GameOutcome, GameRecord, Phase, PollState, PollStateUpdate};

#[derive(Debug, Clone, Copy)]
pub struct PhaseTiming {
    /// Pre-call may fire this long before the scheduled start.
    pub pre: Duration,
    /// Post-call fires this long after the game was marked finished.
    pub post: Duration,
    pub live_interval: Duration,
}

impl PhaseTiming {
    /// Reschedule delay after a failed live poll.
    pub fn live_failure_backoff(&self) -> Duration {
        self.live_interval.max(Duration::seconds(LIVE_FAILURE_FLOOR_SECS))
    }
}

// ---------------------------------------------------------------------------
// Branch predicates
// ---------------------------------------------------------------------------

pub fn pre_due(state: &PollState, game: &GameRecord, now: DateTime<Utc>, timing: &PhaseTiming) -> bool {
    state.pre_called_at.is_none()
        && game.scheduled_start - timing.pre <= now
        && now < game.scheduled_start
}

pub fn start_due(state: &PollState, game: &GameRecord, now: DateTime<Utc>) -> bool {
    state.start_called_at.is_none() && now >= game.scheduled_start && !game.is_finished(now)
}

pub fn end_due(state: &PollState, game: &GameRecord, now: DateTime<Utc>) -> bool {
    state.end_called_at.is_none() && game.is_finished(now)
}

pub fn post_due(state: &PollState, now: DateTime<Utc>, timing: &PhaseTiming) -> bool {
    match state.finished_at {
        Some(finished_at) => state.post_called_at.is_none() && now >= finished_at + timing.post,
        None => false,
    }
}

pub fn live_due(state: &PollState, game: &GameRecord, now: DateTime<Utc>) -> bool {
    state.start_called_at.is_some()
        && state.end_called_at.is_none()
        && !game.is_finished(now)
        && state.next_live_poll_at.is_none_or(|next| now >= next)
}

// ---------------------------------------------------------------------------
// PhaseDecider
// ---------------------------------------------------------------------------

/// Per-game state machine, evaluated once per candidate per tick.
///
/// Branch order is fixed: pre, start, end, post, live. Pre, end and post end
/// the evaluation once attempted. A successful start-call refreshes the local
/// game and poll state so end/live below see what was just written.
///
/// Provider failures are logged and leave the phase marker unset so the phase
/// is retried on a later tick. Only store errors are returned.
pub struct PhaseDecider {
    games: GameStore,
    poll: PollStateStore,
    upserter: SnapshotUpserter,
    throttle: Arc<StatsThrottle>,
    timing: PhaseTiming,
}

impl PhaseDecider {
    pub fn new(
        games: GameStore,
        poll: PollStateStore,
        upserter: SnapshotUpserter,
        throttle: Arc<StatsThrottle>,
        timing: PhaseTiming,
    ) -> Self {
        Self { games, poll, upserter, throttle, timing }
    }

    pub fn throttle(&self) -> &Arc<StatsThrottle> {
        &self.throttle
    }

    pub async fn evaluate(&self, game_id: i64, now: DateTime<Utc>) -> Result<GameOutcome> {
        let mut outcome = GameOutcome::default();

        let mut game = match self.games.get(game_id).await {
            Ok(Some(game)) => game,
            Ok(None) => {
                debug!(game_id, "Candidate has no game row, skipping");
                outcome.skipped = true;
                return Ok(outcome);
            }
            Err(e) if !e.is_store() => {
                warn!(game_id, "Unreadable game row, skipping: {e}");
                outcome.skipped = true;
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };
        let mut state = self.poll.get_or_create(game_id).await?;

        // (1) pre
        if pre_due(&state, &game, now, &self.timing) {
            if self.fetch(game_id, Phase::Pre, &mut outcome).await?.is_some() {
                self.mark(game_id, Phase::Pre, PollStateUpdate::pre_called(now), &mut outcome).await?;
            }
            return Ok(outcome);
        }

        // (2) start
        if start_due(&state, &game, now) {
            if let Some(fresh) = self.fetch(game_id, Phase::Start, &mut outcome).await? {
                state = self.mark(game_id, Phase::Start, PollStateUpdate::start_called(now), &mut outcome).await?;
                game = fresh;
            }
        }

        // (3) end
        if end_due(&state, &game, now) {
            if self.fetch(game_id, Phase::End, &mut outcome).await?.is_some() {
                self.mark(game_id, Phase::End, PollStateUpdate::ended(now), &mut outcome).await?;
                self.throttle.forget(game_id);
            }
            return Ok(outcome);
        }

        // (4) post
        if post_due(&state, now, &self.timing) {
            if self.fetch(game_id, Phase::Post, &mut outcome).await?.is_some() {
                self.mark(game_id, Phase::Post, PollStateUpdate::post_called(now), &mut outcome).await?;
            }
            return Ok(outcome);
        }

        // (5) live periodic
        if live_due(&state, &game, now) {
            self.live_poll(game_id, now, &mut outcome).await?;
        }

        Ok(outcome)
    }

    async fn live_poll(&self, game_id: i64, now: DateTime<Utc>, outcome: &mut GameOutcome) -> Result<()> {
        match self.fetch(game_id, Phase::Live, outcome).await? {
            Some(fresh) => {
                if fresh.status.is_live_phase() {
                    outcome.stats = Some(self.throttle.call(game_id, now).await);
                }
                let next = now + self.timing.live_interval;
                self.poll.update(game_id, PollStateUpdate::next_live_poll(next)).await?;
                outcome.fired.push(Phase::Live);
                debug!(game_id, status = %fresh.status, "Live poll done, next at {next}");
            }
            None => {
                let next = now + self.timing.live_failure_backoff();
                self.poll.update(game_id, PollStateUpdate::next_live_poll(next)).await?;
            }
        }
        Ok(())
    }

    /// Fetch + upsert. `Ok(None)` means the provider side failed and was logged.
    async fn fetch(&self, game_id: i64, phase: Phase, outcome: &mut GameOutcome) -> Result<Option<GameRecord>> {
        match self.upserter.refresh(game_id).await {
            Ok(game) => {
                outcome.snapshots_upserted += 1;
                Ok(Some(game))
            }
            Err(e) if e.is_store() => Err(e),
            Err(e) => {
                warn!(game_id, phase = %phase, "{phase}-call fetch failed: {e}");
                outcome.failed.push(phase);
                Ok(None)
            }
        }
    }

    async fn mark(
        &self,
        game_id: i64,
        phase: Phase,
        update: PollStateUpdate,
        outcome: &mut GameOutcome,
    ) -> Result<PollState> {
        let state = self.poll.update(game_id, update).await?;
        outcome.fired.push(phase);
        info!(game_id, phase = %phase, "{phase}-call done");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::Harness;
    use crate::types::{GameStatus, StatsOutcome};
    use chrono::TimeZone;

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 19, 0, 0).unwrap()
    }

    fn mins(m: i64) -> Duration {
        Duration::minutes(m)
    }

    #[tokio::test]
    async fn pre_call_fires_once_inside_window() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;

        let out = h.decider.evaluate(1, t - mins(59)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Pre]);
        assert_eq!(h.provider.calls(1), 1);

        let out = h.decider.evaluate(1, t - mins(30)).await.unwrap();
        assert!(out.fired.is_empty());
        assert_eq!(h.provider.calls(1), 1);

        let state = h.poll.get_or_create(1).await.unwrap();
        assert_eq!(state.pre_called_at, Some(t - mins(59)));
    }

    #[tokio::test]
    async fn pre_call_does_not_fire_before_window() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;

        let out = h.decider.evaluate(1, t - mins(61)).await.unwrap();
        assert!(out.fired.is_empty());
        assert_eq!(h.provider.calls(1), 0);
    }

    #[tokio::test]
    async fn failed_pre_call_leaves_marker_unset_for_retry() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;
        h.provider.set_failing(1, true);

        let out = h.decider.evaluate(1, t - mins(50)).await.unwrap();
        assert_eq!(out.failed, vec![Phase::Pre]);
        assert!(h.poll.get_or_create(1).await.unwrap().pre_called_at.is_none());

        h.provider.set_failing(1, false);
        let out = h.decider.evaluate(1, t - mins(49)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Pre]);
    }

    #[tokio::test]
    async fn start_call_refreshes_status_and_falls_through_to_live() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;
        h.provider.set_game(1, t, "In Play");

        let out = h.decider.evaluate(1, t + mins(1)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Start, Phase::Live]);
        assert_eq!(out.snapshots_upserted, 2);
        assert_eq!(out.stats, Some(StatsOutcome::Ingested));

        let game = h.games.get(1).await.unwrap().unwrap();
        assert_eq!(game.status, GameStatus::Live);
        let state = h.poll.get_or_create(1).await.unwrap();
        assert_eq!(state.start_called_at, Some(t + mins(1)));
        assert_eq!(state.next_live_poll_at, Some(t + mins(1) + Duration::seconds(10)));
    }

    #[tokio::test]
    async fn start_call_that_sees_finished_goes_straight_to_end() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;
        h.provider.set_game(1, t, "Finished");

        let out = h.decider.evaluate(1, t + mins(5)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Start, Phase::End]);

        let state = h.poll.get_or_create(1).await.unwrap();
        assert_eq!(state.end_called_at, Some(t + mins(5)));
        assert_eq!(state.finished_at, Some(t + mins(5)));
        assert!(state.next_live_poll_at.is_none(), "no live poll in the tick a game finishes");
    }

    #[tokio::test]
    async fn live_poll_respects_next_poll_time() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "In Play").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();

        let now = t + mins(10);
        let out = h.decider.evaluate(1, now).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Live]);

        let out = h.decider.evaluate(1, now + Duration::seconds(9)).await.unwrap();
        assert!(out.fired.is_empty());
        assert_eq!(h.provider.calls(1), 1);

        let out = h.decider.evaluate(1, now + Duration::seconds(10)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Live]);
        assert_eq!(h.provider.calls(1), 2);
    }

    #[tokio::test]
    async fn failed_live_poll_reschedules_with_floor_and_skips_stats() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "In Play").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();
        h.provider.set_failing(1, true);

        let now = t + mins(20);
        let out = h.decider.evaluate(1, now).await.unwrap();
        assert_eq!(out.failed, vec![Phase::Live]);
        assert!(out.stats.is_none());
        assert_eq!(h.stats.calls(1), 0);

        let state = h.poll.get_or_create(1).await.unwrap();
        assert_eq!(state.next_live_poll_at, Some(now + Duration::seconds(10)));
    }

    #[test]
    fn failure_backoff_never_drops_below_floor() {
        let timing = PhaseTiming { pre: mins(60), post: mins(30), live_interval: Duration::seconds(2) };
        assert_eq!(timing.live_failure_backoff(), Duration::seconds(5));
    }

    #[tokio::test]
    async fn stats_only_for_live_phase_statuses() {
        let h = Harness::new().await;
        let t = kickoff();
        // Provider lags: still "Scheduled" after tip-off.
        h.seed(1, t, "Scheduled").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();

        let out = h.decider.evaluate(1, t + mins(3)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Live]);
        assert!(out.stats.is_none());

        h.provider.set_game(1, t, "Halftime");
        let out = h.decider.evaluate(1, t + mins(4)).await.unwrap();
        assert_eq!(out.stats, Some(StatsOutcome::Ingested));
    }

    #[tokio::test]
    async fn stats_cooldown_holds_across_faster_live_polls() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "In Play").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();

        let base = t + mins(30);
        for step in 0..6 {
            // live every 10s, cooldown 30s
            h.decider.evaluate(1, base + Duration::seconds(10 * step)).await.unwrap();
        }
        assert_eq!(h.provider.calls(1), 6);
        assert_eq!(h.stats.calls(1), 2, "calls at +0s and +30s only");
    }

    #[tokio::test]
    async fn stats_failure_is_swallowed() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "In Play").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();
        h.stats.set_failing(true);

        let now = t + mins(15);
        let out = h.decider.evaluate(1, now).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Live]);
        assert!(matches!(out.stats, Some(StatsOutcome::Failed(_))));
        let state = h.poll.get_or_create(1).await.unwrap();
        assert_eq!(state.next_live_poll_at, Some(now + Duration::seconds(10)));
    }

    #[tokio::test]
    async fn stuck_not_started_is_ended_by_fallback() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();

        let now = t + Duration::hours(6) + mins(1);
        let out = h.decider.evaluate(1, now).await.unwrap();
        assert_eq!(out.fired, vec![Phase::End]);
        assert_eq!(h.poll.get_or_create(1).await.unwrap().finished_at, Some(now));
    }

    #[tokio::test]
    async fn no_live_poll_after_end_even_if_provider_flips_back() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Finished").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();

        let end_at = t + mins(120);
        let out = h.decider.evaluate(1, end_at).await.unwrap();
        assert_eq!(out.fired, vec![Phase::End]);

        // Post-call stores a stale "In Play" snapshot.
        h.provider.set_game(1, t, "In Play");
        let out = h.decider.evaluate(1, end_at + mins(30)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Post]);

        let calls = h.provider.calls(1);
        for m in [31, 45, 90] {
            let out = h.decider.evaluate(1, end_at + mins(m)).await.unwrap();
            assert!(out.fired.is_empty());
        }
        assert_eq!(h.provider.calls(1), calls);
    }

    #[tokio::test]
    async fn end_call_drops_the_stats_cooldown_entry() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "In Play").await;
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();

        let out = h.decider.evaluate(1, t + mins(15)).await.unwrap();
        assert_eq!(out.stats, Some(StatsOutcome::Ingested));
        assert_eq!(h.decider.throttle().tracked(), 1);

        h.provider.set_game(1, t, "Finished");
        h.decider.evaluate(1, t + mins(16)).await.unwrap();
        let out = h.decider.evaluate(1, t + mins(17)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::End]);
        assert_eq!(h.decider.throttle().tracked(), 0);
    }

    #[tokio::test]
    async fn post_call_waits_for_post_delay() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Finished").await;
        let finished = t + mins(130);
        h.poll.update(1, PollStateUpdate::start_called(t)).await.unwrap();
        h.poll.update(1, PollStateUpdate::ended(finished)).await.unwrap();

        let out = h.decider.evaluate(1, finished + mins(29)).await.unwrap();
        assert!(out.fired.is_empty());

        let out = h.decider.evaluate(1, finished + mins(30)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Post]);

        let out = h.decider.evaluate(1, finished + mins(60)).await.unwrap();
        assert!(out.fired.is_empty());
        assert_eq!(h.provider.calls(1), 1);
    }

    #[tokio::test]
    async fn missing_game_row_is_skipped() {
        let h = Harness::new().await;
        let out = h.decider.evaluate(404, kickoff()).await.unwrap();
        assert!(out.skipped);
        assert_eq!(h.provider.calls(404), 0);
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;
        h.pool.close().await;

        let err = h.decider.evaluate(1, t - mins(10)).await.unwrap_err();
        assert!(err.is_store());
    }

    /// Full lifecycle for one game with PRE_MINUTES=60, POST_MINUTES=30.
    #[tokio::test]
    async fn lifecycle_fires_each_one_shot_exactly_once() {
        let h = Harness::new().await;
        let t = kickoff();
        h.seed(1, t, "Scheduled").await;

        // T-61m: outside pre window
        assert!(h.decider.evaluate(1, t - mins(61)).await.unwrap().fired.is_empty());

        // T-59m: pre
        assert_eq!(h.decider.evaluate(1, t - mins(59)).await.unwrap().fired, vec![Phase::Pre]);
        assert!(h.decider.evaluate(1, t - mins(58)).await.unwrap().fired.is_empty());

        // T+1m: start (+ first live poll)
        h.provider.set_game(1, t, "In Play");
        let out = h.decider.evaluate(1, t + mins(1)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Start, Phase::Live]);

        // T+124m: live poll stores the terminal status
        h.provider.set_game(1, t, "Finished");
        let out = h.decider.evaluate(1, t + mins(124)).await.unwrap();
        assert_eq!(out.fired, vec![Phase::Live]);

        // T+125m: end
        let end_at = t + mins(125);
        assert_eq!(h.decider.evaluate(1, end_at).await.unwrap().fired, vec![Phase::End]);
        assert!(h.decider.evaluate(1, end_at + mins(1)).await.unwrap().fired.is_empty());

        // finished_at + 30m: post
        assert_eq!(h.decider.evaluate(1, end_at + mins(30)).await.unwrap().fired, vec![Phase::Post]);

        // nothing more, ever
        let calls = h.provider.calls(1);
        for m in [31, 60, 600] {
            assert!(h.decider.evaluate(1, end_at + mins(m)).await.unwrap().fired.is_empty());
        }
        assert_eq!(h.provider.calls(1), calls);

        let state = h.poll.get_or_create(1).await.unwrap();
        assert_eq!(state.pre_called_at, Some(t - mins(59)));
        assert_eq!(state.start_called_at, Some(t + mins(1)));
        assert_eq!(state.end_called_at, Some(end_at));
        assert_eq!(state.finished_at, Some(end_at));
        assert_eq!(state.post_called_at, Some(end_at + mins(30)));
    }
}
