use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::NOT_STARTED_FALLBACK_HOURS;

// ---------------------------------------------------------------------------
// Game status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    NotStarted,
    Live,
    Halftime,
    Finished,
    Unknown,
}

/// Provider status strings (long or short form) → canonical status.
/// Matching is ASCII case-insensitive on the trimmed value.
const STATUS_TABLE: &[(&str, GameStatus)] = &[
    // not started
    ("Scheduled", GameStatus::NotStarted),
    ("Not Started", GameStatus::NotStarted),
    ("NS", GameStatus::NotStarted),
    ("TBD", GameStatus::NotStarted),
    ("1", GameStatus::NotStarted),
    // in play
    ("In Play", GameStatus::Live),
    ("Live", GameStatus::Live),
    ("Q1", GameStatus::Live),
    ("Q2", GameStatus::Live),
    ("Q3", GameStatus::Live),
    ("Q4", GameStatus::Live),
    ("P1", GameStatus::Live),
    ("P2", GameStatus::Live),
    ("P3", GameStatus::Live),
    ("1H", GameStatus::Live),
    ("2H", GameStatus::Live),
    ("OT", GameStatus::Live),
    ("ET", GameStatus::Live),
    ("2", GameStatus::Live),
    // breaks
    ("Halftime", GameStatus::Halftime),
    ("HT", GameStatus::Halftime),
    ("BT", GameStatus::Halftime),
    ("Break Time", GameStatus::Halftime),
    // terminal
    ("Finished", GameStatus::Finished),
    ("FT", GameStatus::Finished),
    ("AET", GameStatus::Finished),
    ("AOT", GameStatus::Finished),
    ("AP", GameStatus::Finished),
    ("PEN", GameStatus::Finished),
    ("After Over Time", GameStatus::Finished),
    ("After Penalties", GameStatus::Finished),
    ("3", GameStatus::Finished),
];

impl GameStatus {
    /// Look up a provider status string. Anything not in the table is `Unknown`.
    pub fn from_provider(raw: &str) -> Self {
        let raw = raw.trim();
        STATUS_TABLE
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(raw))
            .map(|(_, status)| *status)
            .unwrap_or(GameStatus::Unknown)
    }

    /// Statuses that warrant a detailed stats ingest alongside the snapshot.
    pub fn is_live_phase(self) -> bool {
        matches!(self, GameStatus::Live | GameStatus::Halftime)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::NotStarted => "not_started",
            GameStatus::Live => "live",
            GameStatus::Halftime => "halftime",
            GameStatus::Finished => "finished",
            GameStatus::Unknown => "unknown",
        }
    }

    /// Inverse of `as_str`, used when reading rows back.
    pub fn from_column(s: &str) -> Self {
        match s {
            "not_started" => GameStatus::NotStarted,
            "live" => GameStatus::Live,
            "halftime" => GameStatus::Halftime,
            "finished" => GameStatus::Finished,
            _ => GameStatus::Unknown,
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fallback for a provider that never moves a game off "not started":
/// once the start is more than `NOT_STARTED_FALLBACK_HOURS` in the past, call it finished.
pub fn stuck_not_started(status: GameStatus, scheduled_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    status == GameStatus::NotStarted
        && now - scheduled_start > Duration::hours(NOT_STARTED_FALLBACK_HOURS)
}

/// Provider-reported terminal status, or the stuck-not-started fallback.
pub fn resolves_finished(status: GameStatus, scheduled_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    status == GameStatus::Finished || stuck_not_started(status, scheduled_start, now)
}

// ---------------------------------------------------------------------------
// GameRecord
// ---------------------------------------------------------------------------

/// Normalised snapshot of one game. `payload` keeps the full provider document.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub id: i64,
    pub league: Option<String>,
    pub season: Option<i64>,
    pub scheduled_start: DateTime<Utc>,
    pub status: GameStatus,
    pub status_long: Option<String>,
    pub status_short: Option<String>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub venue: Option<String>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub periods_current: Option<i64>,
    pub periods_total: Option<i64>,
    pub payload: serde_json::Value,
}

impl GameRecord {
    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        resolves_finished(self.status, self.scheduled_start, now)
    }
}

// ---------------------------------------------------------------------------
// PollState
// ---------------------------------------------------------------------------

/// Durable per-game scheduler bookkeeping. Phase markers are write-once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollState {
    pub game_id: i64,
    pub pre_called_at: Option<DateTime<Utc>>,
    pub start_called_at: Option<DateTime<Utc>>,
    pub end_called_at: Option<DateTime<Utc>>,
    pub post_called_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_live_poll_at: Option<DateTime<Utc>>,
}

/// Partial write to a PollState row. `None` leaves the column untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStateUpdate {
    pub pre_called_at: Option<DateTime<Utc>>,
    pub start_called_at: Option<DateTime<Utc>>,
    pub end_called_at: Option<DateTime<Utc>>,
    pub post_called_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_live_poll_at: Option<DateTime<Utc>>,
}

impl PollStateUpdate {
    pub fn pre_called(at: DateTime<Utc>) -> Self {
        Self { pre_called_at: Some(at), ..Self::default() }
    }

    pub fn start_called(at: DateTime<Utc>) -> Self {
        Self { start_called_at: Some(at), ..Self::default() }
    }

    pub fn ended(at: DateTime<Utc>) -> Self {
        Self { end_called_at: Some(at), finished_at: Some(at), ..Self::default() }
    }

    pub fn post_called(at: DateTime<Utc>) -> Self {
        Self { post_called_at: Some(at), ..Self::default() }
    }

    pub fn next_live_poll(at: DateTime<Utc>) -> Self {
        Self { next_live_poll_at: Some(at), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Phases and tick bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Start,
    End,
    Post,
    Live,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pre => "pre",
            Phase::Start => "start",
            Phase::End => "end",
            Phase::Post => "post",
            Phase::Live => "live",
        };
        write!(f, "{s}")
    }
}

/// Result of one throttled stats ingest attempt. Never surfaces as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsOutcome {
    Ingested,
    /// Skipped: the game's cooldown window has not elapsed.
    CoolingDown,
    Failed(String),
}

impl StatsOutcome {
    /// True when the collaborator was actually called.
    pub fn was_forwarded(&self) -> bool {
        !matches!(self, StatsOutcome::CoolingDown)
    }
}

/// What happened for one candidate in one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameOutcome {
    /// Phases whose action succeeded (and whose marker was written).
    pub fired: Vec<Phase>,
    /// Phases whose fetch/upsert failed.
    pub failed: Vec<Phase>,
    pub snapshots_upserted: u32,
    pub stats: Option<StatsOutcome>,
    /// No game row could be loaded for the candidate id.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub candidates: usize,
    pub snapshots_upserted: u32,
    pub stats_called: u32,
    pub stats_failed: u32,
    pub fetch_failures: u32,
    pub skipped: u32,
}

impl TickSummary {
    pub fn absorb(&mut self, outcome: &GameOutcome) {
        self.snapshots_upserted += outcome.snapshots_upserted;
        self.fetch_failures += outcome.failed.len() as u32;
        if outcome.skipped {
            self.skipped += 1;
        }
        if let Some(stats) = &outcome.stats {
            if stats.was_forwarded() {
                self.stats_called += 1;
            }
            if matches!(stats, StatsOutcome::Failed(_)) {
                self.stats_failed += 1;
            }
        }
    }
}
