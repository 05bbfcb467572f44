//! Row types for the `games` and `poll_state` tables and their mapping to domain types.
//! Timestamps are stored as unix milliseconds.

use crate::db::from_ms;
use crate::error::{AppError, Result};
use crate::types::{GameRecord, GameStatus, PollState};

#[derive(Debug, sqlx::FromRow)]
pub struct GameRow {
    pub id: i64,
    pub league: Option<String>,
    pub season: Option<i64>,
    pub scheduled_start: i64,
    pub status: String,
    pub status_long: Option<String>,
    pub status_short: Option<String>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub venue: Option<String>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub periods_current: Option<i64>,
    pub periods_total: Option<i64>,
    pub raw_json: String,
}

impl TryFrom<GameRow> for GameRecord {
    type Error = AppError;

    fn try_from(row: GameRow) -> Result<Self> {
        let scheduled_start = from_ms(row.scheduled_start).ok_or_else(|| {
            AppError::Malformed(format!("game {} has out-of-range start {}", row.id, row.scheduled_start))
        })?;
        let payload = serde_json::from_str(&row.raw_json)?;
        Ok(GameRecord {
            id: row.id,
            league: row.league,
            season: row.season,
            scheduled_start,
            status: GameStatus::from_column(&row.status),
            status_long: row.status_long,
            status_short: row.status_short,
            home_team_id: row.home_team_id,
            away_team_id: row.away_team_id,
            venue: row.venue,
            home_score: row.home_score,
            away_score: row.away_score,
            periods_current: row.periods_current,
            periods_total: row.periods_total,
            payload,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PollStateRow {
    pub game_id: i64,
    pub pre_called_at: Option<i64>,
    pub start_called_at: Option<i64>,
    pub end_called_at: Option<i64>,
    pub post_called_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub next_live_poll_at: Option<i64>,
}

impl From<PollStateRow> for PollState {
    fn from(row: PollStateRow) -> Self {
        PollState {
            game_id: row.game_id,
            pre_called_at: row.pre_called_at.and_then(from_ms),
            start_called_at: row.start_called_at.and_then(from_ms),
            end_called_at: row.end_called_at.and_then(from_ms),
            post_called_at: row.post_called_at.and_then(from_ms),
            finished_at: row.finished_at.and_then(from_ms),
            next_live_poll_at: row.next_live_poll_at.and_then(from_ms),
        }
    }
}
