use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::PollStateRow;
use crate::db::to_ms;
use crate::error::Result;
use crate::types::{PollState, PollStateUpdate};

const POLL_STATE_COLUMNS: &str = "game_id, pre_called_at, start_called_at, end_called_at, \
     post_called_at, finished_at, next_live_poll_at";

/// Durable per-game poll bookkeeping.
///
/// Phase markers (`pre/start/end/post_called_at`, `finished_at`) are write-once:
/// the update statement keeps an existing value and only fills an empty column.
/// `next_live_poll_at` is the only column that moves.
#[derive(Clone)]
pub struct PollStateStore {
    pool: SqlitePool,
}

impl PollStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Existing state, or a fresh row with every marker unset.
    pub async fn get_or_create(&self, game_id: i64) -> Result<PollState> {
        self.ensure_row(game_id).await?;
        let row: PollStateRow = sqlx::query_as(&format!(
            "SELECT {POLL_STATE_COLUMNS} FROM poll_state WHERE game_id = ?"
        ))
        .bind(game_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Apply a partial write and return the row as it now stands, so later
    /// branches in the same tick see the new values.
    pub async fn update(&self, game_id: i64, update: PollStateUpdate) -> Result<PollState> {
        if update.is_empty() {
            return self.get_or_create(game_id).await;
        }
        self.ensure_row(game_id).await?;
        let row: PollStateRow = sqlx::query_as(&format!(
            r#"
            UPDATE poll_state SET
                pre_called_at     = COALESCE(pre_called_at, ?),
                start_called_at   = COALESCE(start_called_at, ?),
                end_called_at     = COALESCE(end_called_at, ?),
                post_called_at    = COALESCE(post_called_at, ?),
                finished_at       = COALESCE(finished_at, ?),
                next_live_poll_at = COALESCE(?, next_live_poll_at),
                updated_at        = ?
            WHERE game_id = ?
            RETURNING {POLL_STATE_COLUMNS}
            "#
        ))
        .bind(update.pre_called_at.map(to_ms))
        .bind(update.start_called_at.map(to_ms))
        .bind(update.end_called_at.map(to_ms))
        .bind(update.post_called_at.map(to_ms))
        .bind(update.finished_at.map(to_ms))
        .bind(update.next_live_poll_at.map(to_ms))
        .bind(to_ms(Utc::now()))
        .bind(game_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn ensure_row(&self, game_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO poll_state (game_id, updated_at) VALUES (?, ?) ON CONFLICT(game_id) DO NOTHING")
            .bind(game_id)
            .bind(to_ms(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
