use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::db::to_ms;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct CandidateWindows {
    /// Lookahead for games about to start.
    pub pre: Duration,
    /// How far back a start may be and still count as in play.
    pub inplay_max: Duration,
    /// Lookahead on the in-play window.
    pub grace: Duration,
    pub batch_limit: i64,
}

/// Read-only query producing the games to evaluate this tick.
///
/// A game qualifies if it starts within `[now, now + pre]`, or starts within
/// `[now - inplay_max, now + grace]` and is not done: either its status is not
/// finished, or its post-call has not happened yet (so end/post can still fire
/// after a live poll has already stored the terminal status).
#[derive(Clone)]
pub struct CandidateWindowSelector {
    pool: SqlitePool,
    windows: CandidateWindows,
}

impl CandidateWindowSelector {
    pub fn new(pool: SqlitePool, windows: CandidateWindows) -> Self {
        Self { pool, windows }
    }

    pub async fn select(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let w = &self.windows;
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT g.id
            FROM games g
            LEFT JOIN poll_state ps ON ps.game_id = g.id
            WHERE (g.scheduled_start >= ?1 AND g.scheduled_start <= ?2)
               OR (
                    g.scheduled_start >= ?3
                    AND g.scheduled_start <= ?4
                    AND (g.status <> 'finished' OR ps.post_called_at IS NULL)
               )
            ORDER BY g.scheduled_start ASC, g.id ASC
            LIMIT ?5
            "#,
        )
        .bind(to_ms(now))
        .bind(to_ms(now + w.pre))
        .bind(to_ms(now - w.inplay_max))
        .bind(to_ms(now + w.grace))
        .bind(w.batch_limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
