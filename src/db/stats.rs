use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::to_ms;
use crate::error::Result;

/// Persists detailed per-game statistics as raw provider documents.
#[derive(Clone)]
pub struct StatsWriter {
    pool: SqlitePool,
}

impl StatsWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_team_stats(&self, game_id: i64, team_id: i64, raw: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO game_team_stats (game_id, team_id, raw_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(game_id, team_id) DO UPDATE SET
                raw_json = excluded.raw_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(game_id)
        .bind(team_id)
        .bind(serde_json::to_string(raw)?)
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_player_stats(
        &self,
        game_id: i64,
        player_id: i64,
        team_id: Option<i64>,
        raw: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO game_player_stats (game_id, player_id, team_id, raw_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(game_id, player_id) DO UPDATE SET
                team_id = excluded.team_id,
                raw_json = excluded.raw_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(game_id)
        .bind(player_id)
        .bind(team_id)
        .bind(serde_json::to_string(raw)?)
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn counts(&self, game_id: i64) -> Result<(i64, i64)> {
        let teams: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game_team_stats WHERE game_id = ?")
            .bind(game_id)
            .fetch_one(&self.pool)
            .await?;
        let players: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game_player_stats WHERE game_id = ?")
            .bind(game_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((teams, players))
    }
}
