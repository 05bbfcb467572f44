use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::GameRow;
use crate::db::to_ms;
use crate::error::Result;
use crate::types::GameRecord;

const GAME_COLUMNS: &str = "id, league, season, scheduled_start, status, status_long, status_short, \
     home_team_id, away_team_id, venue, home_score, away_score, periods_current, periods_total, raw_json";

/// GameRecord persistence. Writes are upserts by id that replace every mutable column.
#[derive(Clone)]
pub struct GameStore {
    pool: SqlitePool,
}

impl GameStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, game: &GameRecord) -> Result<()> {
        let raw_json = serde_json::to_string(&game.payload)?;
        sqlx::query(
            r#"
            INSERT INTO games (
                id, league, season, scheduled_start, status, status_long, status_short,
                home_team_id, away_team_id, venue, home_score, away_score,
                periods_current, periods_total, raw_json, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                league = excluded.league,
                season = excluded.season,
                scheduled_start = excluded.scheduled_start,
                status = excluded.status,
                status_long = excluded.status_long,
                status_short = excluded.status_short,
                home_team_id = excluded.home_team_id,
                away_team_id = excluded.away_team_id,
                venue = excluded.venue,
                home_score = excluded.home_score,
                away_score = excluded.away_score,
                periods_current = excluded.periods_current,
                periods_total = excluded.periods_total,
                raw_json = excluded.raw_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(game.id)
        .bind(&game.league)
        .bind(game.season)
        .bind(to_ms(game.scheduled_start))
        .bind(game.status.as_str())
        .bind(&game.status_long)
        .bind(&game.status_short)
        .bind(game.home_team_id)
        .bind(game.away_team_id)
        .bind(&game.venue)
        .bind(game.home_score)
        .bind(game.away_score)
        .bind(game.periods_current)
        .bind(game.periods_total)
        .bind(raw_json)
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<GameRecord>> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(GameRecord::try_from).transpose()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::GameStatus;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    pub(crate) fn sample_game(id: i64, start: DateTime<Utc>, status: GameStatus) -> GameRecord {
        GameRecord {
            id,
            league: Some("standard".to_string()),
            season: Some(2024),
            scheduled_start: start,
            status,
            status_long: Some(status.to_string()),
            status_short: None,
            home_team_id: Some(1),
            away_team_id: Some(2),
            venue: Some("Arena".to_string()),
            home_score: None,
            away_score: None,
            periods_current: None,
            periods_total: None,
            payload: json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_replaces_all_mutable_fields() {
        let store = GameStore::new(test_pool().await);
        let start = Utc.with_ymd_and_hms(2025, 1, 10, 19, 0, 0).unwrap();

        let first = sample_game(10, start, GameStatus::NotStarted);
        store.upsert(&first).await.unwrap();
        assert_eq!(store.get(10).await.unwrap(), Some(first));

        let mut second = sample_game(10, start, GameStatus::Live);
        second.venue = None;
        second.home_score = Some(54);
        second.away_score = Some(49);
        second.payload = json!({ "id": 10, "scores": { "home": 54, "away": 49 } });
        store.upsert(&second).await.unwrap();

        let stored = store.get(10).await.unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(stored.venue, None, "last write wins even for cleared fields");
    }

    #[tokio::test]
    async fn missing_game_is_none() {
        let store = GameStore::new(test_pool().await);
        assert!(store.get(404).await.unwrap().is_none());
    }
}
