use async_trait::async_trait;
use tracing::debug;

use crate::db::StatsWriter;
use crate::error::Result;
use crate::fetcher::{as_i64, response_items, ApiSportsClient};

/// Detailed per-game statistics ingestion, invoked by game id only.
#[async_trait]
pub trait StatsIngestor: Send + Sync {
    async fn ingest(&self, game_id: i64) -> Result<()>;
}

/// Pulls team and player box scores for one game and stores the raw rows.
pub struct HttpStatsIngestor {
    client: ApiSportsClient,
    writer: StatsWriter,
}

impl HttpStatsIngestor {
    pub fn new(client: ApiSportsClient, writer: StatsWriter) -> Self {
        Self { client, writer }
    }
}

#[async_trait]
impl StatsIngestor for HttpStatsIngestor {
    async fn ingest(&self, game_id: i64) -> Result<()> {
        let teams = self
            .client
            .get_json("/games/statistics", &[("id", game_id.to_string())])
            .await?;
        let mut team_rows = 0usize;
        for row in response_items(&teams) {
            let Some(team_id) = row.get("team").and_then(|t| t.get("id")).and_then(as_i64) else {
                continue;
            };
            self.writer.upsert_team_stats(game_id, team_id, &row).await?;
            team_rows += 1;
        }

        let players = self
            .client
            .get_json("/players/statistics", &[("game", game_id.to_string())])
            .await?;
        let mut player_rows = 0usize;
        for row in response_items(&players) {
            let Some(player_id) = row.get("player").and_then(|p| p.get("id")).and_then(as_i64) else {
                continue;
            };
            let team_id = row.get("team").and_then(|t| t.get("id")).and_then(as_i64);
            self.writer.upsert_player_stats(game_id, player_id, team_id, &row).await?;
            player_rows += 1;
        }

        debug!(game_id, team_rows, player_rows, "Stats ingested");
        Ok(())
    }
}

/// Used when STATS_INGEST_ENABLED=false.
pub struct NoopStatsIngestor;

#[async_trait]
impl StatsIngestor for NoopStatsIngestor {
    async fn ingest(&self, _game_id: i64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::error::AppError;
    use crate::fetcher::tests::stub_client;
    use axum::{routing::get, Json, Router};
    use serde_json::{json, Value};

    fn stats_routes(teams: Value, players: Value) -> Router {
        Router::new()
            .route("/games/statistics", get(move || async move { Json(teams) }))
            .route("/players/statistics", get(move || async move { Json(players) }))
    }

    #[tokio::test]
    async fn stores_team_and_player_rows_and_skips_rows_without_ids() {
        let teams = json!({
            "errors": [],
            "response": [
                { "team": { "id": 1 }, "points": 101 },
                { "team": { "id": 2 }, "points": 97 },
                { "points": 0 }
            ]
        });
        let players = json!({
            "errors": [],
            "response": [
                { "player": { "id": 23 }, "team": { "id": 1 }, "points": 31 },
                { "player": { "id": "30" }, "points": 12 },
                { "team": { "id": 2 }, "points": 8 }
            ]
        });
        let writer = StatsWriter::new(test_pool().await);
        let client = stub_client(stats_routes(teams, players)).await;
        let ingestor = HttpStatsIngestor::new(client, writer.clone());

        ingestor.ingest(14123).await.unwrap();
        assert_eq!(writer.counts(14123).await.unwrap(), (2, 2));

        // Re-ingesting the same game replaces rows instead of duplicating them.
        ingestor.ingest(14123).await.unwrap();
        assert_eq!(writer.counts(14123).await.unwrap(), (2, 2));
    }

    #[tokio::test]
    async fn provider_error_fails_before_any_player_rows() {
        let teams = json!({ "errors": { "requests": "limit reached" }, "response": [] });
        let players = json!({ "errors": [], "response": [{ "player": { "id": 23 } }] });
        let writer = StatsWriter::new(test_pool().await);
        let client = stub_client(stats_routes(teams, players)).await;
        let ingestor = HttpStatsIngestor::new(client, writer.clone());

        let err = ingestor.ingest(5).await.unwrap_err();
        assert!(matches!(err, AppError::Provider { status: 200, .. }));
        assert_eq!(writer.counts(5).await.unwrap(), (0, 0));
    }
}
