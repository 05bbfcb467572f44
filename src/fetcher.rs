use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, PROVIDER_RETRY_BACKOFF_MS};
use crate::db::GameStore;
use crate::error::{AppError, Result};
use crate::types::{GameRecord, GameStatus};

/// Single-game lookup against the upstream provider. Returns the raw game document.
#[async_trait]
pub trait GameProvider: Send + Sync {
    async fn fetch_game(&self, game_id: i64) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// ApiSportsClient
// ---------------------------------------------------------------------------

/// HTTP client for an api-sports style provider: `{ "errors": ..., "response": [...] }`.
#[derive(Clone)]
pub struct ApiSportsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiSportsClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.provider_base_url.clone(),
            api_key: cfg.api_key.clone(),
        })
    }

    /// GET `path` and return the envelope. 429 and 5xx are retried on a short
    /// ladder; an envelope with a non-empty `errors` field is an error even on 200.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0usize;

        loop {
            let resp = self
                .client
                .get(&url)
                .header("x-apisports-key", &self.api_key)
                .query(query)
                .send()
                .await?;
            let status = resp.status();

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < PROVIDER_RETRY_BACKOFF_MS.len() {
                let backoff = PROVIDER_RETRY_BACKOFF_MS[attempt];
                warn!(path, status = status.as_u16(), attempt, "Provider returned {status}, retrying in {backoff}ms");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AppError::Provider {
                    status: status.as_u16(),
                    detail: truncate(&body, 200),
                });
            }

            let body: Value = resp.json().await?;
            check_envelope(status.as_u16(), &body)?;
            debug!(path, "Provider call ok");
            return Ok(body);
        }
    }
}

#[async_trait]
impl GameProvider for ApiSportsClient {
    async fn fetch_game(&self, game_id: i64) -> Result<Value> {
        let body = self.get_json("/games", &[("id", game_id.to_string())]).await?;
        first_response_item(&body).ok_or(AppError::NotFound(game_id))
    }
}

/// Reject envelopes whose `errors` field is a non-empty array or object.
pub fn check_envelope(status: u16, body: &Value) -> Result<()> {
    let has_errors = match body.get("errors") {
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::String(s)) => !s.trim().is_empty(),
        _ => false,
    };
    if has_errors {
        let detail = body.get("errors").map(|e| e.to_string()).unwrap_or_default();
        return Err(AppError::Provider { status, detail });
    }
    Ok(())
}

/// First object in the envelope's `response` array.
pub fn first_response_item(body: &Value) -> Option<Value> {
    body.get("response")
        .and_then(|r| r.as_array())
        .and_then(|a| a.first())
        .filter(|item| item.is_object())
        .cloned()
}

pub fn response_items(body: &Value) -> Vec<Value> {
    body.get("response")
        .and_then(|r| r.as_array())
        .map(|a| a.iter().filter(|v| v.is_object()).cloned().collect())
        .unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Snapshot normalisation
// ---------------------------------------------------------------------------

/// Normalise one provider game document into a GameRecord.
///
/// Handles both the basketball shape (`date.start`, `teams.visitors`,
/// `scores.home.points`) and the flatter shape (`date` string, `teams.away`,
/// numeric scores). The whole document is kept as `payload`.
pub fn parse_game_snapshot(item: &Value) -> Result<GameRecord> {
    let id = item
        .get("id")
        .and_then(as_i64)
        .ok_or_else(|| AppError::Malformed("game document has no id".to_string()))?;

    let start_str = item
        .get("date")
        .and_then(|d| d.get("start").and_then(|s| s.as_str()).or_else(|| d.as_str()))
        .ok_or_else(|| AppError::Malformed(format!("game {id} has no start time")))?;
    let scheduled_start = parse_start(start_str)
        .ok_or_else(|| AppError::Malformed(format!("game {id} has unparseable start {start_str:?}")))?;

    let status_obj = item.get("status");
    let status_long = status_obj.and_then(|s| s.get("long")).and_then(as_text);
    let status_short = status_obj.and_then(|s| s.get("short")).and_then(as_text);
    let status = status_long
        .as_deref()
        .map(GameStatus::from_provider)
        .filter(|s| *s != GameStatus::Unknown)
        .or_else(|| status_short.as_deref().map(GameStatus::from_provider))
        .unwrap_or(GameStatus::Unknown);

    let league = item.get("league").and_then(|l| {
        as_text(l).or_else(|| l.get("name").and_then(as_text))
    });
    let season = item
        .get("season")
        .and_then(as_i64)
        .or_else(|| item.get("league").and_then(|l| l.get("season")).and_then(as_i64));

    let teams = item.get("teams");
    let home_team_id = teams.and_then(|t| t.get("home")).and_then(|h| h.get("id")).and_then(as_i64);
    let away_team_id = teams
        .and_then(|t| t.get("visitors").or_else(|| t.get("away")))
        .and_then(|a| a.get("id"))
        .and_then(as_i64);

    let scores = item.get("scores").or_else(|| item.get("score"));
    let home_score = scores.and_then(|s| s.get("home")).and_then(score_value);
    let away_score = scores
        .and_then(|s| s.get("visitors").or_else(|| s.get("away")))
        .and_then(score_value);

    let venue = item
        .get("arena")
        .or_else(|| item.get("venue"))
        .and_then(|v| v.get("name").and_then(as_text).or_else(|| as_text(v)));

    let periods = item.get("periods");
    let periods_current = periods.and_then(|p| p.get("current")).and_then(as_i64);
    let periods_total = periods.and_then(|p| p.get("total")).and_then(as_i64);

    Ok(GameRecord {
        id,
        league,
        season,
        scheduled_start,
        status,
        status_long,
        status_short,
        home_team_id,
        away_team_id,
        venue,
        home_score,
        away_score,
        periods_current,
        periods_total,
        payload: item.clone(),
    })
}

fn parse_start(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Number or numeric string.
pub fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Non-empty trimmed string; numbers are rendered as text.
fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{"points": 101}` or a bare number.
fn score_value(v: &Value) -> Option<i64> {
    v.get("points").and_then(as_i64).or_else(|| as_i64(v))
}

// ---------------------------------------------------------------------------
// SnapshotUpserter
// ---------------------------------------------------------------------------

/// Fetches one game from the provider and writes it to the store, last write wins.
#[derive(Clone)]
pub struct SnapshotUpserter {
    provider: Arc<dyn GameProvider>,
    games: GameStore,
}

impl SnapshotUpserter {
    pub fn new(provider: Arc<dyn GameProvider>, games: GameStore) -> Self {
        Self { provider, games }
    }

    /// Returns the record exactly as written.
    pub async fn refresh(&self, game_id: i64) -> Result<GameRecord> {
        let item = self.provider.fetch_game(game_id).await?;
        let record = parse_game_snapshot(&item)?;
        if record.id != game_id {
            return Err(AppError::Malformed(format!(
                "asked for game {game_id}, provider returned {}",
                record.id
            )));
        }
        self.games.upsert(&record).await?;
        Ok(record)
    }
}
