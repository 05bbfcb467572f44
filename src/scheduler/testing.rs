//! In-process provider and stats fakes for scheduler tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::db::{test_pool, GameStore, PollStateStore};
use crate::error::{AppError, Result};
use crate::fetcher::{GameProvider, SnapshotUpserter};
use crate::ingest::StatsIngestor;
use crate::scheduler::{PhaseDecider, PhaseTiming, StatsThrottle};

pub fn game_doc(id: i64, start: DateTime<Utc>, status_long: &str) -> Value {
    json!({
        "id": id,
        "league": "standard",
        "season": 2024,
        "date": { "start": start.to_rfc3339_opts(SecondsFormat::Millis, true) },
        "status": { "long": status_long },
        "teams": { "visitors": { "id": 2 }, "home": { "id": 1 } },
        "scores": { "visitors": { "points": 0 }, "home": { "points": 0 } }
    })
}

#[derive(Default)]
pub struct FakeProvider {
    docs: Mutex<HashMap<i64, Value>>,
    failing: Mutex<HashSet<i64>>,
    delays: Mutex<HashMap<i64, std::time::Duration>>,
    calls: Mutex<HashMap<i64, u32>>,
}

impl FakeProvider {
    pub fn set_game(&self, id: i64, start: DateTime<Utc>, status_long: &str) {
        self.docs.lock().unwrap().insert(id, game_doc(id, start, status_long));
    }

    pub fn set_failing(&self, id: i64, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Hold the lookup for `delay` before answering.
    pub fn set_delay(&self, id: i64, delay: std::time::Duration) {
        self.delays.lock().unwrap().insert(id, delay);
    }

    pub fn calls(&self, id: i64) -> u32 {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GameProvider for FakeProvider {
    async fn fetch_game(&self, game_id: i64) -> Result<Value> {
        *self.calls.lock().unwrap().entry(game_id).or_default() += 1;
        let delay = self.delays.lock().unwrap().get(&game_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&game_id) {
            return Err(AppError::Provider {
                status: 200,
                detail: r#"{"requests":"rate limited"}"#.to_string(),
            });
        }
        self.docs
            .lock()
            .unwrap()
            .get(&game_id)
            .cloned()
            .ok_or(AppError::NotFound(game_id))
    }
}

#[derive(Default)]
pub struct FakeStats {
    failing: AtomicBool,
    calls: Mutex<HashMap<i64, u32>>,
}

impl FakeStats {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self, id: i64) -> u32 {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StatsIngestor for FakeStats {
    async fn ingest(&self, game_id: i64) -> Result<()> {
        *self.calls.lock().unwrap().entry(game_id).or_default() += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Provider { status: 500, detail: "stats down".to_string() });
        }
        Ok(())
    }
}

/// Store, fakes and a decider wired together with the default timings
/// (pre 60m, post 30m, live 10s, stats cooldown 30s).
pub struct Harness {
    pub pool: SqlitePool,
    pub provider: Arc<FakeProvider>,
    pub stats: Arc<FakeStats>,
    pub games: GameStore,
    pub poll: PollStateStore,
    pub decider: PhaseDecider,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = test_pool().await;
        let provider = Arc::new(FakeProvider::default());
        let stats = Arc::new(FakeStats::default());
        let games = GameStore::new(pool.clone());
        let poll = PollStateStore::new(pool.clone());
        let throttle = Arc::new(StatsThrottle::new(stats.clone(), Duration::seconds(30)));
        let decider = PhaseDecider::new(
            games.clone(),
            poll.clone(),
            SnapshotUpserter::new(provider.clone(), games.clone()),
            throttle,
            PhaseTiming {
                pre: Duration::minutes(60),
                post: Duration::minutes(30),
                live_interval: Duration::seconds(10),
            },
        );
        Self { pool, provider, stats, games, poll, decider }
    }

    /// Seed both the provider and the local store with the same document.
    pub async fn seed(&self, id: i64, start: DateTime<Utc>, status_long: &str) {
        self.provider.set_game(id, start, status_long);
        let record = crate::fetcher::parse_game_snapshot(&game_doc(id, start, status_long)).unwrap();
        self.games.upsert(&record).await.unwrap();
    }
}
