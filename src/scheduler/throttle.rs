use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::ingest::StatsIngestor;
use crate::types::StatsOutcome;

/// Per-game minimum spacing between stats ingests.
///
/// The last-call map lives only as long as this value; a restart forgets it.
/// Only successful calls are recorded, so a failure can be retried on the next
/// live poll.
pub struct StatsThrottle {
    ingestor: Arc<dyn StatsIngestor>,
    cooldown: Duration,
    last_call: DashMap<i64, DateTime<Utc>>,
}

impl StatsThrottle {
    pub fn new(ingestor: Arc<dyn StatsIngestor>, cooldown: Duration) -> Self {
        Self {
            ingestor,
            cooldown,
            last_call: DashMap::new(),
        }
    }

    pub fn is_cooling_down(&self, game_id: i64, now: DateTime<Utc>) -> bool {
        // Copy out; never hold a map guard across an await.
        let last = self.last_call.get(&game_id).map(|r| *r.value());
        matches!(last, Some(last) if now - last < self.cooldown)
    }

    pub async fn call(&self, game_id: i64, now: DateTime<Utc>) -> StatsOutcome {
        if self.is_cooling_down(game_id, now) {
            return StatsOutcome::CoolingDown;
        }

        match self.ingestor.ingest(game_id).await {
            Ok(()) => {
                self.last_call.insert(game_id, now);
                StatsOutcome::Ingested
            }
            Err(e) => {
                info!(game_id, "Stats ingest failed: {e}");
                StatsOutcome::Failed(e.to_string())
            }
        }
    }

    /// Drop a game's entry once it can no longer be live-polled.
    pub fn forget(&self, game_id: i64) {
        self.last_call.remove(&game_id);
    }

    /// Number of games with a recorded last call.
    pub fn tracked(&self) -> usize {
        self.last_call.len()
    }
}
