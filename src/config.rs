use std::str::FromStr;

use chrono::Duration;

use crate::error::{AppError, Result};

pub const PROVIDER_BASE_URL: &str = "https://v2.nba.api-sports.io";

/// A game still reported as not started this long after its scheduled start is
/// treated as finished.
pub const NOT_STARTED_FALLBACK_HOURS: i64 = 6;

/// Lower bound on the reschedule delay after a failed live poll.
pub const LIVE_FAILURE_FLOOR_SECS: i64 = 5;

/// Backoff steps (milliseconds) for provider retries on 429 / 5xx.
pub const PROVIDER_RETRY_BACKOFF_MS: &[u64] = &[250, 500, 1000];

/// Bounds on the short sleep between busy ticks (seconds).
pub const BUSY_SLEEP_MIN_SECS: f64 = 0.2;
pub const BUSY_SLEEP_MAX_SECS: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL or file path (DATABASE_URL, required)
    pub database_url: String,
    /// Provider credential (API_KEY / APISPORTS_KEY / API_SPORTS_KEY, required)
    pub api_key: String,
    pub provider_base_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// Per-request timeout against the provider (REQUEST_TIMEOUT_SECS)
    pub request_timeout_secs: u64,
    /// Pre-start window length (PRE_MINUTES)
    pub pre_minutes: i64,
    /// Delay after finish before the post-call (POST_MINUTES)
    pub post_minutes: i64,
    /// How far back a start time may be and still count as in play (INPLAY_MAX_MINUTES)
    pub inplay_max_minutes: i64,
    /// Lookahead on the in-play window (GRACE_MINUTES)
    pub grace_minutes: i64,
    /// Max candidates per tick (BATCH_LIMIT)
    pub batch_limit: i64,
    /// Live periodic poll spacing (LIVE_INTERVAL_SECS)
    pub live_interval_secs: f64,
    /// Sleep when there is nothing to do or a tick failed (IDLE_INTERVAL_SECS)
    pub idle_interval_secs: f64,
    /// Minimum spacing between stats ingests for one game (STATS_COOLDOWN_SECS)
    pub stats_cooldown_secs: f64,
    /// Games evaluated concurrently within a tick (SCHEDULER_CONCURRENCY)
    pub scheduler_concurrency: usize,
    pub stats_ingest_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL is not set".to_string()))?;
        let api_key = get("API_KEY")
            .or_else(|| get("APISPORTS_KEY"))
            .or_else(|| get("API_SPORTS_KEY"))
            .ok_or_else(|| {
                AppError::Config("API_KEY (or APISPORTS_KEY/API_SPORTS_KEY) is not set".to_string())
            })?;

        let cfg = Self {
            database_url,
            api_key,
            provider_base_url: get("PROVIDER_BASE_URL")
                .unwrap_or_else(|| PROVIDER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            api_port: parse_or(&get, "API_PORT", 3000)?,
            request_timeout_secs: parse_or(&get, "REQUEST_TIMEOUT_SECS", 45)?,
            pre_minutes: parse_or(&get, "PRE_MINUTES", 60)?,
            post_minutes: parse_or(&get, "POST_MINUTES", 30)?,
            inplay_max_minutes: parse_or(&get, "INPLAY_MAX_MINUTES", 240)?,
            grace_minutes: parse_or(&get, "GRACE_MINUTES", 2)?,
            batch_limit: parse_or(&get, "BATCH_LIMIT", 120)?,
            live_interval_secs: parse_or(&get, "LIVE_INTERVAL_SECS", 10.0)?,
            idle_interval_secs: parse_or(&get, "IDLE_INTERVAL_SECS", 180.0)?,
            stats_cooldown_secs: parse_or(&get, "STATS_COOLDOWN_SECS", 30.0)?,
            scheduler_concurrency: parse_or(&get, "SCHEDULER_CONCURRENCY", 4)?,
            stats_ingest_enabled: parse_or(&get, "STATS_INGEST_ENABLED", true)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_limit <= 0 {
            return Err(AppError::Config("BATCH_LIMIT must be positive".to_string()));
        }
        if self.scheduler_concurrency == 0 {
            return Err(AppError::Config("SCHEDULER_CONCURRENCY must be at least 1".to_string()));
        }
        for (name, secs) in [
            ("LIVE_INTERVAL_SECS", self.live_interval_secs),
            ("IDLE_INTERVAL_SECS", self.idle_interval_secs),
            ("STATS_COOLDOWN_SECS", self.stats_cooldown_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(AppError::Config(format!("{name} must be a non-negative number")));
            }
        }
        for (name, minutes) in [
            ("PRE_MINUTES", self.pre_minutes),
            ("POST_MINUTES", self.post_minutes),
            ("INPLAY_MAX_MINUTES", self.inplay_max_minutes),
            ("GRACE_MINUTES", self.grace_minutes),
        ] {
            if minutes < 0 {
                return Err(AppError::Config(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }

    pub fn live_interval(&self) -> Duration {
        secs_f64_to_duration(self.live_interval_secs)
    }

    pub fn idle_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.idle_interval_secs)
    }

    pub fn stats_cooldown(&self) -> Duration {
        secs_f64_to_duration(self.stats_cooldown_secs)
    }

    /// Short pause between non-empty ticks: a fifth of the live interval, clamped.
    pub fn busy_sleep(&self) -> std::time::Duration {
        let secs = (self.live_interval_secs / 5.0).clamp(BUSY_SLEEP_MIN_SECS, BUSY_SLEEP_MAX_SECS);
        std::time::Duration::from_secs_f64(secs)
    }

    /// sqlx wants a URL; accept a bare path the way DB_PATH used to work.
    pub fn sqlite_url(&self) -> String {
        if self.database_url.starts_with("sqlite:") {
            self.database_url.clone()
        } else {
            format!("sqlite:{}?mode=rwc", self.database_url)
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
    }
}

pub fn secs_f64_to_duration(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}
