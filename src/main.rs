mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod ingest;
mod scheduler;
mod types;

use std::future::IntoFuture;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{GameStore, PollStateStore, StatsWriter};
use crate::error::Result;
use crate::fetcher::{ApiSportsClient, SnapshotUpserter};
use crate::ingest::{HttpStatsIngestor, NoopStatsIngestor, StatsIngestor};
use crate::scheduler::{
    CandidateWindowSelector, CandidateWindows, PhaseDecider, PhaseTiming, Scheduler, StatsThrottle,
};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.sqlite_url()).await?;
    info!("Database ready at {}", cfg.database_url);

    // --- Collaborators ---
    let client = ApiSportsClient::new(&cfg)?;
    let games = GameStore::new(pool.clone());
    let poll = PollStateStore::new(pool.clone());
    let upserter = SnapshotUpserter::new(Arc::new(client.clone()), games.clone());

    let ingestor: Arc<dyn StatsIngestor> = if cfg.stats_ingest_enabled {
        Arc::new(HttpStatsIngestor::new(client, StatsWriter::new(pool.clone())))
    } else {
        warn!("STATS_INGEST_ENABLED=false: live polls will not ingest detailed stats");
        Arc::new(NoopStatsIngestor)
    };
    let throttle = Arc::new(StatsThrottle::new(ingestor, cfg.stats_cooldown()));

    // --- Scheduler ---
    let health = Arc::new(HealthState::new());
    let decider = PhaseDecider::new(games, poll, upserter, throttle, PhaseTiming::from_config(&cfg));
    let selector = CandidateWindowSelector::new(pool.clone(), CandidateWindows::from_config(&cfg));
    let scheduler = Scheduler::new(&cfg, selector, decider, Arc::clone(&health));

    info!(
        pre_minutes = cfg.pre_minutes,
        post_minutes = cfg.post_minutes,
        inplay_max_minutes = cfg.inplay_max_minutes,
        grace_minutes = cfg.grace_minutes,
        batch_limit = cfg.batch_limit,
        live_interval_secs = cfg.live_interval_secs,
        idle_interval_secs = cfg.idle_interval_secs,
        stats_cooldown_secs = cfg.stats_cooldown_secs,
        "Live poller starting against {}",
        cfg.provider_base_url,
    );

    // --- HTTP health endpoint ---
    let app = router(ApiState { health: Arc::clone(&health) });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Health endpoint listening on {bind_addr}");

    tokio::select! {
        _ = scheduler.run() => {}
        served = axum::serve(listener, app).into_future() => served?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    health.set_running(false);
    pool.close().await;
    info!("Live poller stopped");
    Ok(())
}
