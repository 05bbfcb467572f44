//! Live-event polling scheduler.
//!
//! Each tick: `CandidateWindowSelector` picks the games worth looking at,
//! `PhaseDecider` walks each one through its pre/start/end/post/live state
//! machine, and `Scheduler` sleeps before the next tick.

pub mod candidates;
pub mod phase;
pub mod runner;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

use chrono::Duration;

use crate::config::Config;

pub use candidates::{CandidateWindowSelector, CandidateWindows};
pub use phase::{PhaseDecider, PhaseTiming};
pub use runner::Scheduler;
pub use throttle::StatsThrottle;

impl CandidateWindows {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            pre: Duration::minutes(cfg.pre_minutes),
            inplay_max: Duration::minutes(cfg.inplay_max_minutes),
            grace: Duration::minutes(cfg.grace_minutes),
            batch_limit: cfg.batch_limit,
        }
    }
}

impl PhaseTiming {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            pre: Duration::minutes(cfg.pre_minutes),
            post: Duration::minutes(cfg.post_minutes),
            live_interval: cfg.live_interval(),
        }
    }
}
