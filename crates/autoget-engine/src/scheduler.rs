//! Pass scheduling.
//!
//! The progress pass runs on a one-minute sleep loop per downloader; the
//! seeding-policy pass runs once a day at 08:00 local time. Passes are not
//! individually cancellable: each cycle runs to natural completion and the
//! loops are torn down with their tasks at shutdown (the passes are
//! idempotent on restart).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use tokio::task::JoinHandle;
use tracing::info;

use crate::LifecycleEngine;

/// Sleep between progress cycles.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Local hour of day at which the seeding-policy pass runs.
pub const SEEDING_POLICY_HOUR: u32 = 8;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Spawn the minute-cadence progress loop for one engine.
pub fn spawn_progress_loop(engine: Arc<LifecycleEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(downloader = %engine.name(), "progress loop started");
        loop {
            tokio::time::sleep(PROGRESS_INTERVAL).await;
            engine.run_progress_pass().await;
        }
    })
}

/// Spawn the daily seeding-policy loop for one engine.
///
/// Returns `None` when the engine has no seeding policy configured.
pub fn spawn_seeding_loop(engine: Arc<LifecycleEngine>) -> Option<JoinHandle<()>> {
    engine.seeding_policy()?;
    Some(tokio::spawn(async move {
        info!(downloader = %engine.name(), "seeding policy loop started");
        loop {
            let wait = seconds_until_daily_run(&Local::now());
            tokio::time::sleep(Duration::from_secs(wait)).await;
            engine.run_seeding_pass().await;
        }
    }))
}

/// Seconds from `now` until the next local [`SEEDING_POLICY_HOUR`]:00.
fn seconds_until_daily_run(now: &DateTime<Local>) -> u64 {
    let target = u64::from(SEEDING_POLICY_HOUR) * 3600;
    let current = u64::from(now.num_seconds_from_midnight());
    if current < target {
        target - current
    } else {
        SECONDS_PER_DAY - current + target
    }
}
