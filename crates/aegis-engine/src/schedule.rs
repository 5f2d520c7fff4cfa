//! Periodic list refresh
//!
//! Forced full rebuilds on a fixed interval, through the same single-flight
//! path as user-triggered rebuilds.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::manager::FilterManager;

/// Spawn the auto-update loop. The interval is read from the configuration
/// once, at spawn time; respawn to pick up a changed interval.
pub fn spawn_auto_update(manager: Arc<FilterManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let delay = Duration::from_secs(manager.settings().auto_update_initial_delay_secs);
        let hours = manager.configuration().await.auto_update_interval_hours.max(1);
        let period = Duration::from_secs(u64::from(hours) * 60 * 60);
        log::info!("auto-update every {}h, first run in {}s", hours, delay.as_secs());

        let mut ticker = interval_at(Instant::now() + delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match manager.refresh_filters(true).await {
                Ok(report) => log::info!(
                    "auto-update done: {} rules, {} lists failed",
                    report.compiled_rule_count,
                    report.failed_lists().count()
                ),
                Err(err) => log::error!("auto-update failed: {}", err),
            }
        }
    })
}
