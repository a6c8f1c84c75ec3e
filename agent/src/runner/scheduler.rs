use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use common::error::Error;
use common::logging::Logger;

use crate::target::Target;

/// Fires `target`'s cron job on its schedule until `cancel` fires.
///
/// Every tick starts its own run, so a slow run never delays the next tick.
/// Runs still in flight at cancellation see the same token and stop with it.
pub async fn run_schedule(target: Arc<Target>, cancel: CancellationToken, log: Logger) {
    let Target::CronJob(job) = &*target else {
        return;
    };
    let config_path = job.config_file_path();
    let mut runs = JoinSet::new();

    loop {
        let Some(delay) = job.schedule().next_delay(Utc::now()) else {
            info!(target: log.target(), "schedule has no further ticks: config-path={}", config_path);
            break;
        };
        if cancel.run_until_cancelled(tokio::time::sleep(delay)).await.is_none() {
            break;
        }

        let target = target.clone();
        let cancel = cancel.clone();
        let log = log.clone();
        runs.spawn(async move {
            let Target::CronJob(job) = &*target else {
                return;
            };
            match job.update(&cancel).await {
                Ok(()) => debug!(target: log.target(), "cron job updated: config-path={}", job.config_file_path()),
                Err(Error::Cancelled) => debug!(target: log.target(), "cron job cancelled: config-path={}", job.config_file_path()),
                Err(err) => error!(target: log.target(), "Failed to update cron job: config-path={} err={}", job.config_file_path(), err),
            }
        });
        while runs.try_join_next().is_some() {}
    }

    while runs.join_next().await.is_some() {}
}
