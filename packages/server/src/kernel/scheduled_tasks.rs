//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! - Session health sweep (reclaims sessions whose transport died silently)
//! - OTP expiry sweep
//!
//! A failing run is logged and the next tick runs as usual.

use std::time::Duration;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::otp::OtpService;
use crate::domains::sessions::HealthMonitor;

/// Start all scheduled tasks
pub async fn start_scheduler(
    health: HealthMonitor,
    otp: OtpService,
    health_interval: Duration,
    otp_sweep_interval: Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let health_job = Job::new_repeated_async(health_interval, move |_uuid, _lock| {
        let health = health.clone();
        Box::pin(async move {
            let report = health.sweep().await;
            tracing::debug!(?report, "Session health sweep complete");
        })
    })?;
    scheduler.add(health_job).await?;

    let otp_job = Job::new_repeated_async(otp_sweep_interval, move |_uuid, _lock| {
        let otp = otp.clone();
        Box::pin(async move {
            if let Err(e) = otp.sweep_expired().await {
                tracing::error!("OTP expiry sweep failed: {}", e);
            }
        })
    })?;
    scheduler.add(otp_job).await?;

    scheduler.start().await?;

    tracing::info!(
        "Scheduled tasks started (session health every {:?}, OTP expiry every {:?})",
        health_interval,
        otp_sweep_interval
    );
    Ok(scheduler)
}
