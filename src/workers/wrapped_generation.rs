use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::WORKER_TIMEOUT;
use crate::services::wrapped::{GenerationReport, WrappedService};
use crate::wrapped::WrappedError;

/// One batch run for the calendar day of `now`, bounded by the worker timeout.
pub async fn run_once(service: &WrappedService, now: DateTime<Utc>) -> Option<GenerationReport> {
    tracing::debug!("wrapped_generation: start");
    match tokio::time::timeout(WORKER_TIMEOUT, service.generate_all(now)).await {
        Ok(Ok(report)) => {
            tracing::info!(
                date = %report.date,
                generated = report.generated,
                failed = report.failed,
                "wrapped_generation: done"
            );
            Some(report)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "wrapped_generation failed");
            None
        }
        Err(_) => {
            tracing::error!(
                timeout_secs = WORKER_TIMEOUT.as_secs(),
                "wrapped_generation timed out"
            );
            None
        }
    }
}

/// Sleep until each next local `hour:minute`, generate, repeat.
///
/// Returns `Ok(())` on shutdown. A `ClockError` ends the loop: generation at
/// a wrong instant is worse than none.
pub async fn run_daily(
    service: WrappedService,
    hour: u32,
    minute: u32,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), WrappedError> {
    let mut after = service.now();
    loop {
        let next = service
            .clock()
            .next_daily_run_after(after, hour, minute)?;
        let wait = (next - service.now()).to_std().unwrap_or_default();
        tracing::info!(next_run = %next, wait_secs = wait.as_secs(), "wrapped_generation: scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown_rx.recv() => {
                tracing::info!("wrapped_generation: shutdown");
                return Ok(());
            }
        }

        run_once(&service, service.now()).await;
        after = next;
    }
}
