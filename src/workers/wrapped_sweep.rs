use crate::services::wrapped::WrappedService;

pub async fn run(service: &WrappedService) {
    tracing::debug!("wrapped_sweep: start");
    match service.sweep_expired(service.now()) {
        Ok(count) => tracing::info!(reclaimed = count, "wrapped_sweep: done"),
        Err(e) => tracing::error!(error = %e, "wrapped_sweep failed"),
    }
}
