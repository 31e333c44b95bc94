//! Background sweep of expired shares.
//!
//! Best-effort cleanup only: the guarantee that an expired share is never
//! served lives in the lifecycle engine's own access checks. The sweep
//! reuses the engine's purge path and relies on the metadata store's
//! atomicity, so it is safe to run alongside live downloads.

use crate::services::share_service::ShareService;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run the sweep loop forever. Spawn on the runtime; aborts with the
/// process.
pub async fn run_sweep_loop(service: ShareService, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "reaper started");

    loop {
        tokio::time::sleep(interval).await;

        match service.sweep_expired(Utc::now()).await {
            Ok(0) => debug!("reaper sweep found nothing to purge"),
            Ok(purged) => info!(purged, "reaper sweep purged expired shares"),
            Err(err) => warn!(error = %err, "reaper sweep failed"),
        }
    }
}
