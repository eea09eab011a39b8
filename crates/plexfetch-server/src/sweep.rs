use std::time::Duration;

use tracing::{debug, warn};

use plexfetch_api::session::SessionAuthority;

/// Background task that deletes expired sessions.
///
/// Runs on an interval; the first sweep happens right at startup.
pub async fn run_sweep_loop(sessions: SessionAuthority, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let authority = sessions.clone();
        match tokio::task::spawn_blocking(move || authority.sweep_expired()).await {
            Ok(Ok(count)) => debug!("Session sweep removed {}", count),
            Ok(Err(e)) => warn!("Session sweep error: {}", e),
            Err(e) => warn!("Session sweep task failed: {}", e),
        }
    }
}
