//! Scheduled cleanup of expired gateway state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::auth::SecurityGateway;

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// What one cleanup pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: usize,
    pub rate_windows: usize,
    pub csrf_tokens: usize,
    pub refresh_markers: usize,
    pub blocks: usize,
}

/// Run all cleanup tasks once.
pub async fn run_cleanup(gateway: &SecurityGateway) -> CleanupReport {
    let mut report = CleanupReport::default();

    match gateway.sessions.cleanup_expired().await {
        Ok(count) => report.sessions = count,
        Err(e) => error!(error = %e, "Failed to clean up expired sessions"),
    }
    report.rate_windows = gateway.rate_limiter.cleanup_expired();
    report.csrf_tokens = gateway.csrf.cleanup_expired();
    report.refresh_markers = gateway.tokens.cleanup_expired();
    report.blocks = gateway.violations.cleanup_expired();

    if report != CleanupReport::default() {
        info!(
            sessions = report.sessions,
            rate_windows = report.rate_windows,
            csrf_tokens = report.csrf_tokens,
            refresh_markers = report.refresh_markers,
            blocks = report.blocks,
            "Cleaned up expired state"
        );
    }
    report
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(gateway: Arc<SecurityGateway>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&gateway).await;
        }
    })
}
