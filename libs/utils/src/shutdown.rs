//! Process-wide cancellation scope (spec.md §5 "Cancellation and timeouts").
//!
//! Every listener derives a child [`tokio_util::sync::CancellationToken`] from the
//! value returned by [`root`]; every accepted connection derives a further child.
//! Cancelling a parent cancels all descendants automatically (that's the whole point of
//! `CancellationToken`'s child-token API), so the proxies never need to track
//! connection lists by hand just to shut them down.

use tokio_util::sync::CancellationToken;

/// Builds the process-wide cancellation root and arranges for it to fire on
/// `SIGTERM`/`SIGINT`. Call once from `main`.
pub fn root() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        }
        signal_token.cancel();
    });
    token
}

/// Waits for `token` to be cancelled, then gives outstanding work `grace` to finish
/// before returning, logging if the deadline was hit (spec.md §7 "Graceful-shutdown
/// timeout").
pub async fn wait_with_grace(token: &CancellationToken, grace: std::time::Duration, drained: impl std::future::Future<Output = ()>) {
    token.cancelled().await;
    if tokio::time::timeout(grace, drained).await.is_err() {
        tracing::warn!("graceful shutdown deadline ({grace:?}) exceeded; some connections may be aborted");
    }
}
