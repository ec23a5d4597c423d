use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Runs `operation` until it completes or `cancel_token` fires.
///
/// Returns `None` when cancelled; cancellation is not an error and callers
/// are expected to unwind silently.
pub async fn run_cancellable<F>(cancel_token: &CancellationToken, operation: F) -> Option<F::Output>
where
    F: Future,
{
    if cancel_token.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => None,
        result = operation => Some(result),
    }
}

/// Cooperative suspension point: yields to the scheduler, then reports
/// whether the surrounding task should keep going.
pub async fn checkpoint(cancel_token: &CancellationToken) -> bool {
    tokio::task::yield_now().await;
    !cancel_token.is_cancelled()
}
