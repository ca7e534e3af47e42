//! Cancellable sleep shared by the retrier and the poller.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Fault;

/// Sleep for `duration` unless `cancel` fires first.
///
/// Cancellation wins ties, so an already-cancelled token never sleeps.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), Fault> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Fault::cancelled("cancelled while waiting")),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
