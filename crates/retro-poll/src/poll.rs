use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use retro_types::error::AppResult;

/// Result of one pass over the store.
pub enum Attempt<T> {
    /// Something worth returning right away.
    Ready(T),
    /// Nothing new yet. The value is what gets returned if this turns out
    /// to be the last pass before the deadline.
    Empty(T),
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut(T),
    /// The request went away before either of the above.
    Cancelled,
}

/// Run `attempt` until it reports data, the deadline passes, or `cancel`
/// fires.
///
/// Each attempt reads the store afresh. Between attempts the loop sleeps
/// for `interval` (never past the deadline), so the last attempt happens
/// at the deadline itself. Store failures are logged and retried until the
/// deadline; non-transient errors end the poll immediately.
pub async fn poll_until<T, F, Fut>(
    deadline: Instant,
    interval: Duration,
    cancel: &CancellationToken,
    mut attempt: F,
) -> AppResult<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<Attempt<T>>>,
{
    let mut passes: u32 = 0;

    loop {
        passes += 1;

        match attempt().await {
            Ok(Attempt::Ready(value)) => {
                debug!("Long-poll ready after {} pass(es)", passes);
                return Ok(PollOutcome::Ready(value));
            }
            Ok(Attempt::Empty(value)) => {
                if Instant::now() >= deadline {
                    debug!("Long-poll timed out after {} pass(es)", passes);
                    return Ok(PollOutcome::TimedOut(value));
                }
            }
            Err(e) if e.is_transient() => {
                if Instant::now() >= deadline {
                    return Err(e);
                }
                warn!("Long-poll pass {} failed, retrying: {}", passes, e);
            }
            Err(e) => return Err(e),
        }

        let wake = (Instant::now() + interval).min(deadline);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Long-poll cancelled after {} pass(es)", passes);
                return Ok(PollOutcome::Cancelled);
            }
            _ = sleep_until(wake) => {}
        }
    }
}
