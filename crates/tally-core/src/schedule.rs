//! Cancellable periodic tasks.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Runs `task` every `period` until `cancel` fires.
///
/// The first run happens one full period after the call. A run that is in
/// progress when cancellation arrives completes; no new run starts after it.
/// Slow runs push later ticks back instead of bursting to catch up.
///
/// A zero period is treated as one millisecond.
pub async fn run_every<F, Fut>(period: Duration, cancel: &CancellationToken, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                task().await;
            }
        }
    }
}
