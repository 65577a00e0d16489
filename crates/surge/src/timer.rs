use core::{pin::Pin, time::Duration};
use tokio::time::{Instant, Sleep, sleep_until};

// Roughly 30 years, matching what tokio substitutes for unrepresentable
// deadlines.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A resettable one-period timer shared by the dispatcher and workers.
///
/// The dispatcher uses it as its scale-up ticker and every worker uses it as
/// its idle timer. Both go through [`Countdown::rearm`], so neither can ever
/// observe a tick left over from a previous period.
///
/// An elapsed tokio [`Sleep`] stays ready until it is reset, which is the same
/// hazard as an unread tick sitting in a timer channel: the next wait would
/// fire immediately. `rearm` is the only way to start a new period.
pub(crate) struct Countdown {
    period: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl Countdown {
    /// Arms a new countdown that fires once `period` has elapsed.
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            sleep: Box::pin(sleep_until(deadline(period))),
        }
    }

    /// Resolves when the current period has elapsed.
    ///
    /// Cancel safe: dropping the returned future leaves the deadline intact.
    pub(crate) async fn fired(&mut self) {
        self.sleep.as_mut().await;
    }

    #[cfg(test)]
    fn is_elapsed(&self) -> bool {
        self.sleep.is_elapsed()
    }

    /// Stops the current period, discards a pending expiry and starts a full
    /// new period from now.
    pub(crate) fn rearm(&mut self) {
        self.sleep.as_mut().reset(deadline(self.period));
    }
}

fn deadline(period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(period).unwrap_or_else(|| now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn fires_after_period() {
        let mut countdown = Countdown::new(Duration::from_millis(50));
        assert!(!countdown.is_elapsed());

        advance(Duration::from_millis(49)).await;
        assert!(!countdown.is_elapsed());

        countdown.fired().await;
        assert!(countdown.is_elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_discards_pending_expiry() {
        let mut countdown = Countdown::new(Duration::from_millis(10));
        countdown.fired().await;
        assert!(countdown.is_elapsed());

        // Without a rearm the elapsed timer is immediately ready again.
        timeout(Duration::ZERO, countdown.fired())
            .await
            .expect("elapsed countdown should still be ready");

        countdown.rearm();
        assert!(!countdown.is_elapsed());
        assert!(
            timeout(Duration::from_millis(9), countdown.fired())
                .await
                .is_err(),
            "rearmed countdown fired early"
        );
        countdown.fired().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_keeps_deadline() {
        let mut countdown = Countdown::new(Duration::from_millis(30));
        assert!(
            timeout(Duration::from_millis(20), countdown.fired())
                .await
                .is_err()
        );

        let start = Instant::now();
        countdown.fired().await;
        assert!(start.elapsed() <= Duration::from_millis(15));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_period_does_not_overflow() {
        let countdown = Countdown::new(Duration::MAX);
        assert!(!countdown.is_elapsed());
    }
}
