//! Single-fire session timer.
//!
//! A session has at most one armed timer: the offer timer while it waits
//! for a REQUEST, then the lease timer once active. Arming always replaces
//! whatever was armed before, and a timer disarms itself when it fires.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// Which timeout a session is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Offer,
    Lease,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offer => f.write_str("offer"),
            Self::Lease => f.write_str("lease"),
        }
    }
}

#[derive(Debug)]
struct Armed {
    kind: TimerKind,
    period: Duration,
    sleep: Pin<Box<Sleep>>,
}

#[derive(Debug, Default)]
pub struct SessionTimer {
    armed: Option<Armed>,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `kind` to fire after `period`, cancelling any armed timer.
    pub fn arm(&mut self, kind: TimerKind, period: Duration) {
        self.armed = Some(Armed {
            kind,
            period,
            sleep: Box::pin(sleep(period)),
        });
    }

    /// Cancels the armed timer. Cancelling an idle timer is a no-op.
    pub fn cancel(&mut self) -> Option<TimerKind> {
        self.armed.take().map(|armed| armed.kind)
    }

    pub fn armed(&self) -> Option<TimerKind> {
        self.armed.as_ref().map(|armed| armed.kind)
    }

    pub fn period(&self) -> Option<Duration> {
        self.armed.as_ref().map(|armed| armed.period)
    }

    /// Completes when the armed timer fires, disarming it.
    ///
    /// Never completes while nothing is armed. Cancel safe: dropping the
    /// future leaves the timer armed.
    pub async fn expired(&mut self) -> TimerKind {
        let Some(armed) = self.armed.as_mut() else {
            return std::future::pending().await;
        };
        armed.sleep.as_mut().await;
        let kind = armed.kind;
        self.armed = None;
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_period() {
        let mut timer = SessionTimer::new();
        let started = Instant::now();
        timer.arm(TimerKind::Offer, Duration::from_millis(3000));

        assert_eq!(timer.expired().await, TimerKind::Offer);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(3100));
        assert_eq!(timer.armed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let mut timer = SessionTimer::new();
        let started = Instant::now();
        timer.arm(TimerKind::Offer, Duration::from_millis(3000));
        timer.arm(TimerKind::Lease, Duration::from_millis(660_000));

        assert_eq!(timer.armed(), Some(TimerKind::Lease));
        assert_eq!(timer.period(), Some(Duration::from_millis(660_000)));
        assert_eq!(timer.expired().await, TimerKind::Lease);
        assert!(started.elapsed() >= Duration::from_millis(660_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let mut timer = SessionTimer::new();
        timer.arm(TimerKind::Offer, Duration::from_secs(3));

        assert_eq!(timer.cancel(), Some(TimerKind::Offer));
        assert_eq!(timer.cancel(), None);

        let fired = tokio::time::timeout(Duration::from_secs(10), timer.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_keeps_timer_armed() {
        let mut timer = SessionTimer::new();
        timer.arm(TimerKind::Offer, Duration::from_secs(3));

        let early = tokio::time::timeout(Duration::from_secs(1), timer.expired()).await;
        assert!(early.is_err());
        assert_eq!(timer.armed(), Some(TimerKind::Offer));
        assert_eq!(timer.expired().await, TimerKind::Offer);
    }
}
