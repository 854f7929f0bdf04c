//! Wall-clock scheduling primitives.
//!
//! The host has no battery-backed RTC and its clock may be stepped at any
//! moment by a time sync (see [`crate::timesync`]). Everything that sleeps to
//! an *absolute* wall time therefore re-reads the clock in bounded slices
//! instead of trusting a single computed delay.

use std::future::Future;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Longest uninterrupted sleep; a wall-clock step is noticed within this much.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Current wall-clock time, UTC.
pub fn wall_now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// RFC 3339 rendering used in every outbound JSON message.
pub fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

/// Sleep until the given absolute wall time.
///
/// Returns immediately if the target is already in the past. If the system
/// clock is stepped while sleeping, the remaining delay is recomputed from
/// the new wall time, in either direction.
pub async fn sleep_until_wall(target: OffsetDateTime) {
    loop {
        let remaining = target - wall_now();
        let Ok(remaining) = Duration::try_from(remaining) else {
            // Negative: the target is due (or the clock jumped past it).
            return;
        };
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining.min(MAX_SLEEP_SLICE)).await;
    }
}

/// Handle to a scheduled task; cancelling is idempotent.
#[derive(Debug)]
pub struct TimerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `f` once at the given absolute wall time.
pub fn schedule_at<F, Fut>(target: OffsetDateTime, f: F) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    TimerHandle {
        task: tokio::spawn(async move {
            sleep_until_wall(target).await;
            f().await;
        }),
    }
}

/// Run `f` every `period`, first firing one period from now.
///
/// Ticks missed while a previous invocation was still running are delayed,
/// not burst, so slow handlers never pile up.
pub fn every<F, Fut>(period: Duration, mut f: F) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    TimerHandle {
        task: tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let _ = interval.tick().await;
                f().await;
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn sleep_until_past_target_returns_immediately() {
        let before = std::time::Instant::now();
        sleep_until_wall(wall_now() - time::Duration::seconds(5)).await;
        assert!(before.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sleep_until_short_future_target() {
        let target = wall_now() + time::Duration::milliseconds(150);
        sleep_until_wall(target).await;
        assert!(wall_now() >= target);
    }

    #[tokio::test]
    async fn every_fires_and_cancels() {
        let count = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&count);
        let timer = every(Duration::from_millis(20), move || {
            let counted = Arc::clone(&counted);
            async move {
                let _ = counted.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(110)).await;
        timer.cancel();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least 2 ticks, got {seen}");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen, "timer kept firing after cancel");
    }
}
