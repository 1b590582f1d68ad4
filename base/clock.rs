//! Clock abstraction so timer-driven logic can be exercised deterministically
//! in tests without real sleeps.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type Instant = std::time::Instant;

/// A source of monotonic and wall-clock time, plus an async sleep primitive.
///
/// Production code uses [`RealClocks`]; tests use [`SimulatedClocks`] so that
/// a flush policy's hard/soft timers can be made to fire without waiting on
/// a real clock.
pub trait Clocks: Send + Sync + 'static {
    /// A monotonic instant, suitable for measuring elapsed durations.
    fn monotonic(&self) -> Instant;

    /// The current wall-clock time.
    fn realtime(&self) -> jiff::Timestamp;

    /// Sleeps for approximately `dur`, or until a simulated clock is
    /// advanced past that point.
    fn sleep(&self, dur: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;

    /// Maps a millisecond epoch timestamp (as carried on a decoded event)
    /// into this clock's monotonic domain, by offsetting `monotonic()` by
    /// the gap between `timestamp_ms` and the current `realtime()`. Lets
    /// deadline arithmetic that must run on `Instant`s (so it composes with
    /// `sleep`) still be anchored to an event's own timestamp rather than
    /// the instant the batch happened to be processed.
    ///
    /// A timestamp older than the process's monotonic clock can represent
    /// (i.e. predating process start by more than has since elapsed) is
    /// clamped to `monotonic()`, since there is no earlier `Instant` to
    /// return.
    fn instant_for_timestamp_ms(&self, timestamp_ms: i64) -> Instant {
        let now_instant = self.monotonic();
        let now_ms = self.realtime().as_millisecond();
        let diff_ms = now_ms.saturating_sub(timestamp_ms);
        if diff_ms >= 0 {
            now_instant
                .checked_sub(Duration::from_millis(diff_ms as u64))
                .unwrap_or(now_instant)
        } else {
            now_instant + Duration::from_millis(diff_ms.unsigned_abs())
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClocks;

impl Clocks for RealClocks {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn realtime(&self) -> jiff::Timestamp {
        jiff::Timestamp::now()
    }

    fn sleep(&self, dur: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(dur))
    }
}

struct Inner {
    base: Instant,
    epoch: jiff::Timestamp,
    elapsed: parking_lot::Mutex<Duration>,
    notify: tokio::sync::Notify,
}

/// A clock whose notion of time only advances when [`SimulatedClocks::advance`]
/// is called, for deterministic tests of timer-driven code.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<Inner>);

impl SimulatedClocks {
    pub fn new(epoch: jiff::Timestamp) -> Self {
        SimulatedClocks(Arc::new(Inner {
            base: Instant::now(),
            epoch,
            elapsed: parking_lot::Mutex::new(Duration::ZERO),
            notify: tokio::sync::Notify::new(),
        }))
    }

    /// Moves the simulated clock forward, waking any pending sleeps whose
    /// deadlines have now passed.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.0.elapsed.lock();
        *elapsed += by;
        drop(elapsed);
        self.0.notify.notify_waiters();
    }

    fn elapsed(&self) -> Duration {
        *self.0.elapsed.lock()
    }
}

impl Clocks for SimulatedClocks {
    fn monotonic(&self) -> Instant {
        self.0.base + self.elapsed()
    }

    fn realtime(&self) -> jiff::Timestamp {
        let signed = jiff::SignedDuration::try_from(self.elapsed())
            .expect("simulated elapsed duration fits in i64 seconds");
        self.0
            .epoch
            .checked_add(signed)
            .expect("simulated clock did not overflow jiff::Timestamp")
    }

    fn sleep(&self, dur: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let inner = self.0.clone();
        let deadline = self.elapsed() + dur;
        Box::pin(async move {
            loop {
                if *inner.elapsed.lock() >= deadline {
                    return;
                }
                let notified = inner.notify.notified();
                if *inner.elapsed.lock() >= deadline {
                    return;
                }
                notified.await;
            }
        })
    }
}
