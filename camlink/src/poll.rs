//! Timing primitives shared by every polling loop.
//!
//! All waiting in camlink is busy-polling: a non-blocking status check,
//! a short sleep, repeat. The pieces here make that loop explicit:
//!
//! - [`Clock`] supplies "now" and "sleep", so tests can run the retry
//!   state machines on a simulated timeline.
//! - [`PollPolicy`] holds the pause lengths and the hard ceiling for a
//!   single drain.
//! - [`CancelToken`] lets another thread (for example a Ctrl-C handler)
//!   abort a long retry loop at its next poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Source of monotonic time and of sleeping.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Pause the caller for `duration`.
    fn sleep(&self, duration: Duration);

    /// Sleep until `deadline` (no-op if it has already passed).
    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            self.sleep(deadline - now);
        }
    }
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Cooperative cancellation flag.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Return `Err(Error::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Pacing for drain-until-quiet loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between empty status checks while waiting for a response.
    pub interval: Duration,
    /// Sleep after each byte read while draining (hardware turnaround).
    pub byte_pause: Duration,
    /// Hard ceiling on a single drain.
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_micros(200),
            byte_pause: Duration::from_micros(50),
            max_wait: Duration::from_secs(2),
        }
    }
}

impl PollPolicy {
    /// Set the empty-check interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-byte pause.
    #[must_use]
    pub fn with_byte_pause(mut self, byte_pause: Duration) -> Self {
        self.byte_pause = byte_pause;
        self
    }

    /// Set the drain ceiling.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}
