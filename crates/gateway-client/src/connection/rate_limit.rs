//! Outbound rate limiting
//!
//! A fixed budget of sends per window. The window starts with the first send after a
//! reset, so an idle client never carries a half-spent window around.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Lock-free outbound budget shared by every sender
#[derive(Debug)]
pub struct RateLimiter {
    capacity: i64,
    window: Duration,
    remaining: AtomicI64,
    /// End of the current window, in nanoseconds since `origin`; zero until armed
    reset_at: AtomicU64,
    origin: Instant,
    resets: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter allowing `capacity` sends per `window`
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = i64::from(capacity.max(1));
        Self {
            capacity,
            window,
            remaining: AtomicI64::new(capacity),
            reset_at: AtomicU64::new(0),
            origin: Instant::now(),
            resets: AtomicU64::new(0),
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn window_nanos(&self) -> u64 {
        u64::try_from(self.window.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Wait until a send is allowed and consume it
    ///
    /// Cancel-safe: dropping the future while it waits gives nothing back, the slot it
    /// decremented is recovered by the next window reset.
    pub async fn acquire(&self) {
        loop {
            let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;

            // First send of a fresh window arms its end
            if remaining == self.capacity - 1 {
                let reset_at = self.elapsed_nanos().saturating_add(self.window_nanos());
                self.reset_at.store(reset_at, Ordering::Release);
            }

            if remaining >= 0 {
                return;
            }

            let window_end = self.reset_at.load(Ordering::Acquire);
            let now = self.elapsed_nanos();
            if window_end > now {
                let wait = Duration::from_nanos(window_end - now);
                trace!(wait_ms = wait.as_millis(), "Outbound budget exhausted, waiting");
                tokio::time::sleep(wait).await;
            }

            // Only the caller whose observation is still current resets, and only while
            // the window it observed is still the armed one.
            if self.reset_at.load(Ordering::Acquire) == window_end
                && self
                    .remaining
                    .compare_exchange(remaining, self.capacity, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.resets.fetch_add(1, Ordering::Relaxed);
                debug!(capacity = self.capacity, "Outbound window reset");
            }
        }
    }

    /// Sends left in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        u32::try_from(self.remaining.load(Ordering::Acquire).max(0)).unwrap_or(u32::MAX)
    }

    /// Number of window resets performed so far
    #[must_use]
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
}
