//! # Token-Bucket Rate Limiter
//!
//! Paces byte-denominated work against a configured rate. The bucket
//! refills continuously at `rate` units per second and may go negative:
//!
//! - [`sleep_for`](RateLimiter::sleep_for) debits and then blocks until
//!   the balance is non-negative again. The writeback thread uses it so a
//!   burst of dirty extents drains at the configured disk rate.
//! - [`borrow`](RateLimiter::borrow) debits without blocking. Fault-in
//!   uses it because a probe must not stall, but should slow the *next*
//!   paced operation down.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct BucketState {
    // May be negative after a borrow.
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// A limiter admitting `rate` units per second, with a burst allowance
    /// of one second's worth.
    pub fn new(rate: f64) -> Self {
        assert!(rate > 0.0, "rate must be positive");
        Self {
            rate,
            burst: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
    }

    /// Debits `amount` tokens and returns how long the caller must wait
    /// for the balance to recover. Does not sleep.
    fn debit(&self, amount: f64) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens -= amount;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate)
        }
    }

    /// Debits `amount` and blocks until the bucket is non-negative.
    pub fn sleep_for(&self, amount: u64) {
        let wait = self.debit(amount as f64);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    /// Debits `amount` without blocking. The deficit is repaid by whoever
    /// calls [`sleep_for`](Self::sleep_for) next.
    pub fn borrow(&self, amount: u64) {
        let _ = self.debit(amount as f64);
    }
}
