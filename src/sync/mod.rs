//! # Synchronization Primitives
//!
//! Small shared-concern primitives consumed by the index core:
//!
//! - [`lock_set`]: scoped per-key blocking locks, used to allow exactly one
//!   in-flight fault-in per extent without serializing unrelated extents.
//! - [`rate_limit`]: a token-bucket rate limiter, used to pace extent
//!   writeback and debit extent prefetch.

pub mod lock_set;
pub mod rate_limit;

pub use lock_set::{LockSet, LockSetGuard};
pub use rate_limit::RateLimiter;
