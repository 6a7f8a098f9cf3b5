//! Rate limiting module
//!
//! Fixed-window request counting over an in-memory counter store:
//!
//! - **CounterStore**: per-key counters with expiry and atomic check-and-increment
//! - **Sweeper**: lazily started background task deleting expired counters
//! - **RateLimiter**: applies a [`Policy`] to a `bucket:identifier` key
//!
//! Counters live only in process memory. A horizontally scaled deployment
//! needs a shared [`CounterStore`] implementation instead of [`MemoryStore`].
//!
//! # Example
//!
//! ```rust
//! use admission::rate_limit::{PolicyPreset, RateLimiter};
//!
//! let limiter = RateLimiter::in_memory();
//! let policy = PolicyPreset::Auth.policy();
//!
//! let result = limiter
//!     .check_and_consume("203.0.113.5", "auth", &policy)
//!     .unwrap();
//! assert!(result.allowed);
//! assert_eq!(result.remaining, policy.max_requests - 1);
//! ```

pub mod clock;
pub mod limiter;
pub mod store;
pub mod sweeper;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{RateLimiter, DEFAULT_SWEEP_INTERVAL};
pub use store::{CounterStore, MemoryStore};
pub use sweeper::Sweeper;
pub use types::{counter_key, CounterEntry, CounterHit, GuardResult, Policy, PolicyPreset};
