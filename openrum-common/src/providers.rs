//! Sources of time, thread ids, randomness and session numbers.
//!
//! The agent never reads the clock or the RNG directly. All such inputs come
//! through the narrow traits in this module so that tests can substitute
//! deterministic implementations.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};

use rand::Rng;

use crate::time::Timestamp;

/// Provides the current wall-clock time.
pub trait TimingProvider: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Default timing provider backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemTiming;

impl TimingProvider for SystemTiming {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Provides an identifier for the calling thread.
///
/// The wire protocol transmits thread ids as positive 32-bit integers under
/// the `it` key.
pub trait ThreadIdProvider: Send + Sync {
    /// Returns the id of the calling thread.
    fn thread_id(&self) -> i32;
}

/// Default thread-id provider.
///
/// Rust does not expose a numeric thread id on stable, so the opaque
/// [`std::thread::ThreadId`] is hashed down to a positive 32-bit integer.
/// The value is stable for the lifetime of the thread.
#[derive(Debug, Default)]
pub struct CurrentThreadId;

impl ThreadIdProvider for CurrentThreadId {
    fn thread_id(&self) -> i32 {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() & 0x7fff_ffff) as i32
    }
}

/// Provides the random values the beacon protocol needs.
pub trait RandomProvider: Send + Sync {
    /// Returns a positive, non-zero 63-bit random number.
    ///
    /// Used as the substitute device id when privacy settings forbid sending
    /// the real one.
    fn next_positive_i64(&self) -> i64;

    /// Returns a uniformly distributed value in `[0, 100)`.
    ///
    /// This is the per-session traffic-control value compared against the
    /// server's traffic-control percentage.
    fn next_percentage(&self) -> i32;
}

/// Default random provider backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct DefaultRandom;

impl RandomProvider for DefaultRandom {
    fn next_positive_i64(&self) -> i64 {
        rand::thread_rng().gen_range(1..i64::MAX)
    }

    fn next_percentage(&self) -> i32 {
        rand::thread_rng().gen_range(0..100)
    }
}

/// A random provider returning fixed values, for tests.
#[derive(Debug)]
pub struct FixedRandom {
    value: i64,
    percentage: i32,
}

impl FixedRandom {
    /// Creates a provider that always returns the given values.
    pub fn new(value: i64, percentage: i32) -> Self {
        Self { value, percentage }
    }
}

impl RandomProvider for FixedRandom {
    fn next_positive_i64(&self) -> i64 {
        self.value
    }

    fn next_percentage(&self) -> i32 {
        self.percentage
    }
}

/// Hands out session numbers for one OpenKit instance.
///
/// Session numbers are positive and strictly increasing. The sequence starts
/// at a random positive value so that numbers do not collide across agent
/// restarts, and wraps back to 1 before it would turn non-positive.
#[derive(Debug)]
pub struct SessionIdProvider {
    next: AtomicI32,
}

impl SessionIdProvider {
    /// Creates a provider seeded from the given random source.
    pub fn new(random: &dyn RandomProvider) -> Self {
        let seed = (random.next_positive_i64() % i32::MAX as i64) as i32;
        Self {
            next: AtomicI32::new(seed.max(1)),
        }
    }

    /// Creates a provider starting at the given session number, for tests.
    pub fn starting_at(first: i32) -> Self {
        Self {
            next: AtomicI32::new(first.max(1)),
        }
    }

    /// Returns the next session number.
    pub fn next_session_id(&self) -> i32 {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == i32::MAX { 1 } else { current + 1 })
            })
            .unwrap_or(1)
    }
}
