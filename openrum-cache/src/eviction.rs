use openrum_common::Timestamp;
use openrum_config::CacheConfig;

use crate::cache::BeaconCache;

/// Evicts records that outlived the configured age limit.
///
/// The strategy throttles itself to the configured check interval, so it can
/// be invoked on every evictor wakeup regardless of what triggered the
/// wakeup.
#[derive(Debug)]
pub struct TimeEvictionStrategy {
    config: CacheConfig,
    last_run: Option<Timestamp>,
}

impl TimeEvictionStrategy {
    /// Creates the strategy from the cache bounds.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            last_run: None,
        }
    }

    /// Runs an eviction pass if the check interval elapsed.
    pub fn execute(&mut self, cache: &BeaconCache, now: Timestamp) {
        let due = match self.last_run {
            Some(last) => now.duration_since(last) >= self.config.record_age_check_interval,
            None => true,
        };
        if !due {
            return;
        }
        self.last_run = Some(now);

        let min_timestamp = Timestamp::from_millis(
            now.as_millis() - self.config.record_age_limit.as_millis() as i64,
        );
        let evicted = cache.evict_records_by_age(min_timestamp);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted records older than the age limit");
        }
    }
}

/// Shrinks the cache below the lower memory boundary once it outgrows the
/// upper one.
///
/// Eviction removes the oldest record of every entry in turn until the
/// boundary is met, so all sessions shed load evenly instead of the busiest
/// one being wiped alone.
#[derive(Debug)]
pub struct SpaceEvictionStrategy {
    config: CacheConfig,
}

impl SpaceEvictionStrategy {
    /// Creates the strategy from the cache bounds.
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Runs an eviction pass if the cache exceeds the upper boundary.
    pub fn execute(&self, cache: &BeaconCache) {
        if cache.cache_size_bytes() <= self.config.upper_memory_boundary {
            return;
        }

        let before = cache.cache_size_bytes();
        let mut evicted = 0;
        while cache.cache_size_bytes() > self.config.lower_memory_boundary {
            let mut progress = false;
            for key in cache.beacon_keys() {
                let removed = cache.evict_records_by_number(key, 1);
                evicted += removed;
                progress |= removed > 0;
                if cache.cache_size_bytes() <= self.config.lower_memory_boundary {
                    break;
                }
            }
            if !progress {
                // Nothing evictable is left; the rest is staged for sending.
                break;
            }
        }

        tracing::debug!(
            evicted,
            from_bytes = before,
            to_bytes = cache.cache_size_bytes(),
            "evicted records to respect the memory boundary"
        );
    }
}
