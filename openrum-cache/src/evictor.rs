use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use openrum_common::Timestamp;
use openrum_config::CacheConfig;

use crate::cache::BeaconCache;
use crate::eviction::{SpaceEvictionStrategy, TimeEvictionStrategy};

/// The background thread that keeps the cache within its bounds.
///
/// The thread parks on the cache's update signal and wakes at least once per
/// age-check interval. Every wakeup runs the time strategy (self-throttled)
/// and the space strategy (a no-op below the upper memory boundary).
#[derive(Debug)]
pub struct BeaconCacheEvictor {
    cache: Arc<BeaconCache>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BeaconCacheEvictor {
    /// Spawns the evictor thread for the given cache.
    pub fn start(cache: Arc<BeaconCache>, config: CacheConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_cache = Arc::clone(&cache);
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("openrum-cache-evictor".to_owned())
            .spawn(move || {
                let mut time_strategy = TimeEvictionStrategy::new(config);
                let space_strategy = SpaceEvictionStrategy::new(config);

                while !worker_shutdown.load(Ordering::Relaxed) {
                    worker_cache.wait_for_update(config.record_age_check_interval);
                    if worker_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    time_strategy.execute(&worker_cache, Timestamp::now());
                    space_strategy.execute(&worker_cache);
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(error) => {
                tracing::error!(%error, "failed to spawn the cache eviction thread");
                None
            }
        };

        Self {
            cache,
            shutdown,
            handle,
        }
    }

    /// Stops the thread and waits for it to finish.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.cache.notify_update();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("cache eviction thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::record::BeaconKey;

    use super::*;

    #[test]
    fn test_evictor_starts_and_stops() {
        let cache = Arc::new(BeaconCache::new());
        let config = CacheConfig {
            record_age_check_interval: Duration::from_millis(10),
            ..CacheConfig::default()
        };

        let evictor = BeaconCacheEvictor::start(Arc::clone(&cache), config);
        cache.add_event_data(BeaconKey::new(1, 0), Timestamp::now(), "data", 0);
        evictor.stop();
    }

    #[test]
    fn test_evictor_enforces_space_bound() {
        let cache = Arc::new(BeaconCache::new());
        let config = CacheConfig {
            upper_memory_boundary: 100,
            lower_memory_boundary: 50,
            record_age_limit: Duration::from_secs(3_600),
            record_age_check_interval: Duration::from_millis(5),
        };

        let evictor = BeaconCacheEvictor::start(Arc::clone(&cache), config);
        let key = BeaconKey::new(1, 0);
        for _ in 0..30 {
            cache.add_event_data(key, Timestamp::now(), "0123456789", 0);
        }

        // Give the background thread a few intervals to react.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.cache_size_bytes() > 100 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        evictor.stop();

        assert!(cache.cache_size_bytes() <= 100);
    }
}
