use std::sync::Arc;

use parking_lot::Mutex;

use openrum_cache::{BeaconCache, BeaconCacheEvictor};
use openrum_config::{
    CacheConfig, ConfigError, CrashReportingLevel, DataCollectionLevel, OpenKitConfigBuilder,
    PrivacyConfig, WatchdogConfig,
};

use crate::beacon::Providers;
use crate::http::{HttpClientProvider, ReqwestHttpClientProvider};
use crate::lifecycle::Session;
use crate::worker::{AgentShared, WorkerHandle};

/// The root of the agent: creates sessions and owns the background workers.
///
/// One instance per monitored application. Construction spawns the beacon
/// sender thread and the cache evictor; [`shutdown`](Self::shutdown) (or
/// drop) stops both, draining buffered data within the shutdown timeout.
#[derive(Debug)]
pub struct OpenKit {
    shared: Arc<AgentShared>,
    worker: Mutex<Option<WorkerHandle>>,
    evictor: Mutex<Option<BeaconCacheEvictor>>,
}

impl OpenKit {
    /// Starts building an agent instance.
    ///
    /// `endpoint` is the collector's beacon URL, `application_id` the id
    /// assigned by the collector, and `device_id` a stable identifier of
    /// this installation.
    pub fn builder(
        endpoint: impl Into<String>,
        application_id: impl Into<String>,
        device_id: i64,
    ) -> OpenKitBuilder {
        OpenKitBuilder {
            config: openrum_config::OpenKitConfig::builder(endpoint, application_id, device_id),
            data_collection_level: DataCollectionLevel::UserBehavior,
            crash_reporting_level: CrashReportingLevel::OptInCrashes,
            cache_config: CacheConfig::default(),
            watchdog_config: WatchdogConfig::default(),
            http_provider: None,
            providers: None,
        }
    }

    /// Creates a new session.
    ///
    /// Returns a no-op session once the agent is shutting down.
    pub fn create_session(&self) -> Session {
        self.create_session_inner(None)
    }

    /// Creates a new session with the end user's IP address.
    ///
    /// The address is transmitted under the `ip` key so the collector can
    /// resolve geolocation; it is not interpreted by the agent.
    pub fn create_session_with_ip(&self, client_ip: &str) -> Session {
        self.create_session_inner(Some(client_ip.to_owned()))
    }

    fn create_session_inner(&self, client_ip: Option<String>) -> Session {
        if self.shared.is_shutdown() {
            tracing::warn!("create_session called on a shut-down agent");
            return Session::noop();
        }
        Session::real(self.shared.create_session(client_ip))
    }

    /// Shuts the agent down.
    ///
    /// Open sessions are ended, buffered data gets a final drain attempt
    /// bounded by the shutdown timeout, and both background threads stop.
    /// Idempotent; sessions created afterwards are no-ops.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown(&self.shared);
        } else {
            self.shared.request_shutdown();
        }

        if let Some(evictor) = self.evictor.lock().take() {
            evictor.stop();
        }
    }
}

impl Drop for OpenKit {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`OpenKit`].
pub struct OpenKitBuilder {
    config: OpenKitConfigBuilder,
    data_collection_level: DataCollectionLevel,
    crash_reporting_level: CrashReportingLevel,
    cache_config: CacheConfig,
    watchdog_config: WatchdogConfig,
    http_provider: Option<Box<dyn HttpClientProvider>>,
    providers: Option<Providers>,
}

impl OpenKitBuilder {
    /// Sets the version of the instrumented application.
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.config = self.config.with_application_version(version);
        self
    }

    /// Sets the reported operating system.
    pub fn with_operating_system(mut self, operating_system: impl Into<String>) -> Self {
        self.config = self.config.with_operating_system(operating_system);
        self
    }

    /// Sets the reported device manufacturer.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.config = self.config.with_manufacturer(manufacturer);
        self
    }

    /// Sets the reported device model.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config = self.config.with_model_id(model_id);
        self
    }

    /// Sets how much user-centric data may be captured.
    pub fn with_data_collection_level(mut self, level: DataCollectionLevel) -> Self {
        self.data_collection_level = level;
        self
    }

    /// Sets whether crashes may be reported.
    pub fn with_crash_reporting_level(mut self, level: CrashReportingLevel) -> Self {
        self.crash_reporting_level = level;
        self
    }

    /// Overrides the beacon cache bounds.
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Overrides the worker cadence and shutdown bounds.
    pub fn with_watchdog_config(mut self, config: WatchdogConfig) -> Self {
        self.watchdog_config = config;
        self
    }

    /// Overrides the HTTP client construction, mainly for tests.
    pub fn with_http_client_provider(mut self, provider: Box<dyn HttpClientProvider>) -> Self {
        self.http_provider = Some(provider);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_providers(mut self, providers: Providers) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Validates the configuration and starts the agent.
    pub fn build(self) -> Result<OpenKit, ConfigError> {
        let config = Arc::new(self.config.build()?);
        let privacy = PrivacyConfig::new(self.data_collection_level, self.crash_reporting_level);
        let cache = Arc::new(BeaconCache::new());
        let providers = self.providers.unwrap_or_else(Providers::system);
        let http_provider = self
            .http_provider
            .unwrap_or_else(|| Box::new(ReqwestHttpClientProvider));

        let shared = Arc::new(AgentShared::new(
            config,
            privacy,
            Arc::clone(&cache),
            providers,
            self.watchdog_config,
            http_provider,
        ));

        let worker = WorkerHandle::spawn(Arc::clone(&shared));
        let evictor = BeaconCacheEvictor::start(cache, self.cache_config);

        Ok(OpenKit {
            shared,
            worker: Mutex::new(Some(worker)),
            evictor: Mutex::new(Some(evictor)),
        })
    }
}

impl std::fmt::Debug for OpenKitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenKitBuilder")
            .field("data_collection_level", &self.data_collection_level)
            .field("crash_reporting_level", &self.crash_reporting_level)
            .finish_non_exhaustive()
    }
}
