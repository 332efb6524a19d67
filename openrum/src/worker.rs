//! The background worker: sender loop and session watchdog in one thread.
//!
//! The worker performs the initial new-session request with exponential
//! backoff, then ticks on a fixed cadence. Every tick it splits sessions
//! past their idle timeout or maximum duration, drains ended sessions,
//! ships open sessions' data once the server's send interval elapsed, and
//! merges configuration updates carried by collector responses. All HTTP
//! I/O of the agent happens here; the public API never blocks on the
//! network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use parking_lot::{Condvar, Mutex};

use openrum_cache::BeaconCache;
use openrum_common::SessionIdProvider;
use openrum_config::{
    HttpClientConfig, OpenKitConfig, PrivacyConfig, ServerConfig, WatchdogConfig,
};
use openrum_protocol::ResponseAttributes;

use crate::beacon::Providers;
use crate::http::{HttpClient, HttpClientProvider};
use crate::lifecycle::{SessionCreator, SessionInner, SessionProxy};

/// State shared between the public API, the worker thread and shutdown.
pub(crate) struct AgentShared {
    pub config: Arc<OpenKitConfig>,
    pub privacy: PrivacyConfig,
    pub server_config: Arc<ArcSwap<ServerConfig>>,
    /// Set once the collector answered the first status request. Sessions
    /// are only split after that, matching the rule that only
    /// server-configured sessions are watched.
    pub server_config_initialized: AtomicBool,
    pub cache: Arc<BeaconCache>,
    pub providers: Providers,
    pub watchdog: WatchdogConfig,
    pub http_provider: Box<dyn HttpClientProvider>,
    pub session_ids: SessionIdProvider,
    sessions: Mutex<Vec<Arc<SessionProxy>>>,
    shutdown: AtomicBool,
    worker_done: AtomicBool,
    wake_lock: Mutex<()>,
    wake_signal: Condvar,
}

impl AgentShared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<OpenKitConfig>,
        privacy: PrivacyConfig,
        cache: Arc<BeaconCache>,
        providers: Providers,
        watchdog: WatchdogConfig,
        http_provider: Box<dyn HttpClientProvider>,
    ) -> Self {
        let session_ids = SessionIdProvider::new(providers.random.as_ref());
        Self {
            config,
            privacy,
            server_config: Arc::new(ArcSwap::from_pointee(ServerConfig::default())),
            server_config_initialized: AtomicBool::new(false),
            cache,
            providers,
            watchdog,
            http_provider,
            session_ids,
            sessions: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            worker_done: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_signal: Condvar::new(),
        }
    }

    /// Creates and registers a new session proxy.
    pub fn create_session(self: &Arc<Self>, client_ip: Option<String>) -> Arc<SessionProxy> {
        let creator = SessionCreator {
            config: Arc::clone(&self.config),
            privacy: self.privacy,
            server_config: Arc::clone(&self.server_config),
            cache: Arc::clone(&self.cache),
            providers: self.providers.clone(),
            session_number: self.session_ids.next_session_id(),
            client_ip,
            substitute_device_id: self.providers.random.next_positive_i64(),
        };

        let proxy = SessionProxy::new(creator);
        self.sessions.lock().push(Arc::clone(&proxy));
        self.wake();
        proxy
    }

    pub fn sessions(&self) -> Vec<Arc<SessionProxy>> {
        self.sessions.lock().clone()
    }

    fn prune_sessions(&self) {
        self.sessions.lock().retain(|proxy| !proxy.is_fully_finished());
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake();
    }

    fn wake(&self) {
        self.wake_signal.notify_all();
    }

    /// Sleeps until woken or the timeout elapses.
    fn sleep(&self, timeout: Duration) {
        let mut guard = self.wake_lock.lock();
        self.wake_signal.wait_for(&mut guard, timeout);
    }

    /// A fresh HTTP client addressing the currently configured server id.
    fn http_client(&self) -> Box<dyn HttpClient> {
        let server = self.server_config.load();
        let config = HttpClientConfig::new(
            self.config.endpoint().clone(),
            self.config.application_id(),
            server.server_id,
        );
        self.http_provider.create_client(&config)
    }

    /// Merges response attributes over the current server configuration.
    pub fn apply_response_attributes(&self, attributes: &ResponseAttributes) {
        if attributes.is_empty() {
            return;
        }
        let merged = self.server_config.load().merge(attributes);
        self.server_config.store(Arc::new(merged));
    }

    /// Blocks until the worker reported completion or the timeout elapsed.
    ///
    /// Returns whether the worker finished in time.
    fn wait_for_worker(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.wake_lock.lock();
        while !self.worker_done.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.wake_signal.wait_for(&mut guard, deadline - now);
        }
        self.worker_done.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AgentShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentShared")
            .field("application_id", &self.config.application_id())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

/// Handle to the spawned worker thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns the worker for the given shared state.
    pub fn spawn(shared: Arc<AgentShared>) -> Self {
        let thread = std::thread::Builder::new()
            .name("openrum-beacon-sender".to_owned())
            .spawn(move || {
                run(&shared);
                shared.worker_done.store(true, Ordering::Relaxed);
                shared.wake();
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(error) => {
                tracing::error!(%error, "failed to spawn the beacon sender thread");
                None
            }
        };

        Self { thread }
    }

    /// Requests shutdown and waits up to the configured timeout for the
    /// worker to drain. A worker that does not finish in time is detached.
    pub fn shutdown(mut self, shared: &AgentShared) {
        shared.request_shutdown();

        let Some(thread) = self.thread.take() else {
            return;
        };

        if shared.wait_for_worker(shared.watchdog.shutdown_timeout) {
            if thread.join().is_err() {
                tracing::error!("beacon sender thread panicked");
            }
        } else {
            tracing::warn!("beacon sender did not drain in time, detaching");
        }
    }
}

fn run(shared: &Arc<AgentShared>) {
    initial_status_request(shared);

    let mut last_open_send = Instant::now();
    while !shared.is_shutdown() {
        shared.sleep(shared.watchdog.tick_interval);
        if shared.is_shutdown() {
            break;
        }
        tick(shared, &mut last_open_send);
    }

    final_drain(shared);
}

/// How long the first retry of the new-session request waits.
const STATUS_RETRY_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Fetches the initial server configuration, retrying with backoff.
///
/// The first attempt goes out immediately; every retry waits 50% longer than
/// the previous one, capped at the configured maximum interval, until the
/// collector answers or shutdown is requested.
fn initial_status_request(shared: &Arc<AgentShared>) {
    let mut retry_delays = ExponentialBackoffBuilder::new()
        .with_initial_interval(STATUS_RETRY_INITIAL_INTERVAL)
        .with_multiplier(1.5)
        .with_randomization_factor(0.0)
        .with_max_interval(shared.watchdog.status_retry_max_interval)
        .with_max_elapsed_time(None)
        .build();

    for attempt in 0u32.. {
        if shared.is_shutdown() {
            return;
        }
        if attempt > 0 {
            let delay = retry_delays
                .next_backoff()
                .unwrap_or(shared.watchdog.status_retry_max_interval);
            shared.sleep(delay);
            if shared.is_shutdown() {
                return;
            }
        }

        let client = shared.http_client();
        match client.send_status_request() {
            Ok(response) if !response.is_erroneous() => {
                shared.apply_response_attributes(&response.attributes);
                shared
                    .server_config_initialized
                    .store(true, Ordering::Relaxed);
                tracing::debug!(attempt, "received initial server configuration");
                return;
            }
            Ok(response) => {
                tracing::debug!(
                    status = response.status_code,
                    "status request rejected, retrying"
                );
            }
            Err(error) => {
                tracing::debug!(%error, "status request failed, retrying");
            }
        }
    }
}

fn tick(shared: &Arc<AgentShared>, last_open_send: &mut Instant) {
    let server = shared.server_config.load_full();
    let proxies = shared.sessions();

    // An authoritative capture-off drops everything that is buffered.
    if !server.is_sending_data_allowed() {
        for proxy in &proxies {
            for session in proxy.all_sessions() {
                session.beacon().clear_data();
            }
        }
        shared.prune_sessions();
        return;
    }

    // Split sessions past their deadlines, but only once the collector has
    // actually configured us.
    if shared.server_config_initialized.load(Ordering::Relaxed) {
        let now = shared.providers.timing.now();
        for proxy in &proxies {
            proxy.check_split(now, &server);
        }
    }

    // Finalize ended sessions: drain their remaining data, then delete the
    // cache entry.
    for proxy in &proxies {
        for session in proxy.sessions_to_finish() {
            drain_session(shared, &session);
            if session.beacon().is_empty() {
                session.beacon().clear_data();
                session.mark_finished();
                proxy.retire(&session);
            }
        }
    }
    shared.prune_sessions();

    // Ship open sessions' data on the server-configured interval.
    if last_open_send.elapsed() >= server.send_interval {
        for proxy in &shared.sessions() {
            let session = proxy.current_session();
            if !proxy.is_fully_finished() {
                drain_session(shared, &session);
            }
        }
        *last_open_send = Instant::now();
    }
}

fn drain_session(shared: &Arc<AgentShared>, session: &Arc<SessionInner>) {
    let client = shared.http_client();
    if let Some(response) = session.beacon().send(client.as_ref()) {
        shared.apply_response_attributes(&response.attributes);
    }
}

/// Terminal drain on shutdown: end every session and attempt one last send.
fn final_drain(shared: &Arc<AgentShared>) {
    let proxies = shared.sessions();
    for proxy in &proxies {
        proxy.end();
    }

    for proxy in &proxies {
        for session in proxy.sessions_to_finish() {
            drain_session(shared, &session);
            session.beacon().clear_data();
            session.mark_finished();
            proxy.retire(&session);
        }
    }
    shared.prune_sessions();
}

#[cfg(test)]
mod tests {
    use openrum_config::{CrashReportingLevel, DataCollectionLevel};
    use similar_asserts::assert_eq;

    use crate::beacon::testutil::{test_providers, RecordingHttpClient, SettableTiming};
    use crate::http::{HttpError, StatusResponse};

    use super::*;

    /// A provider handing out one shared recording client.
    struct SharedClientProvider(Arc<RecordingHttpClient>);

    impl HttpClientProvider for SharedClientProvider {
        fn create_client(&self, _config: &HttpClientConfig) -> Box<dyn HttpClient> {
            Box::new(SharedClient(Arc::clone(&self.0)))
        }
    }

    struct SharedClient(Arc<RecordingHttpClient>);

    impl HttpClient for SharedClient {
        fn send_status_request(&self) -> Result<StatusResponse, HttpError> {
            self.0.send_status_request()
        }

        fn send_beacon_request(
            &self,
            client_ip: Option<&str>,
            payload: &[u8],
        ) -> Result<StatusResponse, HttpError> {
            self.0.send_beacon_request(client_ip, payload)
        }
    }

    fn shared_with_client(
        client: Arc<RecordingHttpClient>,
    ) -> (Arc<AgentShared>, Arc<SettableTiming>) {
        let timing = SettableTiming::at(1_000);
        let config = Arc::new(
            OpenKitConfig::builder("https://collector.example.com/mbeacon", "APP", 42)
                .build()
                .unwrap(),
        );
        let shared = Arc::new(AgentShared::new(
            config,
            PrivacyConfig::new(
                DataCollectionLevel::UserBehavior,
                CrashReportingLevel::OptInCrashes,
            ),
            Arc::new(BeaconCache::new()),
            test_providers(Arc::clone(&timing)),
            WatchdogConfig {
                tick_interval: Duration::from_millis(10),
                ..WatchdogConfig::default()
            },
            Box::new(SharedClientProvider(client)),
        ));
        (shared, timing)
    }

    fn ok_response(attributes: ResponseAttributes) -> Result<StatusResponse, HttpError> {
        Ok(StatusResponse {
            status_code: 200,
            attributes,
        })
    }

    #[test]
    fn test_initial_status_request_applies_config() {
        let client = Arc::new(RecordingHttpClient::with_responses([ok_response(
            ResponseAttributes {
                server_id: Some(7),
                traffic_control_percentage: Some(50),
                ..Default::default()
            },
        )]));
        let (shared, _timing) = shared_with_client(client);

        initial_status_request(&shared);
        assert!(shared.server_config_initialized.load(Ordering::Relaxed));
        let server = shared.server_config.load();
        assert_eq!(server.server_id, 7);
        assert_eq!(server.traffic_control_percentage, 50);
    }

    #[test]
    fn test_tick_drains_finished_sessions() {
        let client = Arc::new(RecordingHttpClient::ok());
        let (shared, _timing) = shared_with_client(Arc::clone(&client));

        let proxy = shared.create_session(None);
        proxy.enter_action("Home").unwrap().leave();
        proxy.end();

        let mut last_send = Instant::now();
        tick(&shared, &mut last_send);

        assert!(!client.payloads().is_empty());
        assert!(shared.sessions().is_empty());
        assert_eq!(shared.cache.beacon_keys().len(), 0);
    }

    #[test]
    fn test_tick_keeps_session_on_transport_error() {
        let client = Arc::new(RecordingHttpClient::with_responses([Ok(StatusResponse {
            status_code: 503,
            attributes: ResponseAttributes::default(),
        })]));
        let (shared, _timing) = shared_with_client(Arc::clone(&client));

        let proxy = shared.create_session(None);
        proxy.end();

        let mut last_send = Instant::now();
        tick(&shared, &mut last_send);

        // The chunk was rejected, so the session is still registered and its
        // data still buffered.
        assert_eq!(shared.sessions().len(), 1);
        assert!(!shared.cache.is_empty(proxy.current_session().beacon().key()));

        // The next tick succeeds and retires the session.
        tick(&shared, &mut last_send);
        assert!(shared.sessions().is_empty());
    }

    #[test]
    fn test_capture_off_clears_buffered_data() {
        let client = Arc::new(RecordingHttpClient::ok());
        let (shared, _timing) = shared_with_client(Arc::clone(&client));

        let proxy = shared.create_session(None);
        proxy.enter_action("Home").unwrap().leave();
        shared.apply_response_attributes(&ResponseAttributes {
            capture: Some(false),
            ..Default::default()
        });

        let mut last_send = Instant::now();
        tick(&shared, &mut last_send);

        assert!(client.payloads().is_empty());
        assert!(shared.cache.beacon_keys().is_empty());
    }

    #[test]
    fn test_config_merge_from_beacon_response() {
        let client = Arc::new(RecordingHttpClient::with_responses([ok_response(
            ResponseAttributes {
                beacon_size_bytes: Some(64_000),
                ..Default::default()
            },
        )]));
        let (shared, _timing) = shared_with_client(client);

        let proxy = shared.create_session(None);
        proxy.end();
        let mut last_send = Instant::now();
        tick(&shared, &mut last_send);

        assert_eq!(shared.server_config.load().beacon_size_bytes, 64_000);
    }

    #[test]
    fn test_final_drain_ends_open_sessions() {
        let client = Arc::new(RecordingHttpClient::ok());
        let (shared, _timing) = shared_with_client(Arc::clone(&client));

        let proxy = shared.create_session(None);
        proxy.enter_action("Open").unwrap();
        final_drain(&shared);

        assert!(shared.sessions().is_empty());
        let sent = client.payloads().join("&");
        assert!(sent.contains("na=Open"));
        assert!(sent.contains("et=19"));
    }

    #[test]
    fn test_worker_thread_lifecycle() {
        let client = Arc::new(RecordingHttpClient::ok());
        let (shared, _timing) = shared_with_client(Arc::clone(&client));

        let handle = WorkerHandle::spawn(Arc::clone(&shared));
        let proxy = shared.create_session(None);
        proxy.enter_action("Home").unwrap().leave();
        proxy.end();

        handle.shutdown(&shared);
        assert!(shared.worker_done.load(Ordering::Relaxed));
        let sent = client.payloads().join("&");
        assert!(sent.contains("na=Home"));
    }

    #[test]
    fn test_idle_split_replays_user_tag_via_tick() {
        let client = Arc::new(RecordingHttpClient::ok());
        let (shared, timing) = shared_with_client(Arc::clone(&client));
        shared
            .server_config_initialized
            .store(true, Ordering::Relaxed);

        let proxy = shared.create_session(None);
        proxy.identify_user("alice");

        // Simulate 30 minutes of idle time.
        timing.advance(30 * 60 * 1_000);

        let mut last_send = Instant::now();
        tick(&shared, &mut last_send);

        let successor = proxy.current_session();
        assert_eq!(successor.beacon().key().session_sequence, 1);
        let wire = {
            let key = successor.beacon().key();
            shared.cache.prepare_data_for_sending(key);
            let chunk = shared
                .cache
                .next_beacon_chunk(key, "", usize::MAX, '&')
                .unwrap_or_default();
            shared.cache.remove_chunked_data(key);
            chunk
        };
        assert!(wire.contains("et=60&na=alice"));
    }
}
