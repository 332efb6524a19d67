use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use openrum_cache::BeaconCache;
use openrum_common::Timestamp;
use openrum_config::{OpenKitConfig, PrivacyConfig, ServerConfig};
use openrum_protocol::payload::{EventKind, EventPayloadError};

use crate::beacon::{Beacon, Providers};
use crate::lifecycle::action::{ActionInner, RootAction};
use crate::lifecycle::tracer::TracerInner;
use crate::lifecycle::{is_valid_http_url, Composite, OpenKitObject, ParentLink, WebRequestTracer};

/// Lifecycle states of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SessionState {
    /// Created; no record written yet.
    Configured,
    /// The session-start record was written.
    Initialized,
    /// At least one user-visible record was produced.
    Active,
    /// `end` was called or the watchdog split the session; children are
    /// closing and remaining data awaits its drain.
    Finishing,
    /// Everything was drained (or a terminal drain attempt completed).
    Finished,
}

#[derive(Debug)]
struct SessionMutState {
    children: Vec<OpenKitObject>,
    state: SessionState,
}

/// One real session: a beacon plus the top level of the composite tree.
pub(crate) struct SessionInner {
    beacon: Arc<Beacon>,
    state: Mutex<SessionMutState>,
}

impl SessionInner {
    /// Creates the session and writes its start record.
    pub fn begin(beacon: Arc<Beacon>) -> Arc<Self> {
        let session = Arc::new(Self {
            beacon,
            state: Mutex::new(SessionMutState {
                children: Vec::new(),
                state: SessionState::Configured,
            }),
        });

        session.beacon.start_session();
        session.state.lock().state = SessionState::Initialized;
        session
    }

    pub fn beacon(&self) -> &Arc<Beacon> {
        &self.beacon
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().state
    }

    /// Flags user activity; refuses once the session is finishing.
    fn activate(&self, what: &str) -> bool {
        let mut state = self.state.lock();
        match state.state {
            SessionState::Finishing | SessionState::Finished => {
                tracing::warn!("ignoring {what} on an ended session");
                false
            }
            _ => {
                state.state = SessionState::Active;
                true
            }
        }
    }

    /// Enters a top-level action.
    pub fn enter_action(self: &Arc<Self>, name: &str) -> Option<Arc<ActionInner>> {
        if name.trim().is_empty() {
            tracing::warn!("enter_action called with an empty name");
            return None;
        }
        if !self.activate("enter_action") {
            return None;
        }

        let action = ActionInner::enter(
            Arc::clone(&self.beacon),
            ParentLink::Session(Arc::downgrade(self)),
            name,
        );
        self.store_child(OpenKitObject::Action(Arc::clone(&action)));
        Some(action)
    }

    pub fn identify_user(&self, tag: &str) {
        if self.activate("identify_user") {
            self.beacon.identify_user(tag);
        }
    }

    pub fn report_crash(&self, name: &str, reason: &str, stacktrace: &str) {
        if self.activate("report_crash") {
            self.beacon.report_crash(name, reason, stacktrace);
        }
    }

    pub fn send_event(
        &self,
        kind: EventKind,
        name: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        if !self.activate("send_event") {
            return Ok(());
        }
        self.beacon.send_event(kind, name, attributes)
    }

    /// Starts tracing a web request directly on the session.
    pub fn trace_web_request(self: &Arc<Self>, url: &str) -> Option<Arc<TracerInner>> {
        if !is_valid_http_url(url) {
            tracing::warn!(url, "refusing to trace a non-http(s) web request");
            return None;
        }
        if !self.activate("trace_web_request") {
            return None;
        }

        let tracer = TracerInner::start(
            Arc::clone(&self.beacon),
            ParentLink::Session(Arc::downgrade(self)),
            url,
        );
        self.store_child(OpenKitObject::Tracer(Arc::clone(&tracer)));
        Some(tracer)
    }

    /// Moves the session to FINISHING, closing all open descendants.
    ///
    /// Idempotent; only the first call closes children and writes the
    /// session-end record.
    pub fn end(&self, send_end_record: bool) {
        {
            let mut state = self.state.lock();
            if matches!(
                state.state,
                SessionState::Finishing | SessionState::Finished
            ) {
                return;
            }
            state.state = SessionState::Finishing;
        }

        for child in self.copy_of_children() {
            child.close();
        }

        if send_end_record {
            self.beacon.end_session();
        }
    }

    /// Whether every descendant has been closed.
    pub fn children_closed(&self) -> bool {
        self.state.lock().children.is_empty()
    }

    /// Marks the session fully drained.
    pub fn mark_finished(&self) {
        self.state.lock().state = SessionState::Finished;
    }
}

impl Composite for SessionInner {
    fn action_id(&self) -> i32 {
        0
    }

    fn store_child(&self, child: OpenKitObject) {
        self.state.lock().children.push(child);
    }

    fn remove_child(&self, child: &OpenKitObject) {
        self.state.lock().children.retain(|c| !c.ptr_eq(child));
    }

    fn copy_of_children(&self) -> Vec<OpenKitObject> {
        self.state.lock().children.clone()
    }
}

/// Everything needed to create a session, fixed for the life of one
/// [`SessionProxy`].
///
/// The session number and the substitute device id are drawn once here, so
/// all splits of one logical session share them; each split draws its own
/// traffic-control value inside its beacon.
pub(crate) struct SessionCreator {
    pub config: Arc<OpenKitConfig>,
    pub privacy: PrivacyConfig,
    pub server_config: Arc<ArcSwap<ServerConfig>>,
    pub cache: Arc<BeaconCache>,
    pub providers: Providers,
    pub session_number: i32,
    pub client_ip: Option<String>,
    pub substitute_device_id: i64,
}

impl SessionCreator {
    fn create_session(&self, session_sequence: i32) -> Arc<SessionInner> {
        let beacon = Beacon::new(
            Arc::clone(&self.config),
            self.privacy,
            Arc::clone(&self.server_config),
            Arc::clone(&self.cache),
            self.providers.clone(),
            self.session_number,
            session_sequence,
            self.client_ip.clone(),
            self.substitute_device_id,
        );
        SessionInner::begin(Arc::new(beacon))
    }
}

#[derive(Debug)]
struct ProxyState {
    current: Arc<SessionInner>,
    session_sequence: i32,
    last_user_tag: Option<String>,
    top_level_event_count: i32,
    last_interaction: Timestamp,
    finished: bool,
    /// Predecessor sessions from splits, kept until fully drained.
    retiring: Vec<Arc<SessionInner>>,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("key", &self.beacon.key())
            .field("state", &self.state.lock().state)
            .finish()
    }
}

/// The session facade handed to the application.
///
/// The proxy survives session splits: the watchdog (or the event-count
/// check) ends the current real session and installs a successor with the
/// next session sequence, replaying the last non-empty user tag. The
/// application's handle keeps working across splits.
pub(crate) struct SessionProxy {
    creator: SessionCreator,
    state: Mutex<ProxyState>,
}

impl SessionProxy {
    pub fn new(creator: SessionCreator) -> Arc<Self> {
        let current = creator.create_session(0);
        let last_interaction = current.beacon().session_start_time();
        Arc::new(Self {
            creator,
            state: Mutex::new(ProxyState {
                current,
                session_sequence: 0,
                last_user_tag: None,
                top_level_event_count: 0,
                last_interaction,
                finished: false,
                retiring: Vec::new(),
            }),
        })
    }

    fn touch(&self, state: &mut ProxyState) {
        state.last_interaction = self.creator.providers.timing.now();
    }

    pub fn enter_action(&self, name: &str) -> Option<Arc<ActionInner>> {
        if name.trim().is_empty() {
            tracing::warn!("enter_action called with an empty name");
            return None;
        }

        let session = {
            let mut state = self.state.lock();
            if state.finished {
                return None;
            }
            self.touch(&mut state);

            let server = self.creator.server_config.load();
            if server.is_session_split_by_events_enabled()
                && state.top_level_event_count >= server.max_events_per_session
            {
                self.split_locked(&mut state);
            }
            state.top_level_event_count += 1;
            Arc::clone(&state.current)
        };

        session.enter_action(name)
    }

    pub fn identify_user(&self, tag: &str) {
        let session = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            self.touch(&mut state);
            if !tag.trim().is_empty() {
                state.last_user_tag = Some(tag.to_owned());
            }
            Arc::clone(&state.current)
        };
        session.identify_user(tag);
    }

    pub fn report_crash(&self, name: &str, reason: &str, stacktrace: &str) {
        let session = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            self.touch(&mut state);
            Arc::clone(&state.current)
        };
        session.report_crash(name, reason, stacktrace);
    }

    pub fn send_event(
        &self,
        kind: EventKind,
        name: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        let session = {
            let mut state = self.state.lock();
            if state.finished {
                return Ok(());
            }
            self.touch(&mut state);
            Arc::clone(&state.current)
        };
        session.send_event(kind, name, attributes)
    }

    pub fn trace_web_request(&self, url: &str) -> Option<Arc<TracerInner>> {
        let session = {
            let mut state = self.state.lock();
            if state.finished {
                return None;
            }
            self.touch(&mut state);
            Arc::clone(&state.current)
        };
        session.trace_web_request(url)
    }

    /// Ends the session on behalf of the application.
    pub fn end(&self) {
        let session = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            Arc::clone(&state.current)
        };
        session.end(true);
    }

    /// Splits the session if it exceeded the idle timeout or the maximum
    /// duration. Called by the watchdog.
    pub fn check_split(&self, now: Timestamp, server: &ServerConfig) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }

        let session_start = state.current.beacon().session_start_time();
        let idle = now.duration_since(state.last_interaction);
        let age = now.duration_since(session_start);

        if idle >= server.session_timeout {
            tracing::debug!(?idle, "splitting idle session");
        } else if age >= server.max_session_duration {
            tracing::debug!(?age, "splitting long-running session");
        } else {
            return;
        }

        self.split_locked(&mut state);
        state.last_interaction = now;
    }

    fn split_locked(&self, state: &mut ProxyState) {
        let predecessor = Arc::clone(&state.current);
        predecessor.end(true);
        state.retiring.push(predecessor);

        state.session_sequence += 1;
        state.current = self.creator.create_session(state.session_sequence);
        state.top_level_event_count = 0;
        if let Some(tag) = state.last_user_tag.clone() {
            state.current.identify_user(&tag);
        }
    }

    /// The real session currently backing this proxy.
    pub fn current_session(&self) -> Arc<SessionInner> {
        Arc::clone(&self.state.lock().current)
    }

    /// Every real session of this proxy, predecessors first.
    pub fn all_sessions(&self) -> Vec<Arc<SessionInner>> {
        let state = self.state.lock();
        let mut sessions = state.retiring.clone();
        sessions.push(Arc::clone(&state.current));
        sessions
    }

    /// The sessions awaiting their final drain.
    pub fn sessions_to_finish(&self) -> Vec<Arc<SessionInner>> {
        let state = self.state.lock();
        let mut sessions = state.retiring.clone();
        if state.finished {
            sessions.push(Arc::clone(&state.current));
        }
        sessions
    }

    /// Drops a fully drained predecessor.
    pub fn retire(&self, session: &Arc<SessionInner>) {
        let mut state = self.state.lock();
        state.retiring.retain(|s| !Arc::ptr_eq(s, session));
    }

    /// Whether nothing remains to watch or drain for this proxy.
    pub fn is_fully_finished(&self) -> bool {
        let state = self.state.lock();
        state.finished
            && state.retiring.is_empty()
            && state.current.state() == SessionState::Finished
    }
}

/// Handle to a recorded user session.
///
/// The no-op variant is handed out once the owning agent has shut down;
/// every operation on it does nothing.
#[derive(Clone)]
pub struct Session {
    inner: Option<Arc<SessionProxy>>,
}

impl Session {
    pub(crate) fn real(proxy: Arc<SessionProxy>) -> Self {
        Self { inner: Some(proxy) }
    }

    pub(crate) fn noop() -> Self {
        Self { inner: None }
    }

    /// Enters a top-level action.
    ///
    /// Returns a no-op action for an empty name or an ended session.
    pub fn enter_action(&self, name: &str) -> RootAction {
        match self.inner.as_ref().and_then(|proxy| proxy.enter_action(name)) {
            Some(action) => RootAction::real(action),
            None => RootAction::noop(),
        }
    }

    /// Tags the session with a user identifier.
    pub fn identify_user(&self, tag: &str) {
        if let Some(proxy) = &self.inner {
            proxy.identify_user(tag);
        }
    }

    /// Reports a crash on the session.
    pub fn report_crash(&self, name: &str, reason: &str, stacktrace: &str) {
        if let Some(proxy) = &self.inner {
            proxy.report_crash(name, reason, stacktrace);
        }
    }

    /// Sends a custom event with the given attributes.
    ///
    /// Fails only when the serialized payload exceeds the size limit.
    pub fn send_event(
        &self,
        name: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        match &self.inner {
            Some(proxy) => proxy.send_event(EventKind::Rum, name, attributes),
            None => Ok(()),
        }
    }

    /// Sends a business event with the given attributes.
    ///
    /// Fails only when the serialized payload exceeds the size limit.
    pub fn send_biz_event(
        &self,
        event_type: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        match &self.inner {
            Some(proxy) => proxy.send_event(EventKind::Biz, event_type, attributes),
            None => Ok(()),
        }
    }

    /// Starts tracing a web request directly on the session.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        match self
            .inner
            .as_ref()
            .and_then(|proxy| proxy.trace_web_request(url))
        {
            Some(tracer) => WebRequestTracer::real(tracer),
            None => WebRequestTracer::noop(),
        }
    }

    /// Ends the session. Idempotent.
    pub fn end(&self) {
        if let Some(proxy) = &self.inner {
            proxy.end();
        }
    }
}
