use std::sync::Arc;

use parking_lot::Mutex;

use openrum_common::Timestamp;

use crate::beacon::{ActionData, Beacon};
use crate::lifecycle::tracer::{TracerInner, WebRequestTracer};
use crate::lifecycle::{is_valid_http_url, Composite, OpenKitObject, ParentLink};

/// How an action was closed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CloseKind {
    /// `leave` committed the action to the beacon.
    Left,
    /// `cancel` discarded the action and its pending data.
    Canceled,
}

#[derive(Debug)]
struct ActionState {
    children: Vec<OpenKitObject>,
    closed: Option<CloseKind>,
    end_time: Option<Timestamp>,
    end_sequence_number: Option<i32>,
}

/// The real action node.
///
/// State machine: OPEN → LEFT (commit) or OPEN → CANCELED (discard). Both
/// transitions are idempotent; the second call performs no work.
pub(crate) struct ActionInner {
    beacon: Arc<Beacon>,
    id: i32,
    name: String,
    parent: ParentLink,
    parent_action_id: i32,
    start_time: Timestamp,
    start_sequence_number: i32,
    state: Mutex<ActionState>,
}

impl ActionInner {
    /// Creates an action under the given parent and draws its identifiers.
    pub fn enter(beacon: Arc<Beacon>, parent: ParentLink, name: &str) -> Arc<Self> {
        let id = beacon.next_id();
        let start_sequence_number = beacon.next_sequence_number();
        let start_time = beacon.current_timestamp();
        let parent_action_id = parent.action_id();

        Arc::new(Self {
            beacon,
            id,
            name: name.trim().to_owned(),
            parent,
            parent_action_id,
            start_time,
            start_sequence_number,
            state: Mutex::new(ActionState {
                children: Vec::new(),
                closed: None,
                end_time: None,
                end_sequence_number: None,
            }),
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    fn warn_if_closed(&self, what: &str) -> bool {
        let closed = self.is_closed();
        if closed {
            tracing::warn!(action = %self.name, "ignoring {what} on a closed action");
        }
        closed
    }

    /// Enters a child action.
    pub fn enter_action(self: &Arc<Self>, name: &str) -> Option<Arc<ActionInner>> {
        if name.trim().is_empty() {
            tracing::warn!("enter_action called with an empty name");
            return None;
        }
        if self.warn_if_closed("enter_action") {
            return None;
        }

        let child = ActionInner::enter(
            Arc::clone(&self.beacon),
            ParentLink::Action(Arc::downgrade(self)),
            name,
        );
        self.store_child(OpenKitObject::Action(Arc::clone(&child)));
        Some(child)
    }

    pub fn report_event(&self, name: &str) {
        if !self.warn_if_closed("report_event") {
            self.beacon.report_event(self.id, name);
        }
    }

    pub fn report_int_value(&self, name: &str, value: i32) {
        if !self.warn_if_closed("report_value") {
            self.beacon.report_int_value(self.id, name, value);
        }
    }

    pub fn report_long_value(&self, name: &str, value: i64) {
        if !self.warn_if_closed("report_value") {
            self.beacon.report_long_value(self.id, name, value);
        }
    }

    pub fn report_double_value(&self, name: &str, value: f64) {
        if !self.warn_if_closed("report_value") {
            self.beacon.report_double_value(self.id, name, value);
        }
    }

    pub fn report_string_value(&self, name: &str, value: &str) {
        if !self.warn_if_closed("report_value") {
            self.beacon.report_string_value(self.id, name, value);
        }
    }

    pub fn report_error_code(&self, name: &str, code: i32) {
        if !self.warn_if_closed("report_error") {
            self.beacon.report_error_code(self.id, name, code);
        }
    }

    pub fn report_error_cause(
        &self,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stacktrace: Option<&str>,
    ) {
        if !self.warn_if_closed("report_error") {
            self.beacon.report_error_cause(
                self.id,
                name,
                cause_name,
                cause_description,
                cause_stacktrace,
            );
        }
    }

    /// Starts tracing a web request under this action.
    pub fn trace_web_request(self: &Arc<Self>, url: &str) -> Option<Arc<TracerInner>> {
        if !is_valid_http_url(url) {
            tracing::warn!(url, "refusing to trace a non-http(s) web request");
            return None;
        }
        if self.warn_if_closed("trace_web_request") {
            return None;
        }

        let tracer = TracerInner::start(
            Arc::clone(&self.beacon),
            ParentLink::Action(Arc::downgrade(self)),
            url,
        );
        self.store_child(OpenKitObject::Tracer(Arc::clone(&tracer)));
        Some(tracer)
    }

    /// Leaves the action, committing it to the beacon.
    ///
    /// Returns the parent action, if any, for handle construction.
    pub fn leave(self: &Arc<Self>) -> Option<Arc<ActionInner>> {
        self.close(CloseKind::Left);
        self.parent.parent_action()
    }

    /// Cancels the action, discarding it and all pending descendant data.
    pub fn cancel(self: &Arc<Self>) -> Option<Arc<ActionInner>> {
        self.close(CloseKind::Canceled);
        self.parent.parent_action()
    }

    fn close(self: &Arc<Self>, kind: CloseKind) {
        // Phase 1, under the lock: claim the transition.
        {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(kind);
        }

        // Phase 2, outside the lock: close the children. Each child detaches
        // itself through on_child_closed, which re-takes our lock briefly.
        let children = self.copy_of_children();
        for child in children {
            match kind {
                CloseKind::Left => child.close(),
                CloseKind::Canceled => child.cancel(),
            }
        }

        // Phase 3: stamp the end and commit or discard.
        let end_time = self.beacon.current_timestamp();
        let end_sequence_number = self.beacon.next_sequence_number();
        {
            let mut state = self.state.lock();
            state.end_time = Some(end_time);
            state.end_sequence_number = Some(end_sequence_number);
        }

        match kind {
            CloseKind::Left => self.beacon.add_action(&ActionData {
                id: self.id,
                parent_id: self.parent_action_id,
                name: self.name.clone(),
                start_time: self.start_time,
                end_time,
                start_sequence_number: self.start_sequence_number,
                end_sequence_number,
            }),
            CloseKind::Canceled => self.beacon.purge_action_data(self.id),
        }

        self.parent
            .on_child_closed(&OpenKitObject::Action(Arc::clone(self)));
    }
}

impl Composite for ActionInner {
    fn action_id(&self) -> i32 {
        self.id
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

/// A top-level action entered directly on a session.
///
/// No-op instances are returned for invalid input or closed owners; all
/// operations on them do nothing.
#[derive(Clone)]
pub struct RootAction {
    inner: Option<Arc<ActionInner>>,
}

impl RootAction {
    pub(crate) fn real(inner: Arc<ActionInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn noop() -> Self {
        Self { inner: None }
    }

    /// Enters a child action.
    pub fn enter_action(&self, name: &str) -> Action {
        match self.inner.as_ref().and_then(|inner| inner.enter_action(name)) {
            Some(child) => Action::real(child),
            None => Action::noop(),
        }
    }

    /// Reports a named event on this action.
    pub fn report_event(&self, name: &str) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_event(name);
        }
        self
    }

    /// Reports a 32-bit integer value on this action.
    pub fn report_int_value(&self, name: &str, value: i32) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_int_value(name, value);
        }
        self
    }

    /// Reports a 64-bit integer value on this action.
    pub fn report_long_value(&self, name: &str, value: i64) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_long_value(name, value);
        }
        self
    }

    /// Reports a double value on this action.
    pub fn report_double_value(&self, name: &str, value: f64) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_double_value(name, value);
        }
        self
    }

    /// Reports a string value on this action.
    pub fn report_string_value(&self, name: &str, value: &str) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_string_value(name, value);
        }
        self
    }

    /// Reports an error with a numeric code on this action.
    pub fn report_error_code(&self, name: &str, code: i32) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_error_code(name, code);
        }
        self
    }

    /// Reports an error with cause details on this action.
    pub fn report_error_cause(
        &self,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stacktrace: Option<&str>,
    ) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_error_cause(name, cause_name, cause_description, cause_stacktrace);
        }
        self
    }

    /// Starts tracing a web request under this action.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        match self
            .inner
            .as_ref()
            .and_then(|inner| inner.trace_web_request(url))
        {
            Some(tracer) => WebRequestTracer::real(tracer),
            None => WebRequestTracer::noop(),
        }
    }

    /// Leaves the action, committing it. Idempotent.
    pub fn leave_action(&self) {
        if let Some(inner) = &self.inner {
            inner.leave();
        }
    }

    /// Cancels the action, discarding its pending data. Idempotent.
    pub fn cancel_action(&self) {
        if let Some(inner) = &self.inner {
            inner.cancel();
        }
    }
}

/// A nested action entered on a [`RootAction`].
#[derive(Clone)]
pub struct Action {
    inner: Option<Arc<ActionInner>>,
}

impl Action {
    pub(crate) fn real(inner: Arc<ActionInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn noop() -> Self {
        Self { inner: None }
    }

    /// Reports a named event on this action.
    pub fn report_event(&self, name: &str) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_event(name);
        }
        self
    }

    /// Reports a 32-bit integer value on this action.
    pub fn report_int_value(&self, name: &str, value: i32) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_int_value(name, value);
        }
        self
    }

    /// Reports a 64-bit integer value on this action.
    pub fn report_long_value(&self, name: &str, value: i64) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_long_value(name, value);
        }
        self
    }

    /// Reports a double value on this action.
    pub fn report_double_value(&self, name: &str, value: f64) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_double_value(name, value);
        }
        self
    }

    /// Reports a string value on this action.
    pub fn report_string_value(&self, name: &str, value: &str) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_string_value(name, value);
        }
        self
    }

    /// Reports an error with a numeric code on this action.
    pub fn report_error_code(&self, name: &str, code: i32) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_error_code(name, code);
        }
        self
    }

    /// Reports an error with cause details on this action.
    pub fn report_error_cause(
        &self,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stacktrace: Option<&str>,
    ) -> &Self {
        if let Some(inner) = &self.inner {
            inner.report_error_cause(name, cause_name, cause_description, cause_stacktrace);
        }
        self
    }

    /// Starts tracing a web request under this action.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        match self
            .inner
            .as_ref()
            .and_then(|inner| inner.trace_web_request(url))
        {
            Some(tracer) => WebRequestTracer::real(tracer),
            None => WebRequestTracer::noop(),
        }
    }

    /// Leaves the action and returns its parent. Idempotent; a repeated call
    /// returns the same parent and performs no further work.
    pub fn leave_action(&self) -> RootAction {
        match self.inner.as_ref().and_then(|inner| inner.leave()) {
            Some(parent) => RootAction::real(parent),
            None => RootAction::noop(),
        }
    }

    /// Cancels the action and returns its parent. Idempotent.
    pub fn cancel_action(&self) -> RootAction {
        match self.inner.as_ref().and_then(|inner| inner.cancel()) {
            Some(parent) => RootAction::real(parent),
            None => RootAction::noop(),
        }
    }
}
