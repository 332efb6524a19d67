use std::sync::Arc;

use parking_lot::Mutex;

use openrum_common::Timestamp;
use openrum_protocol::WEBREQUEST_TAG_HEADER;

use crate::beacon::{Beacon, WebRequestData};
use crate::lifecycle::{OpenKitObject, ParentLink};

#[derive(Debug)]
struct TracerState {
    start_time: Timestamp,
    start_sequence_number: i32,
    end_time: Option<Timestamp>,
    end_sequence_number: Option<i32>,
    bytes_sent: Option<i64>,
    bytes_received: Option<i64>,
    response_code: Option<i32>,
    canceled: bool,
}

impl TracerState {
    fn is_stopped(&self) -> bool {
        self.end_sequence_number.is_some() || self.canceled
    }
}

/// The real web-request tracer node.
///
/// The correlation tag is built at creation time so the caller can attach it
/// to the outgoing request before any bytes leave the process. The record is
/// written at [`stop`](Self::stop); a canceled tracer writes nothing.
pub(crate) struct TracerInner {
    beacon: Arc<Beacon>,
    url: String,
    parent: ParentLink,
    parent_action_id: i32,
    tag: String,
    state: Mutex<TracerState>,
}

impl TracerInner {
    /// Creates a tracer under the given parent and stamps its start.
    pub fn start(beacon: Arc<Beacon>, parent: ParentLink, url: &str) -> Arc<Self> {
        let parent_action_id = parent.action_id();
        let start_sequence_number = beacon.next_sequence_number();
        let start_time = beacon.current_timestamp();
        let tag = beacon.create_tag(parent_action_id, start_sequence_number);

        Arc::new(Self {
            beacon,
            url: url.to_owned(),
            parent,
            parent_action_id,
            tag,
            state: Mutex::new(TracerState {
                start_time,
                start_sequence_number,
                end_time: None,
                end_sequence_number: None,
                bytes_sent: None,
                bytes_received: None,
                response_code: None,
                canceled: false,
            }),
        })
    }

    /// The correlation tag; empty when web-request tracing is not allowed.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Re-stamps the start time for callers that create the tracer early.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        if !state.is_stopped() {
            state.start_time = self.beacon.current_timestamp();
        }
    }

    /// Records the number of bytes sent. Ignored after stop.
    pub fn set_bytes_sent(&self, bytes: i64) {
        let mut state = self.state.lock();
        if !state.is_stopped() {
            state.bytes_sent = Some(bytes);
        }
    }

    /// Records the number of bytes received. Ignored after stop.
    pub fn set_bytes_received(&self, bytes: i64) {
        let mut state = self.state.lock();
        if !state.is_stopped() {
            state.bytes_received = Some(bytes);
        }
    }

    /// Stops the tracer and commits its record. Idempotent.
    pub fn stop(self: &Arc<Self>, response_code: Option<i32>) {
        let data = {
            let mut state = self.state.lock();
            if state.is_stopped() {
                return;
            }
            state.end_sequence_number = Some(self.beacon.next_sequence_number());
            state.end_time = Some(self.beacon.current_timestamp());
            if response_code.is_some() {
                state.response_code = response_code;
            }

            WebRequestData {
                url: self.url.clone(),
                start_time: state.start_time,
                end_time: state.end_time.unwrap_or(state.start_time),
                start_sequence_number: state.start_sequence_number,
                end_sequence_number: state.end_sequence_number.unwrap_or(0),
                bytes_sent: state.bytes_sent,
                bytes_received: state.bytes_received,
                response_code: state.response_code,
            }
        };

        self.beacon.add_web_request(self.parent_action_id, &data);
        self.parent
            .on_child_closed(&OpenKitObject::Tracer(Arc::clone(self)));
    }

    /// Cancels the tracer; no record is written. Idempotent.
    pub fn cancel(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.is_stopped() {
                return;
            }
            state.canceled = true;
        }
        self.parent
            .on_child_closed(&OpenKitObject::Tracer(Arc::clone(self)));
    }
}

/// Handle to a traced web request.
///
/// Attach [`tag`](Self::tag) as the value of the
/// [`header_name`](Self::header_name) header on the outgoing request, then
/// call [`stop`](Self::stop) once the response arrived. The no-op variant is
/// returned for invalid URLs or closed owners and records nothing.
#[derive(Clone)]
pub struct WebRequestTracer {
    inner: Option<Arc<TracerInner>>,
}

impl WebRequestTracer {
    pub(crate) fn real(inner: Arc<TracerInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn noop() -> Self {
        Self { inner: None }
    }

    /// The name of the correlation header.
    pub fn header_name() -> &'static str {
        WEBREQUEST_TAG_HEADER
    }

    /// The correlation tag to attach to the outgoing request.
    ///
    /// Empty when tracing is not allowed; attach nothing in that case.
    pub fn tag(&self) -> String {
        self.inner
            .as_ref()
            .map(|inner| inner.tag().to_owned())
            .unwrap_or_default()
    }

    /// Marks the actual start of the request.
    pub fn start(&self) -> &Self {
        if let Some(inner) = &self.inner {
            inner.restart();
        }
        self
    }

    /// Sets the number of bytes sent.
    pub fn set_bytes_sent(&self, bytes: i64) -> &Self {
        if let Some(inner) = &self.inner {
            inner.set_bytes_sent(bytes);
        }
        self
    }

    /// Sets the number of bytes received.
    pub fn set_bytes_received(&self, bytes: i64) -> &Self {
        if let Some(inner) = &self.inner {
            inner.set_bytes_received(bytes);
        }
        self
    }

    /// Stops the tracer with the response code of the finished request.
    pub fn stop(&self, response_code: i32) {
        if let Some(inner) = &self.inner {
            inner.stop(Some(response_code));
        }
    }
}
