//! The beacon: per-session serializer, policy gate and record buffer front.
//!
//! One [`Beacon`] exists per session sequence. It is the single authority
//! that turns semantic calls ("report value X on action Y") into wire
//! records: it validates arguments, consults the privacy and capture gates,
//! advances the id and sequence counters, serializes, and appends to the
//! shared cache. The sender loop later drains the cache through
//! [`Beacon::send`].
//!
//! Gating order on every write: argument validation, privacy, capture (with
//! the per-session traffic-control draw), then serialize-and-append. Records
//! failing privacy or capture are dropped silently.

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use openrum_cache::{BeaconCache, BeaconKey};
use openrum_common::{
    CurrentThreadId, DefaultRandom, RandomProvider, SystemTiming, ThreadIdProvider, Timestamp,
    TimingProvider,
};
use openrum_config::{OpenKitConfig, PrivacyConfig, ServerConfig, AGENT_VERSION};
use openrum_protocol::payload::{build_event_payload, EventContext, EventKind, EventPayloadError};
use openrum_protocol::{
    encode, keys, truncate_name, truncate_reason, truncate_stacktrace, EventType,
    AGENT_TECHNOLOGY_TYPE, ERROR_TECHNOLOGY_TYPE, PLATFORM_TYPE_OPENKIT, PROTOCOL_VERSION,
    TAG_PREFIX,
};

use crate::http::{HttpClient, StatusResponse};

/// Reserve subtracted from the server-configured beacon size when chunking,
/// leaving room for transport framing.
const CHUNK_RESERVE_BYTES: usize = 1_024;

/// The delimiter between records in a beacon payload.
const RECORD_DELIMITER: char = '&';

/// The providers a beacon draws time, thread ids and randomness from.
#[derive(Clone)]
pub(crate) struct Providers {
    pub timing: Arc<dyn TimingProvider>,
    pub thread_id: Arc<dyn ThreadIdProvider>,
    pub random: Arc<dyn RandomProvider>,
}

impl Providers {
    /// The production providers.
    pub fn system() -> Self {
        Self {
            timing: Arc::new(SystemTiming),
            thread_id: Arc::new(CurrentThreadId),
            random: Arc::new(DefaultRandom),
        }
    }
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

/// Snapshot of a completed action, serialized by [`Beacon::add_action`].
#[derive(Clone, Debug)]
pub(crate) struct ActionData {
    pub id: i32,
    pub parent_id: i32,
    pub name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_sequence_number: i32,
    pub end_sequence_number: i32,
}

/// Snapshot of a stopped web request, serialized by [`Beacon::add_web_request`].
#[derive(Clone, Debug)]
pub(crate) struct WebRequestData {
    pub url: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_sequence_number: i32,
    pub end_sequence_number: i32,
    pub bytes_sent: Option<i64>,
    pub bytes_received: Option<i64>,
    pub response_code: Option<i32>,
}

/// Mutable connection metadata, rebuilt into every beacon prefix.
#[derive(Debug, Default)]
struct ConnectionInfo {
    network_technology: Option<String>,
    connection_type: Option<String>,
    carrier: Option<String>,
}

/// The per-session-sequence serializer and policy gate.
pub(crate) struct Beacon {
    key: BeaconKey,
    session_start_time: Timestamp,
    /// The device id on the wire: the configured one, or the per-session
    /// random substitute when privacy denies device-id sending.
    device_id: i64,
    /// The session number on the wire: the real one, or 1 when privacy
    /// denies session-number reporting.
    wire_session_number: i32,
    traffic_control_value: i32,
    next_id: AtomicI32,
    next_sequence: AtomicI32,
    immutable_prefix: String,
    config: Arc<OpenKitConfig>,
    privacy: PrivacyConfig,
    server_config: Arc<ArcSwap<ServerConfig>>,
    cache: Arc<BeaconCache>,
    providers: Providers,
    client_ip: Option<String>,
    connection: Mutex<ConnectionInfo>,
}

impl Beacon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<OpenKitConfig>,
        privacy: PrivacyConfig,
        server_config: Arc<ArcSwap<ServerConfig>>,
        cache: Arc<BeaconCache>,
        providers: Providers,
        session_number: i32,
        session_sequence: i32,
        client_ip: Option<String>,
        substitute_device_id: i64,
    ) -> Self {
        let session_start_time = providers.timing.now();
        let traffic_control_value = providers.random.next_percentage();

        let device_id = if privacy.is_device_id_sending_allowed() {
            config.device_id()
        } else {
            substitute_device_id
        };
        let wire_session_number = if privacy.is_session_number_reporting_allowed() {
            session_number
        } else {
            1
        };

        let immutable_prefix =
            build_immutable_prefix(&config, privacy, device_id, wire_session_number, &client_ip);

        Self {
            key: BeaconKey::new(session_number, session_sequence),
            session_start_time,
            device_id,
            wire_session_number,
            traffic_control_value,
            next_id: AtomicI32::new(1),
            next_sequence: AtomicI32::new(1),
            immutable_prefix,
            config,
            privacy,
            server_config,
            cache,
            providers,
            client_ip,
            connection: Mutex::new(ConnectionInfo::default()),
        }
    }

    /// The cache key of this beacon's data stream.
    pub fn key(&self) -> BeaconKey {
        self.key
    }

    /// The session start time.
    pub fn session_start_time(&self) -> Timestamp {
        self.session_start_time
    }

    /// The device id in effect on the wire.
    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Hands out the next action id. Positive, starts at 1.
    pub fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands out the next sequence number. Positive, starts at 1.
    pub fn next_sequence_number(&self) -> i32 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// The current time as seen by this beacon.
    pub fn current_timestamp(&self) -> Timestamp {
        self.providers.timing.now()
    }

    fn time_since_session_start(&self, timestamp: Timestamp) -> i64 {
        timestamp.duration_since(self.session_start_time).as_millis() as i64
    }

    /// Whether regular records pass the capture gate right now.
    ///
    /// The decision combines the server's capture flag with the per-session
    /// traffic-control draw.
    pub fn is_data_capturing_enabled(&self) -> bool {
        let server = self.server_config.load();
        server.is_sending_data_allowed()
            && self.traffic_control_value < server.traffic_control_percentage
    }

    /// Whether error records pass the capture gate right now.
    pub fn is_error_capturing_enabled(&self) -> bool {
        let server = self.server_config.load();
        server.is_sending_errors_allowed()
            && self.traffic_control_value < server.traffic_control_percentage
    }

    /// Whether crash records pass the capture gate right now.
    pub fn is_crash_capturing_enabled(&self) -> bool {
        let server = self.server_config.load();
        server.is_sending_crashes_allowed()
            && self.traffic_control_value < server.traffic_control_percentage
    }

    /// Updates the reported network technology (`np`).
    pub fn report_network_technology(&self, technology: Option<String>) {
        self.connection.lock().network_technology = technology;
    }

    /// Updates the reported connection type (`ct`).
    pub fn report_connection_type(&self, connection_type: Option<String>) {
        self.connection.lock().connection_type = connection_type;
    }

    /// Updates the reported carrier (`cr`).
    pub fn report_carrier(&self, carrier: Option<String>) {
        self.connection.lock().carrier = carrier;
    }

    /// Writes the session-start record.
    pub fn start_session(&self) {
        if !self.privacy.is_session_reporting_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let mut data = self.basic_event_data(EventType::SessionStart, None);
        append_pair(&mut data, keys::PARENT_ACTION_ID, 0);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, 0);

        self.add_event_record(self.session_start_time, data, 0);
    }

    /// Writes the session-end record.
    pub fn end_session(&self) {
        if !self.privacy.is_session_reporting_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(EventType::SessionEnd, None);
        append_pair(&mut data, keys::PARENT_ACTION_ID, 0);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));

        self.add_event_record(timestamp, data, 0);
    }

    /// Writes the record of a completed action.
    pub fn add_action(&self, action: &ActionData) {
        if action.name.trim().is_empty() {
            tracing::warn!("dropping action with empty name");
            return;
        }
        if !self.privacy.is_action_reporting_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let mut data = self.basic_event_data(EventType::Action, Some(&action.name));
        append_pair(&mut data, keys::ACTION_ID, action.id);
        append_pair(&mut data, keys::PARENT_ACTION_ID, action.parent_id);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, action.start_sequence_number);
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(action.start_time));
        append_pair(&mut data, keys::END_SEQUENCE_NUMBER, action.end_sequence_number);
        append_pair(
            &mut data,
            keys::TIME_1,
            action.end_time.duration_since(action.start_time).as_millis() as i64,
        );

        let record_size = data.len();
        self.cache
            .add_action_data(self.key, action.start_time, data, action.id);
        tracing::trace!(action_id = action.id, record_size, "buffered action record");
    }

    /// Writes a 32-bit integer value record.
    pub fn report_int_value(&self, action_id: i32, name: &str, value: i32) {
        self.report_value(action_id, name, EventType::ValueInt, &value.to_string());
    }

    /// Writes a 64-bit integer value record.
    pub fn report_long_value(&self, action_id: i32, name: &str, value: i64) {
        self.report_value(action_id, name, EventType::ValueInt, &value.to_string());
    }

    /// Writes a double value record.
    pub fn report_double_value(&self, action_id: i32, name: &str, value: f64) {
        self.report_value(action_id, name, EventType::ValueDouble, &value.to_string());
    }

    /// Writes a string value record.
    pub fn report_string_value(&self, action_id: i32, name: &str, value: &str) {
        self.report_value(
            action_id,
            name,
            EventType::ValueString,
            &encode(truncate_name(value)),
        );
    }

    fn report_value(&self, action_id: i32, name: &str, event_type: EventType, wire_value: &str) {
        if name.trim().is_empty() {
            tracing::warn!("dropping value report with empty name");
            return;
        }
        if !self.privacy.is_value_reporting_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(event_type, Some(name));
        append_pair(&mut data, keys::PARENT_ACTION_ID, action_id);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));
        append_raw_pair(&mut data, keys::VALUE, wire_value);

        self.add_event_record(timestamp, data, action_id);
    }

    /// Writes a named-event record.
    pub fn report_event(&self, action_id: i32, name: &str) {
        if name.trim().is_empty() {
            tracing::warn!("dropping event report with empty name");
            return;
        }
        if !self.privacy.is_event_reporting_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(EventType::NamedEvent, Some(name));
        append_pair(&mut data, keys::PARENT_ACTION_ID, action_id);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));

        self.add_event_record(timestamp, data, action_id);
    }

    /// Writes an error record with a numeric code.
    pub fn report_error_code(&self, action_id: i32, name: &str, code: i32) {
        if name.trim().is_empty() {
            tracing::warn!("dropping error report with empty name");
            return;
        }
        if !self.privacy.is_error_reporting_allowed() || !self.is_error_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(EventType::Error, Some(name));
        append_pair(&mut data, keys::PARENT_ACTION_ID, action_id);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));
        append_pair(&mut data, keys::ERROR_VALUE, code);
        append_raw_pair(&mut data, keys::ERROR_TECHNOLOGY_TYPE, ERROR_TECHNOLOGY_TYPE);

        self.add_event_record(timestamp, data, action_id);
    }

    /// Writes an error record with cause information.
    pub fn report_error_cause(
        &self,
        action_id: i32,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stacktrace: Option<&str>,
    ) {
        if name.trim().is_empty() {
            tracing::warn!("dropping error report with empty name");
            return;
        }
        if !self.privacy.is_error_reporting_allowed() || !self.is_error_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(EventType::Exception, Some(name));
        append_pair(&mut data, keys::PARENT_ACTION_ID, action_id);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));
        if let Some(cause_name) = cause_name.filter(|s| !s.is_empty()) {
            append_encoded_pair(&mut data, keys::ERROR_VALUE, cause_name);
        }
        if let Some(description) = cause_description.filter(|s| !s.is_empty()) {
            append_encoded_pair(&mut data, keys::REASON, truncate_reason(description));
        }
        if let Some(stacktrace) = cause_stacktrace.filter(|s| !s.is_empty()) {
            append_encoded_pair(&mut data, keys::STACKTRACE, truncate_stacktrace(stacktrace));
        }
        append_raw_pair(&mut data, keys::ERROR_TECHNOLOGY_TYPE, ERROR_TECHNOLOGY_TYPE);

        self.add_event_record(timestamp, data, action_id);
    }

    /// Writes a crash record.
    pub fn report_crash(&self, name: &str, reason: &str, stacktrace: &str) {
        if name.trim().is_empty() {
            tracing::warn!("dropping crash report with empty name");
            return;
        }
        if !self.privacy.is_crash_reporting_allowed() || !self.is_crash_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(EventType::Crash, Some(name));
        append_pair(&mut data, keys::PARENT_ACTION_ID, 0);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));
        if !reason.is_empty() {
            append_encoded_pair(&mut data, keys::REASON, truncate_reason(reason));
        }
        if !stacktrace.is_empty() {
            append_encoded_pair(&mut data, keys::STACKTRACE, truncate_stacktrace(stacktrace));
        }
        append_raw_pair(&mut data, keys::ERROR_TECHNOLOGY_TYPE, ERROR_TECHNOLOGY_TYPE);

        self.add_event_record(timestamp, data, 0);
    }

    /// Writes a user-identification record.
    pub fn identify_user(&self, tag: &str) {
        if tag.trim().is_empty() {
            tracing::warn!("dropping user identification with empty tag");
            return;
        }
        if !self.privacy.is_user_identification_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let timestamp = self.current_timestamp();
        let mut data = self.basic_event_data(EventType::IdentifyUser, Some(tag));
        append_pair(&mut data, keys::PARENT_ACTION_ID, 0);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, self.next_sequence_number());
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));

        self.add_event_record(timestamp, data, 0);
    }

    /// Writes a custom-event record with a JSON payload.
    ///
    /// This is the one reporting operation with a user-visible failure: a
    /// payload over the size limit is rejected. Payload validation runs
    /// before the gates so the caller learns about oversized payloads even
    /// when the record would have been sampled out.
    pub fn send_event(
        &self,
        kind: EventKind,
        name: &str,
        attributes: &Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        let name = name.trim();
        if name.is_empty() {
            tracing::warn!("dropping custom event with empty name");
            return Ok(());
        }

        let payload = build_event_payload(kind, name, attributes, self.event_context())?;

        // Business events deliberately bypass the event privacy gate; they
        // carry operator data, not user behavior.
        if kind == EventKind::Rum && !self.privacy.is_event_reporting_allowed() {
            return Ok(());
        }
        if !self.is_data_capturing_enabled() {
            return Ok(());
        }

        let timestamp = self.current_timestamp();
        let mut data = String::new();
        append_pair(&mut data, keys::EVENT_TYPE, EventType::Event.code());
        append_encoded_pair(&mut data, keys::EVENT_PAYLOAD, &payload);

        self.add_event_record(timestamp, data, 0);
        Ok(())
    }

    fn event_context(&self) -> EventContext<'_> {
        EventContext {
            application_id: self.config.application_id(),
            instance_id: self.device_id,
            session_id: self.wire_session_number,
            app_version: self.config.application_version(),
            os_name: self.config.operating_system(),
            manufacturer: self.config.manufacturer(),
            model_id: self.config.model_id(),
            timestamp: self.current_timestamp(),
        }
    }

    /// Writes the record of a stopped web request.
    pub fn add_web_request(&self, parent_action_id: i32, request: &WebRequestData) {
        if request.url.trim().is_empty() {
            tracing::warn!("dropping web request with empty URL");
            return;
        }
        if !self.privacy.is_web_request_tracing_allowed() || !self.is_data_capturing_enabled() {
            return;
        }

        let mut data = self.basic_event_data(EventType::WebRequest, Some(&request.url));
        append_pair(&mut data, keys::PARENT_ACTION_ID, parent_action_id);
        append_pair(&mut data, keys::START_SEQUENCE_NUMBER, request.start_sequence_number);
        append_pair(&mut data, keys::TIME_0, self.time_since_session_start(request.start_time));
        append_pair(&mut data, keys::END_SEQUENCE_NUMBER, request.end_sequence_number);
        append_pair(
            &mut data,
            keys::TIME_1,
            request.end_time.duration_since(request.start_time).as_millis() as i64,
        );
        if let Some(bytes_sent) = request.bytes_sent.filter(|b| *b >= 0) {
            append_pair(&mut data, keys::BYTES_SENT, bytes_sent);
        }
        if let Some(bytes_received) = request.bytes_received.filter(|b| *b >= 0) {
            append_pair(&mut data, keys::BYTES_RECEIVED, bytes_received);
        }
        if let Some(response_code) = request.response_code.filter(|c| *c > 0) {
            append_pair(&mut data, keys::RESPONSE_CODE, response_code);
        }

        self.add_event_record(request.start_time, data, parent_action_id);
    }

    /// Builds the correlation tag for a web request.
    ///
    /// Returns the empty string when web-request tracing is not allowed, in
    /// which case no header must be attached.
    pub fn create_tag(&self, parent_action_id: i32, sequence_number: i32) -> String {
        if !self.privacy.is_web_request_tracing_allowed() {
            return String::new();
        }

        let server = self.server_config.load();
        let mut tag = format!(
            "{TAG_PREFIX}_{PROTOCOL_VERSION}_{}_{}_{}",
            server.server_id, self.device_id, self.wire_session_number,
        );
        if server.visit_store_version > 1 {
            let _ = write!(tag, "-{}", self.key.session_sequence);
        }
        let _ = write!(
            tag,
            "_{}_{}_{}_{}",
            encode(self.config.application_id()),
            parent_action_id,
            self.providers.thread_id.thread_id(),
            sequence_number,
        );
        tag
    }

    /// Purges the pending records of a canceled action.
    pub fn purge_action_data(&self, action_id: i32) {
        self.cache.remove_records_by_action(self.key, action_id);
    }

    /// Drops everything buffered for this beacon.
    pub fn clear_data(&self) {
        self.cache.delete_cache_entry(self.key);
    }

    /// Whether nothing is buffered for this beacon.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty(self.key)
    }

    /// Drains this beacon's buffered data through the given HTTP client.
    ///
    /// Chunks are built under the server-configured size bound and posted one
    /// by one. A successful exchange commits the chunk; an erroneous response
    /// or transport error restores it and aborts the loop. Returns the last
    /// response received, which may carry configuration updates.
    pub fn send(&self, http_client: &dyn HttpClient) -> Option<StatusResponse> {
        self.cache.prepare_data_for_sending(self.key);

        let mut last_response = None;
        while self.cache.has_data_for_sending(self.key) {
            let prefix = self.full_prefix();
            let max_bytes = {
                let server = self.server_config.load();
                server.beacon_size_bytes.saturating_sub(CHUNK_RESERVE_BYTES)
            };

            let Some(chunk) =
                self.cache
                    .next_beacon_chunk(self.key, &prefix, max_bytes, RECORD_DELIMITER)
            else {
                break;
            };

            match http_client.send_beacon_request(self.client_ip.as_deref(), chunk.as_bytes()) {
                Ok(response) if !response.is_erroneous() => {
                    self.cache.remove_chunked_data(self.key);
                    last_response = Some(response);
                }
                Ok(response) => {
                    tracing::debug!(
                        status = response.status_code,
                        key = %self.key,
                        "collector rejected beacon chunk, keeping it buffered"
                    );
                    self.cache.reset_chunked_data(self.key);
                    return Some(response);
                }
                Err(error) => {
                    tracing::debug!(
                        %error,
                        key = %self.key,
                        "beacon send failed, keeping chunk buffered"
                    );
                    self.cache.reset_chunked_data(self.key);
                    return last_response;
                }
            }
        }

        last_response
    }

    fn basic_event_data(&self, event_type: EventType, name: Option<&str>) -> String {
        let mut data = String::new();
        append_pair(&mut data, keys::EVENT_TYPE, event_type.code());
        if let Some(name) = name {
            append_encoded_pair(&mut data, keys::NAME, truncate_name(name));
        }
        append_pair(&mut data, keys::THREAD_ID, self.providers.thread_id.thread_id());
        data
    }

    fn add_event_record(&self, timestamp: Timestamp, data: String, action_id: i32) {
        self.cache
            .add_event_data(self.key, timestamp, data, action_id);
    }

    /// The complete beacon prefix: immutable part plus the mutable part
    /// rebuilt for this transmission.
    fn full_prefix(&self) -> String {
        let mut prefix = self.immutable_prefix.clone();
        prefix.push(RECORD_DELIMITER);
        prefix.push_str(&self.mutable_prefix());
        prefix
    }

    fn mutable_prefix(&self) -> String {
        let server = self.server_config.load();
        let mut prefix = String::new();

        append_pair(&mut prefix, keys::VISIT_STORE_VERSION, server.visit_store_version);
        if server.visit_store_version > 1 {
            append_pair(&mut prefix, keys::SESSION_SEQUENCE, self.key.session_sequence);
        }
        append_pair(
            &mut prefix,
            keys::TRANSMISSION_TIME,
            self.current_timestamp().as_millis(),
        );
        append_pair(
            &mut prefix,
            keys::SESSION_START_TIME,
            self.session_start_time.as_millis(),
        );
        append_pair(&mut prefix, keys::MULTIPLICITY, server.multiplicity);

        let connection = self.connection.lock();
        if let Some(technology) = connection.network_technology.as_deref() {
            append_encoded_pair(&mut prefix, keys::NETWORK_TECHNOLOGY, technology);
        }
        if let Some(carrier) = connection.carrier.as_deref() {
            append_encoded_pair(&mut prefix, keys::CARRIER, carrier);
        }
        if let Some(connection_type) = connection.connection_type.as_deref() {
            append_encoded_pair(&mut prefix, keys::CONNECTION_TYPE, connection_type);
        }

        prefix
    }
}

impl fmt::Debug for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Beacon")
            .field("key", &self.key)
            .field("device_id", &self.device_id)
            .field("traffic_control_value", &self.traffic_control_value)
            .finish_non_exhaustive()
    }
}

fn build_immutable_prefix(
    config: &OpenKitConfig,
    privacy: PrivacyConfig,
    device_id: i64,
    wire_session_number: i32,
    client_ip: &Option<String>,
) -> String {
    let mut prefix = String::new();
    append_pair(&mut prefix, keys::PROTOCOL_VERSION, PROTOCOL_VERSION);
    append_encoded_pair(&mut prefix, keys::AGENT_VERSION, AGENT_VERSION);
    append_encoded_pair(&mut prefix, keys::APPLICATION_ID, config.application_id());
    append_encoded_pair(&mut prefix, keys::APPLICATION_VERSION, config.application_version());
    append_pair(&mut prefix, keys::PLATFORM_TYPE, PLATFORM_TYPE_OPENKIT);
    append_raw_pair(&mut prefix, keys::AGENT_TECHNOLOGY_TYPE, AGENT_TECHNOLOGY_TYPE);
    append_pair(&mut prefix, keys::VISITOR_ID, device_id);
    append_pair(&mut prefix, keys::SESSION_NUMBER, wire_session_number);
    if let Some(client_ip) = client_ip.as_deref() {
        append_encoded_pair(&mut prefix, keys::CLIENT_IP_ADDRESS, client_ip);
    }
    if !config.operating_system().is_empty() {
        append_encoded_pair(&mut prefix, keys::DEVICE_OS, config.operating_system());
    }
    if !config.manufacturer().is_empty() {
        append_encoded_pair(&mut prefix, keys::DEVICE_MANUFACTURER, config.manufacturer());
    }
    if !config.model_id().is_empty() {
        append_encoded_pair(&mut prefix, keys::DEVICE_MODEL, config.model_id());
    }
    append_pair(
        &mut prefix,
        keys::DATA_COLLECTION_LEVEL,
        privacy.data_collection_level() as i32,
    );
    append_pair(
        &mut prefix,
        keys::CRASH_REPORTING_LEVEL,
        privacy.crash_reporting_level() as i32,
    );
    prefix
}

fn append_pair(out: &mut String, key: &str, value: impl fmt::Display) {
    if !out.is_empty() {
        out.push(RECORD_DELIMITER);
    }
    let _ = write!(out, "{key}={value}");
}

fn append_raw_pair(out: &mut String, key: &str, value: &str) {
    if !out.is_empty() {
        out.push(RECORD_DELIMITER);
    }
    out.push_str(key);
    out.push('=');
    out.push_str(value);
}

fn append_encoded_pair(out: &mut String, key: &str, value: &str) {
    append_raw_pair(out, key, &encode(value));
}


#[cfg(test)]
mod tests {
    use openrum_config::{CrashReportingLevel, DataCollectionLevel};
    use similar_asserts::assert_eq;

    use super::testutil::{test_providers, RecordingHttpClient, SettableTiming};

    use super::*;

    fn config() -> Arc<OpenKitConfig> {
        Arc::new(
            OpenKitConfig::builder("https://collector.example.com/mbeacon", "APP", 42)
                .with_application_version("1.0.0")
                .with_operating_system("linux")
                .with_manufacturer("acme")
                .with_model_id("unit-7")
                .build()
                .unwrap(),
        )
    }

    struct Fixture {
        beacon: Beacon,
        cache: Arc<BeaconCache>,
        timing: Arc<SettableTiming>,
        server: Arc<ArcSwap<ServerConfig>>,
    }

    fn fixture(privacy: PrivacyConfig) -> Fixture {
        fixture_with_server(privacy, ServerConfig::default())
    }

    fn fixture_with_server(privacy: PrivacyConfig, server_config: ServerConfig) -> Fixture {
        let cache = Arc::new(BeaconCache::new());
        let timing = SettableTiming::at(1_000);
        let server = Arc::new(ArcSwap::from_pointee(server_config));
        let beacon = Beacon::new(
            config(),
            privacy,
            Arc::clone(&server),
            Arc::clone(&cache),
            test_providers(Arc::clone(&timing)),
            17,
            0,
            None,
            999,
        );
        Fixture {
            beacon,
            cache,
            timing,
            server,
        }
    }

    fn drain(fixture: &Fixture) -> String {
        fixture.cache.prepare_data_for_sending(fixture.beacon.key());
        let chunk = fixture
            .cache
            .next_beacon_chunk(fixture.beacon.key(), "", usize::MAX, '&')
            .unwrap_or_default();
        fixture.cache.remove_chunked_data(fixture.beacon.key());
        chunk
    }

    fn full_privacy() -> PrivacyConfig {
        PrivacyConfig::new(
            DataCollectionLevel::UserBehavior,
            CrashReportingLevel::OptInCrashes,
        )
    }

    #[test]
    fn test_ids_and_sequences_start_at_one() {
        let fixture = fixture(full_privacy());
        assert_eq!(fixture.beacon.next_id(), 1);
        assert_eq!(fixture.beacon.next_id(), 2);
        assert_eq!(fixture.beacon.next_sequence_number(), 1);
        assert_eq!(fixture.beacon.next_sequence_number(), 2);
    }

    #[test]
    fn test_session_start_record() {
        let fixture = fixture(full_privacy());
        fixture.beacon.start_session();
        assert_eq!(drain(&fixture), "&et=18&it=100&pa=0&s0=1&t0=0");
    }

    #[test]
    fn test_session_end_record_has_relative_time() {
        let fixture = fixture(full_privacy());
        fixture.timing.advance(250);
        fixture.beacon.end_session();
        assert_eq!(drain(&fixture), "&et=19&it=100&pa=0&s0=1&t0=250");
    }

    #[test]
    fn test_action_record() {
        let fixture = fixture(full_privacy());
        let action = ActionData {
            id: 1,
            parent_id: 0,
            name: "Home".to_owned(),
            start_time: Timestamp::from_millis(1_000),
            end_time: Timestamp::from_millis(1_300),
            start_sequence_number: 1,
            end_sequence_number: 4,
        };
        fixture.beacon.add_action(&action);
        assert_eq!(
            drain(&fixture),
            "&et=1&na=Home&it=100&ca=1&pa=0&s0=1&t0=0&s1=4&t1=300"
        );
    }

    #[test]
    fn test_int_value_record() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_int_value(1, "views", 3);
        assert_eq!(drain(&fixture), "&et=10&na=views&it=100&pa=1&s0=1&t0=0&vl=3");
    }

    #[test]
    fn test_double_and_string_value_records() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_double_value(2, "ratio", 0.25);
        fixture.beacon.report_string_value(2, "label", "a b");
        let wire = drain(&fixture);
        assert!(wire.contains("et=11&na=ratio&it=100&pa=2&s0=1&t0=0&vl=0.25"));
        assert!(wire.contains("et=4&na=label&it=100&pa=2&s0=2&t0=0&vl=a%20b"));
    }

    #[test]
    fn test_error_code_record() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_error_code(3, "http", 404);
        assert_eq!(
            drain(&fixture),
            "&et=40&na=http&it=100&pa=3&s0=1&t0=0&ev=404&tt=c"
        );
    }

    #[test]
    fn test_exception_record_with_cause() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_error_cause(
            3,
            "boom",
            Some("PanicError"),
            Some("index out of bounds"),
            Some("frame a\nframe b"),
        );
        assert_eq!(
            drain(&fixture),
            "&et=42&na=boom&it=100&pa=3&s0=1&t0=0&ev=PanicError\
             &rs=index%20out%20of%20bounds&st=frame%20a%0Aframe%20b&tt=c"
        );
    }

    #[test]
    fn test_crash_record() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_crash("crash", "oom", "frame");
        assert_eq!(
            drain(&fixture),
            "&et=50&na=crash&it=100&pa=0&s0=1&t0=0&rs=oom&st=frame&tt=c"
        );
    }

    #[test]
    fn test_identify_user_record() {
        let fixture = fixture(full_privacy());
        fixture.beacon.identify_user("alice");
        assert_eq!(drain(&fixture), "&et=60&na=alice&it=100&pa=0&s0=1&t0=0");
    }

    #[test]
    fn test_web_request_record() {
        let fixture = fixture(full_privacy());
        let request = WebRequestData {
            url: "https://api.example.com/items".to_owned(),
            start_time: Timestamp::from_millis(1_100),
            end_time: Timestamp::from_millis(1_250),
            start_sequence_number: 2,
            end_sequence_number: 3,
            bytes_sent: Some(120),
            bytes_received: Some(3_400),
            response_code: Some(200),
        };
        fixture.beacon.add_web_request(5, &request);
        assert_eq!(
            drain(&fixture),
            "&et=30&na=https%3A%2F%2Fapi.example.com%2Fitems&it=100\
             &pa=5&s0=2&t0=100&s1=3&t1=150&bs=120&br=3400&rc=200"
        );
    }

    #[test]
    fn test_empty_names_are_dropped() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_event(1, "  ");
        fixture.beacon.report_int_value(1, "", 3);
        fixture.beacon.identify_user("");
        assert!(fixture.beacon.is_empty());
    }

    #[test]
    fn test_privacy_gate_drops_records() {
        let fixture = fixture(PrivacyConfig::new(
            DataCollectionLevel::Performance,
            CrashReportingLevel::OptInCrashes,
        ));
        // User-behavior records are denied at performance level.
        fixture.beacon.report_int_value(1, "views", 3);
        fixture.beacon.report_event(1, "clicked");
        fixture.beacon.identify_user("alice");
        let action = ActionData {
            id: 1,
            parent_id: 0,
            name: "Home".to_owned(),
            start_time: Timestamp::from_millis(1_000),
            end_time: Timestamp::from_millis(1_001),
            start_sequence_number: 1,
            end_sequence_number: 2,
        };
        fixture.beacon.add_action(&action);
        assert!(fixture.beacon.is_empty());

        // Technical records still pass.
        fixture.beacon.report_error_code(1, "http", 500);
        assert!(!fixture.beacon.is_empty());
    }

    #[test]
    fn test_data_collection_off_produces_nothing() {
        let fixture = fixture(PrivacyConfig::new(
            DataCollectionLevel::Off,
            CrashReportingLevel::Off,
        ));
        fixture.beacon.start_session();
        fixture.beacon.report_int_value(1, "views", 3);
        fixture.beacon.report_error_code(1, "err", 1);
        fixture.beacon.report_crash("c", "r", "s");
        fixture.beacon.end_session();
        assert!(fixture.beacon.is_empty());
    }

    #[test]
    fn test_capture_gate_drops_records() {
        let fixture = fixture_with_server(
            full_privacy(),
            ServerConfig {
                capture: false,
                ..ServerConfig::default()
            },
        );
        fixture.beacon.start_session();
        fixture.beacon.report_int_value(1, "views", 3);
        assert!(fixture.beacon.is_empty());
    }

    #[test]
    fn test_traffic_control_samples_out_session() {
        // The fixture's traffic-control draw is 0, so a percentage of 0
        // samples the session out entirely.
        let fixture = fixture_with_server(
            full_privacy(),
            ServerConfig {
                traffic_control_percentage: 0,
                ..ServerConfig::default()
            },
        );
        fixture.beacon.start_session();
        fixture.beacon.report_crash("c", "r", "s");
        assert!(fixture.beacon.is_empty());

        let fixture = fixture_with_server(
            full_privacy(),
            ServerConfig {
                traffic_control_percentage: 1,
                ..ServerConfig::default()
            },
        );
        fixture.beacon.start_session();
        assert!(!fixture.beacon.is_empty());
    }

    #[test]
    fn test_error_and_crash_capture_flags() {
        let fixture = fixture_with_server(
            full_privacy(),
            ServerConfig {
                capture_errors: false,
                capture_crashes: false,
                ..ServerConfig::default()
            },
        );
        fixture.beacon.report_error_code(1, "err", 1);
        fixture.beacon.report_crash("c", "r", "s");
        assert!(fixture.beacon.is_empty());
    }

    #[test]
    fn test_device_id_substituted_when_privacy_denies() {
        let fixture1 = fixture(PrivacyConfig::new(
            DataCollectionLevel::Performance,
            CrashReportingLevel::OptInCrashes,
        ));
        // The configured id is 42; the substitute handed to the fixture is 999.
        assert_eq!(fixture1.beacon.device_id(), 999);

        let fixture2 = fixture(full_privacy());
        assert_eq!(fixture2.beacon.device_id(), 42);
    }

    #[test]
    fn test_create_tag_format() {
        let fixture = fixture(full_privacy());
        assert_eq!(fixture.beacon.create_tag(7, 3), "MT_3_1_42_17_APP_7_100_3");
    }

    #[test]
    fn test_create_tag_with_session_sequence() {
        let fixture = fixture_with_server(
            full_privacy(),
            ServerConfig {
                visit_store_version: 2,
                server_id: 5,
                ..ServerConfig::default()
            },
        );
        assert_eq!(fixture.beacon.create_tag(7, 3), "MT_3_5_42_17-0_APP_7_100_3");
    }

    #[test]
    fn test_create_tag_empty_without_web_request_privacy() {
        let fixture = fixture(PrivacyConfig::new(
            DataCollectionLevel::Off,
            CrashReportingLevel::Off,
        ));
        assert_eq!(fixture.beacon.create_tag(7, 3), "");
    }

    #[test]
    fn test_send_event_payload_too_large() {
        let fixture = fixture(full_privacy());
        let mut attributes = Map::new();
        attributes.insert("blob".to_owned(), Value::String("x".repeat(17_000)));

        let result = fixture
            .beacon
            .send_event(EventKind::Rum, "big", &attributes);
        assert!(result.is_err());
        assert!(fixture.beacon.is_empty());
    }

    #[test]
    fn test_send_event_record() {
        let fixture = fixture(full_privacy());
        fixture
            .beacon
            .send_event(EventKind::Rum, "checkout", &Map::new())
            .unwrap();

        let wire = drain(&fixture);
        assert!(wire.starts_with("&et=98&pl="));
        assert!(wire.contains("event.name"));
    }

    #[test]
    fn test_biz_event_bypasses_event_privacy() {
        let fixture = fixture(PrivacyConfig::new(
            DataCollectionLevel::Performance,
            CrashReportingLevel::OptInCrashes,
        ));
        fixture
            .beacon
            .send_event(EventKind::Rum, "evt", &Map::new())
            .unwrap();
        assert!(fixture.beacon.is_empty());

        fixture
            .beacon
            .send_event(EventKind::Biz, "purchase", &Map::new())
            .unwrap();
        assert!(!fixture.beacon.is_empty());
    }

    #[test]
    fn test_purge_action_data() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_event(7, "doomed");
        fixture.beacon.report_event(3, "kept");
        fixture.beacon.purge_action_data(7);

        let wire = drain(&fixture);
        assert!(!wire.contains("doomed"));
        assert!(wire.contains("kept"));
    }

    #[test]
    fn test_send_drains_cache_on_success() {
        let fixture = fixture(full_privacy());
        fixture.beacon.start_session();
        fixture.beacon.report_event(1, "clicked");

        let client = RecordingHttpClient::ok();
        let response = fixture.beacon.send(&client);
        assert_eq!(response.unwrap().status_code, 200);
        assert!(fixture.beacon.is_empty());

        let payloads = client.payloads();
        assert_eq!(payloads.len(), 1);
        let payload = &payloads[0];
        // The prefix carries the immutable and mutable basic data.
        assert!(payload.starts_with("vv=3&va="));
        assert!(payload.contains("&ap=APP&"));
        assert!(payload.contains("&vi=42&sn=17&"));
        assert!(payload.contains("&os=linux&mf=acme&md=unit-7&dl=2&cl=2"));
        assert!(payload.contains("&vs=1&tx="));
        assert!(payload.contains("&tv=1000&mp=1"));
        assert!(payload.contains("&et=18&"));
        assert!(payload.contains("&et=12&na=clicked&"));
    }

    #[test]
    fn test_send_keeps_chunk_on_erroneous_response() {
        let fixture = fixture(full_privacy());
        fixture.beacon.start_session();

        let client = RecordingHttpClient::with_responses([Ok(StatusResponse {
            status_code: 500,
            attributes: Default::default(),
        })]);
        let response = fixture.beacon.send(&client);
        assert_eq!(response.unwrap().status_code, 500);
        assert!(!fixture.beacon.is_empty());

        // A later attempt ships the identical data.
        let client = RecordingHttpClient::ok();
        fixture.beacon.send(&client);
        assert!(fixture.beacon.is_empty());
        assert!(client.payloads()[0].contains("&et=18&"));
    }

    #[test]
    fn test_send_chunks_under_size_bound() {
        let fixture = fixture_with_server(
            full_privacy(),
            ServerConfig {
                beacon_size_bytes: CHUNK_RESERVE_BYTES + 400,
                ..ServerConfig::default()
            },
        );
        for i in 0..20 {
            fixture.beacon.report_event(1, &format!("event-number-{i}"));
        }

        let client = RecordingHttpClient::ok();
        fixture.beacon.send(&client);
        let payloads = client.payloads();
        assert!(payloads.len() > 1);
        for payload in &payloads {
            assert!(payload.len() <= 400);
            assert!(payload.starts_with("vv=3&"));
        }
        assert!(fixture.beacon.is_empty());
    }

    #[test]
    fn test_connection_metadata_in_mutable_prefix() {
        let fixture = fixture(full_privacy());
        fixture.beacon.report_network_technology(Some("5G".to_owned()));
        fixture.beacon.report_carrier(Some("acme tel".to_owned()));
        fixture.beacon.report_connection_type(Some("m".to_owned()));
        fixture.beacon.report_event(1, "e");

        let client = RecordingHttpClient::ok();
        fixture.beacon.send(&client);
        let payload = &client.payloads()[0];
        assert!(payload.contains("&np=5G&cr=acme%20tel&ct=m&"));
    }

    #[test]
    fn test_traffic_control_convergence() {
        // Over many sessions with random traffic-control draws, the fraction
        // of capturing sessions approaches the configured percentage.
        let server_config = Arc::new(ArcSwap::from_pointee(ServerConfig {
            traffic_control_percentage: 30,
            ..ServerConfig::default()
        }));
        let cache = Arc::new(BeaconCache::new());
        let timing = SettableTiming::at(1_000);

        let samples = 2_000;
        let mut captured = 0;
        for session_number in 0..samples {
            let providers = Providers {
                timing: Arc::clone(&timing) as Arc<dyn TimingProvider>,
                thread_id: Arc::new(testutil::FixedThreadId(100)),
                random: Arc::new(DefaultRandom),
            };
            let beacon = Beacon::new(
                config(),
                full_privacy(),
                Arc::clone(&server_config),
                Arc::clone(&cache),
                providers,
                session_number,
                0,
                None,
                1,
            );
            if beacon.is_data_capturing_enabled() {
                captured += 1;
            }
        }

        let fraction = captured as f64 / samples as f64;
        assert!(
            (0.25..=0.35).contains(&fraction),
            "fraction {fraction} too far from 0.30"
        );
    }

    #[test]
    fn test_sequence_numbers_unique_across_threads() {
        let fixture = Arc::new(fixture(full_privacy()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let fixture = Arc::clone(&fixture);
            handles.push(std::thread::spawn(move || {
                (0..250)
                    .map(|_| fixture.beacon.next_sequence_number())
                    .collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1_000);
    }
}
