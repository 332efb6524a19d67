use std::time::Duration;

use openrum_protocol::ResponseAttributes;
use serde::{Deserialize, Serialize};

/// The default maximum beacon size in bytes (30 KiB).
const DEFAULT_BEACON_SIZE: usize = 30 * 1024;

/// The default send interval.
const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(120);

/// The default maximum session duration.
const DEFAULT_MAX_SESSION_DURATION: Duration = Duration::from_secs(360 * 60);

/// The default session idle timeout.
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

/// The capture and sampling configuration owned by the collector.
///
/// A fresh agent starts from [`ServerConfig::default`] and replaces its
/// snapshot whenever a status response carries attributes. Snapshots are
/// immutable; merging produces a new value that is swapped in atomically so
/// readers always observe a consistent configuration.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether the agent may capture and transmit data at all.
    pub capture: bool,
    /// Whether error records may be transmitted.
    pub capture_errors: bool,
    /// Whether crash records may be transmitted.
    pub capture_crashes: bool,
    /// Maximum size of one beacon POST body in bytes.
    pub beacon_size_bytes: usize,
    /// The server id addressed by subsequent requests.
    pub server_id: i32,
    /// Percentage of sessions allowed to transmit, in `[0, 100]`.
    pub traffic_control_percentage: i32,
    /// Interval between beacon sends.
    pub send_interval: Duration,
    /// Weight used by the collector to extrapolate sampled-out sessions.
    pub multiplicity: i32,
    /// Number of top-level events after which a session is split.
    ///
    /// Zero or negative disables splitting by events.
    pub max_events_per_session: i32,
    /// Wall-clock duration after which a session is split.
    pub max_session_duration: Duration,
    /// Idle duration after which a session is split.
    pub session_timeout: Duration,
    /// Visit store version; values above 1 enable session-split tagging.
    pub visit_store_version: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capture: true,
            capture_errors: true,
            capture_crashes: true,
            beacon_size_bytes: DEFAULT_BEACON_SIZE,
            server_id: 1,
            traffic_control_percentage: 100,
            send_interval: DEFAULT_SEND_INTERVAL,
            multiplicity: 1,
            max_events_per_session: 0,
            max_session_duration: DEFAULT_MAX_SESSION_DURATION,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            visit_store_version: 1,
        }
    }
}

impl ServerConfig {
    /// Merges a status-response delta over this snapshot.
    ///
    /// Attributes present in the response win; everything else is carried
    /// over unchanged.
    pub fn merge(&self, attributes: &ResponseAttributes) -> Self {
        Self {
            capture: attributes.capture.unwrap_or(self.capture),
            capture_errors: attributes.capture_errors.unwrap_or(self.capture_errors),
            capture_crashes: attributes.capture_crashes.unwrap_or(self.capture_crashes),
            beacon_size_bytes: attributes.beacon_size_bytes.unwrap_or(self.beacon_size_bytes),
            server_id: attributes.server_id.unwrap_or(self.server_id),
            traffic_control_percentage: attributes
                .traffic_control_percentage
                .unwrap_or(self.traffic_control_percentage),
            send_interval: attributes.send_interval.unwrap_or(self.send_interval),
            multiplicity: attributes.multiplicity.unwrap_or(self.multiplicity),
            max_events_per_session: attributes
                .max_events_per_session
                .unwrap_or(self.max_events_per_session),
            max_session_duration: attributes
                .max_session_duration
                .unwrap_or(self.max_session_duration),
            session_timeout: attributes.session_timeout.unwrap_or(self.session_timeout),
            visit_store_version: attributes
                .visit_store_version
                .unwrap_or(self.visit_store_version),
        }
    }

    /// Whether regular data records may be transmitted.
    ///
    /// Multiplicity zero is an authoritative off-switch from the collector.
    pub fn is_sending_data_allowed(&self) -> bool {
        self.capture && self.multiplicity > 0
    }

    /// Whether error records may be transmitted.
    pub fn is_sending_errors_allowed(&self) -> bool {
        self.is_sending_data_allowed() && self.capture_errors
    }

    /// Whether crash records may be transmitted.
    pub fn is_sending_crashes_allowed(&self) -> bool {
        self.is_sending_data_allowed() && self.capture_crashes
    }

    /// Whether sessions are split after a fixed number of top-level events.
    pub fn is_session_split_by_events_enabled(&self) -> bool {
        self.max_events_per_session > 0
    }
}
