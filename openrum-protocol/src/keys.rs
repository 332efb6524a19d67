//! The two-letter keys of the beacon wire format.

// Basic beacon keys, part of the immutable and mutable prefixes.

/// Protocol version.
pub const PROTOCOL_VERSION: &str = "vv";
/// Agent version.
pub const AGENT_VERSION: &str = "va";
/// Application id.
pub const APPLICATION_ID: &str = "ap";
/// Application version.
pub const APPLICATION_VERSION: &str = "vn";
/// Platform type.
pub const PLATFORM_TYPE: &str = "pt";
/// Agent technology type.
pub const AGENT_TECHNOLOGY_TYPE: &str = "tt";
/// Visitor (device) id.
pub const VISITOR_ID: &str = "vi";
/// Session number.
pub const SESSION_NUMBER: &str = "sn";
/// Session sequence number, transmitted when the visit store supports splits.
pub const SESSION_SEQUENCE: &str = "ss";
/// Client IP address.
pub const CLIENT_IP_ADDRESS: &str = "ip";
/// Multiplicity.
pub const MULTIPLICITY: &str = "mp";
/// Data collection level.
pub const DATA_COLLECTION_LEVEL: &str = "dl";
/// Crash reporting level.
pub const CRASH_REPORTING_LEVEL: &str = "cl";
/// Visit store version.
pub const VISIT_STORE_VERSION: &str = "vs";

// Device and timing metadata.

/// Connection type.
pub const CONNECTION_TYPE: &str = "ct";
/// Network technology.
pub const NETWORK_TECHNOLOGY: &str = "np";
/// Carrier.
pub const CARRIER: &str = "cr";
/// Device operating system.
pub const DEVICE_OS: &str = "os";
/// Device manufacturer.
pub const DEVICE_MANUFACTURER: &str = "mf";
/// Device model id.
pub const DEVICE_MODEL: &str = "md";
/// Session start time in epoch milliseconds.
pub const SESSION_START_TIME: &str = "tv";
/// Transmission time in epoch milliseconds.
pub const TRANSMISSION_TIME: &str = "tx";

// Per-record keys.

/// Event type.
pub const EVENT_TYPE: &str = "et";
/// Name.
pub const NAME: &str = "na";
/// Thread id.
pub const THREAD_ID: &str = "it";
/// Action id.
pub const ACTION_ID: &str = "ca";
/// Parent action id.
pub const PARENT_ACTION_ID: &str = "pa";
/// Start sequence number.
pub const START_SEQUENCE_NUMBER: &str = "s0";
/// End sequence number.
pub const END_SEQUENCE_NUMBER: &str = "s1";
/// Time relative to the session start.
pub const TIME_0: &str = "t0";
/// Duration of the record (actions and web requests).
pub const TIME_1: &str = "t1";
/// Reported value.
pub const VALUE: &str = "vl";
/// Error value (numeric code or cause name).
pub const ERROR_VALUE: &str = "ev";
/// Reason (errors and crashes).
pub const REASON: &str = "rs";
/// Stack trace.
pub const STACKTRACE: &str = "st";
/// Error technology type. Shares its literal with the basic agent
/// technology type key; the two never occur in the same scope.
pub const ERROR_TECHNOLOGY_TYPE: &str = "tt";
/// HTTP response code of a traced web request.
pub const RESPONSE_CODE: &str = "rc";
/// Bytes sent by a traced web request.
pub const BYTES_SENT: &str = "bs";
/// Bytes received by a traced web request.
pub const BYTES_RECEIVED: &str = "br";
/// JSON payload of a custom event.
pub const EVENT_PAYLOAD: &str = "pl";
