//! Wire-protocol primitives for the openrum beacon.
//!
//! The beacon wire format is a sequence of ASCII `key=value` pairs joined by
//! `&`, where keys are two-letter codes and values are percent-encoded UTF-8.
//! This crate owns everything about that format that does not require session
//! state: the key constants, the integer event-type codes, percent encoding,
//! name truncation, parsing of collector status responses, and the JSON
//! payload assembly for custom events.

#![warn(missing_docs)]

mod encode;
mod event_type;
pub mod keys;
pub mod payload;
mod status;
mod truncate;

pub use self::encode::encode;
pub use self::event_type::EventType;
pub use self::status::{is_erroneous_status, ParseStatusError, ResponseAttributes};
pub use self::truncate::{
    truncate_name, truncate_reason, truncate_stacktrace, MAX_NAME_LENGTH, MAX_REASON_LENGTH,
    MAX_STACKTRACE_LENGTH,
};

/// Version of the beacon protocol spoken by this agent.
pub const PROTOCOL_VERSION: i32 = 3;

/// Platform type identifier for OpenKit-style agents.
pub const PLATFORM_TYPE_OPENKIT: i32 = 1;

/// Agent technology type transmitted under the `tt` basic key.
pub const AGENT_TECHNOLOGY_TYPE: &str = "okrust";

/// Technology type transmitted with error and crash records.
pub const ERROR_TECHNOLOGY_TYPE: &str = "c";

/// Prefix of the web-request correlation tag.
pub const TAG_PREFIX: &str = "MT";

/// Name of the HTTP header carrying the web-request correlation tag.
pub const WEBREQUEST_TAG_HEADER: &str = "X-dynaTrace";
