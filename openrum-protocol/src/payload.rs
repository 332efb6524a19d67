//! JSON payload assembly for custom events.
//!
//! `send_event` and `send_biz_event` transmit a single JSON object under the
//! `pl` key of an `et=98` record. The object is built from the caller's
//! attributes, cleaned of reserved keys, and enriched with the attributes the
//! collector requires.

use openrum_common::Timestamp;
use serde_json::{Map, Value};

/// Maximum serialized size of an event payload in bytes.
pub const MAX_EVENT_PAYLOAD_BYTES: usize = 16 * 1024;

/// Schema version transmitted with every event payload.
pub const EVENT_SCHEMA_VERSION: &str = "1.2";

/// An error building an event payload.
#[derive(Debug, thiserror::Error)]
pub enum EventPayloadError {
    /// The serialized payload exceeds [`MAX_EVENT_PAYLOAD_BYTES`].
    ///
    /// This is the one failure of the reporting API that is surfaced to the
    /// caller instead of being absorbed.
    #[error("event payload of {0} bytes exceeds the {MAX_EVENT_PAYLOAD_BYTES} byte limit")]
    TooLarge(usize),
}

/// Distinguishes the two kinds of custom events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// A `send_event` call; the name travels as `event.name`.
    Rum,
    /// A `send_biz_event` call; the type travels as `event.type`.
    Biz,
}

impl EventKind {
    fn kind_value(self) -> &'static str {
        match self {
            EventKind::Rum => "RUM_EVENT",
            EventKind::Biz => "BIZ_EVENT",
        }
    }

    fn name_key(self) -> &'static str {
        match self {
            EventKind::Rum => "event.name",
            EventKind::Biz => "event.type",
        }
    }
}

/// The session-scoped metadata merged into every event payload.
#[derive(Clone, Copy, Debug)]
pub struct EventContext<'a> {
    /// The application id.
    pub application_id: &'a str,
    /// The device id in effect for the session.
    pub instance_id: i64,
    /// The session number in effect for the session.
    pub session_id: i32,
    /// The application version.
    pub app_version: &'a str,
    /// The operating system name.
    pub os_name: &'a str,
    /// The device manufacturer.
    pub manufacturer: &'a str,
    /// The device model id.
    pub model_id: &'a str,
    /// The report time of the event.
    pub timestamp: Timestamp,
}

/// Builds the JSON payload of a custom event.
///
/// Caller attributes are cleaned first: the key `dt` and any key below the
/// `dt.` namespace are reserved for the agent and dropped with a warning.
/// The forced attributes are then inserted on top, so a caller can never
/// override them. If any numeric leaf of the caller attributes is non-finite,
/// `dt.rum.has_nfn_values` is set.
pub fn build_event_payload(
    kind: EventKind,
    name: &str,
    attributes: &Map<String, Value>,
    context: EventContext<'_>,
) -> Result<String, EventPayloadError> {
    let mut payload = clean_reserved_attributes(attributes);
    let has_nfn = contains_non_finite(attributes);

    if kind == EventKind::Biz {
        // The size of the caller attributes as they would serialize on their
        // own, before enrichment.
        let size = Value::Object(payload.clone()).to_string().len();
        payload.insert("dt.rum.custom_attributes_size".to_owned(), size.into());
    }

    payload.insert(kind.name_key().to_owned(), name.into());
    payload.insert("event.kind".to_owned(), kind.kind_value().into());
    payload.insert(
        "dt.rum.application.id".to_owned(),
        context.application_id.into(),
    );
    payload.insert(
        "dt.rum.instance.id".to_owned(),
        context.instance_id.to_string().into(),
    );
    payload.insert(
        "dt.rum.sid".to_owned(),
        context.session_id.to_string().into(),
    );
    payload.insert(
        "dt.rum.schema_version".to_owned(),
        EVENT_SCHEMA_VERSION.into(),
    );
    payload.insert("timestamp".to_owned(), context.timestamp.as_nanos().into());
    payload.insert("os.name".to_owned(), context.os_name.into());
    payload.insert("device.manufacturer".to_owned(), context.manufacturer.into());
    payload.insert(
        "device.model.identifier".to_owned(),
        context.model_id.into(),
    );
    payload.insert("app.version".to_owned(), context.app_version.into());

    if has_nfn {
        payload.insert("dt.rum.has_nfn_values".to_owned(), true.into());
    }

    let serialized = Value::Object(payload).to_string();
    if serialized.len() > MAX_EVENT_PAYLOAD_BYTES {
        return Err(EventPayloadError::TooLarge(serialized.len()));
    }

    Ok(serialized)
}

fn clean_reserved_attributes(attributes: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in attributes {
        if key == "dt" || key.starts_with("dt.") {
            tracing::warn!(attribute = key.as_str(), "dropping reserved event attribute");
            continue;
        }
        cleaned.insert(key.clone(), value.clone());
    }
    cleaned
}

/// Returns whether any numeric leaf of the value tree is NaN or infinite.
///
/// The standard `serde_json` value model cannot represent non-finite floats,
/// but the payload builder accepts any `Value` source, so the walk stays in
/// place to honor the contract for representations that can.
fn contains_non_finite(attributes: &Map<String, Value>) -> bool {
    fn walk(value: &Value) -> bool {
        match value {
            Value::Number(number) => number.as_f64().is_some_and(|float| !float.is_finite()),
            Value::Array(values) => values.iter().any(walk),
            Value::Object(object) => object.values().any(walk),
            _ => false,
        }
    }

    attributes.values().any(walk)
}
