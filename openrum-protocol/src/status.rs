use std::time::Duration;

/// An error parsing a collector status response.
///
/// A response that fails to parse is treated as erroneous by the sender, so
/// the beacon chunk that triggered it stays buffered for retry.
#[derive(Debug, thiserror::Error)]
pub enum ParseStatusError {
    /// A line did not have the `key=value` shape.
    #[error("malformed status line: {0:?}")]
    MalformedLine(String),
    /// A known key carried a value that does not parse.
    #[error("invalid value for status key {key:?}: {value:?}")]
    InvalidValue {
        /// The two-letter response key.
        key: String,
        /// The raw value.
        value: String,
    },
}

/// Returns whether an HTTP status code makes a beacon exchange erroneous.
///
/// Everything outside `[200, 400)` counts as an error and leaves the beacon
/// chunk buffered for retry.
pub fn is_erroneous_status(status: u16) -> bool {
    !(200..400).contains(&status)
}

/// The configuration attributes a collector may return in a status response.
///
/// Both the new-session request and beacon POSTs can carry these. Every field
/// is optional; absent keys leave the current server configuration untouched
/// when the delta is merged. Unknown keys are skipped for forward
/// compatibility.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseAttributes {
    /// `cp` — whether the agent may capture at all.
    pub capture: Option<bool>,
    /// `er` — whether errors may be captured.
    pub capture_errors: Option<bool>,
    /// `cr` — whether crashes may be captured.
    pub capture_crashes: Option<bool>,
    /// `bl` — maximum beacon size in bytes.
    pub beacon_size_bytes: Option<usize>,
    /// `id` — the server id to address subsequent requests to.
    pub server_id: Option<i32>,
    /// `tc` — traffic-control percentage in `[0, 100]`.
    pub traffic_control_percentage: Option<i32>,
    /// `sr` — send interval, transmitted in seconds.
    pub send_interval: Option<Duration>,
    /// `mp` — multiplicity.
    pub multiplicity: Option<i32>,
    /// `ss` — number of top-level events after which a session is split.
    pub max_events_per_session: Option<i32>,
    /// `md` — maximum session duration, transmitted in minutes.
    pub max_session_duration: Option<Duration>,
    /// `st` — session idle timeout, transmitted in seconds.
    pub session_timeout: Option<Duration>,
    /// `vs` — visit store version.
    pub visit_store_version: Option<i32>,
}

impl ResponseAttributes {
    /// Parses a status-response body.
    ///
    /// The body consists of `key=value` pairs separated by line breaks or
    /// `&`. An empty body parses into the empty delta.
    pub fn parse(body: &str) -> Result<Self, ParseStatusError> {
        let mut attributes = Self::default();

        for pair in body.split(['\n', '&']) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ParseStatusError::MalformedLine(pair.to_owned()))?;

            match key {
                "cp" => attributes.capture = Some(parse_flag(key, value)?),
                "er" => attributes.capture_errors = Some(parse_flag(key, value)?),
                "cr" => attributes.capture_crashes = Some(parse_flag(key, value)?),
                "bl" => attributes.beacon_size_bytes = Some(parse_number::<usize>(key, value)?),
                "id" => attributes.server_id = Some(parse_number(key, value)?),
                "tc" => attributes.traffic_control_percentage = Some(parse_number(key, value)?),
                "sr" => {
                    let seconds = parse_number::<u64>(key, value)?;
                    attributes.send_interval = Some(Duration::from_secs(seconds));
                }
                "mp" => attributes.multiplicity = Some(parse_number(key, value)?),
                "ss" => attributes.max_events_per_session = Some(parse_number(key, value)?),
                "md" => {
                    let minutes = parse_number::<u64>(key, value)?;
                    attributes.max_session_duration = Some(Duration::from_secs(minutes * 60));
                }
                "st" => {
                    let seconds = parse_number::<u64>(key, value)?;
                    attributes.session_timeout = Some(Duration::from_secs(seconds));
                }
                "vs" => attributes.visit_store_version = Some(parse_number(key, value)?),
                // The collector echoes the request type; other keys belong to
                // newer protocol revisions.
                _ => continue,
            }
        }

        Ok(attributes)
    }

    /// Returns whether this delta carries no attributes at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ParseStatusError> {
    value.parse().map_err(|_| ParseStatusError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ParseStatusError> {
    Ok(parse_number::<i32>(key, value)? != 0)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_full_response() {
        let body = "type=m&cp=1&er=1&cr=0&bl=30720&id=5&tc=75&sr=120&mp=2&ss=10&md=360&st=600&vs=2";
        let attributes = ResponseAttributes::parse(body).unwrap();

        assert_eq!(
            attributes,
            ResponseAttributes {
                capture: Some(true),
                capture_errors: Some(true),
                capture_crashes: Some(false),
                beacon_size_bytes: Some(30_720),
                server_id: Some(5),
                traffic_control_percentage: Some(75),
                send_interval: Some(Duration::from_secs(120)),
                multiplicity: Some(2),
                max_events_per_session: Some(10),
                max_session_duration: Some(Duration::from_secs(360 * 60)),
                session_timeout: Some(Duration::from_secs(600)),
                visit_store_version: Some(2),
            }
        );
    }

    #[test]
    fn test_parse_line_separated() {
        let body = "cp=1\nbl=16384\n";
        let attributes = ResponseAttributes::parse(body).unwrap();
        assert_eq!(attributes.capture, Some(true));
        assert_eq!(attributes.beacon_size_bytes, Some(16_384));
        assert_eq!(attributes.server_id, None);
    }

    #[test]
    fn test_parse_empty_body() {
        let attributes = ResponseAttributes::parse("").unwrap();
        assert!(attributes.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        let attributes = ResponseAttributes::parse("zz=1&cp=0").unwrap();
        assert_eq!(attributes.capture, Some(false));
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(ResponseAttributes::parse("cp").is_err());
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        assert!(ResponseAttributes::parse("bl=many").is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(!is_erroneous_status(200));
        assert!(!is_erroneous_status(301));
        assert!(is_erroneous_status(199));
        assert!(is_erroneous_status(400));
        assert!(is_erroneous_status(429));
        assert!(is_erroneous_status(500));
    }
}
