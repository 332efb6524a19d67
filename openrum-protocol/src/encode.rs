use std::borrow::Cow;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// The characters escaped in beacon values.
///
/// This is ordinary query-string encoding with `_` added to the reserved
/// set: the underscore delimits the fields of the web-request tag, so it must
/// never appear verbatim inside a value.
const WIRE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes a value for the beacon wire format.
pub fn encode(value: &str) -> Cow<'_, str> {
    utf8_percent_encode(value, WIRE_SET).into()
}
