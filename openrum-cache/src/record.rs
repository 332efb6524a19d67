use std::fmt;

use openrum_common::Timestamp;

/// Identifies one buffered data stream in the cache.
///
/// A session produces one stream per split: the session number stays fixed
/// while the sequence counts the splits.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BeaconKey {
    /// The session number.
    pub session_number: i32,
    /// The session sequence, starting at 0 and incremented per split.
    pub session_sequence: i32,
}

impl BeaconKey {
    /// Creates a key from session number and sequence.
    pub fn new(session_number: i32, session_sequence: i32) -> Self {
        Self {
            session_number,
            session_sequence,
        }
    }
}

impl fmt::Display for BeaconKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_number, self.session_sequence)
    }
}

/// One serialized beacon record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BeaconRecord {
    /// The time the record was produced.
    pub timestamp: Timestamp,
    /// The serialized `key=value` data.
    pub data: String,
    /// The action the record belongs to, or 0 for session-level records.
    ///
    /// Used to purge the pending data of a canceled action.
    pub action_id: i32,
}

impl BeaconRecord {
    /// Creates a record.
    pub fn new(timestamp: Timestamp, data: impl Into<String>, action_id: i32) -> Self {
        Self {
            timestamp,
            data: data.into(),
            action_id,
        }
    }

    /// The number of bytes this record contributes to the cache size.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}
