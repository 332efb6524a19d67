use std::collections::VecDeque;

use openrum_common::Timestamp;

use crate::record::BeaconRecord;

/// The buffered records of one beacon key.
///
/// Records live in two stages. Report calls append to the *active* buffers;
/// [`prepare_data_for_sending`](Self::prepare_data_for_sending) moves them
/// into the *sending* buffers, from which chunks are built. Records of the
/// chunk currently in flight are parked separately so that a transport
/// failure can restore them in order.
///
/// Event records are chunked before action records; within each class,
/// append order is preserved end to end.
#[derive(Debug, Default)]
pub(crate) struct BeaconCacheEntry {
    active_events: VecDeque<BeaconRecord>,
    active_actions: VecDeque<BeaconRecord>,
    sending_events: VecDeque<BeaconRecord>,
    sending_actions: VecDeque<BeaconRecord>,
    chunk_events: Vec<BeaconRecord>,
    chunk_actions: Vec<BeaconRecord>,
}

impl BeaconCacheEntry {
    /// Appends an event record to the active buffer.
    ///
    /// Returns the record's size contribution in bytes.
    pub fn add_event(&mut self, record: BeaconRecord) -> usize {
        let size = record.size_bytes();
        self.active_events.push_back(record);
        size
    }

    /// Appends an action record to the active buffer.
    ///
    /// Returns the record's size contribution in bytes.
    pub fn add_action(&mut self, record: BeaconRecord) -> usize {
        let size = record.size_bytes();
        self.active_actions.push_back(record);
        size
    }

    /// Moves all active records into the sending stage.
    ///
    /// Returns the number of bytes moved; the caller subtracts them from the
    /// evictable-size counter.
    pub fn prepare_data_for_sending(&mut self) -> usize {
        let mut moved = 0;
        for record in self.active_events.drain(..) {
            moved += record.size_bytes();
            self.sending_events.push_back(record);
        }
        for record in self.active_actions.drain(..) {
            moved += record.size_bytes();
            self.sending_actions.push_back(record);
        }
        moved
    }

    /// Whether the sending stage holds records.
    pub fn has_data_to_send(&self) -> bool {
        !self.sending_events.is_empty() || !self.sending_actions.is_empty()
    }

    /// Whether this entry holds no records in any stage.
    pub fn is_empty(&self) -> bool {
        self.active_events.is_empty()
            && self.active_actions.is_empty()
            && !self.has_data_to_send()
            && self.chunk_events.is_empty()
            && self.chunk_actions.is_empty()
    }

    /// Builds the next chunk from the sending stage.
    ///
    /// The chunk starts with `prefix`; records are appended joined by
    /// `delimiter` while the chunk stays within `max_bytes`. The first record
    /// is appended unconditionally so that an oversized single record cannot
    /// wedge the entry forever. Returns `None` when there is nothing to send.
    ///
    /// The records of the returned chunk stay parked in this entry until the
    /// caller either commits them with [`remove_chunk`](Self::remove_chunk)
    /// or restores them with [`reset_chunk`](Self::reset_chunk).
    pub fn next_chunk(&mut self, prefix: &str, max_bytes: usize, delimiter: char) -> Option<String> {
        if !self.chunk_events.is_empty() || !self.chunk_actions.is_empty() {
            // A chunk is already in flight; hand out the identical payload.
            return Some(self.rebuild_chunk(prefix, delimiter));
        }

        if !self.has_data_to_send() {
            return None;
        }

        let mut chunk = String::from(prefix);
        let mut appended = false;

        let full = fill_chunk(
            &mut self.sending_events,
            &mut self.chunk_events,
            &mut chunk,
            &mut appended,
            max_bytes,
            delimiter,
        );
        if !full {
            fill_chunk(
                &mut self.sending_actions,
                &mut self.chunk_actions,
                &mut chunk,
                &mut appended,
                max_bytes,
                delimiter,
            );
        }

        Some(chunk)
    }

    fn rebuild_chunk(&self, prefix: &str, delimiter: char) -> String {
        let mut chunk = String::from(prefix);
        for record in self.chunk_events.iter().chain(self.chunk_actions.iter()) {
            chunk.push(delimiter);
            chunk.push_str(&record.data);
        }
        chunk
    }

    /// Restores the in-flight chunk to the front of the sending stage.
    pub fn reset_chunk(&mut self) {
        for record in self.chunk_actions.drain(..).rev() {
            self.sending_actions.push_front(record);
        }
        for record in self.chunk_events.drain(..).rev() {
            self.sending_events.push_front(record);
        }
    }

    /// Drops the in-flight chunk after a successful transmission.
    pub fn remove_chunk(&mut self) {
        self.chunk_events.clear();
        self.chunk_actions.clear();
    }

    /// Removes active records belonging to the given action.
    ///
    /// Returns the number of bytes removed. Records already staged for
    /// sending are past the point of no return and stay untouched.
    pub fn remove_records_by_action(&mut self, action_id: i32) -> usize {
        let mut removed = 0;
        for buffer in [&mut self.active_events, &mut self.active_actions] {
            buffer.retain(|record| {
                if record.action_id == action_id {
                    removed += record.size_bytes();
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    /// Removes active records produced before `min_timestamp`.
    ///
    /// Returns (records removed, bytes removed).
    pub fn remove_records_older_than(&mut self, min_timestamp: Timestamp) -> (usize, usize) {
        let mut records = 0;
        let mut bytes = 0;
        for buffer in [&mut self.active_events, &mut self.active_actions] {
            buffer.retain(|record| {
                if record.timestamp < min_timestamp {
                    records += 1;
                    bytes += record.size_bytes();
                    false
                } else {
                    true
                }
            });
        }
        (records, bytes)
    }

    /// Removes up to `count` of the oldest active records.
    ///
    /// When an action and an event record carry the same timestamp, the
    /// action record goes first. Returns (records removed, bytes removed).
    pub fn remove_oldest_records(&mut self, count: usize) -> (usize, usize) {
        let mut records = 0;
        let mut bytes = 0;

        while records < count {
            let action_ts = self.active_actions.front().map(|r| r.timestamp);
            let event_ts = self.active_events.front().map(|r| r.timestamp);

            let removed = match (action_ts, event_ts) {
                (Some(action), Some(event)) if action <= event => self.active_actions.pop_front(),
                (_, Some(_)) => self.active_events.pop_front(),
                (Some(_), None) => self.active_actions.pop_front(),
                (None, None) => break,
            };

            if let Some(record) = removed {
                records += 1;
                bytes += record.size_bytes();
            }
        }

        (records, bytes)
    }

    /// The number of active (evictable) bytes in this entry.
    pub fn active_size_bytes(&self) -> usize {
        self.active_events
            .iter()
            .chain(self.active_actions.iter())
            .map(BeaconRecord::size_bytes)
            .sum()
    }
}

fn fill_chunk(
    source: &mut VecDeque<BeaconRecord>,
    taken: &mut Vec<BeaconRecord>,
    chunk: &mut String,
    appended: &mut bool,
    max_bytes: usize,
    delimiter: char,
) -> bool {
    while let Some(record) = source.pop_front() {
        let next_len = chunk.len() + delimiter.len_utf8() + record.data.len();
        if *appended && next_len > max_bytes {
            source.push_front(record);
            return true;
        }

        chunk.push(delimiter);
        chunk.push_str(&record.data);
        taken.push(record);
        *appended = true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, data: &str) -> BeaconRecord {
        BeaconRecord::new(Timestamp::from_millis(ts), data, 0)
    }

    #[test]
    fn test_chunking_preserves_order_events_first() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_action(record(1, "action1"));
        entry.add_event(record(2, "event1"));
        entry.add_event(record(3, "event2"));
        entry.prepare_data_for_sending();

        let chunk = entry.next_chunk("prefix", 1_024, '&').unwrap();
        assert_eq!(chunk, "prefix&event1&event2&action1");
    }

    #[test]
    fn test_chunk_respects_size_bound() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(1, "aaaa"));
        entry.add_event(record(2, "bbbb"));
        entry.add_event(record(3, "cccc"));
        entry.prepare_data_for_sending();

        // Room for the prefix and two records only.
        let chunk = entry.next_chunk("pp", 12, '&').unwrap();
        assert_eq!(chunk, "pp&aaaa&bbbb");
        entry.remove_chunk();

        let chunk = entry.next_chunk("pp", 12, '&').unwrap();
        assert_eq!(chunk, "pp&cccc");
        entry.remove_chunk();

        assert!(entry.next_chunk("pp", 12, '&').is_none());
    }

    #[test]
    fn test_oversized_first_record_still_ships() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(1, "xxxxxxxxxxxxxxxxxxxxxxxx"));
        entry.prepare_data_for_sending();

        let chunk = entry.next_chunk("p", 4, '&').unwrap();
        assert_eq!(chunk, "p&xxxxxxxxxxxxxxxxxxxxxxxx");
    }

    #[test]
    fn test_reset_chunk_restores_order() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(1, "e1"));
        entry.add_event(record(2, "e2"));
        entry.add_action(record(3, "a1"));
        entry.prepare_data_for_sending();

        let first = entry.next_chunk("p", 1_024, '&').unwrap();
        entry.reset_chunk();
        let second = entry.next_chunk("p", 1_024, '&').unwrap();
        assert_eq!(first, second);
        assert_eq!(second, "p&e1&e2&a1");
    }

    #[test]
    fn test_in_flight_chunk_is_handed_out_again() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(1, "e1"));
        entry.prepare_data_for_sending();

        let first = entry.next_chunk("p", 1_024, '&').unwrap();
        // Without commit or reset the same chunk comes back.
        let again = entry.next_chunk("p", 1_024, '&').unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_late_records_wait_for_next_prepare() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(1, "e1"));
        entry.prepare_data_for_sending();
        entry.add_event(record(2, "e2"));

        let chunk = entry.next_chunk("p", 1_024, '&').unwrap();
        assert_eq!(chunk, "p&e1");
        entry.remove_chunk();
        assert!(entry.next_chunk("p", 1_024, '&').is_none());

        entry.prepare_data_for_sending();
        let chunk = entry.next_chunk("p", 1_024, '&').unwrap();
        assert_eq!(chunk, "p&e2");
    }

    #[test]
    fn test_remove_records_by_action_spares_sending_stage() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(BeaconRecord::new(Timestamp::from_millis(1), "staged", 7));
        entry.prepare_data_for_sending();
        entry.add_event(BeaconRecord::new(Timestamp::from_millis(2), "pending", 7));

        let removed = entry.remove_records_by_action(7);
        assert_eq!(removed, "pending".len());
        assert!(entry.has_data_to_send());
        assert_eq!(entry.active_size_bytes(), 0);
    }

    #[test]
    fn test_remove_oldest_prefers_actions_on_ties() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(5, "event"));
        entry.add_action(record(5, "act"));

        let (records, bytes) = entry.remove_oldest_records(1);
        // The action went first even though both carry the same timestamp.
        assert_eq!((records, bytes), (1, "act".len()));
        assert_eq!(entry.active_size_bytes(), "event".len());
        let (records, _) = entry.remove_oldest_records(10);
        assert_eq!(records, 1);
    }

    #[test]
    fn test_remove_records_older_than() {
        let mut entry = BeaconCacheEntry::default();
        entry.add_event(record(10, "old"));
        entry.add_event(record(20, "new"));
        entry.add_action(record(5, "ancient"));

        let (records, bytes) = entry.remove_records_older_than(Timestamp::from_millis(15));
        assert_eq!(records, 2);
        assert_eq!(bytes, "old".len() + "ancient".len());
        assert_eq!(entry.active_size_bytes(), 3);
    }
}
