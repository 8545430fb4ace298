//! Event log storage - bounded, deduplicated append-only ring of raw events.
//!
//! Events are keyed by a monotonically increasing sequence number. A dedup
//! table maps each retained message id to its sequence. When the log grows
//! past its capacity the oldest entries are evicted FIFO and their message ids
//! leave the dedup table with them, so deduplication only covers the retained
//! window: a message id older than the window is accepted again as new.
//!
//! Every appended event is also marked pending until its consumer calls
//! [`EventLogStorage::complete`]. The mark is written in the same transaction
//! as the event, so an append whose follow-up work failed can be found and
//! finished later instead of being hidden behind the dedup table.
//!
//! All mutation happens inside a single redb write transaction, which redb
//! serializes; readers work on MVCC snapshots and never block writers.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::sync::Arc;
use tracing::{debug, warn};

const EVENT_DATA: TableDefinition<u64, &[u8]> = TableDefinition::new("event_log:data");
const EVENT_SEQ_IDS: TableDefinition<u64, &str> = TableDefinition::new("event_log:seq_ids");
const EVENT_DEDUP: TableDefinition<&str, u64> = TableDefinition::new("event_log:dedup");
const EVENT_META: TableDefinition<&str, u64> = TableDefinition::new("event_log:meta");
const EVENT_PENDING: TableDefinition<u64, &str> = TableDefinition::new("event_log:pending");

const NEXT_SEQ_KEY: &str = "next_seq";

/// Result of appending a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { seq: u64 },
    Duplicate { seq: u64 },
}

impl AppendOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate { .. })
    }
}

/// Result of an append call, one outcome per input entry in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReport {
    pub outcomes: Vec<AppendOutcome>,
    pub evicted: usize,
    /// Evicted entries that were still pending.
    pub evicted_pending: usize,
}

/// Low-level event log storage with byte-level API
#[derive(Debug, Clone)]
pub struct EventLogStorage {
    db: Arc<Database>,
}

impl EventLogStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(EVENT_DATA)?;
        write_txn.open_table(EVENT_SEQ_IDS)?;
        write_txn.open_table(EVENT_DEDUP)?;
        write_txn.open_table(EVENT_META)?;
        write_txn.open_table(EVENT_PENDING)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append a single entry unless its message id is already retained.
    pub fn append(&self, message_id: &str, data: &[u8], capacity: usize) -> Result<AppendOutcome> {
        let report = self.append_batch([(message_id, data)], capacity)?;
        report
            .outcomes
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Append produced no outcome for {}", message_id))
    }

    /// Append several entries in one transaction, deduplicating against the
    /// retained window and against earlier entries of the same batch, then
    /// evict the oldest entries beyond `capacity`.
    pub fn append_batch<'a, I>(&self, entries: I, capacity: usize) -> Result<AppendReport>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let capacity = capacity.max(1) as u64;
        let write_txn = self.db.begin_write()?;
        let report = {
            let mut data = write_txn.open_table(EVENT_DATA)?;
            let mut seq_ids = write_txn.open_table(EVENT_SEQ_IDS)?;
            let mut dedup = write_txn.open_table(EVENT_DEDUP)?;
            let mut meta = write_txn.open_table(EVENT_META)?;
            let mut pending = write_txn.open_table(EVENT_PENDING)?;

            let mut next_seq = meta.get(NEXT_SEQ_KEY)?.map(|v| v.value()).unwrap_or(0);
            let mut outcomes = Vec::new();

            for (message_id, bytes) in entries {
                if let Some(seq) = dedup.get(message_id)?.map(|v| v.value()) {
                    outcomes.push(AppendOutcome::Duplicate { seq });
                    continue;
                }

                let seq = next_seq;
                next_seq += 1;
                data.insert(seq, bytes)?;
                seq_ids.insert(seq, message_id)?;
                dedup.insert(message_id, seq)?;
                pending.insert(seq, message_id)?;
                outcomes.push(AppendOutcome::Appended { seq });
            }
            meta.insert(NEXT_SEQ_KEY, next_seq)?;

            let mut evicted = 0;
            let mut evicted_pending = 0;
            let mut len = data.len()?;
            while len > capacity {
                let Some(seq) = data.first()?.map(|(key, _)| key.value()) else {
                    break;
                };
                data.remove(seq)?;
                if pending.remove(seq)?.is_some() {
                    evicted_pending += 1;
                }

                let message_id = seq_ids.remove(seq)?.map(|v| v.value().to_string());
                if let Some(message_id) = message_id {
                    let indexed = dedup.get(message_id.as_str())?.map(|v| v.value());
                    if indexed == Some(seq) {
                        dedup.remove(message_id.as_str())?;
                    }
                }

                len -= 1;
                evicted += 1;
            }

            AppendReport {
                outcomes,
                evicted,
                evicted_pending,
            }
        };
        write_txn.commit()?;

        if report.evicted > 0 {
            debug!(evicted = report.evicted, "Evicted oldest events from log");
        }
        if report.evicted_pending > 0 {
            warn!(
                evicted_pending = report.evicted_pending,
                "Evicted events whose processing never completed"
            );
        }
        Ok(report)
    }

    /// Clear the pending mark of an entry. Returns whether it was pending.
    pub fn complete(&self, seq: u64) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = write_txn.open_table(EVENT_PENDING)?.remove(seq)?.is_some();
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn is_pending(&self, seq: u64) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(EVENT_PENDING)?;
        Ok(pending.get(seq)?.is_some())
    }

    /// Pending entries, oldest first.
    pub fn pending(&self, limit: usize) -> Result<Vec<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(EVENT_PENDING)?;
        let data = read_txn.open_table(EVENT_DATA)?;

        let mut items = Vec::new();
        for item in pending.iter()?.take(limit) {
            let (key, _) = item?;
            let seq = key.value();
            if let Some(bytes) = data.get(seq)? {
                items.push((seq, bytes.value().to_vec()));
            }
        }
        Ok(items)
    }

    /// Check whether a message id is inside the retained window.
    pub fn contains(&self, message_id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let dedup = read_txn.open_table(EVENT_DEDUP)?;
        Ok(dedup.get(message_id)?.is_some())
    }

    /// Get raw event data by message id.
    pub fn get_by_message_id(&self, message_id: &str) -> Result<Option<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let dedup = read_txn.open_table(EVENT_DEDUP)?;
        let data = read_txn.open_table(EVENT_DATA)?;

        let Some(seq) = dedup.get(message_id)?.map(|v| v.value()) else {
            return Ok(None);
        };
        Ok(data.get(seq)?.map(|v| (seq, v.value().to_vec())))
    }

    /// Get raw event data by sequence number.
    pub fn get(&self, seq: u64) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let data = read_txn.open_table(EVENT_DATA)?;
        Ok(data.get(seq)?.map(|v| v.value().to_vec()))
    }

    /// Number of retained events.
    pub fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let data = read_txn.open_table(EVENT_DATA)?;
        Ok(data.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Sequence number of the oldest retained event.
    pub fn first_seq(&self) -> Result<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let data = read_txn.open_table(EVENT_DATA)?;
        Ok(data.first()?.map(|(key, _)| key.value()))
    }

    /// Newest events first.
    pub fn recent(&self, limit: usize) -> Result<Vec<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let data = read_txn.open_table(EVENT_DATA)?;

        let mut items = Vec::new();
        for item in data.iter()?.rev().take(limit) {
            let (key, value) = item?;
            items.push((key.value(), value.value().to_vec()));
        }
        Ok(items)
    }

    /// Events with a sequence number strictly greater than `after`, oldest first.
    pub fn since(&self, after: Option<u64>, limit: usize) -> Result<Vec<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let data = read_txn.open_table(EVENT_DATA)?;

        let start = after.map(|seq| seq.saturating_add(1)).unwrap_or(0);
        let mut items = Vec::new();
        for item in data.range(start..)?.take(limit) {
            let (key, value) = item?;
            items.push((key.value(), value.value().to_vec()));
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (EventLogStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("events.redb")).unwrap());
        (EventLogStorage::new(db).unwrap(), temp_dir)
    }

    #[test]
    fn test_duplicate_message_id_is_stored_once() {
        let (log, _temp_dir) = setup();

        let first = log.append("msg-1", b"one", 10).unwrap();
        let second = log.append("msg-1", b"other", 10).unwrap();

        assert_eq!(first, AppendOutcome::Appended { seq: 0 });
        assert_eq!(second, AppendOutcome::Duplicate { seq: 0 });
        assert_eq!(log.len().unwrap(), 1);
        assert_eq!(log.get(0).unwrap().unwrap(), b"one");
    }

    #[test]
    fn test_batch_dedups_within_batch() {
        let (log, _temp_dir) = setup();
        log.append("a", b"a", 10).unwrap();

        let report = log
            .append_batch(
                [
                    ("a", &b"a"[..]),
                    ("b", &b"b"[..]),
                    ("b", &b"b2"[..]),
                    ("c", &b"c"[..]),
                ],
                10,
            )
            .unwrap();

        let duplicates = report.outcomes.iter().filter(|o| o.is_duplicate()).count();
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(duplicates, 2);
        assert_eq!(log.len().unwrap(), 3);
    }

    #[test]
    fn test_ring_evicts_oldest_beyond_capacity() {
        let (log, _temp_dir) = setup();
        let capacity = 5;

        let mut evicted = 0;
        for i in 0..8 {
            let id = format!("msg-{i}");
            let report = log
                .append_batch([(id.as_str(), id.as_bytes())], capacity)
                .unwrap();
            evicted += report.evicted;
        }

        assert_eq!(evicted, 3);
        assert_eq!(log.len().unwrap(), capacity);
        assert_eq!(log.first_seq().unwrap(), Some(3));
        assert!(!log.contains("msg-2").unwrap());
        assert!(log.contains("msg-3").unwrap());
        assert!(log.contains("msg-7").unwrap());
    }

    #[test]
    fn test_evicted_message_id_is_accepted_again() {
        let (log, _temp_dir) = setup();

        log.append("old", b"old", 2).unwrap();
        log.append("m1", b"m1", 2).unwrap();
        log.append("m2", b"m2", 2).unwrap();
        assert!(!log.contains("old").unwrap());

        let outcome = log.append("old", b"old again", 2).unwrap();
        assert_eq!(outcome, AppendOutcome::Appended { seq: 3 });
        let (seq, data) = log.get_by_message_id("old").unwrap().unwrap();
        assert_eq!(seq, 3);
        assert_eq!(data, b"old again");
    }

    #[test]
    fn test_appended_entries_stay_pending_until_completed() {
        let (log, _temp_dir) = setup();
        log.append("a", b"a", 10).unwrap();
        log.append("b", b"b", 10).unwrap();
        log.append("a", b"a", 10).unwrap();

        let pending: Vec<u64> = log.pending(10).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(pending, vec![0, 1]);

        assert!(log.complete(0).unwrap());
        assert!(!log.complete(0).unwrap());
        assert!(!log.is_pending(0).unwrap());
        assert!(log.is_pending(1).unwrap());
        assert_eq!(log.pending(10).unwrap(), vec![(1, b"b".to_vec())]);
    }

    #[test]
    fn test_eviction_drops_pending_marks() {
        let (log, _temp_dir) = setup();
        log.append("a", b"a", 2).unwrap();
        log.append("b", b"b", 2).unwrap();
        log.complete(1).unwrap();

        let report = log.append_batch([("c", &b"c"[..])], 2).unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(report.evicted_pending, 1);
        assert!(!log.is_pending(0).unwrap());
        assert_eq!(log.pending(10).unwrap().len(), 1);
    }

    #[test]
    fn test_recent_and_since_order() {
        let (log, _temp_dir) = setup();
        for id in ["a", "b", "c"] {
            log.append(id, id.as_bytes(), 10).unwrap();
        }

        let recent: Vec<u64> = log.recent(2).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(recent, vec![2, 1]);

        let since: Vec<u64> = log
            .since(Some(0), 10)
            .unwrap()
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(since, vec![1, 2]);
        assert_eq!(log.since(None, 1).unwrap()[0].0, 0);
    }
}
