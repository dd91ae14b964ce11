//! In-memory trace store.
//!
//! The ingesting transport appends records while periodic analysis batches
//! read. Each batch takes a consistent snapshot; rotation drops the oldest
//! records once the store grows past a threshold, keeping the recent
//! window, so analyses tolerate truncation mid-session.

use std::sync::RwLock;

use super::PacketRecord;

/// Shared, append-mostly record store.
#[derive(Debug, Default)]
pub struct TraceStore {
    records: RwLock<Vec<PacketRecord>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single record in arrival order.
    pub fn append(&self, record: PacketRecord) {
        self.records.write().expect("trace store poisoned").push(record);
    }

    /// Append a batch of records, preserving their order.
    pub fn extend<I: IntoIterator<Item = PacketRecord>>(&self, records: I) {
        self.records
            .write()
            .expect("trace store poisoned")
            .extend(records);
    }

    /// Consistent copy of the trace at the time of the call.
    ///
    /// Appends and rotations racing this call land entirely before or
    /// entirely after the snapshot.
    pub fn snapshot(&self) -> Vec<PacketRecord> {
        self.records.read().expect("trace store poisoned").clone()
    }

    /// Rotate: once the store holds more than `threshold` records, drop
    /// the oldest until `keep` remain.
    ///
    /// Returns the number of records dropped.
    pub fn retain_recent(&self, keep: usize, threshold: usize) -> usize {
        let mut records = self.records.write().expect("trace store poisoned");
        if records.len() <= threshold || records.len() <= keep {
            return 0;
        }
        let dropped = records.len() - keep;
        records.drain(..dropped);
        dropped
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("trace store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything; used on full session reset.
    pub fn clear(&self) {
        self.records.write().expect("trace store poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::trace::Flag;

    use super::*;

    fn record(version: u32) -> PacketRecord {
        PacketRecord {
            timestamp: version as f64,
            mac: "AA:BB".into(),
            command: "[0056]".into(),
            flag: Flag::Resp,
            index: 1,
            payload: None,
            version,
            channel: None,
        }
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let store = TraceStore::new();
        store.append(record(1));
        let snapshot = store.snapshot();
        store.append(record(2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_retain_recent_below_threshold_is_noop() {
        let store = TraceStore::new();
        store.extend((0..10).map(record));
        assert_eq!(store.retain_recent(5, 20), 0);
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_retain_recent_drops_oldest() {
        let store = TraceStore::new();
        store.extend((0..30).map(record));
        let dropped = store.retain_recent(10, 20);
        assert_eq!(dropped, 20);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot[0].version, 20);
        assert_eq!(snapshot[9].version, 29);
    }
}
