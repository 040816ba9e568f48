//! Bounded snapshot history
//!
//! A fixed-capacity ring of snapshots. Slots are allocated once at
//! construction; appends overwrite the oldest slot once the ring is full,
//! so eviction is index arithmetic rather than shifting elements.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::types::{current_time_ms, Snapshot};

/// Default retention: one hour of per-second ticks
pub const DEFAULT_CAPACITY: usize = 3600;

/// Retention statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub count: usize,
    pub capacity: usize,
    pub utilization_percent: f64,
    pub uptime_ms: u64,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

/// A window of history, paginated backwards from the newest entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub rows: Vec<Arc<Snapshot>>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

pub struct SnapshotStore {
    slots: Vec<Option<Arc<Snapshot>>>,
    /// Slot index of the oldest retained snapshot
    head: usize,
    len: usize,
    last_timestamp: i64,
    /// Sequence handed to the next append; starts at 1
    next_sequence: u64,
    started: Instant,
}

impl SnapshotStore {
    /// Create a store retaining at most `capacity` snapshots (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            head: 0,
            len: 0,
            last_timestamp: 0,
            next_sequence: 1,
            started: Instant::now(),
        }
    }

    /// Stamp and retain a producer payload, evicting the oldest snapshot
    /// when at capacity. Returns the stored snapshot.
    pub fn append(&mut self, raw: Value) -> Arc<Snapshot> {
        // Wall clock can step backwards; stored timestamps never do
        let timestamp = current_time_ms().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let mut stamped = Snapshot::stamped(raw, timestamp);
        stamped.sequence = self.next_sequence;
        self.next_sequence += 1;

        let snapshot = Arc::new(stamped);
        let capacity = self.capacity();

        if self.len == capacity {
            self.slots[self.head] = Some(Arc::clone(&snapshot));
            self.head = (self.head + 1) % capacity;
        } else {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(Arc::clone(&snapshot));
            self.len += 1;
        }

        snapshot
    }

    /// Most recently appended snapshot, if any
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        if self.len == 0 {
            return None;
        }
        self.slot(self.len - 1).cloned()
    }

    /// Last `min(count, len)` snapshots, oldest first
    pub fn recent(&self, count: usize) -> Vec<Arc<Snapshot>> {
        let n = count.min(self.len);
        self.range(self.len - n, self.len)
    }

    /// Rows `[total - offset - limit, total - offset)` clamped to the
    /// retained range, oldest first. `limit` is taken as given; callers
    /// serving external requests clamp it first.
    pub fn page(&self, limit: usize, offset: usize) -> HistoryPage {
        let total = self.len;
        let end = total.saturating_sub(offset);
        let start = end.saturating_sub(limit);

        HistoryPage {
            rows: self.range(start, end),
            total,
            limit,
            offset,
            has_more: offset.saturating_add(limit) < total,
        }
    }

    /// Copy of the full history, oldest first
    pub fn all(&self) -> Vec<Arc<Snapshot>> {
        self.range(0, self.len)
    }

    /// Borrowing iterator over the history, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> + '_ {
        (0..self.len).filter_map(move |i| self.slot(i).map(|s| &**s))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> StoreStats {
        let capacity = self.capacity();
        let (oldest_timestamp, newest_timestamp) = if self.len == 0 {
            (None, None)
        } else {
            (
                self.slot(0).map(|s| s.timestamp),
                self.slot(self.len - 1).map(|s| s.timestamp),
            )
        };

        StoreStats {
            count: self.len,
            capacity,
            utilization_percent: self.len as f64 / capacity as f64 * 100.0,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            oldest_timestamp,
            newest_timestamp,
        }
    }

    /// Drop all retained snapshots. Test isolation only.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    /// Snapshot at logical position `index` (0 = oldest)
    fn slot(&self, index: usize) -> Option<&Arc<Snapshot>> {
        if index >= self.len {
            return None;
        }
        self.slots[(self.head + index) % self.capacity()].as_ref()
    }

    fn range(&self, start: usize, end: usize) -> Vec<Arc<Snapshot>> {
        (start..end).filter_map(|i| self.slot(i).cloned()).collect()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
