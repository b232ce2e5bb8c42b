//! # Snapshot History
//!
//! Per-entity ring buffer of quantized states, strictly increasing by tick.
//!
//! ```text
//!   oldest                          latest
//!   ┌─────┬─────┬─────┬─────┬─────┐
//!   │ 100 │ 101 │ 104 │ 110 │ 111 │  ← push(112) evicts 100 when full
//!   └─────┴─────┴─────┴─────┴─────┘
//! ```
//!
//! Ticks may be sparse (static ghosts only record changes, clients only
//! record what arrives), so lookups are by binary search, not by index.

use std::collections::VecDeque;

use crate::error::{CoreError, CoreResult};
use crate::ghost::Tick;
use crate::mask::ChangeMask;

/// One recorded state of one ghost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Tick the state belongs to.
    pub tick: Tick,
    /// Fields that changed against the entry it was derived from.
    pub change_mask: ChangeMask,
    /// Quantized field payload.
    pub units: Vec<u32>,
    /// Component enable bits.
    pub enabled: Vec<bool>,
}

impl SnapshotEntry {
    /// Returns true if the payload and enable bits match `other`.
    #[inline]
    #[must_use]
    pub fn same_state(&self, units: &[u32], enabled: &[bool]) -> bool {
        self.units == units && self.enabled == enabled
    }
}

/// Bounded, tick-ordered history of one ghost.
#[derive(Clone, Debug)]
pub struct SnapshotHistory {
    entries: VecDeque<SnapshotEntry>,
    capacity: usize,
}

impl SnapshotHistory {
    /// Creates an empty history holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Appends an entry, evicting the oldest when full.
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleTick`] if `entry.tick` is not newer than the latest.
    pub fn push(&mut self, entry: SnapshotEntry) -> CoreResult<()> {
        if let Some(latest) = self.entries.back() {
            if entry.tick <= latest.tick {
                return Err(CoreError::StaleTick {
                    tick: entry.tick,
                    latest: latest.tick,
                });
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Latest entry, O(1).
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&SnapshotEntry> {
        self.entries.back()
    }

    /// Latest tick, O(1).
    #[inline]
    #[must_use]
    pub fn latest_tick(&self) -> Option<Tick> {
        self.entries.back().map(|e| e.tick)
    }

    /// Oldest retained entry.
    #[inline]
    #[must_use]
    pub fn oldest(&self) -> Option<&SnapshotEntry> {
        self.entries.front()
    }

    /// Entry recorded at exactly `tick`.
    #[must_use]
    pub fn at_tick(&self, tick: Tick) -> Option<&SnapshotEntry> {
        self.entries
            .binary_search_by_key(&tick, |e| e.tick)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Newest entry at or before `tick`.
    #[must_use]
    pub fn at_or_before(&self, tick: Tick) -> Option<&SnapshotEntry> {
        let index = self.entries.partition_point(|e| e.tick <= tick);
        index.checked_sub(1).map(|i| &self.entries[i])
    }

    /// The two entries around `tick`: newest at or before, oldest after.
    #[must_use]
    pub fn bracket(&self, tick: f64) -> (Option<&SnapshotEntry>, Option<&SnapshotEntry>) {
        let index = self.entries.partition_point(|e| f64::from(e.tick) <= tick);
        let before = index.checked_sub(1).map(|i| &self.entries[i]);
        (before, self.entries.get(index))
    }

    /// Number of entries held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries held.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tick: Tick, value: u32) -> SnapshotEntry {
        SnapshotEntry {
            tick,
            change_mask: ChangeMask::new(1),
            units: vec![value],
            enabled: Vec::new(),
        }
    }

    #[test]
    fn test_strictly_increasing() {
        let mut history = SnapshotHistory::new(4);
        history.push(entry(10, 0)).unwrap();
        assert_eq!(
            history.push(entry(10, 1)),
            Err(CoreError::StaleTick { tick: 10, latest: 10 })
        );
        assert_eq!(
            history.push(entry(9, 1)),
            Err(CoreError::StaleTick { tick: 9, latest: 10 })
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut history = SnapshotHistory::new(3);
        for tick in 1..=5 {
            history.push(entry(tick, tick)).unwrap();
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.oldest().map(|e| e.tick), Some(3));
        assert_eq!(history.latest_tick(), Some(5));
        assert!(history.at_tick(2).is_none());
    }

    #[test]
    fn test_sparse_lookup() {
        let mut history = SnapshotHistory::new(8);
        for tick in [100, 104, 110] {
            history.push(entry(tick, tick)).unwrap();
        }
        assert_eq!(history.at_tick(104).map(|e| e.units[0]), Some(104));
        assert!(history.at_tick(105).is_none());
        assert_eq!(history.at_or_before(109).map(|e| e.tick), Some(104));
        assert!(history.at_or_before(99).is_none());

        let (before, after) = history.bracket(106.5);
        assert_eq!(before.map(|e| e.tick), Some(104));
        assert_eq!(after.map(|e| e.tick), Some(110));
        let (before, after) = history.bracket(200.0);
        assert_eq!(before.map(|e| e.tick), Some(110));
        assert!(after.is_none());
    }
}
