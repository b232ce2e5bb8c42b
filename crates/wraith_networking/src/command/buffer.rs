//! Tick-sorted command buffer with a retention window.

use std::collections::VecDeque;

use bytemuck::Pod;
use wraith_core::Tick;

/// One tick of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandEntry<C> {
    /// Tick the input applies to.
    pub tick: Tick,
    /// Input payload.
    pub command: C,
}

/// Commands sorted by tick, trimmed to a retention window behind the newest.
#[derive(Clone, Debug)]
pub struct CommandBuffer<C> {
    entries: VecDeque<CommandEntry<C>>,
    retention: u32,
}

impl<C: Pod> CommandBuffer<C> {
    /// Creates a buffer keeping `retention` ticks up to the newest.
    #[must_use]
    pub fn new(retention: u32) -> Self {
        Self {
            entries: VecDeque::with_capacity(retention as usize),
            retention: retention.max(1),
        }
    }

    /// Records `command` for `tick`, overwriting an existing entry.
    pub fn record(&mut self, tick: Tick, command: C) {
        match self.entries.binary_search_by_key(&tick, |e| e.tick) {
            Ok(index) => self.entries[index].command = command,
            Err(index) => self.entries.insert(index, CommandEntry { tick, command }),
        }
        self.trim();
    }

    /// Records `command` only if `tick` has no entry and is inside the window.
    ///
    /// Returns true if the command was stored.
    pub fn insert_if_absent(&mut self, tick: Tick, command: C) -> bool {
        if self.newest_tick().is_some_and(|newest| self.expired(tick, newest)) {
            return false;
        }
        match self.entries.binary_search_by_key(&tick, |e| e.tick) {
            Ok(_) => false,
            Err(index) => {
                self.entries.insert(index, CommandEntry { tick, command });
                self.trim();
                true
            }
        }
    }

    /// Command recorded for exactly `tick`.
    #[must_use]
    pub fn get_at_tick(&self, tick: Tick) -> Option<&C> {
        self.entries
            .binary_search_by_key(&tick, |e| e.tick)
            .ok()
            .map(|index| &self.entries[index].command)
    }

    /// Newest entry at or before `tick`.
    #[must_use]
    pub fn get_at_or_before(&self, tick: Tick) -> Option<&CommandEntry<C>> {
        let index = self.entries.partition_point(|e| e.tick <= tick);
        index.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Entries with ticks in `(up_to - window, up_to]`, oldest first.
    pub fn recent(&self, up_to: Tick, window: u32) -> impl Iterator<Item = &CommandEntry<C>> {
        let from = up_to.saturating_sub(window.saturating_sub(1));
        self.entries
            .iter()
            .filter(move |e| e.tick >= from && e.tick <= up_to)
    }

    /// Newest recorded tick.
    #[inline]
    #[must_use]
    pub fn newest_tick(&self) -> Option<Tick> {
        self.entries.back().map(|e| e.tick)
    }

    /// Retention window in ticks.
    #[inline]
    #[must_use]
    pub const fn retention(&self) -> u32 {
        self.retention
    }

    /// Number of buffered entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn expired(&self, tick: Tick, newest: Tick) -> bool {
        u64::from(tick) + u64::from(self.retention) <= u64::from(newest)
    }

    fn trim(&mut self) {
        let Some(newest) = self.newest_tick() else {
            return;
        };
        while let Some(front) = self.entries.front() {
            if !self.expired(front.tick, newest) {
                break;
            }
            self.entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_overwrites() {
        let mut buffer = CommandBuffer::<u32>::new(16);
        buffer.record(5, 1);
        buffer.record(5, 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get_at_tick(5), Some(&2));
    }

    #[test]
    fn test_retention_window() {
        let mut buffer = CommandBuffer::<u32>::new(6);
        for tick in 1..=10 {
            buffer.record(tick, tick * 100);
        }
        assert_eq!(buffer.get_at_tick(2), None);
        assert_eq!(buffer.get_at_tick(10), Some(&1000));
        assert_eq!(buffer.len(), 6);
        assert!(!buffer.insert_if_absent(3, 0));
    }

    #[test]
    fn test_fallback_to_prior_tick() {
        let mut buffer = CommandBuffer::<u32>::new(16);
        buffer.record(3, 30);
        buffer.record(7, 70);
        assert_eq!(buffer.get_at_tick(5), None);
        assert_eq!(buffer.get_at_or_before(5).map(|e| e.tick), Some(3));
        assert_eq!(buffer.get_at_or_before(7).map(|e| e.command), Some(70));
        assert!(buffer.get_at_or_before(2).is_none());
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let mut buffer = CommandBuffer::<u32>::new(16);
        assert!(buffer.insert_if_absent(4, 1));
        assert!(!buffer.insert_if_absent(4, 2));
        assert!(buffer.insert_if_absent(2, 9));
        assert_eq!(buffer.get_at_tick(4), Some(&1));
        let ticks: Vec<_> = buffer.recent(4, 8).map(|e| e.tick).collect();
        assert_eq!(ticks, vec![2, 4]);
    }

    #[test]
    fn test_recent_window() {
        let mut buffer = CommandBuffer::<u32>::new(16);
        for tick in 1..=10 {
            buffer.record(tick, tick);
        }
        let ticks: Vec<_> = buffer.recent(10, 3).map(|e| e.tick).collect();
        assert_eq!(ticks, vec![8, 9, 10]);
    }
}
