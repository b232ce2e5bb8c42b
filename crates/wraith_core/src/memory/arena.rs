//! # Group Arena
//!
//! Span allocator holding the child lists of ghost groups.
//!
//! ```text
//! storage: [ a0 a1 a2 │ ·  ·  │ b0 b1 │ ·  ·  ·  ]
//!            span A     free    span B   free (tail)
//! ```
//!
//! A group owns one contiguous span. Spans are index ranges, so a child list
//! can never dangle into another group or form a cycle through pointers.

/// A contiguous range of arena slots owned by one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GroupSpan {
    /// First slot.
    pub start: u32,
    /// Number of slots.
    pub len: u32,
}

impl GroupSpan {
    /// The empty span.
    pub const EMPTY: Self = Self { start: 0, len: 0 };

    #[inline]
    const fn end(self) -> u32 {
        self.start + self.len
    }
}

/// First-fit arena of `T` slots, freed span by span.
///
/// # Thread Safety
///
/// Not synchronized; owned by the single writer of the world it serves.
#[derive(Clone, Debug, Default)]
pub struct GroupArena<T> {
    storage: Vec<T>,
    /// Free spans sorted by start, never adjacent to each other.
    free: Vec<GroupSpan>,
}

impl<T: Copy + Default> GroupArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocates a span holding `items`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self, items: &[T]) -> GroupSpan {
        if items.is_empty() {
            return GroupSpan::EMPTY;
        }
        let len = items.len() as u32;

        let span = if let Some(pos) = self.free.iter().position(|f| f.len >= len) {
            let hole = self.free[pos];
            if hole.len == len {
                self.free.remove(pos);
            } else {
                self.free[pos] = GroupSpan {
                    start: hole.start + len,
                    len: hole.len - len,
                };
            }
            GroupSpan { start: hole.start, len }
        } else {
            let start = self.storage.len() as u32;
            self.storage.resize(self.storage.len() + items.len(), T::default());
            GroupSpan { start, len }
        };

        self.storage[span.start as usize..span.end() as usize].copy_from_slice(items);
        span
    }

    /// Returns a span to the arena, merging it with free neighbours.
    pub fn free(&mut self, span: GroupSpan) {
        if span.len == 0 {
            return;
        }
        self.storage[span.start as usize..span.end() as usize].fill(T::default());

        let pos = self.free.partition_point(|f| f.start < span.start);
        self.free.insert(pos, span);

        if pos + 1 < self.free.len() && self.free[pos].end() == self.free[pos + 1].start {
            self.free[pos].len += self.free[pos + 1].len;
            self.free.remove(pos + 1);
        }
        if pos > 0 && self.free[pos - 1].end() == self.free[pos].start {
            self.free[pos - 1].len += self.free[pos].len;
            self.free.remove(pos);
        }
    }

    /// Slots of a span.
    #[inline]
    #[must_use]
    pub fn get(&self, span: GroupSpan) -> &[T] {
        &self.storage[span.start as usize..span.end() as usize]
    }

    /// Slots of a span, mutable.
    #[inline]
    pub fn get_mut(&mut self, span: GroupSpan) -> &mut [T] {
        &mut self.storage[span.start as usize..span.end() as usize]
    }

    /// Total slots backing the arena.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of free spans.
    #[inline]
    #[must_use]
    pub fn free_spans(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_read() {
        let mut arena = GroupArena::<u32>::new();
        let a = arena.allocate(&[1, 2, 3]);
        let b = arena.allocate(&[4, 5]);
        assert_eq!(arena.get(a), &[1, 2, 3]);
        assert_eq!(arena.get(b), &[4, 5]);
        assert_eq!(arena.allocate(&[]), GroupSpan::EMPTY);
    }

    #[test]
    fn test_first_fit_reuse() {
        let mut arena = GroupArena::<u32>::new();
        let a = arena.allocate(&[1, 2, 3]);
        let _b = arena.allocate(&[4]);
        arena.free(a);

        let c = arena.allocate(&[7, 8]);
        assert_eq!(c.start, a.start);
        assert_eq!(arena.capacity(), 4);
        assert_eq!(arena.free_spans(), 1);
    }

    #[test]
    fn test_coalesce_neighbours() {
        let mut arena = GroupArena::<u32>::new();
        let a = arena.allocate(&[1, 1]);
        let b = arena.allocate(&[2, 2]);
        let c = arena.allocate(&[3, 3]);
        let _d = arena.allocate(&[4]);
        arena.free(a);
        arena.free(c);
        assert_eq!(arena.free_spans(), 2);
        arena.free(b);
        assert_eq!(arena.free_spans(), 1);

        let e = arena.allocate(&[9; 6]);
        assert_eq!(e.start, 0);
        assert_eq!(arena.capacity(), 7);
    }
}
