//! # Local Entities
//!
//! Client-side entity ids consisting of:
//! - An index into local storage
//! - A generation counter for safe reuse

use std::fmt;

/// Client-local entity id.
///
/// The ID is split into two parts:
/// - Lower 32 bits: slot index
/// - Upper 32 bits: generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct LocalEntity(u64);

impl LocalEntity {
    /// Null/invalid entity.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates an entity id from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Slot index.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation counter.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Checks if this is the null entity.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for LocalEntity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for LocalEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}v{}", self.index(), self.generation())
    }
}

/// Free-list allocator of [`LocalEntity`] ids.
///
/// Freed slots are reused LIFO with a bumped generation.
#[derive(Clone, Debug, Default)]
pub struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_list: Vec<u32>,
    alive_count: usize,
}

impl EntityAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id.
    ///
    /// # Panics
    ///
    /// Never in practice: panics only after 2^32 live entities.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self) -> LocalEntity {
        self.alive_count += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return LocalEntity::new(index, self.generations[slot]);
        }
        let index = self.generations.len() as u32;
        assert!(index != u32::MAX, "local entity space exhausted");
        self.generations.push(0);
        self.alive.push(true);
        LocalEntity::new(index, 0)
    }

    /// Frees an id. Returns false for a stale or already freed id.
    pub fn free(&mut self, entity: LocalEntity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index() as usize;
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free_list.push(entity.index());
        self.alive_count -= 1;
        true
    }

    /// Checks that `entity` refers to a live slot of the same generation.
    #[must_use]
    pub fn is_alive(&self, entity: LocalEntity) -> bool {
        let slot = entity.index() as usize;
        !entity.is_null()
            && self.alive.get(slot).copied().unwrap_or(false)
            && self.generations[slot] == entity.generation()
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }
}
