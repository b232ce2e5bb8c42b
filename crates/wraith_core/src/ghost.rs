//! # Ghost Identity
//!
//! Server-assigned ghost ids and the `(ghost id, spawn tick)` identity key.
//!
//! ```text
//!  31  30                                    0
//! ┌───┬──────────────────────────────────────┐
//! │ P │ index (31 bits)                      │
//! └───┴──────────────────────────────────────┘
//!   P = pre-spawned id space
//! ```
//!
//! Ghost ids are recycled after despawn, so anything that must survive a
//! reuse (entity references, despawn notices) keys on [`GhostRef`].

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::{CoreError, CoreResult};

/// Simulation tick number.
pub type Tick = u32;

/// Server-assigned ghost id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct GhostId(u32);

impl GhostId {
    /// Bit reserved for the pre-spawned id space.
    pub const PRESPAWN_BIT: u32 = 1 << 31;

    /// Largest index that fits in the id.
    pub const MAX_INDEX: u32 = Self::PRESPAWN_BIT - 1;

    /// Creates a regular (runtime-spawned) ghost id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::GhostIdOutOfRange`] if `index` needs the sign bit.
    pub const fn new(index: u32) -> CoreResult<Self> {
        if index > Self::MAX_INDEX {
            return Err(CoreError::GhostIdOutOfRange(index));
        }
        Ok(Self(index))
    }

    /// Creates a ghost id in the pre-spawned id space.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::GhostIdOutOfRange`] if `index` needs the sign bit.
    pub const fn prespawned(index: u32) -> CoreResult<Self> {
        if index > Self::MAX_INDEX {
            return Err(CoreError::GhostIdOutOfRange(index));
        }
        Ok(Self(index | Self::PRESPAWN_BIT))
    }

    /// Reconstructs an id from its wire representation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Wire representation.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Index without the pre-spawn bit.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 & Self::MAX_INDEX
    }

    /// Returns true for ids in the pre-spawned id space.
    #[inline]
    #[must_use]
    pub const fn is_prespawned(self) -> bool {
        self.0 & Self::PRESPAWN_BIT != 0
    }
}

impl fmt::Display for GhostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_prespawned() {
            write!(f, "ghost#p{}", self.index())
        } else {
            write!(f, "ghost#{}", self.index())
        }
    }
}

/// Stable cross-session identity of a ghost instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GhostRef {
    /// Server-assigned id (may be reused after despawn).
    pub ghost_id: GhostId,
    /// Tick the instance was spawned on the server.
    pub spawn_tick: Tick,
}

impl GhostRef {
    /// Creates an identity key.
    #[inline]
    #[must_use]
    pub const fn new(ghost_id: GhostId, spawn_tick: Tick) -> Self {
        Self { ghost_id, spawn_tick }
    }
}

impl fmt::Display for GhostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ghost_id, self.spawn_tick)
    }
}

/// Small integer id of a registered ghost type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct GhostTypeId(pub u16);

impl fmt::Display for GhostTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// A live ghost: identity plus the type it was spawned with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GhostInstance {
    /// Identity key.
    pub ghost: GhostRef,
    /// Registered type.
    pub type_id: GhostTypeId,
}

impl GhostInstance {
    /// Ghost id shortcut.
    #[inline]
    #[must_use]
    pub const fn ghost_id(&self) -> GhostId {
        self.ghost.ghost_id
    }

    /// Spawn tick shortcut.
    #[inline]
    #[must_use]
    pub const fn spawn_tick(&self) -> Tick {
        self.ghost.spawn_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prespawn_bit() {
        let id = GhostId::prespawned(7).unwrap();
        assert!(id.is_prespawned());
        assert_eq!(id.index(), 7);

        let runtime = GhostId::new(7).unwrap();
        assert!(!runtime.is_prespawned());
        assert_ne!(id, runtime);
    }

    #[test]
    fn test_index_out_of_range() {
        assert_eq!(
            GhostId::new(GhostId::MAX_INDEX + 1),
            Err(CoreError::GhostIdOutOfRange(GhostId::MAX_INDEX + 1))
        );
        assert!(GhostId::new(GhostId::MAX_INDEX).is_ok());
    }

    #[test]
    fn test_reused_id_differs_by_spawn_tick() {
        let id = GhostId::new(3).unwrap();
        assert_ne!(GhostRef::new(id, 10), GhostRef::new(id, 42));
    }
}
