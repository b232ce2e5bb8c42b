//! # Relevancy
//!
//! Per-connection visibility consumed by the snapshot builder.
//!
//! ```text
//! mode        listed (conn, ghost)   unlisted
//! Disabled    relevant               relevant
//! AllowList   relevant               hidden
//! DenyList    hidden                 relevant
//! ```
//!
//! Game logic mutates the set between ticks; builders only read it.

use std::collections::HashSet;

use wraith_core::GhostId;

use crate::server::ConnectionId;

/// How listed pairs are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RelevancyMode {
    /// Every ghost is relevant to every connection.
    #[default]
    Disabled,
    /// Only listed ghosts are relevant.
    AllowList,
    /// All but listed ghosts are relevant.
    DenyList,
}

/// Set of `(connection, ghost)` pairs plus the global mode flag.
#[derive(Clone, Debug, Default)]
pub struct RelevancySet {
    mode: RelevancyMode,
    entries: HashSet<(ConnectionId, GhostId)>,
}

impl RelevancySet {
    /// Creates an empty set in `Disabled` mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> RelevancyMode {
        self.mode
    }

    /// Switches mode; listed pairs are kept.
    pub fn set_mode(&mut self, mode: RelevancyMode) {
        self.mode = mode;
    }

    /// Lists a pair. Returns false if already listed.
    pub fn insert(&mut self, connection: ConnectionId, ghost: GhostId) -> bool {
        self.entries.insert((connection, ghost))
    }

    /// Unlists a pair. Returns false if it was not listed.
    pub fn remove(&mut self, connection: ConnectionId, ghost: GhostId) -> bool {
        self.entries.remove(&(connection, ghost))
    }

    /// Unlists every pair of a connection.
    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.entries.retain(|(c, _)| *c != connection);
    }

    /// Unlists every pair of a ghost.
    pub fn remove_ghost(&mut self, ghost: GhostId) {
        self.entries.retain(|(_, g)| *g != ghost);
    }

    /// Unlists everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns true if `ghost` should be replicated to `connection`.
    #[inline]
    #[must_use]
    pub fn is_relevant(&self, connection: ConnectionId, ghost: GhostId) -> bool {
        match self.mode {
            RelevancyMode::Disabled => true,
            RelevancyMode::AllowList => self.entries.contains(&(connection, ghost)),
            RelevancyMode::DenyList => !self.entries.contains(&(connection, ghost)),
        }
    }

    /// Number of listed pairs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is listed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
