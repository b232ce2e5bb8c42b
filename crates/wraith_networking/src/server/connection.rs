//! # Client Connection Management
//!
//! Per-connection replication state kept by the server.
//!
//! ## Design
//!
//! - Every ghost the connection may know about has a send record
//! - Frames in flight remember which entries and despawns they carried
//! - An acknowledged frame promotes its entries to delta baselines

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use wraith_core::{GhostId, GhostRef, Tick};

use crate::command::CommandReceiver;
use crate::protocol::CommandHeader;

/// In-flight frames older than this many ticks behind the newest ack are
/// considered lost.
const ACK_WINDOW: u32 = 32;

/// Unique identifier for a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Invalid/null connection ID.
    pub const NULL: Self = Self(u32::MAX);

    /// The server, as addressed by client endpoints.
    pub const SERVER: Self = Self(0);

    /// Returns true if this is a null/invalid ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What the server knows about one ghost on one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GhostSendState {
    /// Identity the record belongs to.
    pub ghost: GhostRef,
    /// Newest history entry sent.
    pub last_sent_entry: Option<Tick>,
    /// Tick of the frame that last carried the ghost.
    pub last_sent_tick: Tick,
    /// Newest entry the client acknowledged.
    pub acked_entry: Option<Tick>,
    /// Consecutive frames the ghost was pushed out of.
    pub deferrals: u32,
}

impl GhostSendState {
    /// Creates the record of a never-sent ghost.
    #[must_use]
    pub const fn new(ghost: GhostRef) -> Self {
        Self {
            ghost,
            last_sent_entry: None,
            last_sent_tick: 0,
            acked_entry: None,
            deferrals: 0,
        }
    }

    /// Returns true once any frame carried the ghost.
    #[inline]
    #[must_use]
    pub const fn was_sent(&self) -> bool {
        self.last_sent_entry.is_some()
    }
}

/// Contents of one unacknowledged frame.
#[derive(Clone, Debug, Default)]
pub(crate) struct FrameRecord {
    pub(crate) ghosts: Vec<(GhostRef, Tick)>,
    pub(crate) despawns: Vec<GhostRef>,
}

/// Per-connection counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Snapshot frames built.
    pub frames_sent: u64,
    /// Snapshot bytes built.
    pub bytes_sent: u64,
    /// Ghost records sent.
    pub ghosts_sent: u64,
    /// Ghost units pushed to a later frame.
    pub ghosts_deferred: u64,
    /// Ghost units too large for any frame.
    pub ghosts_excluded: u64,
    /// Despawn notices sent (repeats included).
    pub despawns_sent: u64,
    /// New command ticks accepted.
    pub commands_received: u64,
    /// Command targets rejected (not owned or not known).
    pub commands_rejected: u64,
}

/// Server-side state of one client connection.
pub struct ClientConnection<C> {
    id: ConnectionId,
    cancel: Arc<AtomicBool>,
    pub(crate) ghosts: BTreeMap<GhostId, GhostSendState>,
    pub(crate) pending_despawns: VecDeque<GhostRef>,
    pub(crate) in_flight: BTreeMap<Tick, FrameRecord>,
    pub(crate) commands: CommandReceiver<C>,
    last_ack: Option<Tick>,
    pub(crate) stats: ConnectionStats,
}

impl<C: Pod> ClientConnection<C> {
    /// Creates the state of a new connection.
    #[must_use]
    pub fn new(id: ConnectionId, command_retention: u32) -> Self {
        Self {
            id,
            cancel: Arc::new(AtomicBool::new(false)),
            ghosts: BTreeMap::new(),
            pending_despawns: VecDeque::new(),
            in_flight: BTreeMap::new(),
            commands: CommandReceiver::new(command_retention),
            last_ack: None,
            stats: ConnectionStats::default(),
        }
    }

    /// Connection id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Shared cancellation flag.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Returns true once the connection was cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Send record of a ghost.
    #[must_use]
    pub fn send_state(&self, ghost: GhostId) -> Option<&GhostSendState> {
        self.ghosts.get(&ghost)
    }

    /// Returns true if `ghost` was sent to this connection and is still relevant.
    #[must_use]
    pub fn knows(&self, ghost: GhostRef) -> bool {
        self.ghosts
            .get(&ghost.ghost_id)
            .is_some_and(|s| s.ghost == ghost && s.was_sent())
    }

    /// Despawn notices not yet acknowledged.
    #[must_use]
    pub fn pending_despawns(&self) -> usize {
        self.pending_despawns.len()
    }

    /// Frames awaiting acknowledgement.
    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Newest acknowledged frame tick.
    #[inline]
    #[must_use]
    pub const fn last_ack(&self) -> Option<Tick> {
        self.last_ack
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Command buffers of this connection's ghosts.
    #[inline]
    #[must_use]
    pub const fn commands(&self) -> &CommandReceiver<C> {
        &self.commands
    }

    pub(crate) fn queue_despawn(&mut self, ghost: GhostRef) {
        if !self.pending_despawns.contains(&ghost) {
            self.pending_despawns.push_back(ghost);
        }
    }

    /// Applies the acknowledgement carried by a command packet.
    pub fn process_ack(&mut self, header: &CommandHeader) {
        if !header.has_ack() {
            return;
        }

        let acked: Vec<Tick> = self
            .in_flight
            .keys()
            .copied()
            .filter(|tick| header.acknowledges(*tick))
            .collect();
        for tick in acked {
            let Some(record) = self.in_flight.remove(&tick) else {
                continue;
            };
            for (ghost, entry) in record.ghosts {
                if let Some(state) = self.ghosts.get_mut(&ghost.ghost_id) {
                    if state.ghost == ghost && state.acked_entry.map_or(true, |a| a < entry) {
                        state.acked_entry = Some(entry);
                    }
                }
            }
            for ghost in record.despawns {
                self.pending_despawns.retain(|pending| *pending != ghost);
            }
        }

        let horizon = header.ack_tick.saturating_sub(ACK_WINDOW);
        self.in_flight.retain(|tick, _| *tick >= horizon);
        if self.last_ack.map_or(true, |last| header.ack_tick > last) {
            self.last_ack = Some(header.ack_tick);
        }
    }

    /// Drops in-flight records that can no longer be acknowledged.
    pub(crate) fn prune_in_flight(&mut self, tick: Tick) {
        let horizon = tick.saturating_sub(2 * ACK_WINDOW);
        self.in_flight.retain(|sent, _| *sent >= horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckTracker;

    fn ghost(index: u32) -> GhostRef {
        GhostRef::new(GhostId::new(index).unwrap(), 1)
    }

    #[test]
    fn test_ack_promotes_baseline_and_clears_despawn() {
        let mut conn = ClientConnection::<u32>::new(ConnectionId(1), 16);
        conn.ghosts.insert(ghost(0).ghost_id, GhostSendState::new(ghost(0)));
        conn.queue_despawn(ghost(5));
        conn.in_flight.insert(
            10,
            FrameRecord {
                ghosts: vec![(ghost(0), 9)],
                despawns: vec![ghost(5)],
            },
        );
        conn.in_flight.insert(11, FrameRecord::default());

        let mut acks = AckTracker::new();
        acks.record(10);
        conn.process_ack(&CommandHeader::new(12, 0, &acks));

        assert_eq!(conn.send_state(ghost(0).ghost_id).unwrap().acked_entry, Some(9));
        assert_eq!(conn.pending_despawns(), 0);
        assert_eq!(conn.frames_in_flight(), 1);
        assert_eq!(conn.last_ack(), Some(10));
    }

    #[test]
    fn test_ack_for_reused_id_ignored() {
        let mut conn = ClientConnection::<u32>::new(ConnectionId(1), 16);
        let old = ghost(0);
        let new = GhostRef::new(old.ghost_id, 50);
        conn.ghosts.insert(new.ghost_id, GhostSendState::new(new));
        conn.in_flight.insert(
            10,
            FrameRecord {
                ghosts: vec![(old, 9)],
                despawns: Vec::new(),
            },
        );
        let mut acks = AckTracker::new();
        acks.record(10);
        conn.process_ack(&CommandHeader::new(12, 0, &acks));
        assert_eq!(conn.send_state(new.ghost_id).unwrap().acked_entry, None);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let conn = ClientConnection::<u32>::new(ConnectionId(3), 16);
        let flag = conn.cancel_flag();
        flag.store(true, Ordering::Release);
        assert!(conn.is_cancelled());
    }
}
