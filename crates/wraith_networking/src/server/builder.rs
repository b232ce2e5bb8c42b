//! # Snapshot Builder
//!
//! Builds one connection's frame for one tick.
//!
//! ## Algorithm
//!
//! ```text
//! relevant roots ──► despawn detection ──► units (root + children)
//!                                              │
//!                     priority: importance × (1 + deferrals), desc
//!                                              │
//!              serialize each unit into scratch (rayon)
//!                                              │
//!        ┌────────── per unit, cancel flag checked first ──────────┐
//!        │          fits frame? ─► append : defer                  │
//!        └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Units are encoded in parallel against the connection's acked baselines;
//! only the greedy packing into the frame runs in priority order.
//!
//! A unit is serialized whole or not at all, so a child never arrives
//! without its root. A unit larger than an empty frame is excluded with a
//! warning; a unit that merely does not fit this frame ages and wins
//! priority in later frames.

use std::cmp::Reverse;
use std::collections::HashMap;

use rayon::prelude::*;
use wraith_core::{BitWriter, CoreError, GhostId, GhostRef, OptimizationMode, Tick};

use super::connection::{ClientConnection, FrameRecord, GhostSendState};
use super::world::{ServerGhost, ServerWorld};
use crate::command::Command;
use crate::config::NetcodeConfig;
use crate::error::{NetError, NetResult};
use crate::protocol::{write_ghost_ref, FrameHeader, RecordHeader};
use crate::relevancy::RelevancySet;

/// A root and its children, serialized together.
struct Unit<'w> {
    root: GhostId,
    priority: u64,
    members: Vec<&'w ServerGhost>,
}

/// A unit encoded into its own scratch writer.
struct EncodedUnit {
    scratch: BitWriter,
    sent: Vec<(GhostRef, Tick)>,
}

/// Builds snapshot frames from a captured world.
pub struct SnapshotBuilder<'a> {
    world: &'a ServerWorld,
    relevancy: &'a RelevancySet,
    config: &'a NetcodeConfig,
    frame_limit: usize,
}

impl<'a> SnapshotBuilder<'a> {
    /// Creates a builder bounded by `frame_limit` bytes per frame.
    #[must_use]
    pub fn new(
        world: &'a ServerWorld,
        relevancy: &'a RelevancySet,
        config: &'a NetcodeConfig,
        frame_limit: usize,
    ) -> Self {
        Self {
            world,
            relevancy,
            config,
            frame_limit: frame_limit.min(config.max_frame_bytes),
        }
    }

    /// Builds the frame of `tick` for `conn` and records it as in flight.
    ///
    /// # Errors
    ///
    /// [`NetError::Cancelled`] if the connection was cancelled mid-build,
    /// [`NetError::Core`] if the frame limit cannot hold a header.
    pub fn build<C: Command>(&self, conn: &mut ClientConnection<C>, tick: Tick) -> NetResult<Vec<u8>> {
        if conn.is_cancelled() {
            return Err(NetError::Cancelled(conn.id()));
        }
        let body_bytes = self
            .frame_limit
            .checked_sub(FrameHeader::SIZE)
            .ok_or(CoreError::PayloadTooLarge {
                size: FrameHeader::SIZE,
                limit: self.frame_limit,
            })?;

        let candidates = self.candidates(conn);
        Self::detect_despawns(conn, &candidates);

        let mut body = BitWriter::new(body_bytes);
        let mut record = FrameRecord::default();
        self.write_despawns(conn, &mut body, &mut record)?;

        let mut units = self.units(conn, &candidates, tick);
        units.sort_by_key(|unit| (Reverse(unit.priority), unit.root));

        let encoded: Vec<Result<EncodedUnit, CoreError>> = {
            let conn: &ClientConnection<C> = conn;
            units
                .par_iter()
                .map(|unit| self.encode_unit(conn, unit, body_bytes))
                .collect()
        };

        let mut ghost_count = 0usize;
        for (unit, encoded) in units.iter().zip(encoded) {
            if conn.is_cancelled() {
                tracing::debug!("Frame {} for {} cancelled", tick, conn.id());
                return Err(NetError::Cancelled(conn.id()));
            }
            if ghost_count + unit.members.len() > usize::from(u16::MAX) {
                Self::defer(conn, unit);
                continue;
            }

            let EncodedUnit { scratch, sent } = match encoded {
                Ok(encoded) => encoded,
                Err(CoreError::PayloadTooLarge { size, limit }) => {
                    tracing::warn!(
                        "Ghost {} excluded: unit of {} ghosts needs {} bytes, frame holds {}",
                        unit.root,
                        unit.members.len(),
                        size,
                        limit
                    );
                    conn.stats.ghosts_excluded += 1;
                    continue;
                }
                Err(other) => return Err(other.into()),
            };

            match body.append(&scratch) {
                Ok(()) => {}
                Err(CoreError::PayloadTooLarge { .. }) => {
                    Self::defer(conn, unit);
                    continue;
                }
                Err(other) => return Err(other.into()),
            }

            for (ghost, entry_tick) in &sent {
                if let Some(state) = conn.ghosts.get_mut(&ghost.ghost_id) {
                    state.last_sent_entry = Some(*entry_tick);
                    state.last_sent_tick = tick;
                    state.deferrals = 0;
                }
            }
            ghost_count += sent.len();
            record.ghosts.extend(sent);
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = FrameHeader::new(tick, ghost_count as u16, record.despawns.len() as u16);
        let mut frame = Vec::with_capacity(FrameHeader::SIZE + body.byte_len());
        frame.extend_from_slice(bytemuck::bytes_of(&header));
        frame.extend_from_slice(body.as_slice());

        conn.stats.frames_sent += 1;
        conn.stats.bytes_sent += frame.len() as u64;
        conn.stats.ghosts_sent += ghost_count as u64;
        conn.stats.despawns_sent += record.despawns.len() as u64;
        conn.prune_in_flight(tick);
        conn.in_flight.insert(tick, record);
        Ok(frame)
    }

    /// Identity of every relevant root and child, by id.
    fn candidates<C: Command>(&self, conn: &ClientConnection<C>) -> HashMap<GhostId, GhostRef> {
        let mut candidates = HashMap::new();
        for root in self.world.roots() {
            if !self.relevancy.is_relevant(conn.id(), root.id()) {
                continue;
            }
            candidates.insert(root.id(), root.ghost_ref());
            for child in self.world.children(root.id()) {
                if let Some(ghost) = self.world.get(*child) {
                    candidates.insert(*child, ghost.ghost_ref());
                }
            }
        }
        candidates
    }

    /// Queues despawns for ghosts the client knows that are gone or irrelevant.
    fn detect_despawns<C: Command>(conn: &mut ClientConnection<C>, candidates: &HashMap<GhostId, GhostRef>) {
        let stale: Vec<GhostId> = conn
            .ghosts
            .iter()
            .filter(|(id, state)| candidates.get(id) != Some(&state.ghost))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            let Some(state) = conn.ghosts.remove(&id) else {
                continue;
            };
            if state.was_sent() {
                conn.queue_despawn(state.ghost);
            }
            conn.commands.forget(state.ghost);
        }

        for (id, ghost) in candidates {
            if !conn.ghosts.contains_key(id) {
                conn.pending_despawns.retain(|pending| pending != ghost);
                conn.ghosts.insert(*id, GhostSendState::new(*ghost));
            }
        }
    }

    /// Writes the oldest pending despawns, bounded per frame.
    fn write_despawns<C: Command>(
        &self,
        conn: &ClientConnection<C>,
        body: &mut BitWriter,
        record: &mut FrameRecord,
    ) -> NetResult<()> {
        for ghost in conn.pending_despawns.iter().take(self.config.max_despawns_per_frame) {
            let mut notice = BitWriter::new(16);
            write_ghost_ref(&mut notice, *ghost)?;
            match body.append(&notice) {
                Ok(()) => record.despawns.push(*ghost),
                Err(CoreError::PayloadTooLarge { .. }) => break,
                Err(other) => return Err(other.into()),
            }
        }
        Ok(())
    }

    /// Groups every root that has something to send with its children.
    fn units<C: Command>(
        &self,
        conn: &ClientConnection<C>,
        candidates: &HashMap<GhostId, GhostRef>,
        tick: Tick,
    ) -> Vec<Unit<'a>> {
        let world = self.world;
        let mut units = Vec::new();
        for root in world.roots() {
            if !candidates.contains_key(&root.id()) {
                continue;
            }
            let members: Vec<&ServerGhost> = std::iter::once(root)
                .chain(world.children(root.id()).iter().filter_map(|id| world.get(*id)))
                .filter(|ghost| {
                    conn.ghosts
                        .get(&ghost.id())
                        .is_some_and(|state| self.needs_send(state, ghost, tick))
                })
                .collect();
            if members.is_empty() {
                continue;
            }
            let deferrals = conn.ghosts.get(&root.id()).map_or(0, |s| s.deferrals);
            let importance = u64::from(root.ghost_type().importance());
            units.push(Unit {
                root: root.id(),
                priority: importance.saturating_mul(1 + u64::from(deferrals)),
                members,
            });
        }
        units
    }

    fn needs_send(&self, state: &GhostSendState, ghost: &ServerGhost, tick: Tick) -> bool {
        let Some(latest) = ghost.history().latest_tick() else {
            return false;
        };
        match ghost.ghost_type().optimization() {
            OptimizationMode::Dynamic => true,
            OptimizationMode::Static => match state.last_sent_entry {
                None => true,
                Some(sent) if latest > sent => true,
                Some(sent) => {
                    state.acked_entry.map_or(true, |acked| acked < sent)
                        && tick.saturating_sub(state.last_sent_tick) >= self.config.static_resend_interval
                }
            },
        }
    }

    /// Serializes every member of `unit`, root first, into one scratch writer.
    fn encode_unit<C: Command>(
        &self,
        conn: &ClientConnection<C>,
        unit: &Unit<'_>,
        body_bytes: usize,
    ) -> Result<EncodedUnit, CoreError> {
        let mut scratch = BitWriter::new(body_bytes);
        let mut sent = Vec::with_capacity(unit.members.len());
        for ghost in &unit.members {
            let entry_tick = self.write_record(conn, ghost, &mut scratch)?;
            sent.push((ghost.ghost_ref(), entry_tick));
        }
        Ok(EncodedUnit { scratch, sent })
    }

    /// Writes one record; returns the history entry it encodes.
    fn write_record<C: Command>(
        &self,
        conn: &ClientConnection<C>,
        ghost: &ServerGhost,
        writer: &mut BitWriter,
    ) -> Result<Tick, CoreError> {
        let history = ghost.history();
        let Some(latest) = history.latest() else {
            return Err(CoreError::invalid("empty history", i64::from(ghost.id().raw())));
        };
        let baseline = conn
            .ghosts
            .get(&ghost.id())
            .and_then(|state| state.acked_entry)
            .and_then(|acked| history.at_tick(acked));

        let header = RecordHeader {
            ghost: ghost.ghost_ref(),
            type_id: ghost.instance().type_id,
            entry_tick: latest.tick,
            baseline_tick: baseline.map(|entry| entry.tick),
            owned: ghost.owner() == Some(conn.id()),
        };
        header.write(writer)?;

        let ghost_type = ghost.ghost_type();
        let serializer = self.world.registry().serializer(ghost.instance().type_id)?;
        serializer.write(
            ghost_type.layout(),
            &latest.units,
            &latest.enabled,
            baseline.map(|entry| entry.units.as_slice()),
            writer,
        )?;
        Ok(latest.tick)
    }

    fn defer<C: Command>(conn: &mut ClientConnection<C>, unit: &Unit<'_>) {
        if let Some(state) = conn.ghosts.get_mut(&unit.root) {
            state.deferrals = state.deferrals.saturating_add(1);
        }
        conn.stats.ghosts_deferred += 1;
        tracing::trace!("Ghost {} deferred to a later frame", unit.root);
    }
}
