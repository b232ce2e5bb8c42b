//! Server-side command decoding and per-ghost buffers.

use std::collections::HashMap;

use bytemuck::Pod;
use wraith_core::{BitReader, GhostRef, Tick};

use super::buffer::{CommandBuffer, CommandEntry};
use crate::error::{NetError, NetResult};
use crate::protocol::{read_ghost_ref, CommandHeader, PacketKind};

/// A decoded command packet.
#[derive(Clone, Debug)]
pub struct CommandPacket<C> {
    /// Fixed header, including the acknowledgement.
    pub header: CommandHeader,
    /// Commands per target ghost.
    pub targets: Vec<(GhostRef, Vec<CommandEntry<C>>)>,
}

/// Decodes a command packet.
///
/// # Errors
///
/// [`NetError::MalformedFrame`] for a wrong kind or short header,
/// [`NetError::Core`] for a truncated body.
pub fn decode_command_packet<C: Pod>(bytes: &[u8]) -> NetResult<CommandPacket<C>> {
    if bytes.len() < CommandHeader::SIZE {
        return Err(NetError::MalformedFrame("shorter than command header"));
    }
    let header: CommandHeader = bytemuck::pod_read_unaligned(&bytes[..CommandHeader::SIZE]);
    if PacketKind::from_u8(header.kind) != Some(PacketKind::Commands) {
        return Err(NetError::MalformedFrame("not a command packet"));
    }

    let mut reader = BitReader::new(&bytes[CommandHeader::SIZE..]);
    let mut targets = Vec::with_capacity(usize::from(header.target_count));
    for _ in 0..header.target_count {
        let ghost = read_ghost_ref(&mut reader)?;
        let count = reader.read_varint()?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let tick = reader.read_varint()?;
            let command = reader.read_pod::<C>()?;
            entries.push(CommandEntry { tick, command });
        }
        targets.push((ghost, entries));
    }
    Ok(CommandPacket { header, targets })
}

/// Per-ghost command buffers of one connection.
#[derive(Clone, Debug)]
pub struct CommandReceiver<C> {
    buffers: HashMap<GhostRef, CommandBuffer<C>>,
    retention: u32,
}

impl<C: Pod> CommandReceiver<C> {
    /// Creates an empty receiver.
    #[must_use]
    pub fn new(retention: u32) -> Self {
        Self {
            buffers: HashMap::new(),
            retention,
        }
    }

    /// Stores previously unseen ticks. Returns how many were new.
    pub fn ingest(&mut self, ghost: GhostRef, entries: &[CommandEntry<C>]) -> usize {
        let retention = self.retention;
        let buffer = self
            .buffers
            .entry(ghost)
            .or_insert_with(|| CommandBuffer::new(retention));
        entries
            .iter()
            .filter(|entry| buffer.insert_if_absent(entry.tick, entry.command))
            .count()
    }

    /// Command for `tick`, falling back to the newest earlier tick.
    #[must_use]
    pub fn command_at(&self, ghost: GhostRef, tick: Tick) -> Option<&CommandEntry<C>> {
        self.buffers.get(&ghost)?.get_at_or_before(tick)
    }

    /// Buffer of one ghost.
    #[must_use]
    pub fn buffer(&self, ghost: GhostRef) -> Option<&CommandBuffer<C>> {
        self.buffers.get(&ghost)
    }

    /// Drops the buffer of a ghost.
    pub fn forget(&mut self, ghost: GhostRef) {
        self.buffers.remove(&ghost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSender, CommandTarget};
    use crate::protocol::AckTracker;
    use wraith_core::GhostId;

    fn target() -> GhostRef {
        GhostRef::new(GhostId::new(1).unwrap(), 10)
    }

    #[test]
    fn test_redundant_window_on_the_wire() {
        let mut sender = CommandSender::<[u8; 4]>::new(64, 3, 1200);
        sender.set_enabled(true);
        for tick in 20..=25 {
            sender.record(tick, [tick as u8; 4]);
        }
        let packet = sender.build_packet(25, &AckTracker::new(), &[target()]).unwrap();
        let decoded = decode_command_packet::<[u8; 4]>(&packet).unwrap();
        assert_eq!(decoded.targets.len(), 1);
        let ticks: Vec<_> = decoded.targets[0].1.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![23, 24, 25]);
        assert_eq!(decoded.targets[0].1[2].command, [25; 4]);
    }

    #[test]
    fn test_disabled_sends_only_ack() {
        let mut sender = CommandSender::<u32>::new(64, 3, 1200);
        sender.set_target(CommandTarget::Explicit(target()));
        sender.record(5, 7);
        let mut acks = AckTracker::new();
        acks.record(4);
        let packet = sender.build_packet(5, &acks, &[target()]).unwrap();
        assert_eq!(packet.len(), CommandHeader::SIZE);
        let decoded = decode_command_packet::<u32>(&packet).unwrap();
        assert!(decoded.targets.is_empty());
        assert!(decoded.header.acknowledges(4));
    }

    #[test]
    fn test_oversized_target_excluded() {
        let mut sender = CommandSender::<[u8; 64]>::new(64, 8, 64);
        sender.set_enabled(true);
        for tick in 0..8 {
            sender.record(tick, [0; 64]);
        }
        let packet = sender.build_packet(7, &AckTracker::new(), &[target()]).unwrap();
        let decoded = decode_command_packet::<[u8; 64]>(&packet).unwrap();
        assert!(decoded.targets.is_empty());
    }

    #[test]
    fn test_receiver_keeps_first_copy() {
        let mut receiver = CommandReceiver::<u32>::new(16);
        let first = [CommandEntry { tick: 3, command: 30 }, CommandEntry { tick: 4, command: 40 }];
        let resent = [CommandEntry { tick: 4, command: 99 }, CommandEntry { tick: 5, command: 50 }];
        assert_eq!(receiver.ingest(target(), &first), 2);
        assert_eq!(receiver.ingest(target(), &resent), 1);
        assert_eq!(receiver.command_at(target(), 4).map(|e| e.command), Some(40));
        assert_eq!(receiver.command_at(target(), 9).map(|e| e.tick), Some(5));
        receiver.forget(target());
        assert!(receiver.command_at(target(), 9).is_none());
    }
}
