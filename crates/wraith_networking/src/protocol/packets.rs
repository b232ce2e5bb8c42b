//! # Packet Definitions
//!
//! Fixed headers are `Pod` and copied as raw bytes.

use bytemuck::{Pod, Zeroable};
use wraith_core::Tick;

/// Types of packets in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Server -> Client: despawns and ghost records.
    Snapshot = 1,
    /// Client -> Server: acknowledgement and commands.
    Commands = 2,
}

impl PacketKind {
    /// Decodes the leading kind byte.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Snapshot),
            2 => Some(Self::Commands),
            _ => None,
        }
    }
}

/// Snapshot frame header.
///
/// Total size: 12 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameHeader {
    /// Always [`PacketKind::Snapshot`].
    pub kind: u8,
    /// Reserved.
    pub flags: u8,
    /// Number of ghost records.
    pub ghost_count: u16,
    /// Server tick the frame was built on.
    pub tick: u32,
    /// Number of despawn notices.
    pub despawn_count: u16,
    /// Padding for alignment.
    pub _padding: u16,
}

impl FrameHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 12;

    /// Creates a snapshot header.
    #[inline]
    #[must_use]
    pub const fn new(tick: Tick, ghost_count: u16, despawn_count: u16) -> Self {
        Self {
            kind: PacketKind::Snapshot as u8,
            flags: 0,
            ghost_count,
            tick,
            despawn_count,
            _padding: 0,
        }
    }
}

/// Command packet header.
///
/// Total size: 16 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CommandHeader {
    /// Always [`PacketKind::Commands`].
    pub kind: u8,
    /// Bit 0: the acknowledgement fields are valid.
    pub flags: u8,
    /// Number of command targets.
    pub target_count: u16,
    /// Client tick the packet was sent on.
    pub tick: u32,
    /// Newest snapshot frame tick received.
    pub ack_tick: u32,
    /// Bit `i` set: frame `ack_tick - 1 - i` was received.
    pub ack_bits: u32,
}

impl CommandHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Acknowledgement fields are valid.
    pub const FLAG_ACK: u8 = 1 << 0;

    /// Creates a command header from the client's ack state.
    #[inline]
    #[must_use]
    pub fn new(tick: Tick, target_count: u16, acks: &AckTracker) -> Self {
        let (flags, ack_tick, ack_bits) = match acks.latest() {
            Some(latest) => (Self::FLAG_ACK, latest, acks.bits()),
            None => (0, 0, 0),
        };
        Self {
            kind: PacketKind::Commands as u8,
            flags,
            target_count,
            tick,
            ack_tick,
            ack_bits,
        }
    }

    /// Returns true if the packet acknowledges anything.
    #[inline]
    #[must_use]
    pub const fn has_ack(&self) -> bool {
        self.flags & Self::FLAG_ACK != 0
    }

    /// Returns true if frame `tick` is covered by this acknowledgement.
    #[must_use]
    pub const fn acknowledges(&self, tick: Tick) -> bool {
        if !self.has_ack() || tick > self.ack_tick {
            return false;
        }
        let distance = self.ack_tick - tick;
        distance == 0 || (distance <= 32 && self.ack_bits & (1 << (distance - 1)) != 0)
    }
}

/// Client-side record of received snapshot frames.
///
/// Holds the newest frame tick plus a 32-bit window of the frames before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckTracker {
    latest: Option<Tick>,
    bits: u32,
}

impl AckTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self { latest: None, bits: 0 }
    }

    /// Records a received frame.
    pub fn record(&mut self, tick: Tick) {
        match self.latest {
            None => {
                self.latest = Some(tick);
                self.bits = 0;
            }
            Some(latest) if tick > latest => {
                let shift = tick - latest;
                self.bits = if shift > 32 {
                    0
                } else {
                    // Previous latest becomes bit (shift - 1)
                    let moved = if shift == 32 { 0 } else { self.bits << shift };
                    moved | (1 << (shift - 1))
                };
                self.latest = Some(tick);
            }
            Some(latest) if tick < latest && latest - tick <= 32 => {
                self.bits |= 1 << (latest - tick - 1);
            }
            _ => {}
        }
    }

    /// Newest frame received.
    #[inline]
    #[must_use]
    pub const fn latest(&self) -> Option<Tick> {
        self.latest
    }

    /// Window of earlier frames.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.bits
    }
}
