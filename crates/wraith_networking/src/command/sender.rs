//! Client-side command recording and packet assembly.

use bytemuck::Pod;
use wraith_core::{BitWriter, CoreError, GhostRef, Tick};

use super::buffer::CommandBuffer;
use crate::error::NetResult;
use crate::protocol::{write_ghost_ref, AckTracker, CommandHeader};

/// Which ghosts receive the local command stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommandTarget {
    /// One explicitly chosen ghost, while it is present on the client.
    Explicit(GhostRef),
    /// Every owned, predicted ghost currently present on the client.
    #[default]
    AutoOwnedPredicted,
}

/// Local command buffer plus target binding.
#[derive(Clone, Debug)]
pub struct CommandSender<C> {
    buffer: CommandBuffer<C>,
    target: CommandTarget,
    enabled: bool,
    redundancy: u32,
    max_bytes: usize,
}

impl<C: Pod> CommandSender<C> {
    /// Creates a disabled sender targeting owned predicted ghosts.
    #[must_use]
    pub fn new(retention: u32, redundancy: u32, max_bytes: usize) -> Self {
        Self {
            buffer: CommandBuffer::new(retention),
            target: CommandTarget::AutoOwnedPredicted,
            enabled: false,
            redundancy: redundancy.max(1),
            max_bytes,
        }
    }

    /// Records the local input for `tick`.
    pub fn record(&mut self, tick: Tick, command: C) {
        self.buffer.record(tick, command);
    }

    /// Local command buffer.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> &CommandBuffer<C> {
        &self.buffer
    }

    /// Active target binding.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> CommandTarget {
        self.target
    }

    /// Replaces the target binding; exactly one binding is active at a time.
    pub fn set_target(&mut self, target: CommandTarget) {
        self.target = target;
    }

    /// Returns true if commands are transmitted.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables transmission. Acks are sent either way.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Builds a command packet for `targets`.
    ///
    /// A target whose commands cannot fit is logged and left out; the
    /// packet itself is always produced so the acknowledgement gets through.
    ///
    /// # Errors
    ///
    /// [`CoreError::PayloadTooLarge`] only if the header alone does not fit.
    pub fn build_packet(&self, tick: Tick, acks: &AckTracker, targets: &[GhostRef]) -> NetResult<Vec<u8>> {
        let body_bytes = self
            .max_bytes
            .checked_sub(CommandHeader::SIZE)
            .ok_or(CoreError::PayloadTooLarge {
                size: CommandHeader::SIZE,
                limit: self.max_bytes,
            })?;
        let mut body = BitWriter::new(body_bytes);
        let mut included = 0u16;

        if self.enabled {
            for target in targets {
                let mut scratch = BitWriter::new(body_bytes);
                let encoded = self.write_target(&mut scratch, *target, tick);
                match encoded.and_then(|()| body.append(&scratch)) {
                    Ok(()) => included += 1,
                    Err(CoreError::PayloadTooLarge { size, limit }) => {
                        tracing::warn!(
                            "Commands for {} excluded: {} bytes exceeds {} byte limit",
                            target,
                            size,
                            limit
                        );
                    }
                    Err(other) => return Err(other.into()),
                }
            }
        }

        let header = CommandHeader::new(tick, included, acks);
        let mut packet = Vec::with_capacity(CommandHeader::SIZE + body.byte_len());
        packet.extend_from_slice(bytemuck::bytes_of(&header));
        packet.extend_from_slice(body.as_slice());
        Ok(packet)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_target(&self, writer: &mut BitWriter, target: GhostRef, tick: Tick) -> Result<(), CoreError> {
        write_ghost_ref(writer, target)?;
        let entries: Vec<_> = self.buffer.recent(tick, self.redundancy).collect();
        writer.write_varint(entries.len() as u32)?;
        for entry in entries {
            writer.write_varint(entry.tick)?;
            writer.write_pod(&entry.command)?;
        }
        Ok(())
    }
}
