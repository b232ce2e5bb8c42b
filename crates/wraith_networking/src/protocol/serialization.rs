//! # Frame Serialization
//!
//! Record headers and the snapshot frame reader.
//!
//! ## Record Header
//!
//! ```text
//! ghost id   varint   (raw, pre-spawn bit included)
//! type id    varint
//! spawn tick varint
//! entry tick varint   (history entry the payload encodes)
//! baseline   1 bit    + varint (entry tick - baseline tick) when set
//! owned      1 bit    (recipient owns the ghost)
//! ```

use wraith_core::{BitReader, BitWriter, CoreResult, GhostId, GhostRef, GhostTypeId, Tick};

use super::packets::{FrameHeader, PacketKind};
use crate::error::{NetError, NetResult};

/// Reads the packet kind from the first byte.
#[inline]
#[must_use]
pub fn packet_kind(bytes: &[u8]) -> Option<PacketKind> {
    bytes.first().copied().and_then(PacketKind::from_u8)
}

/// Writes a ghost identity as two varints.
///
/// # Errors
///
/// [`wraith_core::CoreError::PayloadTooLarge`] if the writer is full.
pub fn write_ghost_ref(writer: &mut BitWriter, ghost: GhostRef) -> CoreResult<()> {
    writer.write_varint(ghost.ghost_id.raw())?;
    writer.write_varint(ghost.spawn_tick)
}

/// Reads a ghost identity written by [`write_ghost_ref`].
///
/// # Errors
///
/// [`wraith_core::CoreError::Truncated`] on a short stream.
pub fn read_ghost_ref(reader: &mut BitReader<'_>) -> CoreResult<GhostRef> {
    let ghost_id = GhostId::from_raw(reader.read_varint()?);
    let spawn_tick = reader.read_varint()?;
    Ok(GhostRef::new(ghost_id, spawn_tick))
}

/// Per-ghost record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    /// Ghost identity.
    pub ghost: GhostRef,
    /// Ghost type.
    pub type_id: GhostTypeId,
    /// Tick of the history entry encoded.
    pub entry_tick: Tick,
    /// Baseline entry the payload is a delta against; `None` for zeros.
    pub baseline_tick: Option<Tick>,
    /// The recipient owns this ghost.
    pub owned: bool,
}

impl RecordHeader {
    /// Writes the header.
    ///
    /// # Errors
    ///
    /// [`wraith_core::CoreError::PayloadTooLarge`] if the writer is full.
    pub fn write(&self, writer: &mut BitWriter) -> CoreResult<()> {
        write_ghost_ref(writer, self.ghost)?;
        writer.write_varint(u32::from(self.type_id.0))?;
        writer.write_varint(self.entry_tick)?;
        match self.baseline_tick {
            Some(baseline) => {
                writer.write_bool(true)?;
                writer.write_varint(self.entry_tick.wrapping_sub(baseline))?;
            }
            None => writer.write_bool(false)?,
        }
        writer.write_bool(self.owned)
    }

    /// Reads a header.
    ///
    /// # Errors
    ///
    /// [`NetError::MalformedFrame`] for an out of range type id,
    /// [`NetError::Core`] on a short stream.
    pub fn read(reader: &mut BitReader<'_>) -> NetResult<Self> {
        let ghost = read_ghost_ref(reader)?;
        let type_id = u16::try_from(reader.read_varint()?)
            .map(GhostTypeId)
            .map_err(|_| NetError::MalformedFrame("ghost type id out of range"))?;
        let entry_tick = reader.read_varint()?;
        let baseline_tick = if reader.read_bool()? {
            let distance = reader.read_varint()?;
            Some(
                entry_tick
                    .checked_sub(distance)
                    .ok_or(NetError::MalformedFrame("baseline after entry"))?,
            )
        } else {
            None
        };
        let owned = reader.read_bool()?;
        Ok(Self {
            ghost,
            type_id,
            entry_tick,
            baseline_tick,
            owned,
        })
    }
}

/// Parsed snapshot frame: header and despawns decoded, records pending.
///
/// Record payloads can only be parsed with the ghost type registry, so the
/// reader hands out its bit stream for the receiver to walk.
pub struct FrameReader<'a> {
    /// Frame header.
    pub header: FrameHeader,
    /// Despawn notices.
    pub despawns: Vec<GhostRef>,
    reader: BitReader<'a>,
}

impl<'a> FrameReader<'a> {
    /// Parses the header and despawn list.
    ///
    /// # Errors
    ///
    /// [`NetError::MalformedFrame`] if the bytes are not a snapshot frame.
    pub fn parse(bytes: &'a [u8]) -> NetResult<Self> {
        if bytes.len() < FrameHeader::SIZE {
            return Err(NetError::MalformedFrame("shorter than frame header"));
        }
        let header: FrameHeader = bytemuck::pod_read_unaligned(&bytes[..FrameHeader::SIZE]);
        if PacketKind::from_u8(header.kind) != Some(PacketKind::Snapshot) {
            return Err(NetError::MalformedFrame("not a snapshot frame"));
        }

        let mut reader = BitReader::new(&bytes[FrameHeader::SIZE..]);
        let mut despawns = Vec::with_capacity(usize::from(header.despawn_count));
        for _ in 0..header.despawn_count {
            despawns.push(read_ghost_ref(&mut reader)?);
        }
        Ok(Self {
            header,
            despawns,
            reader,
        })
    }

    /// Bit stream positioned at the next record.
    #[inline]
    pub fn body(&mut self) -> &mut BitReader<'a> {
        &mut self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_header_round_trip() {
        let header = RecordHeader {
            ghost: GhostRef::new(GhostId::prespawned(3).unwrap(), 100),
            type_id: GhostTypeId(2),
            entry_tick: 164,
            baseline_tick: Some(160),
            owned: true,
        };
        let mut writer = BitWriter::new(64);
        header.write(&mut writer).unwrap();
        RecordHeader { baseline_tick: None, owned: false, ..header }
            .write(&mut writer)
            .unwrap();
        let bytes = writer.into_bytes();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(RecordHeader::read(&mut reader).unwrap(), header);
        let second = RecordHeader::read(&mut reader).unwrap();
        assert_eq!(second.baseline_tick, None);
        assert!(!second.owned);
    }

    #[test]
    fn test_frame_reader_rejects_garbage() {
        assert!(FrameReader::parse(&[1, 2, 3]).is_err());
        let mut bytes = bytemuck::bytes_of(&FrameHeader::new(5, 0, 0)).to_vec();
        bytes[0] = PacketKind::Commands as u8;
        assert!(FrameReader::parse(&bytes).is_err());
    }

    #[test]
    fn test_frame_reader_despawns() {
        let mut body = BitWriter::new(64);
        let gone = GhostRef::new(GhostId::new(9).unwrap(), 40);
        write_ghost_ref(&mut body, gone).unwrap();
        let mut bytes = bytemuck::bytes_of(&FrameHeader::new(50, 0, 1)).to_vec();
        bytes.extend_from_slice(body.as_slice());

        let frame = FrameReader::parse(&bytes).unwrap();
        assert_eq!(frame.header.tick, 50);
        assert_eq!(frame.despawns, vec![gone]);
        assert_eq!(packet_kind(&bytes), Some(PacketKind::Snapshot));
    }
}
