//! Snapshot frame decoding.
//!
//! Decoding only reads client state (for baselines); applying the result
//! is left to the caller so per-ghost work can run in parallel.

use wraith_core::{DecodedGhost, GhostRef, GhostTypeRegistry, SnapshotEntry, Tick};

use crate::error::NetResult;
use crate::protocol::{FrameReader, RecordHeader};

/// One ghost record, baseline applied.
#[derive(Clone, Debug)]
pub(crate) struct DecodedRecord {
    pub(crate) header: RecordHeader,
    pub(crate) decoded: DecodedGhost,
}

impl DecodedRecord {
    pub(crate) fn into_entry(self) -> SnapshotEntry {
        SnapshotEntry {
            tick: self.header.entry_tick,
            change_mask: self.decoded.change_mask,
            units: self.decoded.units,
            enabled: self.decoded.enabled,
        }
    }
}

/// A decoded snapshot frame.
#[derive(Debug)]
pub(crate) struct DecodedFrame {
    pub(crate) tick: Tick,
    pub(crate) despawns: Vec<GhostRef>,
    pub(crate) records: Vec<DecodedRecord>,
    /// Records skipped because their baseline is not held locally.
    pub(crate) dropped: usize,
}

/// Decodes a snapshot frame.
///
/// Returns `Ok(None)` for a frame not newer than `newer_than`. `baseline`
/// looks up the units of a held history entry.
pub(crate) fn decode_frame<'h>(
    registry: &GhostTypeRegistry,
    bytes: &[u8],
    newer_than: Option<Tick>,
    baseline: impl Fn(GhostRef, Tick) -> Option<&'h [u32]>,
) -> NetResult<Option<DecodedFrame>> {
    let mut frame = FrameReader::parse(bytes)?;
    let tick = frame.header.tick;
    if newer_than.is_some_and(|last| tick <= last) {
        return Ok(None);
    }

    let ghost_count = frame.header.ghost_count;
    let despawns = std::mem::take(&mut frame.despawns);
    let body = frame.body();
    let mut records = Vec::with_capacity(usize::from(ghost_count));
    let mut dropped = 0;

    for _ in 0..ghost_count {
        let header = RecordHeader::read(body)?;
        let layout = registry.resolve(header.type_id)?.layout();
        let serializer = registry.serializer(header.type_id)?;

        let base = match header.baseline_tick {
            Some(tick) => match baseline(header.ghost, tick) {
                Some(units) => Some(units),
                None => {
                    serializer.read(layout, None, body)?;
                    tracing::warn!(
                        "Record for {} dropped: baseline {} not held",
                        header.ghost,
                        tick
                    );
                    dropped += 1;
                    continue;
                }
            },
            None => None,
        };
        let decoded = serializer.read(layout, base, body)?;
        records.push(DecodedRecord { header, decoded });
    }

    Ok(Some(DecodedFrame {
        tick,
        despawns,
        records,
        dropped,
    }))
}
