//! Per-type serializers.
//!
//! Payload layout of one ghost (all LSB-first):
//!
//! ```text
//! ┌──────────────┬──────────────────┬─────────────────────────────────┐
//! │ enable bits  │ change mask      │ per slot:                       │
//! │ (1 per comp) │ (tracked bits)   │  tracked & changed: zz-varint Δ │
//! │              │                  │  untracked:         varint unit │
//! └──────────────┴──────────────────┴─────────────────────────────────┘
//! ```
//!
//! `Δ` is the wrapping difference between the unit and its baseline unit,
//! zig-zag encoded so small movements in either direction stay one byte.

use super::layout::{FieldSlot, GhostLayout};
use crate::bitstream::{BitReader, BitWriter};
use crate::error::CoreResult;
use crate::field::FieldValue;
use crate::mask::ChangeMask;
use crate::state::GhostState;

/// A ghost payload decoded from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedGhost {
    /// Quantized units, baseline-applied.
    pub units: Vec<u32>,
    /// Component enable bits.
    pub enabled: Vec<bool>,
    /// Change mask as transmitted.
    pub change_mask: ChangeMask,
}

/// Serialization routines of one ghost type.
///
/// Resolved by type id once per ghost; the default methods drive the
/// flattened [`GhostLayout`] and suit every type that has no bespoke
/// encoding.
pub trait GhostSerializer: Send + Sync {
    /// Quantizes `state` into `units` (`layout.total_units()` long).
    fn quantize(&self, layout: &GhostLayout, state: &GhostState, units: &mut [u32]) {
        for (slot, value) in layout.slots().iter().zip(state.values()) {
            value.encode(slot.quantization, &mut units[slot.units()]);
        }
    }

    /// Rebuilds a state from quantized units.
    fn dequantize(&self, layout: &GhostLayout, units: &[u32], enabled: &[bool]) -> GhostState {
        let values = layout
            .slots()
            .iter()
            .map(|slot| FieldValue::decode(slot.kind, slot.quantization, &units[slot.units()]))
            .collect();
        GhostState::from_parts(values, enabled.to_vec())
    }

    /// Computes the change mask of `units` against `baseline` (zeros if absent).
    ///
    /// # Errors
    ///
    /// Propagates mask errors, which only occur for a corrupt layout.
    fn diff(
        &self,
        layout: &GhostLayout,
        units: &[u32],
        baseline: Option<&[u32]>,
        mask: &mut ChangeMask,
    ) -> CoreResult<()> {
        mask.clear();
        for slot in layout.slots().iter().filter(|s| s.change_tracked) {
            let run = slot_change_run(slot, units, baseline);
            mask.set_run(slot.change_bit_offset, slot.change_bits(), run)?;
        }
        Ok(())
    }

    /// Writes enable bits, change mask and changed units.
    ///
    /// # Errors
    ///
    /// [`crate::CoreError::PayloadTooLarge`] when the writer is full.
    fn write(
        &self,
        layout: &GhostLayout,
        units: &[u32],
        enabled: &[bool],
        baseline: Option<&[u32]>,
        writer: &mut BitWriter,
    ) -> CoreResult<()> {
        for bit in enabled {
            writer.write_bool(*bit)?;
        }

        let mut mask = ChangeMask::new(layout.total_change_bits());
        self.diff(layout, units, baseline, &mut mask)?;
        mask.write(writer)?;

        for slot in layout.slots() {
            if !slot.change_tracked {
                for unit in &units[slot.units()] {
                    writer.write_varint(*unit)?;
                }
                continue;
            }
            for (bit, range) in change_groups(slot) {
                if mask.is_set(slot.change_bit_offset + bit) {
                    for index in range {
                        let base = baseline.map_or(0, |b| b[index]);
                        writer.write_varint_signed(units[index].wrapping_sub(base) as i32)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads a payload written by [`GhostSerializer::write`].
    ///
    /// # Errors
    ///
    /// [`crate::CoreError::Truncated`] on a short payload.
    fn read(
        &self,
        layout: &GhostLayout,
        baseline: Option<&[u32]>,
        reader: &mut BitReader<'_>,
    ) -> CoreResult<DecodedGhost> {
        let mut enabled = Vec::with_capacity(layout.enable_bits());
        for _ in 0..layout.enable_bits() {
            enabled.push(reader.read_bool()?);
        }

        let change_mask = ChangeMask::read(reader, layout.total_change_bits())?;
        let mut units = baseline.map_or_else(|| vec![0; layout.total_units()], <[u32]>::to_vec);

        for slot in layout.slots() {
            if !slot.change_tracked {
                for index in slot.units() {
                    units[index] = reader.read_varint()?;
                }
                continue;
            }
            for (bit, range) in change_groups(slot) {
                if change_mask.is_set(slot.change_bit_offset + bit) {
                    for index in range {
                        let delta = reader.read_varint_signed()?;
                        units[index] = units[index].wrapping_add(delta as u32);
                    }
                }
            }
        }

        Ok(DecodedGhost {
            units,
            enabled,
            change_mask,
        })
    }
}

/// Serializer that follows the flattened layout with no customization.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayoutSerializer;

impl GhostSerializer for LayoutSerializer {}

/// Unit ranges covered by each change bit of a slot.
fn change_groups(slot: &FieldSlot) -> impl Iterator<Item = (usize, std::ops::Range<usize>)> {
    let units = slot.units();
    let bits = slot.change_bits();
    let per_bit = units.len() / bits.max(1);
    (0..bits).map(move |bit| {
        let start = units.start + bit * per_bit;
        let end = if bit + 1 == bits { units.end } else { start + per_bit };
        (bit, start..end)
    })
}

/// Change bits of one slot, bit `i` covering the `i`-th unit group.
fn slot_change_run(slot: &FieldSlot, units: &[u32], baseline: Option<&[u32]>) -> u32 {
    let mut run = 0;
    for (bit, range) in change_groups(slot) {
        let changed = range
            .into_iter()
            .any(|index| units[index] != baseline.map_or(0, |b| b[index]));
        if changed {
            run |= 1 << bit;
        }
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDescriptor, FieldKind};
    use crate::registry::ComponentDescriptor;

    fn layout() -> GhostLayout {
        GhostLayout::build(
            "Probe",
            &[
                ComponentDescriptor::new("Transform")
                    .field(FieldDescriptor::new("position", FieldKind::Vec3).quantized(100))
                    .field(FieldDescriptor::new("rotation", FieldKind::Quat).quantized(1000)),
                ComponentDescriptor::new("Stats")
                    .field(FieldDescriptor::new("health", FieldKind::Int))
                    .field(FieldDescriptor::new("seed", FieldKind::UInt).untracked())
                    .enableable(),
            ],
        )
        .unwrap()
    }

    fn units_of(layout: &GhostLayout, state: &GhostState) -> Vec<u32> {
        let mut units = vec![0; layout.total_units()];
        LayoutSerializer.quantize(layout, state, &mut units);
        units
    }

    #[test]
    fn test_diff_marks_single_axis() {
        let layout = layout();
        let mut state = GhostState::new(&layout);
        let base = units_of(&layout, &state);
        let position = layout.field_slot("Transform", "position").unwrap();
        state.set(position, FieldValue::Vec3([0.0, 2.0, 0.0])).unwrap();
        let units = units_of(&layout, &state);

        let mut mask = ChangeMask::new(layout.total_change_bits());
        LayoutSerializer.diff(&layout, &units, Some(&base), &mut mask).unwrap();
        assert_eq!(mask.count_ones(), 1);
        assert!(mask.is_set(1));
    }

    #[test]
    fn test_write_read_against_baseline() {
        let layout = layout();
        let mut state = GhostState::new(&layout);
        let health = layout.field_slot("Stats", "health").unwrap();
        let seed = layout.field_slot("Stats", "seed").unwrap();
        state.set(health, FieldValue::Int(100)).unwrap();
        state.set(seed, FieldValue::UInt(77)).unwrap();
        let base = units_of(&layout, &state);

        state.set(health, FieldValue::Int(95)).unwrap();
        state.set_enabled(0, true);
        let units = units_of(&layout, &state);

        let mut writer = BitWriter::new(256);
        LayoutSerializer
            .write(&layout, &units, state.enabled(), Some(&base), &mut writer)
            .unwrap();
        let bytes = writer.into_bytes();

        let decoded = LayoutSerializer
            .read(&layout, Some(&base), &mut BitReader::new(&bytes))
            .unwrap();
        assert_eq!(decoded.units, units);
        assert_eq!(decoded.enabled, vec![true]);
        assert_eq!(decoded.change_mask.count_ones(), 1);
    }

    #[test]
    fn test_unchanged_state_costs_only_mask_and_untracked() {
        let layout = layout();
        let state = GhostState::new(&layout);
        let units = units_of(&layout, &state);

        let mut writer = BitWriter::new(256);
        LayoutSerializer
            .write(&layout, &units, state.enabled(), Some(&units), &mut writer)
            .unwrap();
        // 1 enable bit + 5 change bits + one varint byte for the untracked seed
        assert_eq!(writer.bit_len(), 1 + 5 + 8);
    }

    #[test]
    fn test_full_state_without_baseline() {
        let layout = layout();
        let mut state = GhostState::new(&layout);
        let rotation = layout.field_slot("Transform", "rotation").unwrap();
        state.set(rotation, FieldValue::Quat([0.0, 0.7071, 0.0, 0.7071])).unwrap();
        let units = units_of(&layout, &state);

        let mut writer = BitWriter::new(256);
        LayoutSerializer.write(&layout, &units, state.enabled(), None, &mut writer).unwrap();
        let bytes = writer.into_bytes();
        let decoded = LayoutSerializer.read(&layout, None, &mut BitReader::new(&bytes)).unwrap();
        let restored = LayoutSerializer.dequantize(&layout, &decoded.units, &decoded.enabled);
        let FieldValue::Quat(q) = restored.get(rotation).unwrap() else {
            panic!("kind changed");
        };
        assert!((q[1] - 0.7071).abs() < 2e-3);
        assert!((q[3] - 0.7071).abs() < 2e-3);
    }
}
