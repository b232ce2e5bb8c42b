//! Decoded per-ghost state: one value per layout slot plus enable bits.

use crate::error::{CoreError, CoreResult};
use crate::field::FieldValue;
use crate::ghost::GhostRef;
use crate::registry::GhostLayout;

/// Decoded values of one ghost.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GhostState {
    values: Vec<FieldValue>,
    enabled: Vec<bool>,
}

impl GhostState {
    /// Creates the zero state of a layout. Enableable components start disabled.
    #[must_use]
    pub fn new(layout: &GhostLayout) -> Self {
        Self {
            values: layout
                .slots()
                .iter()
                .map(|slot| FieldValue::default_for(slot.kind))
                .collect(),
            enabled: vec![false; layout.enable_bits()],
        }
    }

    /// Assembles a state from decoded parts.
    #[must_use]
    pub fn from_parts(values: Vec<FieldValue>, enabled: Vec<bool>) -> Self {
        Self { values, enabled }
    }

    /// Values in slot order.
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Enable bits in component order.
    #[inline]
    #[must_use]
    pub fn enabled(&self) -> &[bool] {
        &self.enabled
    }

    /// Value at `slot`.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<FieldValue> {
        self.values.get(slot).copied()
    }

    /// Overwrites the value at `slot`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for an unknown slot,
    /// [`CoreError::FieldKindMismatch`] if `value` is of another kind.
    pub fn set(&mut self, slot: usize, value: FieldValue) -> CoreResult<()> {
        let current = self
            .values
            .get_mut(slot)
            .ok_or_else(|| CoreError::invalid("slot", slot as i64))?;
        if current.kind() != value.kind() {
            return Err(CoreError::FieldKindMismatch {
                slot,
                expected: current.kind().name(),
                found: value.kind().name(),
            });
        }
        *current = value;
        Ok(())
    }

    /// Enable bit `index`; out of range reads as disabled.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self, index: usize) -> bool {
        self.enabled.get(index).copied().unwrap_or(false)
    }

    /// Sets enable bit `index`. Out of range is ignored.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(bit) = self.enabled.get_mut(index) {
            *bit = enabled;
        }
    }

    /// Float at `slot`, if the slot holds one.
    #[must_use]
    pub fn float(&self, slot: usize) -> Option<f32> {
        match self.get(slot)? {
            FieldValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Signed integer at `slot`, if the slot holds one.
    #[must_use]
    pub fn int(&self, slot: usize) -> Option<i32> {
        match self.get(slot)? {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Vector at `slot`, if the slot holds one.
    #[must_use]
    pub fn vec3(&self, slot: usize) -> Option<[f32; 3]> {
        match self.get(slot)? {
            FieldValue::Vec3(v) => Some(v),
            _ => None,
        }
    }

    /// Slots holding entity references together with their targets.
    pub fn references(&self) -> impl Iterator<Item = (usize, Option<GhostRef>)> + '_ {
        self.values.iter().enumerate().filter_map(|(slot, value)| match value {
            FieldValue::EntityRef(target) => Some((slot, *target)),
            _ => None,
        })
    }
}
