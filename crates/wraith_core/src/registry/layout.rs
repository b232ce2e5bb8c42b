//! Flattened field layout of a ghost type.
//!
//! ```text
//! component A (Single)       component B (Buffer, capacity 2, enableable)
//! ┌──────────┬────────────┐  ┌─────┬──────────┬──────────┐
//! │ pos:Vec3 │ hp:Int     │  │ len │ slot[0].x│ slot[1].x│
//! └──────────┴────────────┘  └─────┴──────────┴──────────┘
//! units   0..3   3           4      5          6
//! bits    0..3   3           4      5          6         enable bit 0
//! ```

use std::ops::Range;

use super::{ComponentDescriptor, ComponentStorage};
use crate::error::{CoreError, CoreResult};
use crate::field::FieldKind;

/// What a slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotRole {
    /// A declared field, optionally one element of a buffer.
    Field {
        /// Field index within the component.
        index: usize,
        /// Buffer element, `None` for single components.
        element: Option<u16>,
    },
    /// Replicated length of a buffer component.
    BufferLength,
}

/// One flattened value of a ghost layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    /// Component index within the ghost type.
    pub component: usize,
    /// What the slot holds.
    pub role: SlotRole,
    /// Semantic type.
    pub kind: FieldKind,
    /// Quantization factor.
    pub quantization: u32,
    /// Whether the slot owns change bits.
    pub change_tracked: bool,
    /// First unit in the quantized payload.
    pub unit_offset: usize,
    /// First change bit; meaningless when untracked.
    pub change_bit_offset: usize,
}

impl FieldSlot {
    /// Unit range of this slot.
    #[inline]
    #[must_use]
    pub const fn units(&self) -> Range<usize> {
        self.unit_offset..self.unit_offset + self.kind.units()
    }

    /// Number of change bits owned.
    #[inline]
    #[must_use]
    pub const fn change_bits(&self) -> usize {
        if self.change_tracked {
            self.kind.change_bits()
        } else {
            0
        }
    }
}

/// Flattened view of one component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentLayout {
    /// Component name.
    pub name: String,
    /// Declared field names, in order.
    pub fields: Vec<String>,
    /// Index of the component's enable bit.
    pub enable_bit: Option<usize>,
    /// Slots belonging to the component.
    pub slots: Range<usize>,
    /// Storage kind.
    pub storage: ComponentStorage,
}

/// Flattened layout of a ghost type, computed once at registration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GhostLayout {
    components: Vec<ComponentLayout>,
    slots: Vec<FieldSlot>,
    enable_bits: usize,
    total_units: usize,
    total_change_bits: usize,
}

impl GhostLayout {
    /// Flattens and validates a component list.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnsupportedLayout`] for shapes that cannot be replicated:
    /// no components, a component with no fields that is not enableable, an
    /// enableable buffer with no fields, a zero-capacity buffer, or a
    /// quantization factor on a non-float field.
    pub fn build(ghost_type: &str, components: &[ComponentDescriptor]) -> CoreResult<Self> {
        let reject = |component: &str, reason: &'static str| CoreError::UnsupportedLayout {
            ghost_type: ghost_type.to_owned(),
            component: component.to_owned(),
            reason,
        };

        if components.is_empty() {
            return Err(reject("", "ghost type has no components"));
        }

        let mut layout = Self::default();
        for (component_index, component) in components.iter().enumerate() {
            match component.storage {
                ComponentStorage::Buffer { capacity: 0 } => {
                    return Err(reject(&component.name, "buffer capacity is zero"));
                }
                ComponentStorage::Buffer { .. }
                    if component.fields.is_empty() && component.enableable =>
                {
                    return Err(reject(
                        &component.name,
                        "enableable buffer has no replicated fields",
                    ));
                }
                _ if component.fields.is_empty() && !component.enableable => {
                    return Err(reject(&component.name, "component has no replicated fields"));
                }
                _ => {}
            }
            if component
                .fields
                .iter()
                .any(|f| f.quantization != 0 && !f.kind.is_float())
            {
                return Err(reject(&component.name, "quantization on a non-float field"));
            }

            let enable_bit = component.enableable.then(|| {
                layout.enable_bits += 1;
                layout.enable_bits - 1
            });
            let first_slot = layout.slots.len();

            match component.storage {
                ComponentStorage::Single => {
                    for (index, field) in component.fields.iter().enumerate() {
                        layout.push_slot(
                            component_index,
                            SlotRole::Field { index, element: None },
                            field.kind,
                            field.quantization,
                            field.change_tracked,
                        );
                    }
                }
                ComponentStorage::Buffer { capacity } => {
                    layout.push_slot(component_index, SlotRole::BufferLength, FieldKind::UInt, 0, true);
                    for element in 0..capacity {
                        for (index, field) in component.fields.iter().enumerate() {
                            layout.push_slot(
                                component_index,
                                SlotRole::Field { index, element: Some(element) },
                                field.kind,
                                field.quantization,
                                field.change_tracked,
                            );
                        }
                    }
                }
            }

            layout.components.push(ComponentLayout {
                name: component.name.clone(),
                fields: component.fields.iter().map(|f| f.name.clone()).collect(),
                enable_bit,
                slots: first_slot..layout.slots.len(),
                storage: component.storage,
            });
        }
        Ok(layout)
    }

    fn push_slot(
        &mut self,
        component: usize,
        role: SlotRole,
        kind: FieldKind,
        quantization: u32,
        change_tracked: bool,
    ) {
        let slot = FieldSlot {
            component,
            role,
            kind,
            quantization,
            change_tracked,
            unit_offset: self.total_units,
            change_bit_offset: self.total_change_bits,
        };
        self.total_units += kind.units();
        self.total_change_bits += slot.change_bits();
        self.slots.push(slot);
    }

    /// Flattened slots in payload order.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    /// Component views in declaration order.
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[ComponentLayout] {
        &self.components
    }

    /// Number of enable bits.
    #[inline]
    #[must_use]
    pub const fn enable_bits(&self) -> usize {
        self.enable_bits
    }

    /// Length of the quantized payload in units.
    #[inline]
    #[must_use]
    pub const fn total_units(&self) -> usize {
        self.total_units
    }

    /// Length of the change mask in bits.
    #[inline]
    #[must_use]
    pub const fn total_change_bits(&self) -> usize {
        self.total_change_bits
    }

    fn component(&self, name: &str) -> Option<&ComponentLayout> {
        self.components.iter().find(|c| c.name == name)
    }

    fn find_slot(&self, component: &str, field: &str, element: Option<u16>) -> Option<usize> {
        let layout = self.component(component)?;
        let index = layout.fields.iter().position(|f| f == field)?;
        layout
            .slots
            .clone()
            .find(|slot| self.slots[*slot].role == SlotRole::Field { index, element })
    }

    /// Slot of a field in a single component.
    #[must_use]
    pub fn field_slot(&self, component: &str, field: &str) -> Option<usize> {
        self.find_slot(component, field, None)
    }

    /// Slot of one element of a buffer field.
    #[must_use]
    pub fn element_slot(&self, component: &str, field: &str, element: u16) -> Option<usize> {
        self.find_slot(component, field, Some(element))
    }

    /// Slot holding a buffer component's length.
    #[must_use]
    pub fn length_slot(&self, component: &str) -> Option<usize> {
        let layout = self.component(component)?;
        layout
            .slots
            .clone()
            .find(|slot| self.slots[*slot].role == SlotRole::BufferLength)
    }

    /// Enable bit of an enableable component.
    #[must_use]
    pub fn enable_bit(&self, component: &str) -> Option<usize> {
        self.component(component)?.enable_bit
    }
}
