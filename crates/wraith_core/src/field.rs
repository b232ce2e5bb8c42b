//! # Field Kinds
//!
//! Every replicated field flattens to a fixed number of 32-bit units.
//!
//! | Kind        | Units | Change bits |
//! |-------------|-------|-------------|
//! | `Int`       | 1     | 1           |
//! | `UInt`      | 1     | 1           |
//! | `Bool`      | 1     | 1           |
//! | `Float`     | 1     | 1           |
//! | `Vec3`      | 3     | 3 (per axis)|
//! | `Quat`      | 4     | 1           |
//! | `EntityRef` | 2     | 1           |

use crate::ghost::{GhostId, GhostRef};
use crate::quantize::{
    dequantize_float, dequantize_quat, dequantize_vec3, quantize_float, quantize_quat,
    quantize_vec3,
};

/// Semantic type of a replicated field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldKind {
    /// Signed 32-bit integer.
    Int = 0,
    /// Unsigned 32-bit integer.
    UInt = 1,
    /// Boolean.
    Bool = 2,
    /// 32-bit float, optionally quantized.
    Float = 3,
    /// Three floats, one change bit per axis.
    Vec3 = 4,
    /// Rotation quaternion `[x, y, z, w]`.
    Quat = 5,
    /// Reference to another ghost.
    EntityRef = 6,
}

impl FieldKind {
    /// Number of 32-bit units the kind occupies.
    #[inline]
    #[must_use]
    pub const fn units(self) -> usize {
        match self {
            Self::Int | Self::UInt | Self::Bool | Self::Float => 1,
            Self::Vec3 => 3,
            Self::Quat => 4,
            Self::EntityRef => 2,
        }
    }

    /// Number of change bits the kind owns when tracked.
    #[inline]
    #[must_use]
    pub const fn change_bits(self) -> usize {
        match self {
            Self::Vec3 => 3,
            _ => 1,
        }
    }

    /// Returns true if the kind accepts a quantization factor.
    #[inline]
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Vec3 | Self::Quat)
    }

    /// Human readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Vec3 => "vec3",
            Self::Quat => "quat",
            Self::EntityRef => "entity_ref",
        }
    }
}

/// One field of a component, as supplied by the authoring layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, unique within its component.
    pub name: String,
    /// Semantic type.
    pub kind: FieldKind,
    /// Quantization factor; 0 transmits full precision.
    pub quantization: u32,
    /// Whether the field owns change bits.
    pub change_tracked: bool,
}

impl FieldDescriptor {
    /// Creates a change-tracked, unquantized field.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            quantization: 0,
            change_tracked: true,
        }
    }

    /// Sets the quantization factor.
    #[must_use]
    pub const fn quantized(mut self, factor: u32) -> Self {
        self.quantization = factor;
        self
    }

    /// Marks the field as untracked: no change bits, always written in full.
    #[must_use]
    pub const fn untracked(mut self) -> Self {
        self.change_tracked = false;
        self
    }
}

/// A decoded field value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    /// Signed integer.
    Int(i32),
    /// Unsigned integer.
    UInt(u32),
    /// Boolean.
    Bool(bool),
    /// Float.
    Float(f32),
    /// Vector.
    Vec3([f32; 3]),
    /// Quaternion `[x, y, z, w]`.
    Quat([f32; 4]),
    /// Ghost reference; `None` is the null reference.
    EntityRef(Option<GhostRef>),
}

impl FieldValue {
    /// Zero value of a kind (identity for rotations, null for references).
    #[must_use]
    pub const fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Int => Self::Int(0),
            FieldKind::UInt => Self::UInt(0),
            FieldKind::Bool => Self::Bool(false),
            FieldKind::Float => Self::Float(0.0),
            FieldKind::Vec3 => Self::Vec3([0.0; 3]),
            FieldKind::Quat => Self::Quat([0.0, 0.0, 0.0, 1.0]),
            FieldKind::EntityRef => Self::EntityRef(None),
        }
    }

    /// Kind of this value.
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Int(_) => FieldKind::Int,
            Self::UInt(_) => FieldKind::UInt,
            Self::Bool(_) => FieldKind::Bool,
            Self::Float(_) => FieldKind::Float,
            Self::Vec3(_) => FieldKind::Vec3,
            Self::Quat(_) => FieldKind::Quat,
            Self::EntityRef(_) => FieldKind::EntityRef,
        }
    }

    /// Writes the quantized units of this value into `out`.
    ///
    /// `out` must be exactly `self.kind().units()` long.
    #[allow(clippy::cast_sign_loss)]
    pub fn encode(&self, quantization: u32, out: &mut [u32]) {
        debug_assert_eq!(out.len(), self.kind().units());
        match *self {
            Self::Int(v) => out[0] = v as u32,
            Self::UInt(v) => out[0] = v,
            Self::Bool(v) => out[0] = u32::from(v),
            Self::Float(v) => out[0] = quantize_float(v, quantization),
            Self::Vec3(v) => out.copy_from_slice(&quantize_vec3(v, quantization)),
            Self::Quat(v) => out.copy_from_slice(&quantize_quat(v, quantization)),
            Self::EntityRef(None) => out.fill(0),
            Self::EntityRef(Some(target)) => {
                out[0] = target.ghost_id.raw();
                out[1] = target.spawn_tick.wrapping_add(1);
            }
        }
    }

    /// Decodes a value of `kind` from its units.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode(kind: FieldKind, quantization: u32, units: &[u32]) -> Self {
        debug_assert_eq!(units.len(), kind.units());
        match kind {
            FieldKind::Int => Self::Int(units[0] as i32),
            FieldKind::UInt => Self::UInt(units[0]),
            FieldKind::Bool => Self::Bool(units[0] != 0),
            FieldKind::Float => Self::Float(dequantize_float(units[0], quantization)),
            FieldKind::Vec3 => {
                Self::Vec3(dequantize_vec3([units[0], units[1], units[2]], quantization))
            }
            FieldKind::Quat => Self::Quat(dequantize_quat(
                [units[0], units[1], units[2], units[3]],
                quantization,
            )),
            FieldKind::EntityRef => {
                if units[1] == 0 {
                    Self::EntityRef(None)
                } else {
                    Self::EntityRef(Some(GhostRef::new(
                        GhostId::from_raw(units[0]),
                        units[1] - 1,
                    )))
                }
            }
        }
    }
}
