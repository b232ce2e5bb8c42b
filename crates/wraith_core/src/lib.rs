//! # WRAITH Core
//!
//! Leaf primitives for ghost replication:
//! - Change masks that set, reset and read bit runs across word boundaries
//! - Quantization of floating point fields into 32-bit units
//! - A bit stream for packing masks and varint-encoded deltas
//! - The ghost type registry, with one serializer per type id
//! - Per-entity snapshot history ring buffers
//! - Generational local entity ids and the ghost-group arena
//!
//! ## Architecture Rules
//!
//! 1. **Types are immutable once registered** - layouts are computed once
//! 2. **No reflection in the tick path** - serializers are resolved by id
//! 3. **Histories are strictly ordered** - entries only ever move forward
//!
//! ## Example
//!
//! ```rust,ignore
//! use wraith_core::{ComponentDescriptor, FieldDescriptor, FieldKind, GhostTypeDescriptor, GhostTypeRegistry};
//!
//! let mut registry = GhostTypeRegistry::new();
//! let crate_type = registry.register(
//!     GhostTypeDescriptor::new("Crate").component(
//!         ComponentDescriptor::new("Transform")
//!             .field(FieldDescriptor::new("position", FieldKind::Vec3).quantized(100)),
//!     ),
//! )?;
//! let hash = registry.collection_hash();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bitstream;
pub mod error;
pub mod field;
pub mod ghost;
pub mod history;
pub mod mask;
pub mod memory;
pub mod quantize;
pub mod registry;
pub mod state;

pub use bitstream::{BitReader, BitWriter};
pub use error::{CoreError, CoreResult};
pub use field::{FieldDescriptor, FieldKind, FieldValue};
pub use ghost::{GhostId, GhostInstance, GhostRef, GhostTypeId, Tick};
pub use history::{SnapshotEntry, SnapshotHistory};
pub use mask::{get_bits, reset_bits, set_bits, ChangeMask};
pub use memory::{EntityAllocator, GroupArena, GroupSpan, LocalEntity};
pub use registry::{
    ComponentDescriptor, ComponentLayout, ComponentStorage, DecodedGhost, FieldSlot, GhostLayout,
    GhostMode, GhostSerializer, GhostType, GhostTypeDescriptor, GhostTypeRegistry,
    LayoutSerializer, OptimizationMode, SlotRole,
};
pub use state::GhostState;

/// Number of bits in one change-mask word.
pub const MASK_WORD_BITS: usize = 32;
