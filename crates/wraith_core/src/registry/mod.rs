//! # Ghost Type Registry
//!
//! Append-only table of ghost types, built once per session.
//!
//! ```text
//! descriptor ──register──► GhostType { id, layout } ──► serializer[id]
//!                                   │
//!                     collection_hash() (sorted by name)
//!                                   │
//!                     compared by the handshake layer
//! ```
//!
//! Serializers are trait objects resolved by the small integer type id;
//! nothing in the tick path looks anything up by name.

mod layout;
mod serializer;

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use siphasher::sip::SipHasher13;

pub use layout::{ComponentLayout, FieldSlot, GhostLayout, SlotRole};
pub use serializer::{DecodedGhost, GhostSerializer, LayoutSerializer};

use crate::error::{CoreError, CoreResult};
use crate::field::FieldDescriptor;
use crate::ghost::GhostTypeId;

/// Fixed keys so every build computes the same collection hash.
const HASH_KEYS: (u64, u64) = (0x5752_4149_5448_0001, 0x6768_6f73_7473_0002);

/// Whether a ghost is sent every tick or only when it changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OptimizationMode {
    /// Sent every tick it is relevant.
    #[default]
    Dynamic,
    /// Sent only when its data changed since it was last recorded.
    Static,
}

/// How clients run a ghost type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GhostMode {
    /// Rendered from interpolated history.
    #[default]
    Interpolated,
    /// Predicted on every client.
    Predicted,
    /// Predicted only on the owning client, interpolated elsewhere.
    OwnerPredicted,
}

/// Storage kind of a component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ComponentStorage {
    /// One value per field.
    #[default]
    Single,
    /// A bounded dynamic buffer of elements.
    Buffer {
        /// Maximum replicated elements.
        capacity: u16,
    },
}

/// A replicated component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// Component name, unique within the ghost type.
    pub name: String,
    /// Replicated fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Whether the component carries a replicated enable bit.
    pub enableable: bool,
    /// Storage kind.
    pub storage: ComponentStorage,
}

impl ComponentDescriptor {
    /// Creates an empty single component.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            enableable: false,
            storage: ComponentStorage::Single,
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Marks the component as enableable.
    #[must_use]
    pub const fn enableable(mut self) -> Self {
        self.enableable = true;
        self
    }

    /// Turns the component into a buffer.
    #[must_use]
    pub const fn buffer(mut self, capacity: u16) -> Self {
        self.storage = ComponentStorage::Buffer { capacity };
        self
    }
}

/// A ghost type as supplied by the authoring layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostTypeDescriptor {
    /// Unique type name.
    pub name: String,
    /// Components in declaration order.
    pub components: Vec<ComponentDescriptor>,
    /// Importance weight; higher is sent first.
    pub importance: u32,
    /// Send policy.
    pub optimization: OptimizationMode,
    /// Client run mode.
    pub mode: GhostMode,
}

impl GhostTypeDescriptor {
    /// Creates a dynamic, interpolated type with importance 1.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            importance: 1,
            optimization: OptimizationMode::Dynamic,
            mode: GhostMode::Interpolated,
        }
    }

    /// Appends a component.
    #[must_use]
    pub fn component(mut self, component: ComponentDescriptor) -> Self {
        self.components.push(component);
        self
    }

    /// Sets the importance weight.
    #[must_use]
    pub const fn importance(mut self, importance: u32) -> Self {
        self.importance = importance;
        self
    }

    /// Sets the optimization mode.
    #[must_use]
    pub const fn optimization(mut self, optimization: OptimizationMode) -> Self {
        self.optimization = optimization;
        self
    }

    /// Sets the client run mode.
    #[must_use]
    pub const fn mode(mut self, mode: GhostMode) -> Self {
        self.mode = mode;
        self
    }
}

/// An immutable registered ghost type.
#[derive(Debug)]
pub struct GhostType {
    id: GhostTypeId,
    descriptor: GhostTypeDescriptor,
    layout: GhostLayout,
}

impl GhostType {
    /// Type id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> GhostTypeId {
        self.id
    }

    /// Type name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Original descriptor.
    #[inline]
    #[must_use]
    pub const fn descriptor(&self) -> &GhostTypeDescriptor {
        &self.descriptor
    }

    /// Flattened layout.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &GhostLayout {
        &self.layout
    }

    /// Importance weight.
    #[inline]
    #[must_use]
    pub const fn importance(&self) -> u32 {
        self.descriptor.importance
    }

    /// Send policy.
    #[inline]
    #[must_use]
    pub const fn optimization(&self) -> OptimizationMode {
        self.descriptor.optimization
    }

    /// Client run mode.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> GhostMode {
        self.descriptor.mode
    }

    fn hash_into(&self, hasher: &mut SipHasher13) {
        let desc = &self.descriptor;
        hasher.write_u16(self.id.0);
        hasher.write(desc.name.as_bytes());
        hasher.write_u32(desc.importance);
        hasher.write_u8(desc.optimization as u8);
        hasher.write_u8(desc.mode as u8);
        for component in &desc.components {
            hasher.write(component.name.as_bytes());
            hasher.write_u8(u8::from(component.enableable));
            match component.storage {
                ComponentStorage::Single => hasher.write_u16(0),
                ComponentStorage::Buffer { capacity } => {
                    hasher.write_u8(1);
                    hasher.write_u16(capacity);
                }
            }
            for field in &component.fields {
                hasher.write(field.name.as_bytes());
                hasher.write_u8(field.kind as u8);
                hasher.write_u32(field.quantization);
                hasher.write_u8(u8::from(field.change_tracked));
            }
        }
        hasher.write_usize(self.layout.total_units());
        hasher.write_usize(self.layout.total_change_bits());
    }
}

/// Registry of ghost types and their serializers.
#[derive(Default)]
pub struct GhostTypeRegistry {
    types: Vec<Arc<GhostType>>,
    serializers: Vec<Arc<dyn GhostSerializer>>,
    by_name: HashMap<String, GhostTypeId>,
}

impl GhostTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type with the layout-driven serializer.
    ///
    /// # Errors
    ///
    /// See [`GhostTypeRegistry::register_with_serializer`].
    pub fn register(&mut self, descriptor: GhostTypeDescriptor) -> CoreResult<GhostTypeId> {
        self.register_with_serializer(descriptor, Arc::new(LayoutSerializer))
    }

    /// Registers a type with a custom serializer.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateGhostType`] for a repeated name,
    /// [`CoreError::UnsupportedLayout`] for a shape that cannot be replicated.
    pub fn register_with_serializer(
        &mut self,
        descriptor: GhostTypeDescriptor,
        serializer: Arc<dyn GhostSerializer>,
    ) -> CoreResult<GhostTypeId> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(CoreError::DuplicateGhostType(descriptor.name));
        }
        let raw = u16::try_from(self.types.len())
            .map_err(|_| CoreError::invalid("ghost type count", self.types.len() as i64))?;
        let layout = GhostLayout::build(&descriptor.name, &descriptor.components)?;
        let id = GhostTypeId(raw);

        tracing::debug!(
            ghost_type = %descriptor.name,
            %id,
            units = layout.total_units(),
            change_bits = layout.total_change_bits(),
            "Registered ghost type"
        );

        self.by_name.insert(descriptor.name.clone(), id);
        self.types.push(Arc::new(GhostType {
            id,
            descriptor,
            layout,
        }));
        self.serializers.push(serializer);
        Ok(id)
    }

    /// Looks up a type by id.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownGhostType`] if never registered.
    #[inline]
    pub fn resolve(&self, id: GhostTypeId) -> CoreResult<&Arc<GhostType>> {
        self.types
            .get(usize::from(id.0))
            .ok_or(CoreError::UnknownGhostType(id))
    }

    /// Serializer of a type.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownGhostType`] if never registered.
    #[inline]
    pub fn serializer(&self, id: GhostTypeId) -> CoreResult<&dyn GhostSerializer> {
        self.serializers
            .get(usize::from(id.0))
            .map(|s| &**s)
            .ok_or(CoreError::UnknownGhostType(id))
    }

    /// Looks up a type id by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<GhostTypeId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<GhostType>> {
        self.types.iter()
    }

    /// Hash over every registered type, sorted by name.
    ///
    /// Two registries produce the same hash iff they hold the same types under
    /// the same ids with the same layouts.
    #[must_use]
    pub fn collection_hash(&self) -> u64 {
        let mut sorted: Vec<&Arc<GhostType>> = self.types.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        let mut hasher = SipHasher13::new_with_keys(HASH_KEYS.0, HASH_KEYS.1);
        hasher.write_usize(sorted.len());
        for ty in sorted {
            ty.hash_into(&mut hasher);
        }
        hasher.finish()
    }
}

impl std::fmt::Debug for GhostTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostTypeRegistry")
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}
