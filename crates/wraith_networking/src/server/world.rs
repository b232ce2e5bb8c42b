//! # Server World
//!
//! Authoritative ghost storage and per-tick history capture.
//!
//! ## Design
//!
//! - Ghost ids come from a free list and may be reused after despawn
//! - Group members live in one [`GroupArena`] span owned by the root
//! - Capture quantizes every ghost in parallel; static ghosts only
//!   record a new entry when their quantized state changed

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use wraith_core::{
    ChangeMask, CoreError, GhostId, GhostInstance, GhostRef, GhostSerializer, GhostState,
    GhostType, GhostTypeId, GhostTypeRegistry, GroupArena, GroupSpan, OptimizationMode,
    SnapshotEntry, SnapshotHistory, Tick,
};

use super::ConnectionId;
use crate::error::NetResult;

/// One authoritative ghost.
pub struct ServerGhost {
    instance: GhostInstance,
    ghost_type: Arc<GhostType>,
    owner: Option<ConnectionId>,
    state: GhostState,
    history: SnapshotHistory,
    parent: Option<GhostId>,
    children: GroupSpan,
}

impl ServerGhost {
    fn new(
        instance: GhostInstance,
        ghost_type: Arc<GhostType>,
        owner: Option<ConnectionId>,
        history_capacity: usize,
    ) -> Self {
        let state = GhostState::new(ghost_type.layout());
        Self {
            instance,
            ghost_type,
            owner,
            state,
            history: SnapshotHistory::new(history_capacity),
            parent: None,
            children: GroupSpan::EMPTY,
        }
    }

    /// Identity and type.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> GhostInstance {
        self.instance
    }

    /// Ghost id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> GhostId {
        self.instance.ghost.ghost_id
    }

    /// Identity key.
    #[inline]
    #[must_use]
    pub const fn ghost_ref(&self) -> GhostRef {
        self.instance.ghost
    }

    /// Registered type.
    #[inline]
    #[must_use]
    pub fn ghost_type(&self) -> &GhostType {
        &self.ghost_type
    }

    /// Owning connection, if any.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    /// Current authoritative state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> &GhostState {
        &self.state
    }

    /// Mutable authoritative state.
    #[inline]
    pub fn state_mut(&mut self) -> &mut GhostState {
        &mut self.state
    }

    /// Captured history.
    #[inline]
    #[must_use]
    pub const fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Group root, if this ghost is a child.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<GhostId> {
        self.parent
    }

    /// Simulation view: identity, type and mutable state at once.
    pub fn parts_mut(&mut self) -> (&GhostInstance, &GhostType, &mut GhostState) {
        (&self.instance, &self.ghost_type, &mut self.state)
    }

    /// Quantizes the current state into a history entry.
    ///
    /// Returns false when a static ghost was unchanged and nothing was recorded.
    fn capture(&mut self, tick: Tick, serializer: &dyn GhostSerializer) -> NetResult<bool> {
        let layout = self.ghost_type.layout();
        let mut units = vec![0; layout.total_units()];
        serializer.quantize(layout, &self.state, &mut units);
        let enabled = self.state.enabled().to_vec();

        let latest = self.history.latest();
        if self.ghost_type.optimization() == OptimizationMode::Static
            && latest.is_some_and(|entry| entry.same_state(&units, &enabled))
        {
            return Ok(false);
        }

        let mut change_mask = ChangeMask::new(layout.total_change_bits());
        serializer.diff(
            layout,
            &units,
            latest.map(|entry| entry.units.as_slice()),
            &mut change_mask,
        )?;
        self.history.push(SnapshotEntry {
            tick,
            change_mask,
            units,
            enabled,
        })?;
        Ok(true)
    }
}

/// All authoritative ghosts of a server.
pub struct ServerWorld {
    registry: Arc<GhostTypeRegistry>,
    ghosts: BTreeMap<GhostId, ServerGhost>,
    free_indices: Vec<u32>,
    next_index: u32,
    groups: GroupArena<GhostId>,
    history_capacity: usize,
}

impl ServerWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new(registry: Arc<GhostTypeRegistry>, history_capacity: usize) -> Self {
        Self {
            registry,
            ghosts: BTreeMap::new(),
            free_indices: Vec::new(),
            next_index: 0,
            groups: GroupArena::new(),
            history_capacity,
        }
    }

    /// Type registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<GhostTypeRegistry> {
        &self.registry
    }

    fn allocate_id(&mut self) -> NetResult<GhostId> {
        if let Some(index) = self.free_indices.pop() {
            return Ok(GhostId::new(index)?);
        }
        let id = GhostId::new(self.next_index)?;
        self.next_index += 1;
        Ok(id)
    }

    fn insert(
        &mut self,
        id: GhostId,
        type_id: GhostTypeId,
        tick: Tick,
        owner: Option<ConnectionId>,
    ) -> NetResult<GhostInstance> {
        let ghost_type = Arc::clone(self.registry.resolve(type_id)?);
        let instance = GhostInstance {
            ghost: GhostRef::new(id, tick),
            type_id,
        };
        self.ghosts.insert(
            id,
            ServerGhost::new(instance, ghost_type, owner, self.history_capacity),
        );
        Ok(instance)
    }

    /// Spawns a runtime ghost.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownGhostType`] for an unregistered type,
    /// [`CoreError::GhostIdOutOfRange`] when the id space is exhausted.
    pub fn spawn(
        &mut self,
        type_id: GhostTypeId,
        tick: Tick,
        owner: Option<ConnectionId>,
    ) -> NetResult<GhostInstance> {
        self.registry.resolve(type_id)?;
        let id = self.allocate_id()?;
        let instance = self.insert(id, type_id, tick, owner)?;
        tracing::debug!("Spawned {} as {}", instance.ghost, instance.type_id);
        Ok(instance)
    }

    /// Spawns a ghost into the pre-spawned id space (scene-placed objects).
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if the pre-spawned index is taken.
    pub fn spawn_prespawned(
        &mut self,
        index: u32,
        type_id: GhostTypeId,
        tick: Tick,
    ) -> NetResult<GhostInstance> {
        let id = GhostId::prespawned(index)?;
        if self.ghosts.contains_key(&id) {
            return Err(CoreError::invalid("prespawned index", index).into());
        }
        self.insert(id, type_id, tick, None)
    }

    /// Spawns a root and its children as one replication unit.
    ///
    /// # Errors
    ///
    /// As [`ServerWorld::spawn`]; nothing is spawned on error.
    pub fn spawn_group(
        &mut self,
        root_type: GhostTypeId,
        child_types: &[GhostTypeId],
        tick: Tick,
        owner: Option<ConnectionId>,
    ) -> NetResult<(GhostInstance, Vec<GhostInstance>)> {
        self.registry.resolve(root_type)?;
        for child in child_types {
            self.registry.resolve(*child)?;
        }

        let root = self.spawn(root_type, tick, owner)?;
        let mut children = Vec::with_capacity(child_types.len());
        for child_type in child_types {
            let child = self.spawn(*child_type, tick, owner)?;
            if let Some(ghost) = self.ghosts.get_mut(&child.ghost_id()) {
                ghost.parent = Some(root.ghost_id());
            }
            children.push(child);
        }

        let ids: Vec<GhostId> = children.iter().map(GhostInstance::ghost_id).collect();
        let span = self.groups.allocate(&ids);
        if let Some(ghost) = self.ghosts.get_mut(&root.ghost_id()) {
            ghost.children = span;
        }
        Ok((root, children))
    }

    /// Despawns a ghost; despawning a group root despawns its children.
    ///
    /// Returns the identities removed, root first.
    pub fn despawn(&mut self, id: GhostId) -> Vec<GhostInstance> {
        let Some(ghost) = self.ghosts.remove(&id) else {
            return Vec::new();
        };
        self.release_id(id);
        let mut removed = vec![ghost.instance];

        if let Some(parent) = ghost.parent {
            self.detach_child(parent, id);
        }

        let children = self.groups.get(ghost.children).to_vec();
        self.groups.free(ghost.children);
        for child in children {
            if let Some(child_ghost) = self.ghosts.remove(&child) {
                self.release_id(child);
                removed.push(child_ghost.instance);
            }
        }
        tracing::debug!("Despawned {} ({} ghosts)", ghost.instance.ghost, removed.len());
        removed
    }

    fn release_id(&mut self, id: GhostId) {
        if !id.is_prespawned() {
            self.free_indices.push(id.index());
        }
    }

    fn detach_child(&mut self, parent: GhostId, child: GhostId) {
        let Some(span) = self.ghosts.get(&parent).map(|g| g.children) else {
            return;
        };
        let remaining: Vec<GhostId> = self
            .groups
            .get(span)
            .iter()
            .copied()
            .filter(|member| *member != child)
            .collect();
        self.groups.free(span);
        let span = self.groups.allocate(&remaining);
        if let Some(root) = self.ghosts.get_mut(&parent) {
            root.children = span;
        }
    }

    /// Ghost by id.
    #[must_use]
    pub fn get(&self, id: GhostId) -> Option<&ServerGhost> {
        self.ghosts.get(&id)
    }

    /// Mutable ghost by id.
    pub fn get_mut(&mut self, id: GhostId) -> Option<&mut ServerGhost> {
        self.ghosts.get_mut(&id)
    }

    /// Mutable state of a ghost.
    pub fn state_mut(&mut self, id: GhostId) -> Option<&mut GhostState> {
        self.ghosts.get_mut(&id).map(ServerGhost::state_mut)
    }

    /// Children of a group root, in spawn order.
    #[must_use]
    pub fn children(&self, root: GhostId) -> &[GhostId] {
        match self.ghosts.get(&root) {
            Some(ghost) => self.groups.get(ghost.children),
            None => &[],
        }
    }

    /// Ghosts that are not group children, in id order.
    pub fn roots(&self) -> impl Iterator<Item = &ServerGhost> {
        self.ghosts.values().filter(|ghost| ghost.parent.is_none())
    }

    /// Every ghost, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerGhost> {
        self.ghosts.values()
    }

    /// Number of live ghosts.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    /// Returns true if no ghost is alive.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }

    /// Runs `f` over every ghost in parallel.
    pub fn par_for_each_mut<F>(&mut self, f: F)
    where
        F: Fn(&mut ServerGhost) + Send + Sync,
    {
        self.ghosts.par_iter_mut().for_each(|(_, ghost)| f(ghost));
    }

    /// Records this tick's state of every ghost into its history.
    ///
    /// Returns the number of entries recorded.
    ///
    /// # Errors
    ///
    /// [`CoreError::StaleTick`] if `tick` is not newer than the last capture.
    pub fn capture(&mut self, tick: Tick) -> NetResult<usize> {
        let registry = &self.registry;
        self.ghosts
            .par_iter_mut()
            .map(|(_, ghost)| -> NetResult<usize> {
                let serializer = registry.serializer(ghost.instance.type_id)?;
                ghost.capture(tick, serializer).map(usize::from)
            })
            .try_reduce(|| 0, |a, b| Ok(a + b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wraith_core::{
        ComponentDescriptor, FieldDescriptor, FieldKind, FieldValue, GhostTypeDescriptor,
    };

    fn registry() -> (Arc<GhostTypeRegistry>, GhostTypeId, GhostTypeId) {
        let mut registry = GhostTypeRegistry::new();
        let dynamic = registry
            .register(GhostTypeDescriptor::new("Runner").component(
                ComponentDescriptor::new("Body").field(FieldDescriptor::new("x", FieldKind::Int)),
            ))
            .unwrap();
        let fixed = registry
            .register(
                GhostTypeDescriptor::new("Door")
                    .component(
                        ComponentDescriptor::new("Hinge")
                            .field(FieldDescriptor::new("open", FieldKind::Bool)),
                    )
                    .optimization(OptimizationMode::Static),
            )
            .unwrap();
        (Arc::new(registry), dynamic, fixed)
    }

    #[test]
    fn test_ids_reused_after_despawn() {
        let (registry, dynamic, _) = registry();
        let mut world = ServerWorld::new(registry, 8);
        let a = world.spawn(dynamic, 1, None).unwrap();
        let b = world.spawn(dynamic, 1, None).unwrap();
        assert_ne!(a.ghost_id(), b.ghost_id());

        world.despawn(a.ghost_id());
        let c = world.spawn(dynamic, 5, None).unwrap();
        assert_eq!(c.ghost_id(), a.ghost_id());
        assert_ne!(c.ghost, a.ghost);
    }

    #[test]
    fn test_static_capture_skips_unchanged() {
        let (registry, dynamic, fixed) = registry();
        let mut world = ServerWorld::new(registry, 8);
        let runner = world.spawn(dynamic, 1, None).unwrap();
        let door = world.spawn(fixed, 1, None).unwrap();

        for tick in 1..=5 {
            world.capture(tick).unwrap();
        }
        assert_eq!(world.get(runner.ghost_id()).unwrap().history().len(), 5);
        assert_eq!(world.get(door.ghost_id()).unwrap().history().len(), 1);

        world
            .state_mut(door.ghost_id())
            .unwrap()
            .set(0, FieldValue::Bool(true))
            .unwrap();
        assert_eq!(world.capture(6).unwrap(), 2);
        assert_eq!(world.get(door.ghost_id()).unwrap().history().latest_tick(), Some(6));
    }

    #[test]
    fn test_group_despawn_takes_children() {
        let (registry, dynamic, fixed) = registry();
        let mut world = ServerWorld::new(registry, 8);
        let (root, children) = world.spawn_group(dynamic, &[fixed, fixed], 3, None).unwrap();
        assert_eq!(world.children(root.ghost_id()).len(), 2);
        assert_eq!(world.roots().count(), 1);

        world.despawn(children[0].ghost_id());
        assert_eq!(world.children(root.ghost_id()), &[children[1].ghost_id()]);

        let removed = world.despawn(root.ghost_id());
        assert_eq!(removed.len(), 2);
        assert!(world.is_empty());
    }

    #[test]
    fn test_capture_rejects_repeated_tick() {
        let (registry, dynamic, _) = registry();
        let mut world = ServerWorld::new(registry, 8);
        world.spawn(dynamic, 1, None).unwrap();
        world.capture(4).unwrap();
        assert!(world.capture(4).is_err());
    }
}
