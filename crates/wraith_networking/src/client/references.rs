//! Entity-reference resolution.
//!
//! A replicated reference names its target by [`GhostRef`]. It resolves to
//! a local entity only once the target has been materialized; until then it
//! stays pending and is retried every full tick.

use std::collections::HashMap;

use wraith_core::{GhostRef, GhostState, LocalEntity};

/// One reference slot of a ghost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedReference {
    /// Layout slot holding the reference.
    pub slot: usize,
    /// Target identity; `None` for a null reference.
    pub target: Option<GhostRef>,
    /// Local entity of the target once materialized.
    pub entity: Option<LocalEntity>,
}

impl ResolvedReference {
    /// Returns true while the target is named but not yet materialized.
    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.target.is_some() && self.entity.is_none()
    }
}

/// Map from ghost identity to local entity.
#[derive(Clone, Debug, Default)]
pub struct ReferenceResolver {
    entities: HashMap<GhostRef, LocalEntity>,
}

impl ReferenceResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a materialized ghost.
    pub fn insert(&mut self, ghost: GhostRef, entity: LocalEntity) {
        self.entities.insert(ghost, entity);
    }

    /// Forgets a despawned ghost.
    pub fn remove(&mut self, ghost: GhostRef) -> Option<LocalEntity> {
        self.entities.remove(&ghost)
    }

    /// Local entity of `ghost`, if materialized.
    #[inline]
    #[must_use]
    pub fn resolve(&self, ghost: GhostRef) -> Option<LocalEntity> {
        self.entities.get(&ghost).copied()
    }

    /// Number of materialized ghosts.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if nothing is materialized.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Rebuilds the reference slots of `state` into `out`.
    ///
    /// Running it again with nothing changed leaves `out` as it was.
    /// Returns the number of references still pending.
    pub fn resolve_state(&self, state: &GhostState, out: &mut Vec<ResolvedReference>) -> usize {
        out.clear();
        let mut pending = 0;
        for (slot, target) in state.references() {
            let entity = target.and_then(|ghost| self.resolve(ghost));
            let reference = ResolvedReference { slot, target, entity };
            if reference.is_pending() {
                pending += 1;
            }
            out.push(reference);
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wraith_core::{ComponentDescriptor, FieldDescriptor, FieldKind, FieldValue, GhostId, GhostLayout};

    #[test]
    fn test_pending_until_target_materializes() {
        let layout = GhostLayout::build(
            "Missile",
            &[ComponentDescriptor::new("Homing")
                .field(FieldDescriptor::new("target", FieldKind::EntityRef))
                .field(FieldDescriptor::new("launcher", FieldKind::EntityRef))],
        )
        .unwrap();
        let target = GhostRef::new(GhostId::new(9).unwrap(), 40);
        let mut state = GhostState::new(&layout);
        state.set(0, FieldValue::EntityRef(Some(target))).unwrap();

        let mut resolver = ReferenceResolver::new();
        let mut refs = Vec::new();
        assert_eq!(resolver.resolve_state(&state, &mut refs), 1);
        assert!(refs[0].is_pending());
        assert!(!refs[1].is_pending());

        let entity = LocalEntity::new(3, 0);
        resolver.insert(target, entity);
        assert_eq!(resolver.resolve_state(&state, &mut refs), 0);
        assert_eq!(refs[0].entity, Some(entity));

        let snapshot = refs.clone();
        resolver.resolve_state(&state, &mut refs);
        assert_eq!(refs, snapshot);
    }

    #[test]
    fn test_reused_id_does_not_resolve_old_identity() {
        let mut resolver = ReferenceResolver::new();
        let old = GhostRef::new(GhostId::new(1).unwrap(), 10);
        let new = GhostRef::new(GhostId::new(1).unwrap(), 20);
        resolver.insert(new, LocalEntity::new(0, 1));
        assert!(resolver.resolve(old).is_none());
    }
}
