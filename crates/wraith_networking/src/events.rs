//! Lifecycle events delivered to game logic.

use wraith_core::{GhostInstance, GhostRef, GhostTypeId, LocalEntity, Tick};

use crate::client::SpawnClass;

/// A client-side ghost lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GhostEvent {
    /// A ghost was materialized locally.
    Spawned {
        /// Server identity and type.
        instance: GhostInstance,
        /// Local entity backing it.
        entity: LocalEntity,
        /// How the spawn was classified.
        class: SpawnClass,
    },
    /// A ghost was destroyed locally.
    Despawned {
        /// Server identity.
        ghost: GhostRef,
        /// Type it had.
        type_id: GhostTypeId,
        /// Local entity that was freed.
        entity: LocalEntity,
    },
    /// A predicted spawn was never confirmed by the server.
    PredictedSpawnExpired {
        /// Entity that was freed.
        entity: LocalEntity,
        /// Type it was predicted as.
        type_id: GhostTypeId,
        /// Tick it was predicted for.
        spawn_tick: Tick,
    },
}
