//! # Ghost Client
//!
//! Client-side replication with prediction and interpolation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GHOST CLIENT                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  1 receive      decode frames, apply per ghost (rayon)      │
//! │  2 lifecycle    classify, expire, materialize, events,      │
//! │                 resolve references, send commands + ack     │
//! │  3 restore      predicted ghosts: authoritative or backup   │
//! │  4 resimulate   predicted ghosts: replay commands (rayon)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Full tick runs 1-4. Partial tick runs 4 only.              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A frame is acknowledged only if every record in it was applied, so the
//! server never picks a baseline the client does not hold.

mod interpolation;
mod receiver;
mod references;
mod spawn;

pub use interpolation::{blend, interpolate};
pub use references::{ReferenceResolver, ResolvedReference};
pub use spawn::{
    ClassificationContext, DefaultSpawnClassifier, PredictedSpawn, PredictedSpawnClassifier,
    SpawnClass, SpawnClassifier, SpawnRequest,
};

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rayon::prelude::*;
use wraith_core::{
    EntityAllocator, GhostId, GhostInstance, GhostMode, GhostRef, GhostSerializer, GhostState,
    GhostType, GhostTypeId, GhostTypeRegistry, LocalEntity, SnapshotHistory, Tick,
};

use self::receiver::{decode_frame, DecodedRecord};
use self::spawn::ClassifierChain;
use crate::command::{Command, CommandSender, CommandTarget};
use crate::config::NetcodeConfig;
use crate::error::NetResult;
use crate::events::GhostEvent;
use crate::prediction::{PredictedSimulation, Predictor, SimulationStep};
use crate::protocol::AckTracker;
use crate::server::ConnectionId;
use crate::tick::TickKind;
use crate::transport::Transport;

/// A materialized ghost on the client.
pub struct ClientGhost {
    instance: GhostInstance,
    ghost_type: Arc<GhostType>,
    entity: LocalEntity,
    class: SpawnClass,
    owned: bool,
    history: SnapshotHistory,
    state: GhostState,
    predictor: Predictor,
    references: Vec<ResolvedReference>,
    inbox: Vec<DecodedRecord>,
}

impl ClientGhost {
    fn new(
        request: SpawnRequest,
        ghost_type: Arc<GhostType>,
        entity: LocalEntity,
        class: SpawnClass,
        serializer: &dyn GhostSerializer,
    ) -> Self {
        let state = request.history.latest().map_or_else(
            || GhostState::new(ghost_type.layout()),
            |entry| serializer.dequantize(ghost_type.layout(), &entry.units, &entry.enabled),
        );
        Self {
            instance: request.instance,
            ghost_type,
            entity,
            class,
            owned: request.owned,
            history: request.history,
            state,
            predictor: Predictor::new(),
            references: Vec::new(),
            inbox: Vec::new(),
        }
    }

    /// Identity and type.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> GhostInstance {
        self.instance
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

    /// Local entity.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> LocalEntity {
        self.entity
    }

    /// How the ghost was classified at spawn.
    #[inline]
    #[must_use]
    pub const fn class(&self) -> SpawnClass {
        self.class
    }

    /// The local player owns the ghost.
    #[inline]
    #[must_use]
    pub const fn owned(&self) -> bool {
        self.owned
    }

    /// Returns true if the ghost runs prediction on this client.
    #[must_use]
    pub fn is_predicted(&self) -> bool {
        match self.ghost_type.mode() {
            GhostMode::Interpolated => false,
            GhostMode::Predicted => true,
            GhostMode::OwnerPredicted => self.owned,
        }
    }

    /// Received authoritative entries.
    #[inline]
    #[must_use]
    pub const fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Current state: predicted for predicted ghosts, latest received otherwise.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> &GhostState {
        &self.state
    }

    /// Prediction state.
    #[inline]
    #[must_use]
    pub const fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Entity-reference slots as of the last full tick.
    #[inline]
    #[must_use]
    pub fn references(&self) -> &[ResolvedReference] {
        &self.references
    }

    /// Moves queued records into history. Returns the number recorded.
    fn apply_inbox(&mut self, serializer: &dyn GhostSerializer) -> usize {
        let mut applied = 0;
        for record in self.inbox.drain(..) {
            self.owned = record.header.owned;
            // Unacknowledged static resends repeat an entry already held
            if self.history.push(record.into_entry()).is_ok() {
                applied += 1;
            }
        }
        if applied > 0 && !self.is_predicted() {
            if let Some(latest) = self.history.latest() {
                self.state = serializer.dequantize(self.ghost_type.layout(), &latest.units, &latest.enabled);
            }
        }
        applied
    }
}

/// Client counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Snapshot frames accepted.
    pub frames_received: u64,
    /// Frames ignored as older than one already accepted.
    pub frames_out_of_order: u64,
    /// Frames left unacknowledged because a record was dropped.
    pub frames_unacked: u64,
    /// Records dropped for a missing baseline.
    pub records_dropped: u64,
    /// History entries recorded.
    pub entries_applied: u64,
    /// Ghosts materialized.
    pub spawns: u64,
    /// Ghosts destroyed.
    pub despawns: u64,
    /// Command packets sent.
    pub command_packets: u64,
}

/// The client side of replication.
pub struct GhostClient<C> {
    registry: Arc<GhostTypeRegistry>,
    config: NetcodeConfig,
    ghosts: HashMap<GhostId, ClientGhost>,
    pending: Vec<SpawnRequest>,
    predicted_spawns: Vec<PredictedSpawn>,
    classifiers: ClassifierChain,
    entities: EntityAllocator,
    resolver: ReferenceResolver,
    commands: CommandSender<C>,
    acks: AckTracker,
    last_frame: Option<Tick>,
    events_tx: Sender<GhostEvent>,
    events_rx: Receiver<GhostEvent>,
    stats: ClientStats,
}

impl<C: Command> GhostClient<C> {
    /// Creates a client with the default classifier chain.
    #[must_use]
    pub fn new(registry: Arc<GhostTypeRegistry>, config: NetcodeConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        let commands = CommandSender::new(
            config.command_retention_ticks,
            config.command_redundancy,
            config.max_frame_bytes,
        );
        Self {
            registry,
            config,
            ghosts: HashMap::new(),
            pending: Vec::new(),
            predicted_spawns: Vec::new(),
            classifiers: ClassifierChain::new(),
            entities: EntityAllocator::new(),
            resolver: ReferenceResolver::new(),
            commands,
            acks: AckTracker::new(),
            last_frame: None,
            events_tx,
            events_rx,
            stats: ClientStats::default(),
        }
    }

    /// Inserts a classifier after the built-in ones and before the default.
    pub fn add_classifier(&mut self, classifier: Box<dyn SpawnClassifier>) {
        self.classifiers.push(classifier);
    }

    /// Names of the classifier chain, in run order.
    #[must_use]
    pub fn classifier_names(&self) -> Vec<&'static str> {
        self.classifiers.names()
    }

    /// Receiver of lifecycle events.
    #[must_use]
    pub fn events(&self) -> Receiver<GhostEvent> {
        self.events_rx.clone()
    }

    /// Takes every queued event.
    pub fn drain_events(&self) -> Vec<GhostEvent> {
        self.events_rx.try_iter().collect()
    }

    fn emit(&self, event: GhostEvent) {
        // The client holds a receiver, so the channel never disconnects
        let _ = self.events_tx.send(event);
    }

    /// Command sender.
    #[inline]
    #[must_use]
    pub const fn commands(&self) -> &CommandSender<C> {
        &self.commands
    }

    /// Command sender, mutable.
    #[inline]
    pub fn commands_mut(&mut self) -> &mut CommandSender<C> {
        &mut self.commands
    }

    /// Records the local command for `tick`.
    pub fn record_command(&mut self, tick: Tick, command: C) {
        self.commands.record(tick, command);
    }

    /// Acknowledgement state.
    #[inline]
    #[must_use]
    pub const fn acks(&self) -> &AckTracker {
        &self.acks
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Ghost by id.
    #[must_use]
    pub fn ghost(&self, id: GhostId) -> Option<&ClientGhost> {
        self.ghosts.get(&id)
    }

    /// Ghost by identity; `None` if the id now belongs to another instance.
    #[must_use]
    pub fn ghost_by_ref(&self, ghost: GhostRef) -> Option<&ClientGhost> {
        self.ghosts.get(&ghost.ghost_id).filter(|g| g.instance.ghost == ghost)
    }

    /// Every materialized ghost, in no particular order.
    pub fn ghosts(&self) -> impl Iterator<Item = &ClientGhost> {
        self.ghosts.values()
    }

    /// Local entity of a materialized ghost.
    #[must_use]
    pub fn entity_of(&self, ghost: GhostRef) -> Option<LocalEntity> {
        self.resolver.resolve(ghost)
    }

    /// Ghosts seen but not yet classified.
    #[must_use]
    pub fn pending_spawns(&self) -> &[SpawnRequest] {
        &self.pending
    }

    /// Unconfirmed predicted spawns.
    #[must_use]
    pub fn predicted_spawns(&self) -> &[PredictedSpawn] {
        &self.predicted_spawns
    }

    /// Mutable state of an unconfirmed predicted spawn.
    pub fn predicted_spawn_state_mut(&mut self, entity: LocalEntity) -> Option<&mut GhostState> {
        self.predicted_spawns
            .iter_mut()
            .find(|p| p.entity == entity)
            .map(|p| &mut p.state)
    }

    /// Spawns a ghost locally ahead of the server.
    ///
    /// # Errors
    ///
    /// [`wraith_core::CoreError::UnknownGhostType`] for an unregistered type.
    pub fn predict_spawn(&mut self, type_id: GhostTypeId, tick: Tick, state: GhostState) -> NetResult<LocalEntity> {
        self.registry.resolve(type_id)?;
        let entity = self.entities.allocate();
        self.predicted_spawns.push(PredictedSpawn {
            entity,
            type_id,
            spawn_tick: tick,
            state,
        });
        tracing::debug!("Predicted spawn of {} as {} at tick {}", type_id, entity, tick);
        Ok(entity)
    }

    /// State of a ghost at fractional `render_tick`, from received history.
    #[must_use]
    pub fn interpolated_state(&self, id: GhostId, render_tick: f64) -> Option<GhostState> {
        let ghost = self.ghosts.get(&id)?;
        let serializer = self.registry.serializer(ghost.instance.type_id).ok()?;
        interpolate(ghost.ghost_type.layout(), serializer, &ghost.history, render_tick)
    }

    /// Decodes one snapshot frame and routes its records.
    ///
    /// Records of materialized ghosts are queued for the parallel apply step
    /// of [`GhostClient::update`]; records of unclassified ghosts go straight
    /// into their spawn request.
    ///
    /// # Errors
    ///
    /// [`crate::NetError::MalformedFrame`] or [`crate::NetError::Core`] for
    /// a frame that cannot be parsed; nothing of it is applied.
    pub fn receive_frame(&mut self, tick: Tick, bytes: &[u8]) -> NetResult<()> {
        let frame = {
            let ghosts = &self.ghosts;
            let pending = &self.pending;
            decode_frame(&self.registry, bytes, self.last_frame, move |ghost, baseline| {
                ghosts
                    .get(&ghost.ghost_id)
                    .filter(|g| g.instance.ghost == ghost)
                    .map(|g| &g.history)
                    .or_else(|| {
                        pending
                            .iter()
                            .find(|r| r.instance.ghost == ghost)
                            .map(|r| &r.history)
                    })
                    .and_then(|history| history.at_tick(baseline))
                    .map(|entry| entry.units.as_slice())
            })?
        };
        let Some(frame) = frame else {
            self.stats.frames_out_of_order += 1;
            return Ok(());
        };

        for ghost in &frame.despawns {
            self.despawn_ghost(*ghost);
        }
        for record in frame.records {
            self.route_record(tick, record);
        }

        self.last_frame = Some(frame.tick);
        self.stats.frames_received += 1;
        if frame.dropped == 0 {
            self.acks.record(frame.tick);
        } else {
            self.stats.records_dropped += frame.dropped as u64;
            self.stats.frames_unacked += 1;
        }
        Ok(())
    }

    fn route_record(&mut self, tick: Tick, record: DecodedRecord) {
        let ghost = record.header.ghost;
        if let Some(existing) = self.ghosts.get_mut(&ghost.ghost_id) {
            if existing.instance.ghost == ghost {
                existing.inbox.push(record);
                return;
            }
            let replaced = existing.instance.ghost;
            self.despawn_ghost(replaced);
        }

        if let Some(request) = self.pending.iter_mut().find(|r| r.instance.ghost == ghost) {
            request.owned = record.header.owned;
            if request.history.push(record.into_entry()).is_ok() {
                self.stats.entries_applied += 1;
            }
            return;
        }

        self.pending.retain(|r| r.instance.ghost.ghost_id != ghost.ghost_id);
        let instance = GhostInstance {
            ghost,
            type_id: record.header.type_id,
        };
        let owned = record.header.owned;
        let mut history = SnapshotHistory::new(self.config.history_capacity);
        if history.push(record.into_entry()).is_ok() {
            self.stats.entries_applied += 1;
        }
        tracing::trace!("Spawn request for {} ({})", ghost, instance.type_id);
        self.pending.push(SpawnRequest::new(instance, owned, tick, history));
    }

    fn despawn_ghost(&mut self, ghost: GhostRef) {
        self.pending.retain(|r| r.instance.ghost != ghost);
        let matches = self
            .ghosts
            .get(&ghost.ghost_id)
            .is_some_and(|g| g.instance.ghost == ghost);
        if !matches {
            return;
        }
        let Some(removed) = self.ghosts.remove(&ghost.ghost_id) else {
            return;
        };
        self.entities.free(removed.entity);
        self.resolver.remove(ghost);
        self.stats.despawns += 1;
        self.emit(GhostEvent::Despawned {
            ghost,
            type_id: removed.instance.type_id,
            entity: removed.entity,
        });
    }

    /// Phase 1: drains the transport and applies every queued record.
    fn receive_phase(&mut self, tick: Tick, transport: &dyn Transport) {
        while let Some((_, bytes)) = transport.receive() {
            if let Err(e) = self.receive_frame(tick, &bytes) {
                tracing::warn!("Dropped snapshot frame: {}", e);
            }
        }

        let registry = &self.registry;
        let applied: usize = self
            .ghosts
            .par_iter_mut()
            .filter(|(_, ghost)| !ghost.inbox.is_empty())
            .map(|(_, ghost)| match registry.serializer(ghost.instance.type_id) {
                Ok(serializer) => ghost.apply_inbox(serializer),
                Err(_) => 0,
            })
            .sum();
        self.stats.entries_applied += applied as u64;
    }

    /// Phase 2: spawn lifecycle, reference resolution and the command packet.
    fn lifecycle_phase(&mut self, tick: Tick, transport: &dyn Transport) -> NetResult<()> {
        if !self.pending.is_empty() {
            let mut ctx = ClassificationContext {
                tick,
                config: &self.config,
                predicted: &mut self.predicted_spawns,
                entities: &mut self.entities,
            };
            self.classifiers.run(&mut ctx, &mut self.pending);
        }
        self.expire_predicted_spawns(tick);
        self.materialize()?;

        let resolver = &self.resolver;
        self.ghosts.par_iter_mut().for_each(|(_, ghost)| {
            resolver.resolve_state(&ghost.state, &mut ghost.references);
        });

        let mut targets: Vec<GhostRef> = match self.commands.target() {
            CommandTarget::Explicit(ghost) => self
                .ghosts
                .get(&ghost.ghost_id)
                .filter(|g| g.ghost_ref() == ghost)
                .map(ClientGhost::ghost_ref)
                .into_iter()
                .collect(),
            CommandTarget::AutoOwnedPredicted => self
                .ghosts
                .values()
                .filter(|g| g.owned && g.is_predicted())
                .map(ClientGhost::ghost_ref)
                .collect(),
        };
        targets.sort_unstable();
        let packet = self.commands.build_packet(tick, &self.acks, &targets)?;
        transport.send(ConnectionId::SERVER, &packet)?;
        self.stats.command_packets += 1;
        Ok(())
    }

    fn expire_predicted_spawns(&mut self, tick: Tick) {
        let timeout = self.config.predicted_spawn_timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.predicted_spawns)
            .into_iter()
            .partition(|p| tick.saturating_sub(p.spawn_tick) > timeout);
        self.predicted_spawns = kept;
        for spawn in expired {
            self.entities.free(spawn.entity);
            tracing::debug!("Predicted spawn {} expired unconfirmed", spawn.entity);
            self.emit(GhostEvent::PredictedSpawnExpired {
                entity: spawn.entity,
                type_id: spawn.type_id,
                spawn_tick: spawn.spawn_tick,
            });
        }
    }

    fn materialize(&mut self) -> NetResult<()> {
        let (claimed, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(SpawnRequest::is_claimed);
        self.pending = waiting;

        for request in claimed {
            let Some((_, class)) = request.claimed() else {
                continue;
            };
            let entity = match class {
                SpawnClass::Fresh => self.entities.allocate(),
                SpawnClass::Predicted(entity) | SpawnClass::Adopted(entity) => entity,
            };
            let ghost_type = Arc::clone(self.registry.resolve(request.type_id())?);
            let serializer = self.registry.serializer(request.type_id())?;
            let instance = request.instance;
            let ghost = ClientGhost::new(request, ghost_type, entity, class, serializer);

            self.resolver.insert(instance.ghost, entity);
            self.ghosts.insert(instance.ghost_id(), ghost);
            self.stats.spawns += 1;
            self.emit(GhostEvent::Spawned {
                instance,
                entity,
                class,
            });
        }
        Ok(())
    }

    /// Phase 3: predicted ghosts go back to authoritative data or the backup.
    fn restore_phase(&mut self) {
        let registry = &self.registry;
        self.ghosts.par_iter_mut().for_each(|(_, ghost)| {
            if !ghost.is_predicted() {
                return;
            }
            if let Ok(serializer) = registry.serializer(ghost.instance.type_id) {
                ghost
                    .predictor
                    .restore(&ghost.ghost_type, serializer, &ghost.history, &mut ghost.state);
            }
        });
    }

    /// Phase 4: predicted ghosts replay up to `tick`.
    fn resimulate_phase<S: PredictedSimulation<C> + ?Sized>(&mut self, tick: Tick, kind: TickKind, simulation: &S) {
        let commands = self.commands.buffer();
        let step = SimulationStep { tick, kind };
        self.ghosts.par_iter_mut().for_each(|(_, ghost)| {
            if !ghost.is_predicted() {
                return;
            }
            let buffer = ghost.owned.then_some(commands);
            ghost.predictor.resimulate(
                &ghost.instance,
                &ghost.ghost_type,
                &mut ghost.state,
                buffer,
                step,
                simulation,
            );
        });
    }

    /// Runs one client tick.
    ///
    /// # Errors
    ///
    /// Command packet and transport errors. Bad snapshot frames are logged
    /// and skipped instead.
    pub fn update<S: PredictedSimulation<C> + ?Sized>(
        &mut self,
        tick: Tick,
        kind: TickKind,
        transport: &dyn Transport,
        simulation: &S,
    ) -> NetResult<()> {
        if kind == TickKind::Full {
            self.receive_phase(tick, transport);
            self.lifecycle_phase(tick, transport)?;
            self.restore_phase();
        }
        self.resimulate_phase(tick, kind, simulation);
        Ok(())
    }
}
