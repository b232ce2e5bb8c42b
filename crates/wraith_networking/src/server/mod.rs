//! # Ghost Server
//!
//! The authoritative side of replication.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GHOST SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  receive            simulate            capture     build   │
//! │  ┌──────────┐      ┌──────────┐      ┌──────────┐ ┌──────┐  │
//! │  │ commands │ ───► │ game +   │ ───► │ history  │►│ per  │  │
//! │  │ + acks   │      │ commands │      │ (rayon)  │ │ conn │  │
//! │  └──────────┘      └──────────┘      └──────────┘ └──────┘  │
//! │                                                             │
//! │              ┌───────────────────────┐                      │
//! │              │ ServerWorld           │                      │
//! │              │ - ghosts + histories  │                      │
//! │              │ - group spans         │                      │
//! │              └───────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A connection can be cancelled from any thread through its
//! [`ConnectionHandle`]; a frame build in progress stops at the next unit.

mod builder;
mod connection;
mod world;

pub use builder::SnapshotBuilder;
pub use connection::{ClientConnection, ConnectionId, ConnectionStats, GhostSendState};
pub use world::{ServerGhost, ServerWorld};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use wraith_core::{GhostId, GhostInstance, GhostTypeId, GhostTypeRegistry, Tick};

use crate::command::{decode_command_packet, Command, CommandEntry};
use crate::config::NetcodeConfig;
use crate::error::{NetError, NetResult};
use crate::prediction::{PredictedSimulation, SimulationStep};
use crate::relevancy::RelevancySet;
use crate::tick::TickKind;
use crate::transport::Transport;

/// Shared server-side context.
#[derive(Clone)]
pub struct ServerContext {
    /// Registered ghost types.
    pub registry: Arc<GhostTypeRegistry>,
    /// Connection/ghost relevancy, writable by game logic.
    pub relevancy: Arc<RwLock<RelevancySet>>,
    /// Replication tuning.
    pub config: NetcodeConfig,
}

impl ServerContext {
    /// Creates a context with an empty relevancy set.
    #[must_use]
    pub fn new(registry: Arc<GhostTypeRegistry>, config: NetcodeConfig) -> Self {
        Self {
            registry,
            relevancy: Arc::new(RwLock::new(RelevancySet::new())),
            config,
        }
    }
}

/// Cloneable handle used to cancel a connection from any thread.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    cancel: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Connection id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Cancels the connection; any frame build in progress stops.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Result of one server tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerTickReport {
    /// Command packets processed.
    pub packets_received: usize,
    /// History entries recorded.
    pub entries_captured: usize,
    /// Snapshot frames sent.
    pub frames_sent: usize,
    /// Snapshot bytes sent.
    pub bytes_sent: usize,
    /// Connections dropped because they were cancelled.
    pub connections_dropped: usize,
}

/// The authoritative replication server.
pub struct GhostServer<C> {
    context: ServerContext,
    world: ServerWorld,
    connections: BTreeMap<ConnectionId, ClientConnection<C>>,
    next_connection: u32,
}

impl<C: Command> GhostServer<C> {
    /// Creates a server with an empty world.
    #[must_use]
    pub fn new(context: ServerContext) -> Self {
        let world = ServerWorld::new(Arc::clone(&context.registry), context.config.history_capacity);
        tracing::info!(
            "Ghost server ready: {} types, registry hash {:016x}",
            context.registry.len(),
            context.registry.collection_hash()
        );
        Self {
            context,
            world,
            connections: BTreeMap::new(),
            next_connection: ConnectionId::SERVER.0 + 1,
        }
    }

    /// Shared context.
    #[inline]
    #[must_use]
    pub const fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Authoritative world.
    #[inline]
    #[must_use]
    pub const fn world(&self) -> &ServerWorld {
        &self.world
    }

    /// Authoritative world, mutable.
    #[inline]
    pub fn world_mut(&mut self) -> &mut ServerWorld {
        &mut self.world
    }

    /// Accepts a new connection.
    pub fn connect(&mut self) -> ConnectionHandle {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        let conn = ClientConnection::new(id, self.context.config.command_retention_ticks);
        let handle = ConnectionHandle {
            id,
            cancel: conn.cancel_flag(),
        };
        self.connections.insert(id, conn);
        tracing::info!("Client connected: {}", id);
        handle
    }

    /// Removes a connection and its relevancy entries.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownConnection`] if `id` is not connected.
    pub fn disconnect(&mut self, id: ConnectionId) -> NetResult<()> {
        let conn = self
            .connections
            .remove(&id)
            .ok_or(NetError::UnknownConnection(id))?;
        conn.cancel_flag().store(true, Ordering::Release);
        self.context.relevancy.write().remove_connection(id);
        tracing::info!("Client disconnected: {}", id);
        Ok(())
    }

    /// Connection state.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&ClientConnection<C>> {
        self.connections.get(&id)
    }

    /// Number of connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Spawns a ghost.
    ///
    /// # Errors
    ///
    /// See [`ServerWorld::spawn`].
    pub fn spawn(
        &mut self,
        type_id: GhostTypeId,
        tick: Tick,
        owner: Option<ConnectionId>,
    ) -> NetResult<GhostInstance> {
        self.world.spawn(type_id, tick, owner)
    }

    /// Despawns a ghost (and its children) and drops its relevancy entries.
    pub fn despawn(&mut self, id: GhostId) -> Vec<GhostInstance> {
        let removed = self.world.despawn(id);
        if !removed.is_empty() {
            let mut relevancy = self.context.relevancy.write();
            for instance in &removed {
                relevancy.remove_ghost(instance.ghost_id());
            }
        }
        removed
    }

    /// Handles one packet from a client: acknowledgement, then commands.
    ///
    /// Commands are only accepted for ghosts the connection owns and has
    /// been sent.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownConnection`] for an unknown sender,
    /// [`NetError::MalformedFrame`] or [`NetError::Core`] for a bad packet.
    pub fn receive_packet(&mut self, from: ConnectionId, bytes: &[u8]) -> NetResult<()> {
        let conn = self
            .connections
            .get_mut(&from)
            .ok_or(NetError::UnknownConnection(from))?;
        let packet = decode_command_packet::<C>(bytes)?;
        conn.process_ack(&packet.header);

        for (ghost, entries) in &packet.targets {
            let owned = self
                .world
                .get(ghost.ghost_id)
                .is_some_and(|g| g.ghost_ref() == *ghost && g.owner() == Some(from));
            if owned && conn.knows(*ghost) {
                conn.stats.commands_received += conn.commands.ingest(*ghost, entries) as u64;
            } else {
                conn.stats.commands_rejected += 1;
                tracing::trace!("Rejected commands from {} for {}", from, ghost);
            }
        }
        Ok(())
    }

    /// Drains the transport into [`GhostServer::receive_packet`].
    ///
    /// Bad packets are logged and dropped. Returns the number processed.
    pub fn receive(&mut self, transport: &dyn Transport) -> usize {
        let mut processed = 0;
        while let Some((from, bytes)) = transport.receive() {
            match self.receive_packet(from, &bytes) {
                Ok(()) => processed += 1,
                Err(e) => tracing::warn!("Dropped packet from {}: {}", from, e),
            }
        }
        processed
    }

    /// Command of the ghost's owner for `tick` (newest at or before it).
    #[must_use]
    pub fn command_at(&self, ghost: GhostId, tick: Tick) -> Option<&CommandEntry<C>> {
        let server_ghost = self.world.get(ghost)?;
        let conn = self.connections.get(&server_ghost.owner()?)?;
        conn.commands().command_at(server_ghost.ghost_ref(), tick)
    }

    /// Runs `simulation` for one full tick on every owned ghost, in parallel,
    /// with the owner's command for that tick.
    pub fn simulate<S: PredictedSimulation<C> + ?Sized>(&mut self, tick: Tick, simulation: &S) {
        let connections = &self.connections;
        self.world.par_for_each_mut(|ghost| {
            let Some(owner) = ghost.owner() else {
                return;
            };
            let ghost_ref = ghost.ghost_ref();
            let command = connections
                .get(&owner)
                .and_then(|conn| conn.commands().command_at(ghost_ref, tick))
                .map(|entry| entry.command);
            let (instance, ghost_type, state) = ghost.parts_mut();
            let step = SimulationStep {
                tick,
                kind: TickKind::Full,
            };
            simulation.simulate(instance, ghost_type, state, command.as_ref(), step);
        });
    }

    /// Builds one connection's frame without sending it.
    ///
    /// # Errors
    ///
    /// See [`SnapshotBuilder::build`].
    pub fn build_frame(&mut self, id: ConnectionId, tick: Tick, frame_limit: usize) -> NetResult<Vec<u8>> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::UnknownConnection(id))?;
        let relevancy = self.context.relevancy.read();
        SnapshotBuilder::new(&self.world, &relevancy, &self.context.config, frame_limit).build(conn, tick)
    }

    /// Captures the world and sends every connection its frame.
    ///
    /// Cancelled connections are dropped.
    ///
    /// # Errors
    ///
    /// Capture errors, and transport errors other than an unknown recipient.
    pub fn send_snapshots(&mut self, tick: Tick, transport: &dyn Transport) -> NetResult<ServerTickReport> {
        let mut report = ServerTickReport {
            entries_captured: self.world.capture(tick)?,
            ..ServerTickReport::default()
        };

        let mut cancelled = Vec::new();
        {
            let relevancy = self.context.relevancy.read();
            let builder = SnapshotBuilder::new(
                &self.world,
                &relevancy,
                &self.context.config,
                transport.max_datagram_size(),
            );
            for conn in self.connections.values_mut() {
                match builder.build(conn, tick) {
                    Ok(frame) => match transport.send(conn.id(), &frame) {
                        Ok(()) => {
                            report.frames_sent += 1;
                            report.bytes_sent += frame.len();
                        }
                        Err(NetError::UnknownConnection(id)) => {
                            tracing::warn!("Transport lost {}", id);
                        }
                        Err(e) => return Err(e),
                    },
                    Err(NetError::Cancelled(id)) => cancelled.push(id),
                    Err(e) => return Err(e),
                }
            }
        }

        for id in cancelled {
            self.disconnect(id)?;
            report.connections_dropped += 1;
        }
        Ok(report)
    }

    /// One full server tick: receive, simulate, capture, send.
    ///
    /// # Errors
    ///
    /// See [`GhostServer::send_snapshots`].
    pub fn update<S: PredictedSimulation<C> + ?Sized>(
        &mut self,
        tick: Tick,
        transport: &dyn Transport,
        simulation: &S,
    ) -> NetResult<ServerTickReport> {
        let packets_received = self.receive(transport);
        self.simulate(tick, simulation);
        let report = self.send_snapshots(tick, transport)?;
        Ok(ServerTickReport {
            packets_received,
            ..report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::NoSimulation;
    use crate::transport::LoopbackNetwork;
    use wraith_core::{ComponentDescriptor, FieldDescriptor, FieldKind, GhostTypeDescriptor};

    fn server() -> (GhostServer<u32>, GhostTypeId) {
        let mut registry = GhostTypeRegistry::new();
        let id = registry
            .register(GhostTypeDescriptor::new("Beacon").component(
                ComponentDescriptor::new("Signal").field(FieldDescriptor::new("level", FieldKind::Int)),
            ))
            .unwrap();
        let context = ServerContext::new(Arc::new(registry), NetcodeConfig::default());
        (GhostServer::new(context), id)
    }

    #[test]
    fn test_connect_disconnect() {
        let (mut server, _) = server();
        let a = server.connect();
        let b = server.connect();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), ConnectionId::SERVER);
        assert_eq!(server.connection_count(), 2);

        server.disconnect(a.id()).unwrap();
        assert!(a.is_cancelled());
        assert_eq!(server.disconnect(a.id()), Err(NetError::UnknownConnection(a.id())));
    }

    #[test]
    fn test_cancelled_connection_dropped_on_send() {
        let (mut server, beacon) = server();
        let network = LoopbackNetwork::default();
        let endpoint = network.server_endpoint();
        let handle = server.connect();
        let _client = network.client_endpoint(handle.id());
        server.spawn(beacon, 1, None).unwrap();

        handle.cancel();
        let report = server.update(1, &endpoint, &NoSimulation).unwrap();
        assert_eq!(report.frames_sent, 0);
        assert_eq!(report.connections_dropped, 1);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let (mut server, _) = server();
        assert_eq!(
            server.receive_packet(ConnectionId(42), &[2, 0, 0, 0]),
            Err(NetError::UnknownConnection(ConnectionId(42)))
        );
    }

    #[test]
    fn test_despawn_clears_relevancy() {
        let (mut server, beacon) = server();
        let handle = server.connect();
        let ghost = server.spawn(beacon, 1, None).unwrap();
        server.context().relevancy.write().insert(handle.id(), ghost.ghost_id());
        server.despawn(ghost.ghost_id());
        assert!(server.context().relevancy.read().is_empty());
    }
}
