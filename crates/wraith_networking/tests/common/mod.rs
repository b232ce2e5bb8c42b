//! Shared harness for the replication integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wraith_core::{
    ComponentDescriptor, FieldDescriptor, FieldKind, FieldValue, GhostInstance, GhostMode,
    GhostState, GhostType, GhostTypeDescriptor, GhostTypeId, GhostTypeRegistry, OptimizationMode,
};
use wraith_networking::transport::{ClientEndpoint, ServerEndpoint};
use wraith_networking::{
    ConnectionHandle, GhostClient, GhostServer, LoopbackNetwork, LossyTransport, NetcodeConfig,
    NetworkConditions, PredictedSimulation, ServerContext, SimulationStep, TickKind,
};

/// One tick of player input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MoveCommand {
    pub dx: i32,
    pub dy: i32,
}

/// Type ids of the test registry.
#[derive(Clone, Copy, Debug)]
pub struct Types {
    /// Static, float position plus a flag.
    pub beacon: GhostTypeId,
    /// Owner-predicted integer walker.
    pub avatar: GhostTypeId,
    /// Interpolated integer counter.
    pub crate_: GhostTypeId,
    /// Holds a reference to another ghost.
    pub turret: GhostTypeId,
}

pub fn registry() -> (Arc<GhostTypeRegistry>, Types) {
    let mut registry = GhostTypeRegistry::new();
    let beacon = registry
        .register(
            GhostTypeDescriptor::new("Beacon")
                .component(
                    ComponentDescriptor::new("Signal")
                        .field(FieldDescriptor::new("position", FieldKind::Float).quantized(10))
                        .field(FieldDescriptor::new("flag", FieldKind::Bool)),
                )
                .optimization(OptimizationMode::Static),
        )
        .unwrap();
    let avatar = registry
        .register(
            GhostTypeDescriptor::new("Avatar")
                .component(
                    ComponentDescriptor::new("Cell")
                        .field(FieldDescriptor::new("x", FieldKind::Int))
                        .field(FieldDescriptor::new("y", FieldKind::Int)),
                )
                .importance(10)
                .mode(GhostMode::OwnerPredicted),
        )
        .unwrap();
    let crate_ = registry
        .register(
            GhostTypeDescriptor::new("Crate").component(
                ComponentDescriptor::new("Counter")
                    .field(FieldDescriptor::new("value", FieldKind::Int))
                    .field(FieldDescriptor::new("spin", FieldKind::UInt)),
            ),
        )
        .unwrap();
    let turret = registry
        .register(
            GhostTypeDescriptor::new("Turret").component(
                ComponentDescriptor::new("Aim")
                    .field(FieldDescriptor::new("target", FieldKind::EntityRef)),
            ),
        )
        .unwrap();
    (
        Arc::new(registry),
        Types {
            beacon,
            avatar,
            crate_,
            turret,
        },
    )
}

/// Moves avatars by their command. Partial steps move them too, so a leak
/// of partial state into the next full tick shows up.
pub struct Walk;

impl PredictedSimulation<MoveCommand> for Walk {
    fn simulate(
        &self,
        _: &GhostInstance,
        ghost_type: &GhostType,
        state: &mut GhostState,
        command: Option<&MoveCommand>,
        _: SimulationStep,
    ) {
        let layout = ghost_type.layout();
        let (Some(x), Some(y), Some(command)) = (
            layout.field_slot("Cell", "x"),
            layout.field_slot("Cell", "y"),
            command,
        ) else {
            return;
        };
        let cx = state.int(x).unwrap();
        let cy = state.int(y).unwrap();
        state.set(x, FieldValue::Int(cx + command.dx)).unwrap();
        state.set(y, FieldValue::Int(cy + command.dy)).unwrap();
    }
}

pub struct TestClient {
    pub handle: ConnectionHandle,
    pub client: GhostClient<MoveCommand>,
    pub transport: LossyTransport<ClientEndpoint>,
}

/// A server and its clients on one loopback network.
pub struct Harness {
    pub types: Types,
    pub config: NetcodeConfig,
    pub server: GhostServer<MoveCommand>,
    pub server_transport: LossyTransport<ServerEndpoint>,
    pub clients: Vec<TestClient>,
    network: LoopbackNetwork,
    seed: u64,
}

impl Harness {
    pub fn new(config: NetcodeConfig) -> Self {
        Self::with_conditions(config, NetworkConditions::PERFECT, 7)
    }

    pub fn with_conditions(config: NetcodeConfig, conditions: NetworkConditions, seed: u64) -> Self {
        let (registry, types) = registry();
        let network = LoopbackNetwork::new(config.max_frame_bytes);
        let server_transport = LossyTransport::new(network.server_endpoint(), conditions, seed);
        let server = GhostServer::new(ServerContext::new(registry, config.clone()));
        Self {
            types,
            config,
            server,
            server_transport,
            clients: Vec::new(),
            network,
            seed,
        }
    }

    /// Connects a client; returns its index.
    pub fn connect(&mut self) -> usize {
        let handle = self.server.connect();
        let mut client = GhostClient::new(
            Arc::clone(&self.server.context().registry),
            self.config.clone(),
        );
        client.commands_mut().set_enabled(true);
        let transport = LossyTransport::new(
            self.network.client_endpoint(handle.id()),
            self.server_transport.conditions(),
            self.seed.wrapping_add(self.clients.len() as u64 + 1),
        );
        self.clients.push(TestClient {
            handle,
            client,
            transport,
        });
        self.clients.len() - 1
    }

    pub fn set_conditions(&mut self, conditions: NetworkConditions) {
        self.server_transport.set_conditions(conditions);
        for test_client in &mut self.clients {
            test_client.transport.set_conditions(conditions);
        }
    }

    /// One tick: every client runs a full tick (sending its command for
    /// `tick`), then the server runs.
    pub fn step(&mut self, tick: u32, command: impl Fn(usize, u32) -> Option<MoveCommand>) {
        for (index, test_client) in self.clients.iter_mut().enumerate() {
            if let Some(command) = command(index, tick) {
                test_client.client.record_command(tick, command);
            }
            test_client
                .client
                .update(tick, TickKind::Full, &test_client.transport, &Walk)
                .unwrap();
        }
        self.server.update(tick, &self.server_transport, &Walk).unwrap();
    }

    /// Runs `ticks` ticks without input starting at `from`; returns the next tick.
    pub fn idle(&mut self, from: u32, ticks: u32) -> u32 {
        for tick in from..from + ticks {
            self.step(tick, |_, _| None);
        }
        from + ticks
    }

    pub fn client(&self, index: usize) -> &GhostClient<MoveCommand> {
        &self.clients[index].client
    }

    pub fn client_mut(&mut self, index: usize) -> &mut GhostClient<MoveCommand> {
        &mut self.clients[index].client
    }
}
