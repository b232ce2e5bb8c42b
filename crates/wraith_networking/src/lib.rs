//! # WRAITH Networking - Ghost Replication
//!
//! Server-authoritative world replication over an unreliable transport.
//!
//! ## Architecture
//!
//! - **Server**: captures ghost histories and builds one delta-compressed,
//!   importance-ordered frame per connection per tick
//! - **Client**: applies frames, classifies spawns, resolves references and
//!   predicts owned ghosts with rollback and resimulation
//! - **Commands**: tick-indexed input, sent redundantly, carrying the acks
//! - **Relevancy**: per-connection allow or deny lists
//!
//! ## Tick Flow
//!
//! ```text
//! CLIENT                                   SERVER
//!   |                                        |
//!   |--- commands [T-W+1..=T] + ack -------->| receive, simulate
//!   |                                        | capture histories
//!   |<-- frame T: despawns + ghost deltas ---| build per connection
//!   |                                        |
//!   | receive, lifecycle, restore, resimulate
//! ```
//!
//! Deltas are encoded against the newest entry the client acknowledged,
//! so a lost frame only costs bandwidth, never correctness.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wraith_networking::{GhostServer, LoopbackNetwork, NoSimulation, ServerContext};
//!
//! let network = LoopbackNetwork::default();
//! let endpoint = network.server_endpoint();
//! let mut server = GhostServer::<u32>::new(ServerContext::new(registry, config));
//! let handle = server.connect();
//! server.update(tick, &endpoint, &NoSimulation)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod prediction;
pub mod protocol;
pub mod relevancy;
pub mod server;
pub mod tick;
pub mod transport;

// Re-exports for convenience
pub use client::{
    ClientGhost, ClientStats, GhostClient, PredictedSpawn, ReferenceResolver, ResolvedReference,
    SpawnClass, SpawnClassifier, SpawnRequest,
};
pub use command::{Command, CommandBuffer, CommandEntry, CommandSender, CommandTarget};
pub use config::NetcodeConfig;
pub use error::{NetError, NetResult};
pub use events::GhostEvent;
pub use prediction::{
    NoSimulation, PredictedSimulation, PredictionBackup, PredictionPhase, Predictor,
    SimulationStep,
};
pub use protocol::{AckTracker, CommandHeader, FrameHeader, PacketKind};
pub use relevancy::{RelevancyMode, RelevancySet};
pub use server::{
    ConnectionHandle, ConnectionId, GhostServer, ServerContext, ServerTickReport, ServerWorld,
    SnapshotBuilder,
};
pub use tick::{TickKind, TickLoop, TickSchedule};
pub use transport::{LoopbackNetwork, LossyTransport, NetworkConditions, Transport, TransportStats};

/// Default simulation tick rate (updates per second).
///
/// At 60Hz, each tick is ~16.67ms.
pub const WRAITH_TICK_RATE: u32 = 60;

/// Maximum Transmission Unit - packets must be smaller than this.
///
/// 1200 bytes stays under every common path MTU.
pub const MAX_PACKET_SIZE: usize = 1200;
