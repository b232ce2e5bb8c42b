//! # Ghost Soak
//!
//! Runs one server and several clients in-process over a lossy loopback
//! link, then checks every client against the server:
//!
//! - every history entry a client holds matches the server's entry bit for bit
//! - every server ghost is materialized on every client
//!
//! Run with: cargo run --release --bin ghost_soak -- --clients 8 --loss 10

use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;
use wraith_core::{
    ComponentDescriptor, FieldDescriptor, FieldKind, FieldValue, GhostInstance, GhostMode,
    GhostState, GhostType, GhostTypeDescriptor, GhostTypeId, GhostTypeRegistry, OptimizationMode,
};
use wraith_networking::transport::{ClientEndpoint, ServerEndpoint};
use wraith_networking::{
    GhostClient, GhostServer, LoopbackNetwork, LossyTransport, NetError, NetResult, NetcodeConfig,
    NetworkConditions, PredictedSimulation, ServerContext, SimulationStep, TickKind, TickLoop,
    Transport,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replication soak test over a lossy loopback link")]
struct Args {
    /// Number of clients
    #[arg(short, long, default_value_t = 4)]
    clients: usize,
    /// Ticks to run under loss
    #[arg(short, long, default_value_t = 600)]
    ticks: u32,
    /// Ticks to run on a clean link afterwards
    #[arg(long, default_value_t = 60)]
    settle: u32,
    /// Packet loss percentage
    #[arg(short, long, default_value_t = 5)]
    loss: u8,
    /// Duplicate delivery percentage
    #[arg(short, long, default_value_t = 1)]
    duplicate: u8,
    /// Static props spawned at start
    #[arg(long, default_value_t = 32)]
    props: usize,
    /// RNG seed for link and input
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Pace ticks by wall clock instead of running flat out
    #[arg(long)]
    realtime: bool,
    /// Optional netcode config file
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct Move {
    dx: i32,
    dy: i32,
}

/// Adds the move to the avatar's cell coordinates.
struct Walk;

impl PredictedSimulation<Move> for Walk {
    fn simulate(
        &self,
        _: &GhostInstance,
        ghost_type: &GhostType,
        state: &mut GhostState,
        command: Option<&Move>,
        step: SimulationStep,
    ) {
        let (Some(x), Some(y)) = (
            ghost_type.layout().field_slot("Cell", "x"),
            ghost_type.layout().field_slot("Cell", "y"),
        ) else {
            return;
        };
        if step.kind.is_partial() {
            return;
        }
        let Some(command) = command else {
            return;
        };
        let cx = state.int(x).unwrap_or(0);
        let cy = state.int(y).unwrap_or(0);
        // Slots and kinds come from the layout, so these cannot fail
        let _ = state.set(x, FieldValue::Int(cx + command.dx));
        let _ = state.set(y, FieldValue::Int(cy + command.dy));
    }
}

fn registry() -> NetResult<GhostTypeRegistry> {
    let mut registry = GhostTypeRegistry::new();
    registry.register(
        GhostTypeDescriptor::new("Avatar")
            .component(
                ComponentDescriptor::new("Cell")
                    .field(FieldDescriptor::new("x", FieldKind::Int))
                    .field(FieldDescriptor::new("y", FieldKind::Int)),
            )
            .importance(10)
            .mode(GhostMode::OwnerPredicted),
    )?;
    registry.register(
        GhostTypeDescriptor::new("Prop")
            .component(
                ComponentDescriptor::new("Transform")
                    .field(FieldDescriptor::new("position", FieldKind::Vec3).quantized(100)),
            )
            .optimization(OptimizationMode::Static),
    )?;
    Ok(registry)
}

struct SoakClient {
    client: GhostClient<Move>,
    transport: LossyTransport<ClientEndpoint>,
}

fn main() -> NetResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NetcodeConfig::load(path)?,
        None => NetcodeConfig::default(),
    };
    let conditions = NetworkConditions {
        packet_loss_percent: args.loss,
        duplicate_percent: args.duplicate,
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                  WRAITH - GHOST REPLICATION SOAK                 ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ CONFIGURATION ───────────────────────────────────────────────────┐");
    println!("│ Clients:            {:>10}", args.clients);
    println!("│ Ticks:              {:>10} lossy + {} clean", args.ticks, args.settle);
    println!("│ Packet loss:        {:>9}%", args.loss);
    println!("│ Duplicates:         {:>9}%", args.duplicate);
    println!("│ Static props:       {:>10}", args.props);
    println!("│ Seed:               {:>10}", args.seed);
    println!("└───────────────────────────────────────────────────────────────────┘");

    let registry = Arc::new(registry()?);
    let avatar = type_id(&registry, "Avatar")?;
    let prop = type_id(&registry, "Prop")?;

    let network = LoopbackNetwork::new(config.max_frame_bytes);
    let mut server_transport: LossyTransport<ServerEndpoint> =
        LossyTransport::new(network.server_endpoint(), conditions, args.seed);
    let mut server = GhostServer::<Move>::new(ServerContext::new(Arc::clone(&registry), config.clone()));

    let mut clients = Vec::with_capacity(args.clients);
    for index in 0..args.clients {
        let handle = server.connect();
        server.spawn(avatar, 1, Some(handle.id()))?;
        let mut client = GhostClient::new(Arc::clone(&registry), config.clone());
        client.commands_mut().set_enabled(true);
        let transport = LossyTransport::new(
            network.client_endpoint(handle.id()),
            conditions,
            args.seed.wrapping_add(index as u64 + 1),
        );
        clients.push(SoakClient { client, transport });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    for index in 0..args.props {
        let instance = server.spawn(prop, 1, None)?;
        if let Some(state) = server.world_mut().state_mut(instance.ghost_id()) {
            #[allow(clippy::cast_precision_loss)]
            let offset = index as f32;
            let _ = state.set(0, FieldValue::Vec3([offset, 0.0, -offset]));
        }
    }

    let start = Instant::now();
    let total = args.ticks + args.settle;
    let mut tick_loop = TickLoop::new(config.tick_rate);
    // One and a half ticks per step: alternately one and two full ticks,
    // with a half-tick remainder every other step
    let step = tick_loop.tick_duration() * 3 / 2;
    let mut tick = 0;
    while tick < total {
        let schedule = if args.realtime {
            tick_loop.wait_for_next_tick();
            tick_loop.poll()
        } else {
            tick_loop.advance(step)
        };

        for _ in 0..schedule.full_ticks {
            if tick == total {
                break;
            }
            tick += 1;
            let started = tick_loop.begin_tick();
            if tick == args.ticks + 1 {
                server_transport.set_conditions(NetworkConditions::PERFECT);
                for soak in &mut clients {
                    soak.transport.set_conditions(NetworkConditions::PERFECT);
                }
            }
            for soak in &mut clients {
                let command = Move {
                    dx: rng.gen_range(-2..=2),
                    dy: rng.gen_range(-2..=2),
                };
                soak.client.record_command(tick, command);
                soak.client.update(tick, TickKind::Full, &soak.transport, &Walk)?;
            }
            if tick <= args.ticks && tick % 97 == 0 {
                let victim = server.world().iter().find(|g| g.owner().is_none()).map(|g| g.id());
                if let Some(id) = victim {
                    server.despawn(id);
                    server.spawn(prop, tick, None)?;
                }
            }
            server.update(tick, &server_transport, &Walk)?;
            tick_loop.end_tick(started);
        }

        if let Some(fraction) = schedule.partial {
            for soak in &mut clients {
                soak.client
                    .update(tick + 1, TickKind::Partial { fraction }, &soak.transport, &Walk)?;
            }
        }
    }
    let elapsed = start.elapsed();

    let mut mismatched_entries = 0usize;
    let mut missing_ghosts = 0usize;
    for soak in &clients {
        for ghost in server.world().iter() {
            match soak.client.ghost_by_ref(ghost.ghost_ref()) {
                Some(local) => {
                    for entry in local.history().iter() {
                        let same = ghost
                            .history()
                            .at_tick(entry.tick)
                            .map_or(true, |server_entry| server_entry.units == entry.units);
                        if !same {
                            mismatched_entries += 1;
                        }
                    }
                }
                None => missing_ghosts += 1,
            }
        }
    }

    println!();
    println!("┌─ RESULTS ─────────────────────────────────────────────────────────┐");
    let timing = tick_loop.stats();
    println!("│ Elapsed:            {:>10.2?}", elapsed);
    println!(
        "│ Tick time (us):     {:>10} avg, {} max, {} late",
        timing.avg_tick_us, timing.max_tick_us, timing.late_ticks
    );
    println!("│ Ghosts (server):    {:>10}", server.world().len());
    for (index, soak) in clients.iter().enumerate() {
        let stats = soak.client.stats();
        let link = soak.transport.stats();
        println!(
            "│ client {:>2}: frames {:>6}  unacked {:>4}  dropped records {:>4}  lost {:>5}",
            index,
            stats.frames_received,
            stats.frames_unacked,
            stats.records_dropped,
            link.packets_dropped
        );
    }
    let server_stats = server_transport.stats();
    println!(
        "│ Server sent:        {:>10} packets, {} bytes",
        server_stats.packets_sent, server_stats.bytes_sent
    );
    println!("│ Server lost:        {:>10} packets", server_stats.packets_dropped);
    println!("│ Entry mismatches:   {:>10}", mismatched_entries);
    println!("│ Missing ghosts:     {:>10}", missing_ghosts);
    println!("└───────────────────────────────────────────────────────────────────┘");

    if mismatched_entries == 0 && missing_ghosts == 0 {
        println!("PASS: every client converged on the server world");
    } else {
        println!("FAIL: clients diverged from the server world");
        std::process::exit(1);
    }
    Ok(())
}

fn type_id(registry: &GhostTypeRegistry, name: &str) -> NetResult<GhostTypeId> {
    registry
        .by_name(name)
        .ok_or_else(|| NetError::Config(format!("ghost type {name} not registered")))
}
