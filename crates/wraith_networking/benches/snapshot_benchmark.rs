//! Benchmark for snapshot frame assembly and client-side decoding.
//!
//! TARGET: a full 1200-byte frame for 256 candidate ghosts well under 1ms
//!
//! Run with: cargo bench --package wraith_networking --bench snapshot_benchmark

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use wraith_core::{
    ComponentDescriptor, FieldDescriptor, FieldKind, FieldValue, GhostTypeDescriptor,
    GhostTypeId, GhostTypeRegistry,
};
use wraith_networking::{
    ConnectionId, GhostClient, GhostServer, NetcodeConfig, ServerContext, MAX_PACKET_SIZE,
};

const GHOSTS: u32 = 256;

fn registry() -> (Arc<GhostTypeRegistry>, GhostTypeId) {
    let mut registry = GhostTypeRegistry::new();
    let id = registry
        .register(
            GhostTypeDescriptor::new("Soldier")
                .component(
                    ComponentDescriptor::new("Transform")
                        .field(FieldDescriptor::new("position", FieldKind::Vec3).quantized(100))
                        .field(FieldDescriptor::new("rotation", FieldKind::Quat).quantized(1000)),
                )
                .component(
                    ComponentDescriptor::new("Health").field(FieldDescriptor::new("hp", FieldKind::Int)),
                ),
        )
        .expect("valid type");
    (Arc::new(registry), id)
}

fn populated_server() -> (GhostServer<u32>, ConnectionId) {
    let (registry, soldier) = registry();
    let mut server = GhostServer::new(ServerContext::new(registry, NetcodeConfig::default()));
    let conn = server.connect().id();
    for i in 0..GHOSTS {
        let instance = server.spawn(soldier, 1, None).expect("spawn");
        let state = server.world_mut().state_mut(instance.ghost_id()).expect("spawned");
        #[allow(clippy::cast_precision_loss)]
        let offset = i as f32;
        state
            .set(0, FieldValue::Vec3([offset, 1.0, -offset]))
            .expect("kind");
    }
    server.world_mut().capture(1).expect("capture");
    (server, conn)
}

fn benchmark_build_frame(c: &mut Criterion) {
    let (mut server, conn) = populated_server();

    let mut group = c.benchmark_group("snapshot_build");
    group.throughput(Throughput::Bytes(MAX_PACKET_SIZE as u64));
    group.bench_function("full_frame_256_candidates", |b| {
        b.iter(|| {
            let frame = server
                .build_frame(conn, black_box(1), MAX_PACKET_SIZE)
                .expect("frame");
            black_box(frame.len())
        });
    });
    group.finish();
}

fn benchmark_receive_frame(c: &mut Criterion) {
    let (mut server, conn) = populated_server();
    let frame = server.build_frame(conn, 1, MAX_PACKET_SIZE).expect("frame");
    let registry = Arc::clone(&server.context().registry);

    let mut group = c.benchmark_group("snapshot_receive");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("decode_and_route", |b| {
        b.iter_batched(
            || GhostClient::<u32>::new(Arc::clone(&registry), NetcodeConfig::default()),
            |mut client| {
                client.receive_frame(2, black_box(&frame)).expect("valid frame");
                black_box(client.pending_spawns().len())
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, benchmark_build_frame, benchmark_receive_frame);
criterion_main!(benches);
