//! Benchmark for the change-mask codec and per-ghost serialization.
//!
//! TARGET: 100,000 ghost deltas per frame budget
//!
//! Run with: cargo bench --package wraith_core --bench codec_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use wraith_core::{
    get_bits, set_bits, BitReader, BitWriter, ComponentDescriptor, FieldDescriptor, FieldKind,
    FieldValue, GhostLayout, GhostSerializer, GhostState, LayoutSerializer,
};

fn create_layout() -> GhostLayout {
    GhostLayout::build(
        "Soldier",
        &[
            ComponentDescriptor::new("Transform")
                .field(FieldDescriptor::new("position", FieldKind::Vec3).quantized(100))
                .field(FieldDescriptor::new("rotation", FieldKind::Quat).quantized(1000)),
            ComponentDescriptor::new("Health").field(FieldDescriptor::new("hp", FieldKind::Int)),
        ],
    )
    .expect("valid layout")
}

fn benchmark_mask_runs(c: &mut Criterion) {
    let mut mask = [0u32; 8];
    c.bench_function("mask_set_get_straddling", |b| {
        let mut value = 0u32;
        b.iter(|| {
            value = value.wrapping_add(1) & 0x1FF;
            set_bits(&mut mask, black_box(value), black_box(28), 9).expect("in range");
            black_box(get_bits(&mask, 28, 9).expect("in range"))
        });
    });
}

fn benchmark_ghost_delta(c: &mut Criterion) {
    let layout = create_layout();
    let serializer = LayoutSerializer;
    let mut state = GhostState::new(&layout);
    let mut baseline = vec![0; layout.total_units()];
    serializer.quantize(&layout, &state, &mut baseline);

    let position = layout.field_slot("Transform", "position").expect("slot");
    state
        .set(position, FieldValue::Vec3([1.5, 0.0, -3.25]))
        .expect("kind");
    let mut units = vec![0; layout.total_units()];
    serializer.quantize(&layout, &state, &mut units);

    let mut group = c.benchmark_group("ghost_delta");
    group.throughput(Throughput::Elements(1));
    group.bench_function("write", |b| {
        let mut writer = BitWriter::new(1200);
        b.iter(|| {
            writer.reset();
            serializer
                .write(&layout, &units, state.enabled(), Some(&baseline), &mut writer)
                .expect("fits");
            black_box(writer.bit_len())
        });
    });

    let mut writer = BitWriter::new(1200);
    serializer
        .write(&layout, &units, state.enabled(), Some(&baseline), &mut writer)
        .expect("fits");
    let bytes = writer.into_bytes();
    group.bench_function("read", |b| {
        b.iter(|| {
            let mut reader = BitReader::new(black_box(&bytes));
            black_box(serializer.read(&layout, Some(&baseline), &mut reader).expect("valid"))
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_mask_runs, benchmark_ghost_delta);
criterion_main!(benches);
