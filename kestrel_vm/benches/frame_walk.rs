//! Benchmarks for the hot read paths the collector leans on: stack-map
//! lookup and frame-iterator walks over inlined activations.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kestrel_core::MethodId;
use kestrel_jit::descriptor::CompiledMethodDescriptor;
use kestrel_jit::inlining::{InliningEntry, InliningInfo};
use kestrel_jit::stackmap::StackMapsBuilder;
use kestrel_vm::{FrameIterator, FrameKind, VmStack};

fn build_descriptor(gc_points: u32, inlined: u32) -> Arc<CompiledMethodDescriptor> {
    let mut maps = StackMapsBuilder::new();
    for i in 0..gc_points {
        maps.add_gc_point(i * 8, 12, 2, &[0, 3, 7, 10]);
    }
    let entries = (0..inlined)
        .map(|i| InliningEntry {
            // Nested ranges, innermost first.
            start_offset: i * 4,
            end_offset: gc_points * 8 - i * 4,
            method: MethodId(i + 1),
            first_local: (i * 2) as u16,
            sync_object_word: 0,
            flags: 0,
        })
        .collect();
    Arc::new(
        CompiledMethodDescriptor::new(MethodId(0), gc_points * 8, 12, 32)
            .with_stack_maps(maps.finish())
            .with_inlining(InliningInfo::new(entries)),
    )
}

fn bench_stackmap_lookup(c: &mut Criterion) {
    let cmd = build_descriptor(64, 0);
    c.bench_function("stackmap_lookup_hit", |b| {
        b.iter(|| {
            let view = cmd.stack_maps().lookup(black_box(63 * 8)).unwrap();
            black_box(view.live_count())
        })
    });
    c.bench_function("stackmap_lookup_miss", |b| {
        b.iter(|| black_box(cmd.stack_maps().lookup(black_box(7))).is_none())
    });
}

fn bench_frame_iterate(c: &mut Criterion) {
    let cmd = build_descriptor(64, 6);
    let mut stack = VmStack::new();
    let pushed = stack
        .push_frame(
            FrameKind::Compiled,
            MethodId(0),
            0,
            cmd.max_locals(),
            cmd.capacity(),
            None,
        )
        .unwrap();
    stack.frame_mut(pushed.frame).pc = 24;

    c.bench_function("frame_iterate_count", |b| {
        b.iter(|| {
            let mut iter = FrameIterator::new(&stack, pushed.frame, cmd.clone());
            black_box(iter.count(false, &stack))
        })
    });
    c.bench_function("frame_iterate_walk", |b| {
        b.iter(|| {
            let mut iter = FrameIterator::new(&stack, pushed.frame, cmd.clone());
            let mut last = MethodId(0);
            while iter.advance(0, false, false, &stack) {
                last = iter.method();
            }
            black_box(last)
        })
    });
}

criterion_group!(benches, bench_stackmap_lookup, bench_frame_iterate);
criterion_main!(benches);
