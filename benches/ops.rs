use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

use noema::{ElementType, Memory, MemoryParams};

fn bench_lifecycle(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let memory = Memory::initialize(MemoryParams::test(dir.path())).unwrap();
    let ctx = memory.context();

    // Create plus erase, so the free chain recycles slots and the store
    // never fills no matter how many samples run.
    c.bench_function("node_create_erase", |b| {
        b.iter(|| {
            let node = ctx.create_node(ElementType::CONST).unwrap();
            ctx.erase_element(node).unwrap();
        })
    });

    let hub = ctx.create_node(ElementType::CONST).unwrap();
    let spoke = ctx.create_node(ElementType::CONST).unwrap();
    c.bench_function("arc_create_erase", |b| {
        b.iter(|| {
            let arc = ctx
                .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, hub, spoke)
                .unwrap();
            ctx.erase_element(arc).unwrap();
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let memory = Memory::initialize(MemoryParams::test(dir.path())).unwrap();
    let ctx = memory.context();

    let hub = ctx.create_node(ElementType::CONST).unwrap();
    for _ in 0..1_000 {
        let node = ctx.create_node(ElementType::CONST).unwrap();
        ctx.create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, hub, node)
            .unwrap();
    }

    c.bench_function("iterate_out_1k", |b| {
        b.iter(|| {
            let iter = ctx
                .iter_f_a_a(hub, ElementType::ARC_ACCESS, ElementType::NODE)
                .unwrap();
            iter.count()
        })
    });
}

criterion_group!(benches, bench_lifecycle, bench_iterate);
criterion_main!(benches);
