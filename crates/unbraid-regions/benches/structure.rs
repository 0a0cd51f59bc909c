//! Benchmarks for region building performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use unbraid_core::{Insn, MethodCfg};
use unbraid_regions::Structurer;

/// Chain of `depth` diamonds: if/else pairs joining one after another.
fn create_branchy_cfg(depth: usize) -> MethodCfg {
    let mut cfg = MethodCfg::new();
    let mut prev = cfg.add_block();
    cfg.block_mut(prev).push(Insn::other());
    for _ in 0..depth {
        let header = cfg.add_block();
        let then_block = cfg.add_block();
        let else_block = cfg.add_block();
        let join = cfg.add_block();
        cfg.block_mut(header).push(Insn::if_(then_block, else_block));
        cfg.block_mut(then_block).push(Insn::other());
        cfg.block_mut(else_block).push(Insn::other());
        cfg.add_edge(prev, header);
        cfg.add_edge(header, then_block);
        cfg.add_edge(header, else_block);
        cfg.add_edge(then_block, join);
        cfg.add_edge(else_block, join);
        prev = join;
    }
    cfg.block_mut(prev).push(Insn::ret(None));
    cfg
}

/// `depth` while loops nested inside each other.
fn create_nested_loops_cfg(depth: usize) -> MethodCfg {
    let mut cfg = MethodCfg::new();
    let entry = cfg.add_block();
    cfg.block_mut(entry).push(Insn::other());

    let mut headers = Vec::with_capacity(depth);
    let mut exits = Vec::with_capacity(depth);
    for _ in 0..depth {
        headers.push(cfg.add_block());
        exits.push(cfg.add_block());
    }
    let innermost = cfg.add_block();
    cfg.block_mut(innermost).push(Insn::other());

    let mut prev = entry;
    for level in 0..depth {
        let header = headers[level];
        let exit = exits[level];
        let body = if level + 1 < depth {
            headers[level + 1]
        } else {
            innermost
        };
        cfg.block_mut(header).push(Insn::if_(body, exit));
        cfg.add_edge(prev, header);
        cfg.add_edge(header, body);
        cfg.add_edge(header, exit);
        prev = header;
    }
    // back edges: innermost body jumps to the innermost header, each exit
    // jumps back to the next outer header
    cfg.add_edge(innermost, headers[depth - 1]);
    for level in (1..depth).rev() {
        cfg.add_edge(exits[level], headers[level - 1]);
    }
    cfg.block_mut(exits[0]).push(Insn::ret(None));
    cfg
}

fn bench_structure_branchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_branchy");
    for depth in [8, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let mut cfg = create_branchy_cfg(depth);
                    cfg.prepare().unwrap();
                    cfg
                },
                |mut cfg| {
                    let result = Structurer::structure(&mut cfg).unwrap();
                    black_box(result)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_structure_nested_loops(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_nested_loops");
    for depth in [4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let mut cfg = create_nested_loops_cfg(depth);
                    cfg.prepare().unwrap();
                    cfg
                },
                |mut cfg| {
                    let result = Structurer::structure(&mut cfg).unwrap();
                    black_box(result)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_prepare(c: &mut Criterion) {
    c.bench_function("prepare_branchy_128", |b| {
        b.iter_batched(
            || create_branchy_cfg(128),
            |mut cfg| {
                cfg.prepare().unwrap();
                black_box(cfg)
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_structure_branchy,
    bench_structure_nested_loops,
    bench_prepare
);
criterion_main!(benches);
