//! Goto patch throughput
//!
//! Measures the full pipeline (decode, scan, erase, relocate, verify,
//! rebuild) on functions of growing size, plus the scan alone.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relabel_runtime::bytecode::CodeBuilder;
use relabel_runtime::goto::{GotoPatcher, PatchOptions};
use relabel_runtime::CodeObject;

/// `labels` forward skips, each over `spacing` print statements
fn skips(labels: usize, spacing: usize) -> CodeObject {
    let mut b = CodeBuilder::new("bench");
    for n in 0..labels {
        let label = format!("l{}", n);
        b.goto_marker(&label);
        for _ in 0..spacing {
            b.print_const("x");
        }
        b.label_marker(&label);
    }
    b.finish().expect("bench function builds")
}

fn bench_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch");
    for labels in [1usize, 16, 256] {
        let code = skips(labels, 8);
        group.throughput(Throughput::Bytes(code.instructions.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(labels), &code, |b, code| {
            let patcher = GotoPatcher::default();
            b.iter(|| patcher.patch(black_box(code)));
        });
    }
    group.finish();
}

fn bench_patch_unverified(c: &mut Criterion) {
    let code = skips(256, 8);
    let patcher = GotoPatcher::new(PatchOptions {
        verify: false,
        ..PatchOptions::default()
    });
    c.bench_function("patch_unverified_256", |b| {
        b.iter(|| patcher.patch(black_box(&code)));
    });
}

fn bench_wide_jumps(c: &mut Criterion) {
    // Every jump needs an extension prefix
    let code = skips(16, 100);
    c.bench_function("patch_wide_16", |b| {
        let patcher = GotoPatcher::default();
        b.iter(|| patcher.patch(black_box(&code)));
    });
}

fn bench_scan(c: &mut Criterion) {
    let code = skips(256, 8);
    c.bench_function("scan_256", |b| {
        let patcher = GotoPatcher::default();
        b.iter(|| patcher.scan(black_box(&code)));
    });
}

criterion_group!(
    benches,
    bench_patch,
    bench_patch_unverified,
    bench_wide_jumps,
    bench_scan
);
criterion_main!(benches);
