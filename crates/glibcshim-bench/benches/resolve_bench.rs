//! Resolution and relocation-planning benchmarks.
//!
//! Measures the cost of binding one import by origin (wrapper, pass-through,
//! host fallback, miss) and of planning a whole synthetic image.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glibcshim_abi::{catalog, context, host};
use glibcshim_core::elf::testing::ImageBuilder;
use glibcshim_core::elf::{Arch, ForeignImage, PlanContext, RelocKind, RelocationPlan};
use glibcshim_core::resolve::ForeignExport;
use glibcshim_core::{Resolver, SymbolSource};

/// Host-only source: no foreign modules loaded.
struct HostOnly;

impl SymbolSource for HostOnly {
    fn host_symbol(&self, name: &str) -> Option<u64> {
        host::lookup(name)
    }

    fn foreign_symbol(&self, _name: &str) -> Option<ForeignExport> {
        None
    }
}

fn bench_resolve_by_origin(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let cases: &[(&str, &str)] = &[
        ("wrapper", "strftime"),
        ("passthrough", "memcpy"),
        ("host", "strspn"),
        ("miss", "glibcshim_bench_missing"),
    ];
    for &(label, name) in cases {
        group.bench_with_input(BenchmarkId::new("context", label), &name, |b, &n| {
            b.iter(|| black_box(context().resolve(black_box(n)).is_ok()));
        });
    }
    group.bench_function("catalog_lookup", |b| {
        b.iter(|| black_box(catalog().lookup(black_box("qsort_r")).is_some()));
    });
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let Some(arch) = Arch::host() else {
        return;
    };
    let imports = ["memcpy", "strlen", "malloc", "free", "strftime", "qsort_r", "open", "getpid"];
    let mut group = c.benchmark_group("relocation_plan");

    for &count in &[8usize, 64, 256] {
        let mut builder = ImageBuilder::new(arch).soname("libbench.so");
        for &name in &imports {
            builder = builder.import(name);
        }
        for i in 0..count {
            let name = imports[i % imports.len()];
            let kind = if i % 2 == 0 {
                RelocKind::GlobDat
            } else {
                RelocKind::JumpSlot
            };
            builder = builder.got_reloc(name, kind);
        }
        let bytes = builder.build();
        let Ok(image) = ForeignImage::parse(&bytes, arch) else {
            continue;
        };
        let source = HostOnly;
        let resolver = Resolver::new(catalog(), &source);
        let ctx = PlanContext {
            load_bias: 0x7f00_0000_0000,
            tls_module: None,
        };

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("got_slots", count), &count, |b, _| {
            b.iter(|| black_box(RelocationPlan::build(&image, ctx, &resolver).is_ok()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve_by_origin, bench_plan);
criterion_main!(benches);
