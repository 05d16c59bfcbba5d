//! Benchmarks for page coalescing and locality audits.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use numabind::audit::{coalesce, PageAttribute, PageSpan, WorkingSetBuffer};
use numabind::platform::simulated::SimulatedPlatform;
use numabind::{AffinityDispatcher, MemoryAuditor, ThreadLocator, TopologyCatalog};

const PAGE: usize = 4096;
const BASE: usize = 0x1000_0000;
const PAGE_COUNTS: [usize; 3] = [16, 1024, 65536];

/// Pages alternating between two nodes every `run` pages, with a hole now and then.
fn striped(pages: usize, run: usize) -> Vec<PageAttribute> {
    (0..pages)
        .map(|i| match (i / run) % 3 {
            0 => PageAttribute::resident(0),
            1 => PageAttribute::resident(1),
            _ => PageAttribute::INVALID,
        })
        .collect()
}

fn bench_coalesce(c: &mut Criterion) {
    let mut group = c.benchmark_group("Coalesce");

    for &pages in &PAGE_COUNTS {
        let span = PageSpan::new(BASE, pages * PAGE, PAGE).unwrap();
        let mut buffer = WorkingSetBuffer::for_span(&span);
        buffer.fill(striped(pages, 64));

        group.bench_with_input(BenchmarkId::from_parameter(pages), &buffer, |b, buffer| {
            b.iter(|| black_box(coalesce(buffer.entries(), PAGE)));
        });
    }

    group.finish();
}

fn bench_audit(c: &mut Criterion) {
    let mut group = c.benchmark_group("Audit (simulated)");

    for &pages in &PAGE_COUNTS {
        let platform = SimulatedPlatform::with_nodes(2, 4);
        platform.set_pages(BASE, &striped(pages, 256));
        let auditor = MemoryAuditor::new(&platform);

        group.bench_with_input(BenchmarkId::new("regions", pages), &pages, |b, &pages| {
            b.iter(|| black_box(auditor.regions(BASE, pages * PAGE).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("resident_on_node", pages), &pages, |b, &pages| {
            b.iter(|| black_box(auditor.is_resident_on_node(BASE, pages * PAGE, 0).unwrap()));
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let platform = SimulatedPlatform::with_nodes(4, 8);
    let catalog = TopologyCatalog::discover(&platform).unwrap();
    let dispatcher = AffinityDispatcher::new(&catalog, &platform)
        .unwrap()
        .with_template(&[3, 1, 2, 0, 0, 1])
        .unwrap();
    let locator = ThreadLocator::new(&catalog, &platform);

    c.bench_function("select", |b| {
        let mut worker = 0i64;
        b.iter(|| {
            worker += 1;
            black_box(dispatcher.select(worker))
        });
    });

    c.bench_function("pin_and_locate", |b| {
        b.iter(|| {
            dispatcher.pin_current_thread(black_box(2)).unwrap();
            black_box(locator.locate().unwrap())
        });
    });
}

criterion_group!(benches, bench_coalesce, bench_audit, bench_dispatch);
criterion_main!(benches);
