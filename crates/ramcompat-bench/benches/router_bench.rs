//! Routing benchmarks: shim vs. the platform allocator.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ramcompat_abi::bootstrap_abi::ramcompat_initialize;
use ramcompat_abi::malloc_abi::{ramcompat_free, ramcompat_malloc, ramcompat_realloc};
use ramcompat_core::Compat;

const SIZES: &[usize] = &[16, 64, 256, 1024, 4096, 32768];

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let compat: Compat = Compat::native().expect("bootstrap");
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in SIZES {
        group.bench_with_input(BenchmarkId::new("router", size), &size, |b, &sz| {
            b.iter(|| {
                let p = compat.allocate(sz).expect("allocate");
                // SAFETY: `p` is live and released once.
                unsafe { compat.release(criterion::black_box(p.as_ptr())) };
            });
        });
        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: plain malloc/free pair.
                unsafe {
                    let p = libc::malloc(sz);
                    libc::free(criterion::black_box(p));
                }
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let compat: Compat = Compat::native().expect("bootstrap");
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("1000x64B_router", |b| {
        let mut held = Vec::with_capacity(1000);
        b.iter(|| {
            for _ in 0..1000 {
                held.push(compat.allocate(64).expect("allocate"));
            }
            for p in held.drain(..) {
                // SAFETY: each pointer is live and released once.
                unsafe { compat.release(p.as_ptr()) };
            }
        });
    });

    group.finish();
}

fn bench_abi_realloc_growth(c: &mut Criterion) {
    let rc = ramcompat_initialize(None, None, None);
    assert!(rc == 0 || rc == ramcompat_core::ReplyCode::Unsupported.code());
    let mut group = c.benchmark_group("abi_realloc_growth");

    group.bench_function("8B_to_64KiB", |b| {
        b.iter(|| {
            let mut p = ramcompat_malloc(8);
            let mut size = 8;
            while size < 64 * 1024 {
                size *= 2;
                // SAFETY: `p` is live; the result replaces it.
                p = unsafe { ramcompat_realloc(p, size) };
            }
            // SAFETY: `p` is live and released once.
            unsafe { ramcompat_free(criterion::black_box(p)) };
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_abi_realloc_growth
);
criterion_main!(benches);
