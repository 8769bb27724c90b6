//! Kernel evaluation benchmarks using Criterion.
//!
//! Benchmarks cover:
//! - Matrix-vector products per strategy (staged, symbolic, device, direct)
//! - Every kernel variant through the automatic selector
//! - The dense fit on labeled triples
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ksurf::core::{EvaluationContext, PointSet, Regressor};
use ksurf::kernel::{DeviceKernel, Kernel, KernelConfig, KernelKind, Strategy};
use ksurf::pipeline::{make_triples, OrientedPointCloud};
use ksurf::solver::DirectKernelSolver;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Points on the unit sphere with the bias coordinate appended
fn sphere_points(n: usize, seed: u64) -> PointSet<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(n * 4);
    for _ in 0..n {
        let z: f64 = rng.gen_range(-1.0..1.0);
        let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
        let r = (1.0 - z * z).sqrt();
        data.extend_from_slice(&[r * phi.cos(), r * phi.sin(), z, 1.0]);
    }
    PointSet::new(data, 4).unwrap()
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("ntk_matvec");
    let kernel = KernelConfig::new(KernelKind::NeuralSpline).build().unwrap();
    let ctx = EvaluationContext::accelerator::<f64>();

    for &n in &[256usize, 1024, 4096] {
        let x = sphere_points(n, 1);
        let v = vec![1.0; n];
        group.throughput(Throughput::Elements((n * n) as u64));

        for (label, strategy) in [
            ("staged", Strategy::Staged),
            ("symbolic", Strategy::Symbolic),
            ("device", Strategy::Device(DeviceKernel::StableNeuralTangent)),
        ] {
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, _| {
                b.iter(|| {
                    kernel
                        .matrix_vector_product_with(strategy, x.view(), x.view(), black_box(&v), &ctx)
                        .unwrap()
                })
            });
        }
        if n <= 1024 {
            group.bench_with_input(BenchmarkId::new("direct", n), &n, |b, _| {
                b.iter(|| {
                    kernel
                        .matrix_vector_product_with(Strategy::Direct, x.view(), x.view(), black_box(&v), &ctx)
                        .unwrap()
                })
            });
        }
    }
    group.finish();
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_variants");
    let n = 1024;
    let x = sphere_points(n, 2);
    let v = vec![1.0; n];
    let ctx = EvaluationContext::new::<f64>();

    let mut decayed = KernelConfig::new(KernelKind::SphericalLaplace);
    decayed.decay = Some(2.0);
    let configs = [
        KernelConfig::new(KernelKind::ArcCosine),
        KernelConfig::new(KernelKind::NeuralSpline),
        KernelConfig::new(KernelKind::SphericalLaplace),
        decayed,
    ];
    for config in configs {
        let kernel = config.build().unwrap();
        group.bench_function(kernel.name(), |b| {
            b.iter(|| {
                kernel
                    .matrix_vector_product(x.view(), x.view(), black_box(&v), &ctx)
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");
    group.sample_size(10);

    for &n in &[50usize, 150] {
        let points = sphere_points(n, 3);
        let xyz: Vec<f64> = points.rows().flat_map(|r| r[..3].to_vec()).collect();
        let xyz = PointSet::new(xyz, 3).unwrap();
        let cloud = OrientedPointCloud::new(xyz.clone(), xyz).unwrap();
        let labeled = make_triples(&cloud, 0.01).unwrap().with_bias();

        group.bench_with_input(BenchmarkId::new("spherical_laplace", 3 * n), &n, |b, _| {
            b.iter(|| {
                let kernel = KernelConfig::new(KernelKind::SphericalLaplace).build().unwrap();
                let mut solver = DirectKernelSolver::new(kernel, 1e-7).unwrap();
                solver.fit(&labeled.points, &labeled.labels).unwrap();
                black_box(solver)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_strategies, bench_kernels, bench_fit);
criterion_main!(benches);
