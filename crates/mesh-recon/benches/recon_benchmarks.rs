//! Benchmarks for the reconstruction stages.
//!
//! Run with: cargo bench -p mesh-recon
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p mesh-recon -- --save-baseline main
//! 2. After changes: cargo bench -p mesh-recon -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mesh_recon::{
    CloudPoint, MeshFormat, NormalParams, Pipeline, PointCloud, ReconstructionConfig, export,
    reconstruct, repair, smooth, trim, validate,
};
use nalgebra::{Point3, Vector3};

// =============================================================================
// Test Cloud Generation
// =============================================================================

/// Fibonacci sphere with analytic normals.
fn sphere_cloud(n: usize) -> PointCloud {
    let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    let points = (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f64;
            let normal = Vector3::new(r * theta.cos(), y, r * theta.sin());
            CloudPoint::with_normal(Point3::from(normal), normal)
        })
        .collect();
    PointCloud { points }
}

fn without_normals(mut cloud: PointCloud) -> PointCloud {
    for point in &mut cloud.points {
        point.normal = None;
    }
    cloud
}

// =============================================================================
// Stage Benchmarks
// =============================================================================

fn bench_normals(c: &mut Criterion) {
    let mut group = c.benchmark_group("Normals");
    let params = NormalParams::default();

    for n in [1000, 5000, 20000] {
        let cloud = without_normals(sphere_cloud(n));
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("estimate", n), &cloud, |b, cloud| {
            b.iter(|| black_box(cloud).with_estimated_normals(&params))
        });
    }

    group.finish();
}

fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reconstruct");
    group.sample_size(10);
    let cloud = sphere_cloud(5000);

    for depth in [5, 6, 7] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            b.iter(|| reconstruct(black_box(&cloud), depth))
        });
    }

    group.finish();
}

fn bench_post_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("PostProcess");
    let Ok(recon) = reconstruct(&sphere_cloud(5000), 7) else {
        return;
    };
    let mesh = recon.mesh;
    group.throughput(Throughput::Elements(mesh.faces.len() as u64));

    group.bench_function("trim", |b| {
        b.iter(|| trim(black_box(&mesh), &recon.density, 0.01))
    });
    group.bench_function("repair", |b| b.iter(|| repair(black_box(&mesh), 7)));
    group.bench_function("smooth_10", |b| {
        b.iter(|| smooth(black_box(&mesh), 10, 0.5))
    });
    group.bench_function("validate", |b| b.iter(|| validate(black_box(&mesh))));

    for format in [MeshFormat::Obj, MeshFormat::Ply, MeshFormat::Stl] {
        group.bench_with_input(
            BenchmarkId::new("export", format),
            &format,
            |b, &format| b.iter(|| export(black_box(&mesh), format)),
        );
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pipeline");
    group.sample_size(10);
    let cloud = sphere_cloud(5000);
    let pipeline = Pipeline::new(ReconstructionConfig::draft());

    group.bench_function("draft_5000", |b| {
        b.iter(|| pipeline.run(black_box(cloud.clone())))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_normals,
    bench_reconstruct,
    bench_post_process,
    bench_pipeline,
);

criterion_main!(benches);
