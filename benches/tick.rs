//! Benchmarks for the per-tick CPU phases.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use skytether::{Engine, EngineConfig, GustyWind, RenderBridge, SpatialHashGrid};

fn engine(population: usize) -> Engine {
    Engine::builder(EngineConfig {
        max_capacity: population,
        initial_population: population,
        ..EngineConfig::default()
    })
    .with_wind(GustyWind::default())
    .build()
    .expect("engine should build")
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(20);

    for population in [1_000, 10_000, 50_000] {
        let mut engine = engine(population);
        // Let the ropes and LOD tiers settle first.
        for _ in 0..30 {
            engine.tick();
        }
        group.bench_with_input(BenchmarkId::new("balloons", population), &population, |b, _| {
            b.iter(|| {
                engine.tick();
                black_box(engine.instance_count())
            })
        });
    }

    group.finish();
}

fn bench_grid_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_rebuild");
    let mut rng = SmallRng::seed_from_u64(42);

    for count in [1_000, 10_000, 50_000] {
        let side = (count as f32).sqrt() * 1.6;
        let positions: Vec<Vec3> = (0..count)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-side..side) * 0.5,
                    rng.gen_range(2.0..5.0),
                    rng.gen_range(-side..side) * 0.5,
                )
            })
            .collect();
        let live = vec![true; count];
        let mut grid = SpatialHashGrid::new(1.0);

        group.bench_with_input(BenchmarkId::new("entities", count), &count, |b, _| {
            b.iter(|| black_box(grid.rebuild(&positions, &live, 1.0)))
        });
    }

    group.finish();
}

fn bench_instance_build(c: &mut Criterion) {
    let engine = engine(50_000);
    let mut bridge = RenderBridge::new();
    c.bench_function("instance_build_50k", |b| {
        b.iter(|| black_box(bridge.build(engine.store())))
    });
}

criterion_group!(benches, bench_tick, bench_grid_rebuild, bench_instance_build);
criterion_main!(benches);
