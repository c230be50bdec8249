//! Physics engine benchmarks (criterion - wall-clock time).
//!
//! Run all:    cargo bench --bench physics
//! Filter:     cargo bench --bench physics -- broadphase

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{vec2, Vec2};
use rigid2d::{Aabb, EngineConfig, Material, PhysicsEngine, RigidBody, Shape};

fn world_bounds() -> Aabb {
    Aabb::new(vec2(0.0, 0.0), vec2(4096.0, 4096.0))
}

/// Engine with a floor and an n-body grid of falling boxes.
fn setup_engine(n: usize) -> PhysicsEngine {
    let mut engine = PhysicsEngine::new(world_bounds(), EngineConfig::default());
    engine.add_body(
        RigidBody::from_rect(4000.0, 100.0, vec2(2048.0, 4000.0), Material::default(), true)
            .unwrap(),
    );

    let columns = 40;
    for i in 0..n {
        let x = 200.0 + 90.0 * (i % columns) as f32;
        let y = 100.0 + 50.0 * (i / columns) as f32;
        engine.add_body(
            RigidBody::from_rect(40.0, 40.0, vec2(x, y), Material::default(), false).unwrap(),
        );
    }
    engine
}

// ---------------------------------------------------------------------------
// Broadphase
// ---------------------------------------------------------------------------

fn bench_broadphase(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadphase/query");
    for &n in &[100, 500, 1000] {
        let engine = setup_engine(n);
        let query = Aabb::new(vec2(0.0, 0.0), vec2(2048.0, 2048.0));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| engine.query_region(&query));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Narrowphase
// ---------------------------------------------------------------------------

fn bench_narrowphase(c: &mut Criterion) {
    let square = |center: Vec2| Shape::Polygon {
        vertices: vec![
            center + vec2(-20.0, -20.0),
            center + vec2(20.0, -20.0),
            center + vec2(20.0, 20.0),
            center + vec2(-20.0, 20.0),
        ],
    };

    {
        let mut group = c.benchmark_group("narrowphase/polygon_polygon");
        let a = square(Vec2::ZERO);

        let b_hit = square(vec2(30.0, 0.0));
        group.bench_function("intersecting", |b| {
            b.iter(|| rigid2d::narrowphase::detect_collision(&a, &b_hit).unwrap());
        });

        let b_miss = square(vec2(100.0, 0.0));
        group.bench_function("separated", |b| {
            b.iter(|| rigid2d::narrowphase::detect_collision(&a, &b_miss).unwrap());
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("narrowphase/circle_circle");
        let a = Shape::Circle {
            center: Vec2::ZERO,
            radius: 20.0,
        };
        let b_hit = Shape::Circle {
            center: vec2(30.0, 0.0),
            radius: 20.0,
        };
        group.bench_function("intersecting", |b| {
            b.iter(|| rigid2d::narrowphase::detect_collision(&a, &b_hit).unwrap());
        });

        let b_miss = Shape::Circle {
            center: vec2(100.0, 0.0),
            radius: 20.0,
        };
        group.bench_function("separated", |b| {
            b.iter(|| rigid2d::narrowphase::detect_collision(&a, &b_miss).unwrap());
        });
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Full step
// ---------------------------------------------------------------------------

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/update");
    group.sample_size(20);
    for &n in &[100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || setup_engine(n),
                |mut engine| engine.update(1.0 / 60.0).unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broadphase, bench_narrowphase, bench_step);
criterion_main!(benches);
