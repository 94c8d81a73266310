//! Benchmarks for `World::update` across a handful of body counts, in the
//! style of the teacher crate's own `criterion` benches (one
//! `benchmark_group`, `BenchmarkId` per parameterized case).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use impulse3d::{BodySettings, MotionType, NullContactListener, Shape, WorldSettings};
use nalgebra::Vector3;

fn settings_with_one_layer() -> WorldSettings {
    let (builder, bp) = WorldSettings::builder().add_broadphase_layer();
    let (builder, default_layer) = builder.add_object_layer(bp).unwrap();
    let builder = builder.enable_collision(default_layer, default_layer).unwrap();
    builder.build().unwrap()
}

fn build_scene(body_count: usize) -> impulse3d::World {
    let settings = settings_with_one_layer();
    let mut world = impulse3d::World::new(settings);
    let object_layer = impulse3d::broadphase::ObjectLayerId(0);

    world
        .create_body(BodySettings {
            shape: Shape::cuboid(Vector3::new(50.0, 0.5, 50.0), 0.0).unwrap(),
            motion_type: MotionType::Static,
            object_layer,
            position: Vector3::new(0.0, -0.5, 0.0),
            ..Default::default()
        })
        .unwrap();

    for i in 0..body_count {
        let row = (i as f64 / 8.0).floor();
        let col = (i % 8) as f64;
        world
            .create_body(BodySettings {
                shape: Shape::cuboid(Vector3::new(0.5, 0.5, 0.5), 0.02).unwrap(),
                motion_type: MotionType::Dynamic,
                object_layer,
                position: Vector3::new(col * 1.2 - 4.0, 2.0 + row * 1.2, 0.0),
                ..Default::default()
            })
            .unwrap();
    }

    world
}

fn step_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");

    for &body_count in &[10usize, 50, 200] {
        group.bench_with_input(BenchmarkId::new("update", body_count), &body_count, |b, &body_count| {
            let mut world = build_scene(body_count);
            let mut listener = NullContactListener;
            b.iter(|| {
                world.update(&mut listener, black_box(1.0 / 60.0));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, step_benchmarks);
criterion_main!(benches);
