// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Benchmarks for scene queries
//!
//! Compares one batched dispatch against a ray-by-ray loop over the same
//! suspension-style rays.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use physics_integration::math::Pose;
use physics_integration::native::{
    ActorDesc, NativeGeometry, NativeWorld, QueryFilter, Ray, ShapeDesc, WorldDesc,
};

fn setup_world(n_boxes: usize) -> NativeWorld {
    let mut world = NativeWorld::new(&WorldDesc::default());
    let ground = world
        .create_actor(ActorDesc::fixed(Pose::IDENTITY))
        .unwrap();
    let plane = world
        .create_shape(ShapeDesc::new(NativeGeometry::Plane {
            normal: Vec3::Z,
            distance: 0.0,
        }))
        .unwrap();
    world.attach_shape(ground, plane).unwrap();

    for i in 0..n_boxes {
        let x = (i % 32) as f32 * 3.0;
        let y = (i / 32) as f32 * 3.0;
        let actor = world
            .create_actor(ActorDesc::fixed(Pose::from_position(Vec3::new(x, y, 0.5))))
            .unwrap();
        let shape = world
            .create_shape(ShapeDesc::new(NativeGeometry::Box {
                half_extents: Vec3::splat(0.5),
            }))
            .unwrap();
        world.attach_shape(actor, shape).unwrap();
    }
    world
}

fn suspension_rays(n_rays: usize) -> Vec<(Ray, QueryFilter)> {
    (0..n_rays)
        .filter_map(|i| {
            let origin = Vec3::new((i % 48) as f32 * 2.0, (i / 48) as f32 * 2.0, 3.0);
            Ray::new(origin, -Vec3::Z, 5.0)
        })
        .map(|ray| (ray, QueryFilter::all()))
        .collect()
}

fn bench_batched_vs_individual(c: &mut Criterion) {
    let mut group = c.benchmark_group("suspension_rays");

    for n_rays in [4, 64, 512].iter() {
        let mut world = setup_world(256);
        let rays = suspension_rays(*n_rays);

        group.bench_with_input(BenchmarkId::new("batched", n_rays), n_rays, |b, _| {
            b.iter(|| world.raycast_batch(black_box(&rays)))
        });

        group.bench_with_input(BenchmarkId::new("individual", n_rays), n_rays, |b, _| {
            b.iter(|| {
                rays.iter()
                    .map(|(ray, filter)| world.raycast_closest(black_box(ray), filter))
                    .collect::<Vec<_>>()
            })
        });
    }

    group.finish();
}

fn bench_world_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_world_size");

    for n_boxes in [16, 256, 2048].iter() {
        let mut world = setup_world(*n_boxes);
        let rays = suspension_rays(64);

        group.bench_with_input(BenchmarkId::from_parameter(n_boxes), n_boxes, |b, _| {
            b.iter(|| world.raycast_batch(black_box(&rays)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batched_vs_individual, bench_world_size);
criterion_main!(benches);
