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
//! Vehicle track demo
//!
//! A car accelerates down a flat track while a walking character follows it
//! and a ball drops onto the road. Run with `RUST_LOG=info` to see progress,
//! `RUST_LOG=debug` for object lifecycle messages.

use glam::Vec3;
use log::info;
use physics_integration::archive::KeyedArchive;
use physics_integration::components::{
    BodyComponent, CharacterControllerComponent, CollisionShapeComponent, CollisionSingleComponent, ShapeGeometry,
};
use physics_integration::config::keys;
use physics_integration::ecs::{run_frame, Entity, FixedTimestep, PolygonGroup, RenderGeometry, Scene};
use physics_integration::math::Transform;
use physics_integration::vehicle::{VehicleCarComponent, VehicleChassisComponent, VehicleWheelComponent};
use physics_integration::{PhysicsConfig, PhysicsSystem, Result};

const WHEELS: [Vec3; 4] = [
    Vec3::new(-1.0, 1.5, -0.5),
    Vec3::new(1.0, 1.5, -0.5),
    Vec3::new(-1.0, -1.5, -0.5),
    Vec3::new(1.0, -1.5, -0.5),
];

fn build_track(scene: &mut Scene) {
    let ground = scene.create_entity();
    scene.add_component(ground, BodyComponent::fixed());
    scene.add_component(ground, CollisionShapeComponent::plane(Vec3::Z, 0.0));
}

fn build_car(scene: &mut Scene) -> Option<Entity> {
    let root = scene.create_entity();
    scene.set_local_transform(root, Transform::from_translation(Vec3::new(0.0, 0.0, 1.2)));
    scene.add_component(root, BodyComponent::dynamic());
    scene.add_component(root, VehicleChassisComponent::new(Vec3::new(0.0, 0.0, -0.3)));
    scene.add_component(root, CollisionShapeComponent::cuboid(Vec3::new(1.0, 2.0, 0.5)));
    for position in WHEELS {
        scene.add_component(root, VehicleWheelComponent::new(position, 0.4, 0.3));
        let hub = scene.create_child(root)?;
        scene.set_local_transform(hub, Transform::from_translation(position));
        scene.add_component(hub, RenderGeometry::from_group(PolygonGroup::unit_cube()));
        scene.add_component(hub, CollisionShapeComponent::new(ShapeGeometry::ConvexHull));
    }
    scene.add_component(root, VehicleCarComponent::new());
    Some(root)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut options = KeyedArchive::new();
    options.set_u32(keys::THREAD_COUNT, 2);
    options.set_f32(keys::FIXED_TIMESTEP, 1.0 / 60.0);
    let config = PhysicsConfig::from_options(&options)?;
    info!("physics config: {:?}", config);

    let mut scene = Scene::new();
    build_track(&mut scene);
    let Some(car) = build_car(&mut scene) else {
        return Ok(());
    };

    let walker = scene.create_entity();
    scene.set_local_transform(walker, Transform::from_translation(Vec3::new(0.0, -6.0, 0.0)));
    let controller = scene.add_component(walker, CharacterControllerComponent::capsule(0.4, 1.8));

    let ball = scene.create_entity();
    scene.set_local_transform(ball, Transform::from_translation(Vec3::new(0.0, 12.0, 8.0)));
    scene.add_component(ball, BodyComponent::dynamic());
    scene.add_component(ball, CollisionShapeComponent::sphere(0.5));

    let mut timestep = FixedTimestep::new(config.fixed_timestep, config.max_steps_per_frame);
    let mut system = PhysicsSystem::new(config)?;

    let mut contacts = 0;
    for frame in 0..600u32 {
        if let Some(driver) = scene
            .find::<VehicleCarComponent>(car)
            .and_then(|id| scene.get_mut::<VehicleCarComponent>(id))
        {
            driver.set_analog_acceleration(1.0);
        }
        if let Some(controller) = controller.and_then(|id| scene.get_mut::<CharacterControllerComponent>(id)) {
            controller.set_velocity(Vec3::new(0.0, 2.0, 0.0));
        }

        run_frame(&mut scene, &mut system, &mut timestep, 1.0 / 60.0);
        contacts += scene
            .singleton::<CollisionSingleComponent>()
            .map_or(0, |c| c.collisions.len());

        if frame % 60 == 0 {
            let car_at = scene.world_transform(car).map(|t| t.translation).unwrap_or_default();
            let walker_at = scene.world_transform(walker).map(|t| t.translation).unwrap_or_default();
            info!(
                "frame {:3}: car at {:.2?}, walker at {:.2?}, {} rigs, {} suspension batches",
                frame,
                car_at,
                walker_at,
                system.vehicles().rig_count(),
                system.vehicles().dispatch_count()
            );
        }
    }

    let stats = system.world().stats();
    info!(
        "done: {} steps, {} contacts, {} batched ray dispatches, {} rays",
        stats.simulate_calls, contacts, stats.batched_dispatches, stats.raycast_queries
    );
    Ok(())
}
