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
//! Simulation tests
//!
//! Frame protocol, simulation toggling, forces, mass and the events a step
//! reports back to the scene.

use glam::Vec3;
use physics_integration::components::{BodyComponent, CollisionShapeComponent, CollisionSingleComponent};
use physics_integration::config::PhysicsConfig;
use physics_integration::ecs::{run_frame, Entity, FixedTimestep, Scene, SceneSystem};
use physics_integration::error::PhysicsError;
use physics_integration::math::{vec3_approx_eq, Pose, Transform};
use physics_integration::native::{ActorHandle, ForceMode};
use physics_integration::system::PhysicsSystem;

const DT: f32 = 1.0 / 60.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn system_with(config: PhysicsConfig) -> PhysicsSystem {
    init_logging();
    PhysicsSystem::new(config).unwrap()
}

fn ground(scene: &mut Scene) -> Entity {
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::fixed());
    scene.add_component(entity, CollisionShapeComponent::plane(Vec3::Z, 0.0));
    entity
}

fn ball(scene: &mut Scene, at: Vec3) -> Entity {
    let entity = scene.create_entity();
    scene.set_local_transform(entity, Transform::from_translation(at));
    scene.add_component(entity, BodyComponent::dynamic());
    scene.add_component(entity, CollisionShapeComponent::sphere(0.5));
    entity
}

fn position(scene: &Scene, entity: Entity) -> Vec3 {
    scene.world_transform(entity).unwrap().translation
}

fn actor_of(scene: &Scene, entity: Entity) -> ActorHandle {
    let id = scene.find::<BodyComponent>(entity).unwrap();
    scene.get::<BodyComponent>(id).unwrap().native_actor().unwrap()
}

#[test]
fn test_disable_mid_step_fetches_pending_results() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default().with_async_fetch());
    system.world_mut().set_step_latency(2);
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 5.0));

    system.process_fixed(&mut scene, DT);
    assert!(system.world().is_running());
    assert_eq!(position(&scene, entity).z, 5.0);

    system.set_simulation_enabled(&mut scene, false);
    assert!(!system.world().is_running());
    let paused_at = position(&scene, entity);
    assert!(paused_at.z < 5.0);

    for _ in 0..3 {
        system.process_fixed(&mut scene, DT);
    }
    assert_eq!(system.world().stats().simulate_calls, 1);
    assert_eq!(position(&scene, entity), paused_at);

    system.set_simulation_enabled(&mut scene, true);
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().stats().simulate_calls, 2);
}

#[test]
fn test_disabled_frames_remember_transform_changes() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::kinematic());
    scene.add_component(entity, CollisionShapeComponent::cuboid(Vec3::splat(0.5)));
    system.process_fixed(&mut scene, DT);
    let actor = actor_of(&scene, entity);

    system.set_simulation_enabled(&mut scene, false);
    let target = Vec3::new(4.0, 0.0, 1.0);
    scene.set_world_transform(entity, Transform::from_translation(target));
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().actor_pose(actor).unwrap().position, Vec3::ZERO);

    system.set_simulation_enabled(&mut scene, true);
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().actor_pose(actor).unwrap().position, target);
}

#[test]
fn test_dynamic_body_pose_is_solver_owned() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::new(Vec3::ZERO));
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 5.0));
    system.process_fixed(&mut scene, DT);
    let actor = actor_of(&scene, entity);

    scene.set_world_transform(entity, Transform::from_translation(Vec3::new(9.0, 0.0, 0.0)));
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().actor_pose(actor).unwrap().position, Vec3::new(0.0, 0.0, 5.0));
}

#[test]
fn test_ball_rests_on_ground_and_reports_contacts() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let floor = ground(&mut scene);
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 1.5));

    let mut touched = false;
    for _ in 0..180 {
        system.process_fixed(&mut scene, DT);
        let collisions = scene.singleton::<CollisionSingleComponent>().unwrap();
        for info in collisions.collisions_of(entity) {
            assert!(info.first == floor || info.second == floor);
            assert!(!info.points.is_empty());
            touched = true;
        }
    }
    assert!(touched);
    let z = position(&scene, entity).z;
    assert!(z > 0.2 && z < 1.0, "ball at {}", z);
}

#[test]
fn test_trigger_entry_is_reported() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let sensor = scene.create_entity();
    scene.set_local_transform(sensor, Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)));
    scene.add_component(sensor, BodyComponent::fixed());
    let mut volume = CollisionShapeComponent::cuboid(Vec3::splat(1.0));
    volume.set_trigger_mode(true);
    scene.add_component(sensor, volume);
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 5.0));

    let mut entries = 0;
    for _ in 0..90 {
        system.process_fixed(&mut scene, DT);
        let collisions = scene.singleton::<CollisionSingleComponent>().unwrap();
        entries += collisions
            .triggers
            .iter()
            .filter(|t| t.trigger == sensor && t.other == entity)
            .count();
    }
    assert_eq!(entries, 1);
}

#[test]
fn test_forces_push_bodies() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::new(Vec3::ZERO));
    let pushed = ball(&mut scene, Vec3::ZERO);
    let kicked = ball(&mut scene, Vec3::new(0.0, 10.0, 0.0));
    system.process_fixed(&mut scene, DT);

    system.add_force(pushed, Vec3::new(50.0, 0.0, 0.0), ForceMode::Force);
    system.add_force(kicked, Vec3::new(0.0, 0.0, 2.0), ForceMode::VelocityChange);
    for _ in 0..10 {
        system.process_fixed(&mut scene, DT);
    }
    assert!(position(&scene, pushed).x > 0.0);
    assert!(position(&scene, kicked).z > 0.0);
    assert_eq!(position(&scene, kicked).x, 0.0);
}

#[test]
fn test_forces_for_removed_body_are_dropped() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::new(Vec3::ZERO));
    let entity = ball(&mut scene, Vec3::ZERO);
    system.process_fixed(&mut scene, DT);

    system.add_force(entity, Vec3::X, ForceMode::Impulse);
    let body = scene.find::<BodyComponent>(entity).unwrap();
    scene.remove_component(body);
    let fresh = scene.add_component(entity, BodyComponent::dynamic()).unwrap();
    system.process_fixed(&mut scene, DT);
    system.process_fixed(&mut scene, DT);

    assert!(scene.get::<BodyComponent>(fresh).unwrap().native_actor().is_some());
    assert_eq!(position(&scene, entity), Vec3::ZERO);
}

#[test]
fn test_mass_comes_from_shapes() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::dynamic());
    for mass in [2.0, 3.0] {
        let mut shape = CollisionShapeComponent::sphere(0.5);
        shape.set_override_mass(true);
        shape.set_mass(mass);
        scene.add_component(entity, shape);
    }
    system.process_fixed(&mut scene, DT);

    let actor = actor_of(&scene, entity);
    assert!((system.world().mass(actor).unwrap() - 5.0).abs() < 1e-5);
}

#[test]
fn test_fetch_writes_native_shape_pose_to_child_entity() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 20.0));
    let child = scene.create_child(entity).unwrap();
    scene.set_local_transform(child, Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)));
    let id = scene.add_component(child, CollisionShapeComponent::sphere(0.25)).unwrap();
    system.process_fixed(&mut scene, DT);
    let local = scene.local_transform(child).unwrap().translation;
    assert!(vec3_approx_eq(local, Vec3::new(1.0, 0.0, 0.0), 1e-5));

    let handle = scene.get::<CollisionShapeComponent>(id).unwrap().native_shape().unwrap();
    let moved = Pose::from_position(Vec3::new(0.0, 2.0, 0.0));
    assert!(system.world_mut().set_shape_local_pose(handle, moved).unwrap());
    system.process_fixed(&mut scene, DT);

    let local = scene.local_transform(child).unwrap().translation;
    assert!(vec3_approx_eq(local, Vec3::new(0.0, 2.0, 0.0), 1e-4), "child at {:?}", local);
    assert!(!scene.transform_changed(child));
    let body = position(&scene, entity);
    assert!(vec3_approx_eq(position(&scene, child), body + Vec3::new(0.0, 2.0, 0.0), 1e-4));
}

#[test]
fn test_fetch_reports_velocity_and_sleep_state() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    ground(&mut scene);
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 2.0));
    let id = scene.find::<BodyComponent>(entity).unwrap();
    assert!(!scene.get::<BodyComponent>(id).unwrap().is_active());

    for _ in 0..5 {
        system.process_fixed(&mut scene, DT);
    }
    let body = scene.get::<BodyComponent>(id).unwrap();
    assert!(body.is_active());
    assert!(body.linear_velocity().z < 0.0);
    let actor = actor_of(&scene, entity);
    assert_eq!(Some(body.linear_velocity()), system.world().linear_velocity(actor));
    assert_eq!(Some(body.angular_velocity()), system.world().angular_velocity(actor));

    for _ in 0..600 {
        system.process_fixed(&mut scene, DT);
    }
    let body = scene.get::<BodyComponent>(id).unwrap();
    assert!(!body.is_active());
    assert_eq!(body.linear_velocity(), Vec3::ZERO);
}

#[test]
fn test_ccd_propagates_to_every_shape() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 50.0));
    let child = scene.create_child(entity).unwrap();
    let extra = scene.add_component(child, CollisionShapeComponent::sphere(0.25)).unwrap();
    system.process_fixed(&mut scene, DT);

    let body = scene.find::<BodyComponent>(entity).unwrap();
    scene.get_mut::<BodyComponent>(body).unwrap().set_ccd_enabled(true);
    system.process_fixed(&mut scene, DT);

    let own = scene.find::<CollisionShapeComponent>(entity).unwrap();
    for id in [own, extra] {
        let shape = scene.get::<CollisionShapeComponent>(id).unwrap();
        assert!(shape.ccd_enabled());
        let filter = system.world().shape_filter(shape.native_shape().unwrap()).unwrap();
        assert!(filter.ccd());
    }
}

#[test]
fn test_raycast_reports_hits_in_order_and_can_stop() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    let mut walls = Vec::new();
    for x in [10.0, 5.0, 15.0] {
        let wall = scene.create_entity();
        scene.set_local_transform(wall, Transform::from_translation(Vec3::new(x, 0.0, 0.0)));
        scene.add_component(wall, BodyComponent::fixed());
        scene.add_component(wall, CollisionShapeComponent::cuboid(Vec3::splat(0.5)));
        walls.push(wall);
    }
    system.process_fixed(&mut scene, DT);

    let mut distances = Vec::new();
    let mut owners = Vec::new();
    let count = system.raycast(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0), 100.0, |hit| {
        distances.push(hit.distance);
        owners.push(hit.entity);
        true
    });
    assert_eq!(count, 3);
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(owners, vec![Some(walls[1]), Some(walls[0]), Some(walls[2])]);
    assert!((distances[0] - 4.5).abs() < 1e-3);

    let stopped = system.raycast(Vec3::ZERO, Vec3::X, 100.0, |_| false);
    assert_eq!(stopped, 1);
    assert_eq!(system.raycast(Vec3::ZERO, Vec3::X, 2.0, |_| true), 0);
}

#[test]
fn test_failed_step_surfaces_from_fetch_results() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default().with_async_fetch());
    let entity = ball(&mut scene, Vec3::new(0.0, 0.0, 5.0));
    system.process_fixed(&mut scene, DT);
    let before = position(&scene, entity);

    system.world_mut().set_step_latency(1);
    system.world_mut().inject_step_failure("broken island");
    system.process_fixed(&mut scene, DT);
    assert!(system.world().is_running());

    match system.fetch_results(&mut scene, true) {
        Err(PhysicsError::StepFailed(reason)) => assert_eq!(reason, "broken island"),
        other => panic!("unexpected fetch outcome {:?}", other),
    }
    assert!(system.last_step_error().is_some());
    assert_eq!(position(&scene, entity), before);
    assert!(!system.fetch_results(&mut scene, true).unwrap());
}

#[test]
fn test_fixed_timestep_drives_the_system() {
    let mut scene = Scene::new();
    let config = PhysicsConfig::default().with_fixed_timestep(0.01);
    let mut timestep = FixedTimestep::new(config.fixed_timestep, config.max_steps_per_frame);
    let mut system = system_with(config);
    ball(&mut scene, Vec3::new(0.0, 0.0, 5.0));

    assert_eq!(run_frame(&mut scene, &mut system, &mut timestep, 0.035), 3);
    assert_eq!(system.stats().frames, 3);
    assert_eq!(run_frame(&mut scene, &mut system, &mut timestep, 1.0), 4);
    assert_eq!(system.world().stats().simulate_calls, 7);
}

#[test]
fn test_debug_draw_requires_simulation() {
    let mut scene = Scene::new();
    let mut system = system_with(PhysicsConfig::default());
    ball(&mut scene, Vec3::new(0.0, 0.0, 5.0));
    system.set_debug_draw_enabled(true);
    system.set_simulation_enabled(&mut scene, false);
    system.process_fixed(&mut scene, DT);
    assert!(system.debug_draw_buffer().is_empty());

    system.set_simulation_enabled(&mut scene, true);
    system.process_fixed(&mut scene, DT);
    assert!(!system.debug_draw_buffer().lines.is_empty());
}
