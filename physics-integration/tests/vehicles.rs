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
//! Vehicle tests
//!
//! Rig lifecycle on top of the physics system and the single batched
//! suspension query per frame.

use glam::Vec3;
use physics_integration::components::{BodyComponent, CollisionShapeComponent, ShapeGeometry};
use physics_integration::config::PhysicsConfig;
use physics_integration::ecs::{ComponentId, Entity, PolygonGroup, RenderGeometry, Scene, SceneSystem};
use physics_integration::math::Transform;
use physics_integration::system::PhysicsSystem;
use physics_integration::vehicle::{
    RigKind, VehicleCarComponent, VehicleChassisComponent, VehicleTankComponent, VehicleWheelComponent,
};

const DT: f32 = 1.0 / 60.0;

fn setup() -> (Scene, PhysicsSystem) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut scene = Scene::new();
    let ground = scene.create_entity();
    scene.add_component(ground, BodyComponent::fixed());
    scene.add_component(ground, CollisionShapeComponent::plane(Vec3::Z, 0.0));
    (scene, PhysicsSystem::new(PhysicsConfig::default()).unwrap())
}

/// Chassis, wheels and one convex wheel shape per child entity
fn vehicle_parts(scene: &mut Scene, at: Vec3, wheels: &[Vec3]) -> Entity {
    let root = scene.create_entity();
    scene.set_local_transform(root, Transform::from_translation(at));
    scene.add_component(root, BodyComponent::dynamic());
    scene.add_component(root, VehicleChassisComponent::new(Vec3::ZERO));
    scene.add_component(root, CollisionShapeComponent::cuboid(Vec3::new(1.0, 2.0, 0.5)));
    for &position in wheels {
        scene.add_component(root, VehicleWheelComponent::new(position, 0.4, 0.3));
        let hub = scene.create_child(root).unwrap();
        scene.set_local_transform(hub, Transform::from_translation(position));
        scene.add_component(hub, RenderGeometry::from_group(PolygonGroup::unit_cube()));
        scene.add_component(hub, CollisionShapeComponent::new(ShapeGeometry::ConvexHull));
    }
    root
}

fn four_wheels() -> Vec<Vec3> {
    vec![
        Vec3::new(-1.0, 1.5, -0.5),
        Vec3::new(1.0, 1.5, -0.5),
        Vec3::new(-1.0, -1.5, -0.5),
        Vec3::new(1.0, -1.5, -0.5),
    ]
}

fn car(scene: &mut Scene, at: Vec3) -> (Entity, ComponentId) {
    let root = vehicle_parts(scene, at, &four_wheels());
    let id = scene.add_component(root, VehicleCarComponent::new()).unwrap();
    (root, id)
}

fn run(scene: &mut Scene, system: &mut PhysicsSystem, frames: usize) {
    for _ in 0..frames {
        system.process_fixed(scene, DT);
    }
}

#[test]
fn test_all_wheels_share_one_dispatch() {
    let (mut scene, mut system) = setup();
    let (_, car_id) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    let bike = vehicle_parts(
        &mut scene,
        Vec3::new(10.0, 0.0, 1.0),
        &[Vec3::new(0.0, 1.5, -0.5), Vec3::new(0.0, -1.5, -0.5)],
    );
    scene.add_component(bike, VehicleCarComponent::new());

    run(&mut scene, &mut system, 1);
    assert_eq!(system.vehicles().rig_count(), 2);
    assert_eq!(system.vehicles().stats().stepped_last_frame, 2);
    assert_eq!(system.vehicles().dispatch_count(), 1);
    assert_eq!(system.world().stats().batched_dispatches, 1);
    assert_eq!(system.world().stats().raycast_queries, 6);
    assert!(scene.get::<VehicleCarComponent>(car_id).unwrap().rig().is_some());

    run(&mut scene, &mut system, 4);
    assert_eq!(system.vehicles().dispatch_count(), 5);
    assert_eq!(system.world().stats().raycast_queries, 30);
}

#[test]
fn test_incomplete_vehicle_gets_no_rig() {
    let (mut scene, mut system) = setup();
    let root = vehicle_parts(&mut scene, Vec3::new(0.0, 0.0, 1.0), &four_wheels());
    scene.add_component(root, VehicleWheelComponent::new(Vec3::new(0.0, 2.5, -0.5), 0.4, 0.3));
    scene.add_component(root, VehicleCarComponent::new());

    run(&mut scene, &mut system, 2);
    assert_eq!(system.vehicles().rig_count(), 0);
    assert_eq!(system.vehicles().dispatch_count(), 0);
}

#[test]
fn test_inputs_are_consumed_by_the_step() {
    let (mut scene, mut system) = setup();
    let (_, id) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 1);

    scene.get_mut::<VehicleCarComponent>(id).unwrap().set_analog_acceleration(1.0);
    run(&mut scene, &mut system, 1);
    assert_eq!(scene.get::<VehicleCarComponent>(id).unwrap().analog_acceleration(), 0.0);
}

#[test]
fn test_tank_builds_tank_rig() {
    let (mut scene, mut system) = setup();
    let root = vehicle_parts(&mut scene, Vec3::new(0.0, 0.0, 1.0), &four_wheels());
    let id = scene.add_component(root, VehicleTankComponent::new()).unwrap();
    run(&mut scene, &mut system, 1);

    let handle = scene.get::<VehicleTankComponent>(id).unwrap().rig().unwrap();
    let rig = system.vehicles().rig(handle).unwrap();
    assert_eq!(rig.kind(), RigKind::Tank);
    assert_eq!(rig.wheels().len(), 4);
    assert_eq!(rig.entity(), root);
}

#[test]
fn test_removing_car_releases_rig() {
    let (mut scene, mut system) = setup();
    let (_, id) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 1);
    assert_eq!(system.vehicles().rig_count(), 1);

    scene.remove_component(id);
    run(&mut scene, &mut system, 1);
    assert_eq!(system.vehicles().rig_count(), 0);
    assert_eq!(system.vehicles().stats().rigs_released, 1);
    assert_eq!(system.vehicles().dispatch_count(), 1);
}

#[test]
fn test_removing_body_releases_rig() {
    let (mut scene, mut system) = setup();
    let (root, id) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 1);

    let body = scene.find::<BodyComponent>(root).unwrap();
    scene.remove_component(body);
    run(&mut scene, &mut system, 2);
    assert_eq!(system.vehicles().rig_count(), 0);
    assert!(scene.get::<VehicleCarComponent>(id).unwrap().rig().is_none());
}

#[test]
fn test_destroying_vehicle_releases_everything() {
    let (mut scene, mut system) = setup();
    let (root, _) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 1);
    assert_eq!(system.world().shape_count(), 6);

    scene.destroy_entity(root);
    run(&mut scene, &mut system, 1);
    assert_eq!(system.vehicles().rig_count(), 0);
    assert_eq!(system.world().actor_count(), 1);
    assert_eq!(system.world().shape_count(), 1);
}

#[test]
fn test_pause_saves_drive_state() {
    let (mut scene, mut system) = setup();
    let (_, id) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 3);
    assert!(scene.get::<VehicleCarComponent>(id).unwrap().saved_state().is_none());

    system.set_simulation_enabled(&mut scene, false);
    assert!(scene.get::<VehicleCarComponent>(id).unwrap().saved_state().is_some());
    run(&mut scene, &mut system, 3);
    assert_eq!(system.vehicles().dispatch_count(), 3);

    system.set_simulation_enabled(&mut scene, true);
    run(&mut scene, &mut system, 1);
    assert_eq!(system.vehicles().rig_count(), 1);
    assert_eq!(system.vehicles().dispatch_count(), 4);
}

#[test]
fn test_changed_drivetrain_rebuilds_rig() {
    let (mut scene, mut system) = setup();
    let (_, id) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 2);
    assert_eq!(system.vehicles().stats().rigs_built, 1);

    scene.get_mut::<VehicleCarComponent>(id).unwrap().set_engine_peak_torque(800.0);
    run(&mut scene, &mut system, 1);
    let stats = system.vehicles().stats();
    assert_eq!(stats.rigs_built, 2);
    assert_eq!(stats.rigs_released, 1);
    assert_eq!(system.vehicles().rig_count(), 1);
}

#[test]
fn test_kinematic_vehicle_is_not_stepped() {
    let (mut scene, mut system) = setup();
    let (root, _) = car(&mut scene, Vec3::new(0.0, 0.0, 1.0));
    run(&mut scene, &mut system, 1);

    let body = scene.find::<BodyComponent>(root).unwrap();
    scene.get_mut::<BodyComponent>(body).unwrap().set_kinematic(true);
    run(&mut scene, &mut system, 1);
    let dispatched = system.vehicles().dispatch_count();

    run(&mut scene, &mut system, 2);
    assert_eq!(system.vehicles().stats().stepped_last_frame, 0);
    assert_eq!(system.vehicles().dispatch_count(), dispatched);
    assert_eq!(system.vehicles().rig_count(), 1);
}

#[test]
fn test_chassis_mass_drives_rig() {
    let (mut scene, mut system) = setup();
    let root = vehicle_parts(&mut scene, Vec3::new(0.0, 0.0, 1.0), &four_wheels());
    let chassis = scene.find::<VehicleChassisComponent>(root).unwrap();
    scene
        .get_mut::<VehicleChassisComponent>(chassis)
        .unwrap()
        .set_mass_override(Some(1200.0));
    let id = scene.add_component(root, VehicleCarComponent::new()).unwrap();
    run(&mut scene, &mut system, 1);

    let handle = scene.get::<VehicleCarComponent>(id).unwrap().rig().unwrap();
    let rig = system.vehicles().rig(handle).unwrap();
    assert_eq!(rig.chassis_mass(), 1200.0);
    let body = scene.find::<BodyComponent>(root).unwrap();
    let actor = scene.get::<BodyComponent>(body).unwrap().native_actor().unwrap();
    assert_eq!(system.world().mass(actor), Some(1200.0));
}
