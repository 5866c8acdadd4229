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
//! Character controller tests
//!
//! Teleport precedence, walking and flying moves, grounding and the
//! persisted fields of the component.

use glam::Vec3;
use physics_integration::archive::KeyedArchive;
use physics_integration::components::{
    BodyComponent, CharacterControllerComponent, CollisionShapeComponent, ControllerShape, MovementMode,
};
use physics_integration::config::PhysicsConfig;
use physics_integration::ecs::{ComponentId, Entity, Scene, SceneSystem};
use physics_integration::math::Transform;
use physics_integration::system::PhysicsSystem;

const DT: f32 = 1.0 / 60.0;

fn setup() -> (Scene, PhysicsSystem) {
    let _ = env_logger::builder().is_test(true).try_init();
    (Scene::new(), PhysicsSystem::new(PhysicsConfig::default()).unwrap())
}

fn ground(scene: &mut Scene) {
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::fixed());
    scene.add_component(entity, CollisionShapeComponent::plane(Vec3::Z, 0.0));
}

fn walker(scene: &mut Scene, at: Vec3, mode: MovementMode) -> (Entity, ComponentId) {
    let entity = scene.create_entity();
    scene.set_local_transform(entity, Transform::from_translation(at));
    let mut controller = CharacterControllerComponent::capsule(0.3, 1.0);
    controller.set_movement_mode(mode);
    let id = scene.add_component(entity, controller).unwrap();
    (entity, id)
}

fn position(scene: &Scene, entity: Entity) -> Vec3 {
    scene.world_transform(entity).unwrap().translation
}

fn run(system: &mut PhysicsSystem, scene: &mut Scene, frames: usize) {
    for _ in 0..frames {
        system.process_fixed(scene, DT);
    }
}

#[test]
fn test_free_fall_descends_every_frame() {
    let (mut scene, mut system) = setup();
    let (entity, _) = walker(&mut scene, Vec3::new(0.0, 0.0, 20.0), MovementMode::Walking);
    system.process_fixed(&mut scene, DT);

    let mut previous = position(&scene, entity).z;
    for _ in 0..5 {
        system.process_fixed(&mut scene, DT);
        let z = position(&scene, entity).z;
        assert!(z < previous, "{} should be below {}", z, previous);
        previous = z;
    }
}

#[test]
fn test_walker_lands_on_ground() {
    let (mut scene, mut system) = setup();
    ground(&mut scene);
    let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 0.5), MovementMode::Walking);
    run(&mut system, &mut scene, 60);

    assert!(scene.get::<CharacterControllerComponent>(id).unwrap().is_grounded());
    let z = position(&scene, entity).z;
    assert!(z > -0.2 && z < 0.5, "foot at {}", z);
}

#[test]
fn test_walking_drops_the_vertical_part_of_the_input() {
    let (mut scene, mut system) = setup();
    ground(&mut scene);
    let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 0.5), MovementMode::Walking);
    run(&mut system, &mut scene, 60);
    let before = position(&scene, entity).z;

    scene
        .get_mut::<CharacterControllerComponent>(id)
        .unwrap()
        .set_offset(Vec3::new(0.0, 0.0, 5.0));
    system.process_fixed(&mut scene, DT);
    assert!(position(&scene, entity).z <= before + 1e-4);
}

#[test]
fn test_flying_without_input_holds_position() {
    let (mut scene, mut system) = setup();
    let start = Vec3::new(1.0, 2.0, 10.0);
    let (entity, id) = walker(&mut scene, start, MovementMode::Flying);
    run(&mut system, &mut scene, 10);

    assert_eq!(position(&scene, entity), start);
    assert!(!scene.get::<CharacterControllerComponent>(id).unwrap().is_grounded());
}

#[test]
fn test_flying_velocity_integrates_over_dt() {
    let (mut scene, mut system) = setup();
    let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), MovementMode::Flying);
    system.process_fixed(&mut scene, DT);

    scene
        .get_mut::<CharacterControllerComponent>(id)
        .unwrap()
        .set_velocity(Vec3::new(60.0, 0.0, 0.0));
    system.process_fixed(&mut scene, DT);
    assert!((position(&scene, entity).x - 1.0).abs() < 1e-4);

    // velocity is consumed by the move
    system.process_fixed(&mut scene, DT);
    assert!((position(&scene, entity).x - 1.0).abs() < 1e-4);
}

#[test]
fn test_teleport_wins_in_any_request_order() {
    let targets = [
        Vec3::new(3.0, 0.0, 1.0),
        Vec3::new(-2.0, 4.0, 0.5),
        Vec3::new(0.0, -6.0, 2.0),
    ];
    for (case, target) in targets.iter().copied().enumerate() {
        let (mut scene, mut system) = setup();
        ground(&mut scene);
        let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 0.5), MovementMode::Walking);
        run(&mut system, &mut scene, 30);
        let grounded = scene.get::<CharacterControllerComponent>(id).unwrap().is_grounded();

        let controller = scene.get_mut::<CharacterControllerComponent>(id).unwrap();
        match case {
            0 => {
                controller.teleport(target);
                controller.set_offset(Vec3::X);
            }
            1 => {
                controller.set_velocity(Vec3::new(0.0, 10.0, 0.0));
                controller.teleport(target);
            }
            _ => {
                controller.set_offset(Vec3::Y);
                controller.teleport(target);
                controller.set_velocity(Vec3::new(-5.0, 0.0, 0.0));
            }
        }
        system.process_fixed(&mut scene, DT);

        assert_eq!(position(&scene, entity), target, "case {}", case);
        let controller = scene.get::<CharacterControllerComponent>(id).unwrap();
        assert_eq!(controller.is_grounded(), grounded, "case {}", case);
        let handle = controller.native_controller().unwrap();
        assert_eq!(system.world().controller_foot_position(handle), Some(target));
    }
}

#[test]
fn test_offset_applies_from_teleport_target_next_tick() {
    let (mut scene, mut system) = setup();
    let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), MovementMode::Flying);
    system.process_fixed(&mut scene, DT);

    let target = Vec3::new(5.0, 0.0, 10.0);
    let controller = scene.get_mut::<CharacterControllerComponent>(id).unwrap();
    controller.set_offset(Vec3::new(1.0, 0.0, 0.0));
    controller.teleport(target);
    system.process_fixed(&mut scene, DT);
    assert_eq!(position(&scene, entity), target);

    system.process_fixed(&mut scene, DT);
    assert!((position(&scene, entity).x - 6.0).abs() < 1e-4);
}

#[test]
fn test_external_transform_write_teleports() {
    let (mut scene, mut system) = setup();
    let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), MovementMode::Flying);
    system.process_fixed(&mut scene, DT);

    let target = Vec3::new(5.0, 0.0, 2.0);
    scene.set_world_transform(entity, Transform::from_translation(target));
    system.process_fixed(&mut scene, DT);

    let controller = scene.get::<CharacterControllerComponent>(id).unwrap();
    let handle = controller.native_controller().unwrap();
    assert_eq!(system.world().controller_foot_position(handle), Some(target));
    assert_eq!(position(&scene, entity), target);
}

#[test]
fn test_external_transform_write_keeps_queued_moves_for_next_tick() {
    for mode in [MovementMode::Walking, MovementMode::Flying] {
        let (mut scene, mut system) = setup();
        let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), mode);
        system.process_fixed(&mut scene, DT);

        let target = Vec3::new(5.0, 0.0, 2.0);
        scene.set_world_transform(entity, Transform::from_translation(target));
        scene
            .get_mut::<CharacterControllerComponent>(id)
            .unwrap()
            .set_offset(Vec3::new(1.0, 0.0, 0.0));
        system.process_fixed(&mut scene, DT);

        assert_eq!(position(&scene, entity), target, "{:?}", mode);
        let controller = scene.get::<CharacterControllerComponent>(id).unwrap();
        assert_eq!(controller.offset(), Vec3::new(1.0, 0.0, 0.0), "{:?}", mode);
        let handle = controller.native_controller().unwrap();
        assert_eq!(system.world().controller_foot_position(handle), Some(target));

        system.process_fixed(&mut scene, DT);
        let moved = position(&scene, entity);
        assert!((moved.x - 6.0).abs() < 1e-3, "{:?} at {:?}", mode, moved);
        match mode {
            MovementMode::Walking => assert!(moved.z < target.z),
            MovementMode::Flying => assert_eq!(moved.z, target.z),
        }
        assert_eq!(scene.get::<CharacterControllerComponent>(id).unwrap().offset(), Vec3::ZERO);
    }
}

#[test]
fn test_external_transform_write_keeps_queued_velocity() {
    for mode in [MovementMode::Walking, MovementMode::Flying] {
        let (mut scene, mut system) = setup();
        let (entity, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), mode);
        system.process_fixed(&mut scene, DT);

        let target = Vec3::new(-3.0, 1.0, 4.0);
        scene
            .get_mut::<CharacterControllerComponent>(id)
            .unwrap()
            .set_velocity(Vec3::new(0.0, 60.0, 0.0));
        scene.set_world_transform(entity, Transform::from_translation(target));
        system.process_fixed(&mut scene, DT);

        assert_eq!(position(&scene, entity), target, "{:?}", mode);
        let controller = scene.get::<CharacterControllerComponent>(id).unwrap();
        assert_eq!(controller.velocity(), Vec3::new(0.0, 60.0, 0.0));

        system.process_fixed(&mut scene, DT);
        let moved = position(&scene, entity);
        assert!((moved.y - 2.0).abs() < 1e-3, "{:?} at {:?}", mode, moved);
        assert!((moved.x + 3.0).abs() < 1e-4, "{:?} at {:?}", mode, moved);
    }
}

#[test]
fn test_up_change_reaches_live_controller() {
    let (mut scene, mut system) = setup();
    let (_, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), MovementMode::Flying);
    system.process_fixed(&mut scene, DT);

    scene
        .get_mut::<CharacterControllerComponent>(id)
        .unwrap()
        .set_up(Vec3::new(0.0, 3.0, 0.0));
    system.process_fixed(&mut scene, DT);

    let handle = scene
        .get::<CharacterControllerComponent>(id)
        .unwrap()
        .native_controller()
        .unwrap();
    assert_eq!(system.world().controller_up(handle), Some(Vec3::Y));
}

#[test]
fn test_teleport_filter_is_restored_after_step() {
    let (mut scene, mut system) = setup();
    let (_, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), MovementMode::Flying);
    system.process_fixed(&mut scene, DT);
    scene
        .get_mut::<CharacterControllerComponent>(id)
        .unwrap()
        .teleport(Vec3::new(0.0, 0.0, 3.0));
    run(&mut system, &mut scene, 3);

    let controller = scene.get::<CharacterControllerComponent>(id).unwrap();
    let shape = system
        .world()
        .controller_shape(controller.native_controller().unwrap())
        .unwrap();
    assert_eq!(system.world().shape_filter(shape), Some(controller.filter_data()));
}

#[test]
fn test_resize_and_contact_offset_reach_the_controller() {
    let (mut scene, mut system) = setup();
    let (_, id) = walker(&mut scene, Vec3::new(0.0, 0.0, 10.0), MovementMode::Flying);
    system.process_fixed(&mut scene, DT);

    let controller = scene.get_mut::<CharacterControllerComponent>(id).unwrap();
    controller.set_shape(ControllerShape::Capsule {
        radius: 0.6,
        height: 2.0,
    });
    controller.set_contact_offset(0.2);
    system.process_fixed(&mut scene, DT);

    let controller = scene.get::<CharacterControllerComponent>(id).unwrap();
    let handle = controller.native_controller().unwrap();
    assert!(!controller.geometry_changed());
    assert_eq!(system.world().controller_geometry(handle), Some(controller.native_geometry()));
    assert_eq!(system.world().controller_contact_offset(handle), Some(0.2));
}

#[test]
fn test_capsule_controller_setup() {
    let (mut scene, mut system) = setup();
    let (_, id) = walker(&mut scene, Vec3::ZERO, MovementMode::Walking);
    let entity = scene.create_entity();
    let boxed = scene
        .add_component(entity, CharacterControllerComponent::cuboid(1.0, 0.5, 0.5))
        .unwrap();
    system.process_fixed(&mut scene, DT);

    let world = system.world();
    let capsule = scene.get::<CharacterControllerComponent>(id).unwrap().native_controller().unwrap();
    let cuboid = scene
        .get::<CharacterControllerComponent>(boxed)
        .unwrap()
        .native_controller()
        .unwrap();
    assert_eq!(world.controller_step_offset(capsule), Some(0.02));
    assert_eq!(world.controller_constrained_climbing(capsule), Some(true));
    assert_eq!(world.controller_constrained_climbing(cuboid), Some(false));
}

#[test]
fn test_persisted_fields_survive_json() {
    let mut controller = CharacterControllerComponent::capsule(0.4, 1.8);
    controller.set_up(Vec3::new(0.0, 1.0, 0.0));
    controller.set_movement_mode(MovementMode::Flying);
    controller.set_type_mask(4);

    let mut archive = KeyedArchive::new();
    controller.serialize(&mut archive);
    let json = archive.to_json().unwrap();
    let restored = CharacterControllerComponent::deserialize(&KeyedArchive::from_json(&json).unwrap()).unwrap();

    assert_eq!(restored.up(), controller.up());
    assert_eq!(restored.movement_mode(), MovementMode::Flying);
    assert_eq!(restored.type_mask(), 4);
    assert_eq!(restored.shape(), controller.shape());
}
