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
//! Lifecycle tests for native objects
//!
//! Every native object created on behalf of a component is released exactly
//! once, whatever order components and entities come and go in.

use glam::Vec3;
use physics_integration::components::{BodyComponent, CollisionShapeComponent, ShapeGeometry};
use physics_integration::config::PhysicsConfig;
use physics_integration::ecs::{Entity, PolygonGroup, RenderGeometry, Scene, SceneSystem};
use physics_integration::math::{vec3_approx_eq, Transform};
use physics_integration::system::PhysicsSystem;

const DT: f32 = 1.0 / 60.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn system() -> PhysicsSystem {
    init_logging();
    PhysicsSystem::new(PhysicsConfig::default()).unwrap()
}

fn assert_balanced(system: &PhysicsSystem) {
    let stats = system.world().stats();
    assert_eq!(stats.shapes_created, stats.shapes_released, "shape leak");
    assert_eq!(stats.actors_created, stats.actors_released, "actor leak");
    assert_eq!(stats.controllers_created, stats.controllers_released, "controller leak");
}

fn static_box(scene: &mut Scene) -> Entity {
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::fixed());
    scene.add_component(entity, CollisionShapeComponent::cuboid(Vec3::splat(0.5)));
    entity
}

#[test]
fn test_attach_detach_sequences_release_every_shape() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = scene.create_entity();
    let body = scene.add_component(entity, BodyComponent::fixed()).unwrap();

    for round in 0..5 {
        let a = scene.add_component(entity, CollisionShapeComponent::sphere(0.5)).unwrap();
        let b = scene
            .add_component(entity, CollisionShapeComponent::capsule(0.2, 0.5))
            .unwrap();
        system.process_fixed(&mut scene, DT);
        assert_eq!(system.world().shape_count(), 2, "round {}", round);

        scene.remove_component(a);
        if round % 2 == 0 {
            scene.remove_component(b);
        }
        system.process_fixed(&mut scene, DT);
        if round % 2 == 1 {
            scene.remove_component(b);
            system.process_fixed(&mut scene, DT);
        }
        assert_eq!(system.world().shape_count(), 0, "round {}", round);
    }

    scene.remove_component(body);
    system.process_fixed(&mut scene, DT);
    assert_balanced(&system);
}

#[test]
fn test_component_added_and_removed_in_one_frame_creates_nothing() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = scene.create_entity();
    let id = scene.add_component(entity, CollisionShapeComponent::sphere(1.0)).unwrap();
    scene.remove_component(id);
    system.process_fixed(&mut scene, DT);

    assert_eq!(system.world().stats().shapes_created, 0);
    assert_eq!(system.world().stats().shapes_released, 0);
}

#[test]
fn test_destroyed_entity_releases_everything() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = static_box(&mut scene);
    let child = scene.create_child(entity).unwrap();
    scene.add_component(child, CollisionShapeComponent::sphere(0.25));
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().shape_count(), 2);

    assert!(scene.destroy_entity(entity));
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().actor_count(), 0);
    assert_eq!(system.world().shape_count(), 0);
    assert_balanced(&system);
}

#[test]
fn test_child_shape_follows_child_transform() {
    let mut scene = Scene::new();
    let mut system = system();
    let parent = scene.create_entity();
    let body = scene.add_component(parent, BodyComponent::fixed()).unwrap();
    let child = scene.create_child(parent).unwrap();
    scene.set_local_transform(child, Transform::from_translation(Vec3::new(2.0, 0.0, 0.0)));
    let shape = scene
        .add_component(child, CollisionShapeComponent::cuboid(Vec3::splat(0.5)))
        .unwrap();
    system.process_fixed(&mut scene, DT);

    let handle = scene.get::<CollisionShapeComponent>(shape).unwrap().native_shape().unwrap();
    let actor = scene.get::<BodyComponent>(body).unwrap().native_actor();
    assert_eq!(system.world().shape_actor(handle), actor);
    let pose = system.world().shape_local_pose(handle).unwrap();
    assert!(vec3_approx_eq(pose.position, Vec3::new(2.0, 0.0, 0.0), 1e-5));

    scene.set_local_transform(child, Transform::from_translation(Vec3::new(0.0, 3.0, 0.0)));
    system.process_fixed(&mut scene, DT);
    let pose = system.world().shape_local_pose(handle).unwrap();
    assert!(vec3_approx_eq(pose.position, Vec3::new(0.0, 3.0, 0.0), 1e-5));
}

#[test]
fn test_shape_created_before_body_is_attached_later() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = scene.create_entity();
    let shape = scene
        .add_component(entity, CollisionShapeComponent::sphere(0.5))
        .unwrap();
    system.process_fixed(&mut scene, DT);
    let handle = scene.get::<CollisionShapeComponent>(shape).unwrap().native_shape().unwrap();
    assert!(system.world().shape_actor(handle).is_none());

    let body = scene.add_component(entity, BodyComponent::fixed()).unwrap();
    system.process_fixed(&mut scene, DT);
    let actor = scene.get::<BodyComponent>(body).unwrap().native_actor();
    assert!(actor.is_some());
    assert_eq!(system.world().shape_actor(handle), actor);
}

#[test]
fn test_mesh_shape_waits_for_render_geometry() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::fixed());
    let shape = scene
        .add_component(entity, CollisionShapeComponent::new(ShapeGeometry::Mesh))
        .unwrap();
    system.process_fixed(&mut scene, DT);

    assert!(scene.get::<CollisionShapeComponent>(shape).unwrap().native_shape().is_none());
    assert!(system.creation_failure(shape).is_none());
    assert_eq!(system.shapes_waiting_for_render_data(), 1);

    let render = scene
        .add_component(entity, RenderGeometry::from_group(PolygonGroup::unit_cube()))
        .unwrap();
    system.process_fixed(&mut scene, DT);
    assert!(scene.get::<CollisionShapeComponent>(shape).unwrap().native_shape().is_some());
    assert_eq!(system.shapes_waiting_for_render_data(), 0);

    scene.remove_component(render);
    system.process_fixed(&mut scene, DT);
    assert!(scene.get::<CollisionShapeComponent>(shape).unwrap().native_shape().is_none());
    assert_eq!(system.shapes_waiting_for_render_data(), 1);
    assert_eq!(system.world().shape_count(), 0);
}

#[test]
fn test_geometry_change_rebuilds_native_shape() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = scene.create_entity();
    scene.add_component(entity, BodyComponent::fixed());
    let shape = scene
        .add_component(entity, CollisionShapeComponent::sphere(0.5))
        .unwrap();
    system.process_fixed(&mut scene, DT);
    let first = scene.get::<CollisionShapeComponent>(shape).unwrap().native_shape().unwrap();

    scene
        .get_mut::<CollisionShapeComponent>(shape)
        .unwrap()
        .set_geometry(ShapeGeometry::Box { half_size: Vec3::ONE });
    system.process_fixed(&mut scene, DT);

    let component = scene.get::<CollisionShapeComponent>(shape).unwrap();
    let second = component.native_shape().unwrap();
    assert_ne!(first, second);
    assert!(!component.geometry_changed());
    assert!(!system.world().contains_shape(first));
    assert_eq!(system.world().shape_count(), 1);
}

#[test]
fn test_filter_change_patches_in_place() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = static_box(&mut scene);
    system.process_fixed(&mut scene, DT);
    let id = scene.find::<CollisionShapeComponent>(entity).unwrap();
    let handle = scene.get::<CollisionShapeComponent>(id).unwrap().native_shape().unwrap();

    let shape = scene.get_mut::<CollisionShapeComponent>(id).unwrap();
    for mask in [2, 4, 8] {
        shape.set_type_mask(mask);
    }
    shape.set_trigger_mode(true);
    system.process_fixed(&mut scene, DT);

    assert_eq!(scene.get::<CollisionShapeComponent>(id).unwrap().native_shape(), Some(handle));
    assert_eq!(system.world().shape_filter(handle).unwrap().word1, 8);
    assert!(system.world().is_trigger(handle));
    assert_eq!(system.world().stats().shapes_created, 1);
}

#[test]
fn test_setters_in_one_frame_patch_once() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = static_box(&mut scene);
    system.process_fixed(&mut scene, DT);
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().stats().shape_patches, 0);

    let id = scene.find::<CollisionShapeComponent>(entity).unwrap();
    let shape = scene.get_mut::<CollisionShapeComponent>(id).unwrap();
    shape.set_type_mask(2);
    shape.set_material_name("ice");
    shape.set_trigger_mode(true);
    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().stats().shape_patches, 1);

    let handle = scene.get::<CollisionShapeComponent>(id).unwrap().native_shape().unwrap();
    assert_eq!(system.world().shape_material(handle), Some("ice"));
    assert!(system.world().is_trigger(handle));

    system.process_fixed(&mut scene, DT);
    assert_eq!(system.world().stats().shape_patches, 1);
}

#[test]
fn test_failed_rebuild_drops_shape_from_mass() {
    let mut scene = Scene::new();
    let mut system = system();
    let entity = scene.create_entity();
    scene.set_local_transform(entity, Transform::from_translation(Vec3::new(0.0, 0.0, 50.0)));
    scene.add_component(entity, BodyComponent::dynamic());
    let mut ids = Vec::new();
    for mass in [2.0, 3.0] {
        let mut shape = CollisionShapeComponent::sphere(0.5);
        shape.set_override_mass(true);
        shape.set_mass(mass);
        ids.push(scene.add_component(entity, shape).unwrap());
    }
    system.process_fixed(&mut scene, DT);
    let body = scene.find::<BodyComponent>(entity).unwrap();
    let actor = scene.get::<BodyComponent>(body).unwrap().native_actor().unwrap();
    assert!((system.world().mass(actor).unwrap() - 5.0).abs() < 1e-5);

    scene
        .get_mut::<CollisionShapeComponent>(ids[1])
        .unwrap()
        .set_geometry(ShapeGeometry::Sphere { radius: 0.0 });
    system.process_fixed(&mut scene, DT);

    assert!(scene.get::<CollisionShapeComponent>(ids[1]).unwrap().native_shape().is_none());
    assert!(system.creation_failure(ids[1]).is_some());
    assert_eq!(system.world().actor_shapes(actor).len(), 1);
    assert!((system.world().mass(actor).unwrap() - 2.0).abs() < 1e-5);
}

#[test]
fn test_prepare_for_remove_then_drop() {
    let mut scene = Scene::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default().with_async_fetch()).unwrap();
    system.world_mut().set_step_latency(3);
    static_box(&mut scene);
    let ball = scene.create_entity();
    scene.add_component(ball, BodyComponent::dynamic());
    scene.add_component(ball, CollisionShapeComponent::sphere(0.5));
    system.process_fixed(&mut scene, DT);
    assert!(system.world().is_running());

    system.prepare_for_remove(&mut scene);
    assert!(!system.world().is_running());
    assert_balanced(&system);
    drop(system);

    let id = scene.find::<BodyComponent>(ball).unwrap();
    assert!(scene.get::<BodyComponent>(id).unwrap().native_actor().is_none());
}
