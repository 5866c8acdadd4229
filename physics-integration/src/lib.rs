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
//! # Physics Integration
//!
//! Scene integration layer for a rigid-body simulation. Components attached
//! to scene entities describe bodies, collision shapes, character
//! controllers and vehicles; [`PhysicsSystem`] turns them into native
//! simulation objects and keeps both sides in sync every fixed frame.
//!
//! ## Features
//!
//! - **Deferred native mutation**: nothing is created, released or rebuilt
//!   while a step is in flight
//! - **Idempotent updates**: setters schedule a component at most once per frame
//! - **Character controllers**: teleport, walking and flying moves
//! - **Vehicles**: cars and tanks stepped with one batched wheel raycast
//! - **Parallelization**: optional Rayon integration for the batched queries
//!   and body integration
//!
//! ## Example
//!
//! ```rust
//! use physics_integration::components::{BodyComponent, CollisionShapeComponent};
//! use physics_integration::config::PhysicsConfig;
//! use physics_integration::ecs::{Scene, SceneSystem};
//! use physics_integration::math::Transform;
//! use physics_integration::system::PhysicsSystem;
//! use glam::Vec3;
//!
//! let mut scene = Scene::new();
//! let mut physics = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
//!
//! let ball = scene.create_entity();
//! scene.set_local_transform(ball, Transform::from_translation(Vec3::new(0.0, 0.0, 10.0)));
//! scene.add_component(ball, BodyComponent::dynamic());
//! scene.add_component(ball, CollisionShapeComponent::sphere(0.5));
//!
//! for _ in 0..60 {
//!     physics.process_fixed(&mut scene, 1.0 / 60.0);
//! }
//! assert!(scene.world_transform(ball).unwrap().translation.z < 10.0);
//! ```

#![warn(missing_docs)]

/// String-keyed archive used for persistence and engine options
pub mod archive;

/// Physics components attached to scene entities
pub mod components;

/// System configuration
pub mod config;

/// Scene framework: entities, transforms, component storage and events
pub mod ecs;

/// Error type
pub mod error;

/// Pose and transform value types
pub mod math;

/// Native simulation world and its handles
pub mod native;

/// The physics system
pub mod system;

/// Vehicle components, rigs and the vehicle subsystem
pub mod vehicle;

pub use config::PhysicsConfig;
pub use ecs::{Entity, Scene, SceneSystem};
pub use error::{PhysicsError, Result};
pub use system::PhysicsSystem;
pub use vehicle::PhysicsVehiclesSubsystem;
