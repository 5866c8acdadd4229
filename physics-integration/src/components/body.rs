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
//! Rigid bodies
//!
//! A body gathers the collision shapes on its entity and on descendant
//! entities into one native actor.

use crate::archive::KeyedArchive;
use crate::components::binding::{NativeSlot, PhysicsBinding, UpdateLink};
use crate::components::shape::CollisionShapeComponent;
use crate::ecs::{Component, ComponentId, Entity, Scene};
use crate::error::{PhysicsError, Result};
use crate::native::{Actor, ActorHandle};
use glam::Vec3;

/// Body type of a [`BodyComponent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    /// Never moves
    Static,
    /// Moved by the solver, or by its entity when kinematic
    Dynamic,
}

/// Rigid body attached to a root entity
#[derive(Debug)]
pub struct BodyComponent {
    body_type: BodyType,
    kinematic: bool,
    linear_damping: f32,
    angular_damping: f32,
    ccd: bool,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    active: bool,
    slot: NativeSlot<Actor>,
    link: Option<UpdateLink>,
}

impl Component for BodyComponent {}

impl PhysicsBinding for BodyComponent {
    fn update_link(&self) -> Option<&UpdateLink> {
        self.link.as_ref()
    }

    fn set_update_link(&mut self, link: Option<UpdateLink>) {
        self.link = link;
    }
}

impl BodyComponent {
    fn with_type(body_type: BodyType) -> Self {
        BodyComponent {
            body_type,
            kinematic: false,
            linear_damping: 0.0,
            angular_damping: 0.05,
            ccd: false,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            active: false,
            slot: NativeSlot::new(),
            link: None,
        }
    }

    /// Static body
    pub fn fixed() -> Self {
        BodyComponent::with_type(BodyType::Static)
    }

    /// Dynamic body
    pub fn dynamic() -> Self {
        BodyComponent::with_type(BodyType::Dynamic)
    }

    /// Kinematic dynamic body
    pub fn kinematic() -> Self {
        let mut body = BodyComponent::dynamic();
        body.kinematic = true;
        body
    }

    /// Body type
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// Whether the solver owns this body's pose
    pub fn is_simulated(&self) -> bool {
        self.body_type == BodyType::Dynamic && !self.kinematic
    }

    /// Installed native actor
    pub fn native_actor(&self) -> Option<ActorHandle> {
        self.slot.get()
    }

    /// Whether the body follows its entity
    pub fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    /// Switch kinematic mode; dynamic bodies only
    pub fn set_kinematic(&mut self, kinematic: bool) {
        debug_assert!(
            self.body_type == BodyType::Dynamic || !kinematic,
            "static bodies cannot be kinematic"
        );
        if self.body_type == BodyType::Dynamic {
            self.kinematic = kinematic;
            self.schedule_update();
        }
    }

    /// Linear damping
    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    /// Set linear damping
    pub fn set_linear_damping(&mut self, damping: f32) {
        self.linear_damping = damping;
        self.schedule_update();
    }

    /// Angular damping
    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    /// Set angular damping
    pub fn set_angular_damping(&mut self, damping: f32) {
        self.angular_damping = damping;
        self.schedule_update();
    }

    /// Whether CCD is enabled for every shape of the body
    pub fn is_ccd_enabled(&self) -> bool {
        self.ccd
    }

    /// Enable continuous collision detection
    pub fn set_ccd_enabled(&mut self, enabled: bool) {
        self.ccd = enabled;
        self.schedule_update();
    }

    /// Linear velocity after the last fetched step
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    /// Angular velocity after the last fetched step
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Whether the native body was awake after the last fetched step
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_motion_state(&mut self, linear_velocity: Vec3, angular_velocity: Vec3, active: bool) {
        self.linear_velocity = linear_velocity;
        self.angular_velocity = angular_velocity;
        self.active = active;
    }

    pub(crate) fn install_actor(&mut self, actor: ActorHandle) -> Result<()> {
        self.slot.install(actor, "actor")
    }

    pub(crate) fn take_actor(&mut self) -> Option<ActorHandle> {
        self.set_motion_state(Vec3::ZERO, Vec3::ZERO, false);
        self.slot.take()
    }

    /// Write persisted fields into `archive`
    pub fn serialize(&self, archive: &mut KeyedArchive) {
        let kind = match self.body_type {
            BodyType::Static => "static",
            BodyType::Dynamic => "dynamic",
        };
        archive.set_string("body.type", kind.to_string());
        archive.set_bool("body.kinematic", self.kinematic);
        archive.set_f32("body.linearDamping", self.linear_damping);
        archive.set_f32("body.angularDamping", self.angular_damping);
        archive.set_bool("body.ccd", self.ccd);
    }

    /// Rebuild a body from `archive`
    pub fn deserialize(archive: &KeyedArchive) -> Result<Self> {
        let mut body = match archive.try_string("body.type")?.as_deref() {
            Some("static") => BodyComponent::fixed(),
            Some("dynamic") | None => BodyComponent::dynamic(),
            Some(other) => {
                return Err(PhysicsError::Archive {
                    key: "body.type".to_string(),
                    reason: format!("unknown body type `{}`", other),
                })
            }
        };
        if body.body_type == BodyType::Dynamic {
            body.kinematic = archive.try_bool("body.kinematic")?.unwrap_or(false);
        }
        body.linear_damping = archive.try_f32("body.linearDamping")?.unwrap_or(body.linear_damping);
        body.angular_damping = archive.try_f32("body.angularDamping")?.unwrap_or(body.angular_damping);
        body.ccd = archive.try_bool("body.ccd")?.unwrap_or(false);
        Ok(body)
    }
}

/// Shape components that belong to the body on `entity`
///
/// These are the shapes on `entity` itself followed by those on descendants,
/// depth first. A descendant that carries its own body owns its subtree.
pub fn body_shapes(scene: &Scene, entity: Entity) -> Vec<ComponentId> {
    let mut shapes = scene.find_all::<CollisionShapeComponent>(entity);
    let mut stack: Vec<Entity> = scene.children(entity).iter().rev().copied().collect();
    while let Some(child) = stack.pop() {
        if scene.has::<BodyComponent>(child) {
            continue;
        }
        shapes.extend(scene.find_all::<CollisionShapeComponent>(child));
        stack.extend(scene.children(child).iter().rev().copied());
    }
    shapes
}
