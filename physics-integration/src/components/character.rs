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
//! Character controllers
//!
//! A controller moves a kinematic volume by sweeping it through the world
//! instead of handing it to the solver. Requests made through this component
//! are consumed by the physics system once per fixed step:
//!
//! - a pending teleport places the foot directly and wins over any offset or
//!   velocity queued in the same step;
//! - otherwise the queued offset plus `velocity * dt` is swept, walking
//!   controllers dropping the vertical part and adding gravity;
//! - requests made before the native controller exists are dropped.

use crate::archive::KeyedArchive;
use crate::components::binding::{NativeSlot, PhysicsBinding, UpdateLink};
use crate::components::shape::{DEFAULT_COLLIDE_WITH_MASK, DEFAULT_TYPE_MASK};
use crate::ecs::Component;
use crate::error::{PhysicsError, Result};
use crate::native::{ActorHandle, Controller, ControllerGeometry, ControllerHandle, FilterData};
use glam::Vec3;
use log::trace;

/// How a controller reacts to requested displacement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MovementMode {
    /// Gravity applies; vertical input is ignored
    #[default]
    Walking,
    /// Free movement without gravity
    Flying,
}

impl MovementMode {
    fn to_raw(self) -> u32 {
        match self {
            MovementMode::Walking => 0,
            MovementMode::Flying => 1,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(MovementMode::Walking),
            1 => Some(MovementMode::Flying),
            _ => None,
        }
    }
}

/// Controller volume before scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerShape {
    /// Upright capsule
    Capsule {
        /// Cap radius
        radius: f32,
        /// Cylinder length
        height: f32,
    },
    /// Upright box
    Box {
        /// Half extent along up
        half_height: f32,
        /// Half extent along forward
        half_forward_extent: f32,
        /// Half extent along side
        half_side_extent: f32,
    },
}

/// Per-step controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No native controller yet
    Uninitialized,
    /// Nothing requested
    Idle,
    /// An offset, velocity or teleport is waiting for the next step
    Moving,
}

/// Kinematic character controller on a root entity
#[derive(Debug)]
pub struct CharacterControllerComponent {
    shape: ControllerShape,
    contact_offset: f32,
    scale_coefficient: f32,
    movement_mode: MovementMode,
    up: Vec3,
    type_mask: u32,
    collide_with_mask: u32,
    offset: Vec3,
    velocity: Vec3,
    teleport: Option<Vec3>,
    grounded: bool,
    geometry_changed: bool,
    slot: NativeSlot<Controller>,
    actor: Option<ActorHandle>,
    link: Option<UpdateLink>,
}

impl Component for CharacterControllerComponent {}

impl PhysicsBinding for CharacterControllerComponent {
    fn update_link(&self) -> Option<&UpdateLink> {
        self.link.as_ref()
    }

    fn set_update_link(&mut self, link: Option<UpdateLink>) {
        self.link = link;
    }
}

impl CharacterControllerComponent {
    /// Controller with the given volume
    pub fn new(shape: ControllerShape) -> Self {
        CharacterControllerComponent {
            shape,
            contact_offset: 0.1,
            scale_coefficient: 1.0,
            movement_mode: MovementMode::Walking,
            up: Vec3::Z,
            type_mask: DEFAULT_TYPE_MASK,
            collide_with_mask: DEFAULT_COLLIDE_WITH_MASK,
            offset: Vec3::ZERO,
            velocity: Vec3::ZERO,
            teleport: None,
            grounded: false,
            geometry_changed: true,
            slot: NativeSlot::new(),
            actor: None,
            link: None,
        }
    }

    /// Capsule controller
    pub fn capsule(radius: f32, height: f32) -> Self {
        CharacterControllerComponent::new(ControllerShape::Capsule { radius, height })
    }

    /// Box controller
    pub fn cuboid(half_height: f32, half_forward_extent: f32, half_side_extent: f32) -> Self {
        CharacterControllerComponent::new(ControllerShape::Box {
            half_height,
            half_forward_extent,
            half_side_extent,
        })
    }

    /// Current request state
    pub fn state(&self) -> ControllerState {
        if !self.slot.is_installed() {
            ControllerState::Uninitialized
        } else if self.teleport.is_some() || self.offset != Vec3::ZERO || self.velocity != Vec3::ZERO {
            ControllerState::Moving
        } else {
            ControllerState::Idle
        }
    }

    /// Installed native controller
    pub fn native_controller(&self) -> Option<ControllerHandle> {
        self.slot.get()
    }

    /// Kinematic actor backing the native controller
    pub fn native_actor(&self) -> Option<ActorHandle> {
        self.actor
    }

    /// Volume before scaling
    pub fn shape(&self) -> ControllerShape {
        self.shape
    }

    /// Replace the volume
    pub fn set_shape(&mut self, shape: ControllerShape) {
        self.shape = shape;
        self.geometry_changed = true;
        self.schedule_update();
    }

    /// Whether the native volume must be resized
    pub fn geometry_changed(&self) -> bool {
        self.geometry_changed
    }

    /// Skin width
    pub fn contact_offset(&self) -> f32 {
        self.contact_offset
    }

    /// Set the skin width
    pub fn set_contact_offset(&mut self, offset: f32) {
        self.contact_offset = offset;
        self.schedule_update();
    }

    /// Scale applied to the volume
    pub fn scale_coefficient(&self) -> f32 {
        self.scale_coefficient
    }

    /// Set the scale applied to the volume
    pub fn set_scale_coefficient(&mut self, scale: f32) {
        self.scale_coefficient = scale;
        self.geometry_changed = true;
        self.schedule_update();
    }

    /// Movement mode
    pub fn movement_mode(&self) -> MovementMode {
        self.movement_mode
    }

    /// Set the movement mode
    pub fn set_movement_mode(&mut self, mode: MovementMode) {
        self.movement_mode = mode;
    }

    /// Up axis
    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Set the up axis; a live controller picks it up with the next update
    pub fn set_up(&mut self, up: Vec3) {
        self.up = up;
        self.schedule_update();
    }

    /// Type mask
    pub fn type_mask(&self) -> u32 {
        self.type_mask
    }

    /// Set the type mask
    pub fn set_type_mask(&mut self, mask: u32) {
        self.type_mask = mask;
        self.schedule_update();
    }

    /// Collide-with mask
    pub fn type_mask_to_collide_with(&self) -> u32 {
        self.collide_with_mask
    }

    /// Set the collide-with mask
    pub fn set_type_mask_to_collide_with(&mut self, mask: u32) {
        self.collide_with_mask = mask;
        self.schedule_update();
    }

    /// Queue a displacement for the next step, replacing any earlier one
    pub fn set_offset(&mut self, offset: Vec3) {
        if self.slot.is_installed() {
            self.offset = offset;
        } else {
            trace!("offset request dropped: controller not created");
        }
    }

    /// Queued displacement
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// Queue a velocity for the next step, replacing any earlier one
    pub fn set_velocity(&mut self, velocity: Vec3) {
        if self.slot.is_installed() {
            self.velocity = velocity;
        } else {
            trace!("velocity request dropped: controller not created");
        }
    }

    /// Queued velocity
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Place the foot at `position` on the next step without sweeping
    pub fn teleport(&mut self, position: Vec3) {
        if self.slot.is_installed() {
            self.teleport = Some(position);
        } else {
            trace!("teleport request dropped: controller not created");
        }
    }

    /// Teleport target waiting for the next step
    pub fn pending_teleport(&self) -> Option<Vec3> {
        self.teleport
    }

    /// Whether the last move touched ground
    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Native volume after scaling
    pub fn native_geometry(&self) -> ControllerGeometry {
        let s = self.scale_coefficient;
        match self.shape {
            ControllerShape::Capsule { radius, height } => ControllerGeometry::Capsule {
                radius: radius * s,
                height: height * s,
            },
            ControllerShape::Box {
                half_height,
                half_forward_extent,
                half_side_extent,
            } => ControllerGeometry::Box {
                half_height: half_height * s,
                half_forward_extent: half_forward_extent * s,
                half_side_extent: half_side_extent * s,
            },
        }
    }

    /// Native filter words for the current masks
    pub fn filter_data(&self) -> FilterData {
        FilterData::new(self.type_mask, self.collide_with_mask)
    }

    pub(crate) fn install_controller(&mut self, controller: ControllerHandle, actor: ActorHandle) -> Result<()> {
        self.slot.install(controller, "controller")?;
        self.actor = Some(actor);
        Ok(())
    }

    pub(crate) fn take_controller(&mut self) -> Option<ControllerHandle> {
        self.actor = None;
        self.offset = Vec3::ZERO;
        self.velocity = Vec3::ZERO;
        self.teleport = None;
        self.slot.take()
    }

    pub(crate) fn take_teleport(&mut self) -> Option<Vec3> {
        self.teleport.take()
    }

    pub(crate) fn take_move_request(&mut self) -> (Vec3, Vec3) {
        (
            std::mem::replace(&mut self.offset, Vec3::ZERO),
            std::mem::replace(&mut self.velocity, Vec3::ZERO),
        )
    }

    pub(crate) fn set_grounded(&mut self, grounded: bool) {
        self.grounded = grounded;
    }

    pub(crate) fn clear_geometry_changed(&mut self) {
        self.geometry_changed = false;
    }

    /// Write persisted fields into `archive`
    pub fn serialize(&self, archive: &mut KeyedArchive) {
        match self.shape {
            ControllerShape::Capsule { radius, height } => {
                archive.set_string("characterController.shape", "capsule".to_string());
                archive.set_f32("characterController.radius", radius);
                archive.set_f32("characterController.height", height);
            }
            ControllerShape::Box {
                half_height,
                half_forward_extent,
                half_side_extent,
            } => {
                archive.set_string("characterController.shape", "box".to_string());
                archive.set_f32("characterController.halfHeight", half_height);
                archive.set_f32("characterController.halfForwardExtent", half_forward_extent);
                archive.set_f32("characterController.halfSideExtent", half_side_extent);
            }
        }
        archive.set_f32("characterController.contactOffset", self.contact_offset);
        archive.set_f32("characterController.scaleCoefficient", self.scale_coefficient);
        archive.set_u32("characterController.movementMode", self.movement_mode.to_raw());
        archive.set_vector3("characterController.up", self.up);
        archive.set_u32("characterController.typeMask", self.type_mask);
        archive.set_u32("characterController.typeMaskToCollideWith", self.collide_with_mask);
    }

    /// Rebuild a controller from `archive`
    pub fn deserialize(archive: &KeyedArchive) -> Result<Self> {
        let shape = match archive.try_string("characterController.shape")?.as_deref() {
            Some("capsule") | None => ControllerShape::Capsule {
                radius: archive.try_f32("characterController.radius")?.unwrap_or(0.5),
                height: archive.try_f32("characterController.height")?.unwrap_or(1.0),
            },
            Some("box") => ControllerShape::Box {
                half_height: archive.try_f32("characterController.halfHeight")?.unwrap_or(1.0),
                half_forward_extent: archive
                    .try_f32("characterController.halfForwardExtent")?
                    .unwrap_or(0.5),
                half_side_extent: archive.try_f32("characterController.halfSideExtent")?.unwrap_or(0.5),
            },
            Some(other) => {
                return Err(PhysicsError::Archive {
                    key: "characterController.shape".to_string(),
                    reason: format!("unknown controller shape `{}`", other),
                })
            }
        };

        let mut controller = CharacterControllerComponent::new(shape);
        if let Some(v) = archive.try_f32("characterController.contactOffset")? {
            controller.contact_offset = v;
        }
        if let Some(v) = archive.try_f32("characterController.scaleCoefficient")? {
            controller.scale_coefficient = v;
        }
        if let Some(raw) = archive.try_u32("characterController.movementMode")? {
            controller.movement_mode = MovementMode::from_raw(raw).ok_or_else(|| PhysicsError::Archive {
                key: "characterController.movementMode".to_string(),
                reason: format!("unknown movement mode {}", raw),
            })?;
        }
        if let Some(up) = archive.try_vector3("characterController.up")? {
            controller.up = up;
        }
        if let Some(mask) = archive.try_u32("characterController.typeMask")? {
            controller.type_mask = mask;
        }
        if let Some(mask) = archive.try_u32("characterController.typeMaskToCollideWith")? {
            controller.collide_with_mask = mask;
        }
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{Actor, HandleArena};

    fn installed() -> CharacterControllerComponent {
        let mut controllers: HandleArena<Controller, ()> = HandleArena::new();
        let mut actors: HandleArena<Actor, ()> = HandleArena::new();
        let mut controller = CharacterControllerComponent::capsule(0.3, 1.2);
        controller
            .install_controller(controllers.insert(()), actors.insert(()))
            .unwrap();
        controller
    }

    #[test]
    fn test_requests_before_creation_are_dropped() {
        let mut controller = CharacterControllerComponent::capsule(0.3, 1.2);
        controller.set_offset(Vec3::X);
        controller.set_velocity(Vec3::Y);
        controller.teleport(Vec3::Z);
        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert_eq!(controller.offset(), Vec3::ZERO);
        assert_eq!(controller.pending_teleport(), None);
    }

    #[test]
    fn test_last_request_wins() {
        let mut controller = installed();
        assert_eq!(controller.state(), ControllerState::Idle);
        controller.set_offset(Vec3::X);
        controller.set_offset(Vec3::Y);
        assert_eq!(controller.state(), ControllerState::Moving);
        assert_eq!(controller.take_move_request(), (Vec3::Y, Vec3::ZERO));
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_scaled_geometry() {
        let mut controller = CharacterControllerComponent::capsule(0.5, 2.0);
        controller.set_scale_coefficient(2.0);
        assert_eq!(
            controller.native_geometry(),
            ControllerGeometry::Capsule { radius: 1.0, height: 4.0 }
        );
    }

    #[test]
    fn test_up_and_mode_persist_exactly() {
        let mut controller = CharacterControllerComponent::cuboid(0.9, 0.4, 0.3);
        let up = Vec3::new(0.0, 0.6, 0.8);
        controller.set_up(up);
        controller.set_movement_mode(MovementMode::Flying);

        let mut archive = KeyedArchive::new();
        controller.serialize(&mut archive);
        let restored = CharacterControllerComponent::deserialize(&archive).unwrap();
        assert_eq!(restored.up(), up);
        assert_eq!(restored.movement_mode(), MovementMode::Flying);
        assert_eq!(restored.shape(), controller.shape());

        let mut again = KeyedArchive::new();
        restored.serialize(&mut again);
        assert_eq!(again, archive);
    }

    #[test]
    fn test_bad_movement_mode() {
        let mut archive = KeyedArchive::new();
        archive.set_u32("characterController.movementMode", 7);
        assert!(CharacterControllerComponent::deserialize(&archive).is_err());
    }
}
