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
//! Physics system
//!
//! [`PhysicsSystem`] owns the [`NativeWorld`] and runs one fixed frame per
//! [`SceneSystem::process_fixed`] call:
//!
//! 1. deliver scene events and fetch a step left running by the previous frame
//! 2. create pending native objects (bodies and shapes, then controllers)
//! 3. push externally changed transforms into the world
//! 4. apply queued forces, step vehicles and submit the simulation step
//! 5. fetch the step and write moved actors back to their entities
//! 6. move character controllers
//! 7. apply component updates and copy debug geometry
//!
//! Structural changes are never made while a step is in flight. Releases
//! requested during that window wait in the [`CommandBuffer`].

pub mod commands;

pub use commands::{Command, CommandBuffer, NativeObject, ObjectKind};

use crate::components::{
    body_shapes, BodyComponent, BodyType, CharacterControllerComponent, CollisionShapeComponent,
    CollisionSingleComponent, ControllerShape, MovementMode, PhysicsBinding, ShapeGeometry,
    UpdateLink, UpdateSink,
};
use crate::config::PhysicsConfig;
use crate::ecs::{
    dispatch_events, ComponentId, Entity, LandscapeComponent, RemovedComponent, RenderGeometry,
    Scene, SceneSystem,
};
use crate::error::{PhysicsError, Result};
use crate::math::{Pose, Transform};
use crate::native::{
    ActorDesc, ActorHandle, CollisionFlags, ControllerDesc, ControllerHandle, DebugLine,
    DebugPoint, DebugRenderBuffer, DebugTriangle, FilterData, ForceMode, NativeWorld, QueryFilter,
    Ray, ShapeDesc, ShapeHandle, ShapePatch, Visualization, WorldDesc,
};
use crate::vehicle::{PhysicsVehiclesSubsystem, VehicleCarComponent, VehicleTankComponent};
use glam::Vec3;
use log::{debug, error, trace, warn};
use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Step offset given to every character controller
pub const CONTROLLER_STEP_OFFSET: f32 = 0.02;

/// Why a component has no native object
#[derive(Debug, Clone, PartialEq)]
pub struct CreationFailure {
    /// Entity the component is attached to
    pub entity: Entity,
    /// Native object kind that failed
    pub kind: ObjectKind,
    /// Error message from the native layer
    pub reason: String,
}

/// Raycast hit resolved to scene objects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsHit {
    /// Entity owning the actor that was hit
    pub entity: Option<Entity>,
    /// Shape component that was hit, `None` for controller volumes
    pub shape: Option<ComponentId>,
    /// World-space hit position
    pub position: Vec3,
    /// Surface normal
    pub normal: Vec3,
    /// Distance from the ray origin
    pub distance: f32,
}

/// Debug geometry copied from the world for the renderer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugDrawBuffer {
    /// Line segments
    pub lines: Vec<DebugLine>,
    /// Triangles
    pub triangles: Vec<DebugTriangle>,
    /// Points
    pub points: Vec<DebugPoint>,
}

impl DebugDrawBuffer {
    /// Check whether the buffer holds nothing
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.triangles.is_empty() && self.points.is_empty()
    }

    /// Total number of primitives
    pub fn primitive_count(&self) -> usize {
        self.lines.len() + self.triangles.len() + self.points.len()
    }

    /// Drop every primitive
    pub fn clear(&mut self) {
        self.lines.clear();
        self.triangles.clear();
        self.points.clear();
    }
}

impl From<DebugRenderBuffer> for DebugDrawBuffer {
    fn from(buffer: DebugRenderBuffer) -> Self {
        DebugDrawBuffer {
            lines: buffer.lines,
            triangles: buffer.triangles,
            points: buffer.points,
        }
    }
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStats {
    /// `process_fixed` calls
    pub frames: u64,
    /// Steps submitted to the world
    pub submitted_steps: u64,
    /// Frames whose post-step work waited for a later fetch
    pub deferred_frames: u64,
    /// Steps that failed to start or to finish
    pub failed_steps: u64,
}

/// Scene system integrating bodies, shapes, character controllers and
/// vehicles with the native simulation
pub struct PhysicsSystem {
    config: PhysicsConfig,
    world: NativeWorld,
    vehicles: PhysicsVehiclesSubsystem,
    commands: CommandBuffer,

    body_updates: UpdateSink,
    shape_updates: UpdateSink,
    controller_updates: UpdateSink,

    actor_owners: HashMap<ActorHandle, Entity>,
    shape_owners: HashMap<ShapeHandle, ComponentId>,
    live_controllers: BTreeSet<ComponentId>,
    waiting_for_render: BTreeSet<ComponentId>,
    creation_failures: BTreeMap<ComponentId, CreationFailure>,

    pending_forces: Vec<(Entity, Vec3, ForceMode)>,
    teleported: BTreeMap<ControllerHandle, ComponentId>,
    moved_by_transform: BTreeSet<ComponentId>,
    masked: Vec<(ControllerHandle, ComponentId)>,
    remembered_changes: BTreeSet<Entity>,
    deferred_dt: Option<f32>,

    simulation_enabled: bool,
    debug_draw_enabled: bool,
    debug_buffer: DebugDrawBuffer,
    last_step_error: Option<PhysicsError>,
    stats: SystemStats,
}

impl PhysicsSystem {
    /// Create a system and its native world
    ///
    /// Fails with [`PhysicsError::InvalidConfig`] when `config` does not validate.
    pub fn new(config: PhysicsConfig) -> Result<Self> {
        config.validate()?;
        let world = NativeWorld::new(&WorldDesc::from_config(&config));
        debug!(
            "physics world created: gravity {}, {} threads, {} integrator",
            config.gravity,
            config.thread_count,
            world.integrator_name()
        );
        Ok(PhysicsSystem {
            config,
            world,
            vehicles: PhysicsVehiclesSubsystem::new(),
            commands: CommandBuffer::new(),
            body_updates: UpdateSink::new(),
            shape_updates: UpdateSink::new(),
            controller_updates: UpdateSink::new(),
            actor_owners: HashMap::new(),
            shape_owners: HashMap::new(),
            live_controllers: BTreeSet::new(),
            waiting_for_render: BTreeSet::new(),
            creation_failures: BTreeMap::new(),
            pending_forces: Vec::new(),
            teleported: BTreeMap::new(),
            moved_by_transform: BTreeSet::new(),
            masked: Vec::new(),
            remembered_changes: BTreeSet::new(),
            deferred_dt: None,
            simulation_enabled: true,
            debug_draw_enabled: false,
            debug_buffer: DebugDrawBuffer::default(),
            last_step_error: None,
            stats: SystemStats::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Native world, read-only
    pub fn world(&self) -> &NativeWorld {
        &self.world
    }

    /// Native world for materials and diagnostics
    ///
    /// Objects owned by components must not be created or released through
    /// this reference.
    pub fn world_mut(&mut self) -> &mut NativeWorld {
        &mut self.world
    }

    /// Vehicle subsystem
    pub fn vehicles(&self) -> &PhysicsVehiclesSubsystem {
        &self.vehicles
    }

    /// Vehicle subsystem, for the tire friction table
    pub fn vehicles_mut(&mut self) -> &mut PhysicsVehiclesSubsystem {
        &mut self.vehicles
    }

    /// Frame counters
    pub fn stats(&self) -> SystemStats {
        self.stats
    }

    /// Error of the most recent failed step, cleared by the next good one
    pub fn last_step_error(&self) -> Option<&PhysicsError> {
        self.last_step_error.as_ref()
    }

    /// Creation failure recorded for a component
    pub fn creation_failure(&self, id: ComponentId) -> Option<&CreationFailure> {
        self.creation_failures.get(&id)
    }

    /// Every component currently without a native object because creation failed
    pub fn creation_failures(&self) -> impl Iterator<Item = (ComponentId, &CreationFailure)> + '_ {
        self.creation_failures.iter().map(|(id, failure)| (*id, failure))
    }

    /// Shapes waiting for render data on their entity
    pub fn shapes_waiting_for_render_data(&self) -> usize {
        self.waiting_for_render.len()
    }

    /// Queued creations of `kind`
    pub fn pending_creates(&self, kind: ObjectKind) -> usize {
        self.commands.pending_creates(kind)
    }

    /// Queue a force for the body on `entity`, applied right before the next step
    pub fn add_force(&mut self, entity: Entity, force: Vec3, mode: ForceMode) {
        if !force.is_finite() {
            debug_assert!(false, "force must be finite");
            return;
        }
        self.pending_forces.push((entity, force, mode));
    }

    /// Cast a ray against the world
    ///
    /// `callback` sees hits in ascending distance and returns `false` to stop.
    /// Returns the number of hits reported. A zero direction reports nothing.
    pub fn raycast<F>(&mut self, origin: Vec3, direction: Vec3, distance: f32, mut callback: F) -> usize
    where
        F: FnMut(&PhysicsHit) -> bool,
    {
        let Some(ray) = Ray::new(origin, direction, distance) else {
            return 0;
        };
        if self.world.is_running() {
            debug!("raycast while a step is in flight sees the previous poses");
        }
        let actor_owners = &self.actor_owners;
        let shape_owners = &self.shape_owners;
        self.world.raycast(&ray, &QueryFilter::all(), |hit| {
            let resolved = PhysicsHit {
                entity: actor_owners.get(&hit.actor).copied(),
                shape: shape_owners.get(&hit.shape).copied(),
                position: hit.position,
                normal: hit.normal,
                distance: hit.distance,
            };
            callback(&resolved)
        })
    }

    /// Closest hit along a ray
    pub fn raycast_closest(&mut self, origin: Vec3, direction: Vec3, distance: f32) -> Option<PhysicsHit> {
        let mut closest = None;
        self.raycast(origin, direction, distance, |hit| {
            closest = Some(*hit);
            false
        });
        closest
    }

    /// Check whether steps are being submitted
    pub fn is_simulation_enabled(&self) -> bool {
        self.simulation_enabled
    }

    /// Pause or resume the simulation
    ///
    /// A step still in flight is fetched first so component and native state
    /// agree at the switch.
    pub fn set_simulation_enabled(&mut self, scene: &mut Scene, enabled: bool) {
        if self.simulation_enabled == enabled {
            return;
        }
        self.complete_in_flight(scene);
        self.simulation_enabled = enabled;
        self.vehicles.on_simulation_enabled(scene, &mut self.world, enabled);
        debug!("simulation {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Check whether debug geometry is collected
    pub fn is_debug_draw_enabled(&self) -> bool {
        self.debug_draw_enabled
    }

    /// Toggle debug geometry collection and the native visualization switches
    pub fn set_debug_draw_enabled(&mut self, enabled: bool) {
        self.debug_draw_enabled = enabled;
        self.world.set_visualization(Visualization {
            collision_shapes: enabled,
            body_linear_velocity: enabled,
            body_angular_velocity: enabled,
            contact_points: enabled,
        });
        if !enabled {
            self.debug_buffer.clear();
        }
    }

    /// Debug geometry of the last drawn frame
    pub fn debug_draw_buffer(&self) -> &DebugDrawBuffer {
        &self.debug_buffer
    }

    /// Fetch the running step and publish its results
    ///
    /// `Ok(false)` means the step is still running (`block == false`) or
    /// nothing was submitted. A failed step keeps the previous transforms.
    pub fn fetch_results(&mut self, scene: &mut Scene, block: bool) -> Result<bool> {
        match self.fetch_step(scene, block) {
            Err(err) => {
                let reported = match &err {
                    PhysicsError::StepFailed(reason) => PhysicsError::StepFailed(reason.clone()),
                    other => PhysicsError::StepFailed(other.to_string()),
                };
                self.record_step_failure(err);
                Err(reported)
            }
            Ok(fetched) => {
                if fetched {
                    self.last_step_error = None;
                }
                Ok(fetched)
            }
        }
    }

    fn fetch_step(&mut self, scene: &mut Scene, block: bool) -> Result<bool> {
        let fetched = self.world.fetch_results(block);
        match fetched {
            Ok(true) => {
                self.apply_results(scene);
                self.restore_masked_filters(scene);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                self.restore_masked_filters(scene);
                Err(err)
            }
        }
    }

    /// Fetch inside the frame; `true` once no step is running any more
    fn fetch(&mut self, scene: &mut Scene, block: bool) -> bool {
        match self.fetch_step(scene, block) {
            Ok(true) => {
                self.last_step_error = None;
                true
            }
            Ok(false) => !self.world.is_running(),
            Err(err) => {
                self.record_step_failure(err);
                true
            }
        }
    }

    fn record_step_failure(&mut self, err: PhysicsError) {
        error!("{}", err);
        self.stats.failed_steps += 1;
        self.last_step_error = Some(err);
    }

    fn complete_in_flight(&mut self, scene: &mut Scene) {
        if self.world.is_running() {
            self.fetch(scene, true);
        }
        if let Some(dt) = self.deferred_dt.take() {
            self.finish_frame(scene, dt);
        }
    }

    fn finish_frame(&mut self, scene: &mut Scene, dt: f32) {
        self.move_character_controllers(scene, dt);
        self.update_components(scene);
        self.draw_debug_info();
    }

    // ---- results ------------------------------------------------------

    fn apply_results(&mut self, scene: &mut Scene) {
        let moved: Vec<ActorHandle> = self.world.active_actors().to_vec();
        for actor in moved {
            let Some(&entity) = self.actor_owners.get(&actor) else {
                continue;
            };
            if scene.has::<CharacterControllerComponent>(entity) {
                continue;
            }
            let (Some(pose), Some(current)) = (self.world.actor_pose(actor), scene.world_transform(entity)) else {
                continue;
            };
            if !current.pose().same_as(&pose) {
                scene.write_simulated_transform(entity, current.with_pose(pose));
            }
            self.write_child_shape_poses(scene, actor, entity, pose);
        }
        self.refresh_body_motion(scene);

        let owners = &self.actor_owners;
        let Some(collisions) = scene.singleton_mut::<CollisionSingleComponent>() else {
            return;
        };
        for report in self.world.contact_reports() {
            if let (Some(&first), Some(&second)) = (owners.get(&report.actors[0]), owners.get(&report.actors[1])) {
                collisions.push_collision(first, second, report.points.clone());
            }
        }
        for report in self.world.trigger_reports() {
            if let (Some(&trigger), Some(&other)) =
                (owners.get(&report.trigger_actor), owners.get(&report.other_actor))
            {
                collisions.push_trigger(trigger, other);
            }
        }
    }

    /// Move child entities whose shapes sit elsewhere on the actor than the
    /// hierarchy says
    fn write_child_shape_poses(&self, scene: &mut Scene, actor: ActorHandle, body_entity: Entity, body_pose: Pose) {
        for &handle in self.world.actor_shapes(actor) {
            let Some(&id) = self.shape_owners.get(&handle) else {
                continue;
            };
            let Some(entity) = scene.entity_of(id).filter(|e| *e != body_entity) else {
                continue;
            };
            let (Some(native_local), Some(shape)) =
                (self.world.shape_local_pose(handle), scene.get::<CollisionShapeComponent>(id))
            else {
                continue;
            };
            let pose = body_pose
                .compose(&native_local)
                .compose(&shape.descriptor().local_pose().inverse());
            let Some(current) = scene.world_transform(entity) else {
                continue;
            };
            if !current.pose().same_as(&pose) {
                scene.write_simulated_transform(entity, current.with_pose(pose));
            }
        }
    }

    fn refresh_body_motion(&self, scene: &mut Scene) {
        let Some(storage) = scene.storage_mut::<BodyComponent>() else {
            return;
        };
        for (_, _, body) in storage.iter_mut() {
            if body.body_type() != BodyType::Dynamic {
                continue;
            }
            let Some(actor) = body.native_actor() else {
                continue;
            };
            let linear = self.world.linear_velocity(actor).unwrap_or(Vec3::ZERO);
            let angular = self.world.angular_velocity(actor).unwrap_or(Vec3::ZERO);
            body.set_motion_state(linear, angular, !self.world.is_sleeping(actor));
        }
    }

    fn restore_masked_filters(&mut self, scene: &Scene) {
        for (controller, id) in std::mem::take(&mut self.masked) {
            let Some(component) = scene.get::<CharacterControllerComponent>(id) else {
                continue;
            };
            if let Err(err) = self.world.set_controller_filter(controller, component.filter_data()) {
                warn!("cannot restore controller filter: {}", err);
            }
        }
    }

    // ---- creation -----------------------------------------------------

    fn record_failure(&mut self, id: ComponentId, entity: Entity, kind: ObjectKind, err: &PhysicsError) {
        if self.config.log_creation_failures {
            warn!("cannot create {} for {}: {}", kind.name(), entity, err);
        }
        self.creation_failures.insert(
            id,
            CreationFailure {
                entity,
                kind,
                reason: err.to_string(),
            },
        );
    }

    fn init_new_objects(&mut self, scene: &mut Scene) {
        for object in self.commands.take_destroys() {
            self.release_native(object);
        }
        let bodies = self.commands.take_creates(ObjectKind::Body);
        let shapes = self.commands.take_creates(ObjectKind::Shape);
        let controllers = self.commands.take_creates(ObjectKind::Controller);
        if !(bodies.is_empty() && shapes.is_empty() && controllers.is_empty()) {
            trace!(
                "creating {} bodies, {} shapes, {} controllers",
                bodies.len(),
                shapes.len(),
                controllers.len()
            );
        }
        for id in bodies {
            self.create_body(scene, id);
        }
        for id in shapes {
            self.create_shape(scene, id);
        }
        for id in controllers {
            self.create_controller(scene, id);
        }
    }

    fn create_body(&mut self, scene: &mut Scene, id: ComponentId) {
        let Some(entity) = scene.entity_of(id) else {
            return;
        };
        let Some(body) = scene.get::<BodyComponent>(id) else {
            return;
        };
        if body.native_actor().is_some() {
            return;
        }
        let pose = scene.world_transform(entity).map(|t| t.pose()).unwrap_or_default();
        let mut desc = match body.body_type() {
            BodyType::Static => ActorDesc::fixed(pose),
            BodyType::Dynamic => ActorDesc::dynamic(pose),
        };
        desc.kinematic = body.is_kinematic();
        desc.linear_damping = body.linear_damping();
        desc.angular_damping = body.angular_damping();

        let actor = match self.world.create_actor(desc) {
            Ok(actor) => actor,
            Err(err) => {
                self.record_failure(id, entity, ObjectKind::Body, &err);
                return;
            }
        };
        if let Some(body) = scene.get_mut::<BodyComponent>(id) {
            if let Err(err) = body.install_actor(actor) {
                error!("{}: {}", entity, err);
                debug_assert!(false, "body on {} already has an actor", entity);
                self.release_native(NativeObject::Actor(actor));
                return;
            }
            body.schedule_update();
        }
        self.actor_owners.insert(actor, entity);
        self.creation_failures.remove(&id);

        // shapes created before their body
        for shape_id in body_shapes(scene, entity) {
            let Some(shape) = scene.get::<CollisionShapeComponent>(shape_id).and_then(|s| s.native_shape()) else {
                continue;
            };
            if self.world.shape_actor(shape).is_some() {
                continue;
            }
            let local_pose = self.shape_pose(scene, shape_id);
            if let Err(err) = self.world.set_shape_local_pose(shape, local_pose) {
                warn!("{}", err);
            }
            if let Err(err) = self.world.attach_shape(actor, shape) {
                self.record_failure(shape_id, entity, ObjectKind::Shape, &err);
            }
        }
    }

    /// Native local pose of a shape relative to the body it attaches to
    fn shape_pose(&self, scene: &Scene, id: ComponentId) -> Pose {
        let Some(shape) = scene.get::<CollisionShapeComponent>(id) else {
            return Pose::default();
        };
        let local = shape.descriptor().local_pose();
        let Some(entity) = scene.entity_of(id) else {
            return local;
        };
        let owner = scene.find_in_ancestors::<BodyComponent>(entity).map(|(e, _)| e);
        match owner {
            Some(body_entity) if body_entity != entity => {
                match (scene.world_transform(body_entity), scene.world_transform(entity)) {
                    (Some(body), Some(child)) => body.pose().inverse().compose(&child.pose()).compose(&local),
                    _ => local,
                }
            }
            _ => local,
        }
    }

    fn create_shape(&mut self, scene: &mut Scene, id: ComponentId) {
        let Some(entity) = scene.entity_of(id) else {
            return;
        };
        let Some(shape) = scene.get::<CollisionShapeComponent>(id) else {
            return;
        };
        if shape.native_shape().is_some() {
            return;
        }
        let drivable = shape.geometry().is_drivable_ground();
        let owner = scene.find_in_ancestors::<BodyComponent>(entity);
        let owner_ccd = owner
            .and_then(|(_, body_id)| scene.get::<BodyComponent>(body_id))
            .map_or(false, |body| body.body_type() == BodyType::Dynamic && body.is_ccd_enabled());
        if let Some(shape) = scene.get_mut::<CollisionShapeComponent>(id) {
            if drivable {
                PhysicsVehiclesSubsystem::setup_drivable_surface(shape);
            }
            shape.set_ccd(owner_ccd);
        }

        let scale = scene.world_transform(entity).map_or(Vec3::ONE, |t| t.scale);
        let render = scene
            .find::<RenderGeometry>(entity)
            .and_then(|render_id| scene.get::<RenderGeometry>(render_id));
        let landscape = scene
            .find::<LandscapeComponent>(entity)
            .and_then(|landscape_id| scene.get::<LandscapeComponent>(landscape_id));
        let Some(shape) = scene.get::<CollisionShapeComponent>(id) else {
            return;
        };
        let built = shape.build_geometry(scale, render, landscape).map(|geometry| ShapeDesc {
            geometry,
            local_pose: Pose::default(),
            filter: shape.filter_data(),
            material: shape.material_name().to_owned(),
            trigger: shape.is_trigger(),
        });
        let kind = shape.geometry().kind();
        let mut desc = match built {
            Ok(desc) => desc,
            Err(err) if err.is_not_ready() => {
                debug!("{} shape on {} waits for render data", kind, entity);
                self.waiting_for_render.insert(id);
                return;
            }
            Err(err) => {
                self.record_failure(id, entity, ObjectKind::Shape, &err);
                return;
            }
        };
        desc.local_pose = self.shape_pose(scene, id);

        let handle = match self.world.create_shape(desc) {
            Ok(handle) => handle,
            Err(err) => {
                self.record_failure(id, entity, ObjectKind::Shape, &err);
                return;
            }
        };
        if let Some(shape) = scene.get_mut::<CollisionShapeComponent>(id) {
            if let Err(err) = shape.install_shape(handle) {
                error!("{}: {}", entity, err);
                debug_assert!(false, "shape on {} already has a native shape", entity);
                self.release_native(NativeObject::Shape(handle));
                return;
            }
            shape.clear_geometry_changed();
        }
        self.shape_owners.insert(handle, id);
        self.waiting_for_render.remove(&id);
        self.creation_failures.remove(&id);

        if let Some((_, body_id)) = owner {
            let actor = scene.get::<BodyComponent>(body_id).and_then(BodyComponent::native_actor);
            if let Some(actor) = actor {
                if let Err(err) = self.world.attach_shape(actor, handle) {
                    self.record_failure(id, entity, ObjectKind::Shape, &err);
                }
            }
            self.body_updates.schedule(body_id);
        }
    }

    fn create_controller(&mut self, scene: &mut Scene, id: ComponentId) {
        let Some(entity) = scene.entity_of(id) else {
            return;
        };
        let Some(component) = scene.get::<CharacterControllerComponent>(id) else {
            return;
        };
        if component.native_controller().is_some() {
            return;
        }
        let desc = ControllerDesc {
            geometry: component.native_geometry(),
            foot_position: scene.world_transform(entity).map_or(Vec3::ZERO, |t| t.translation),
            up: component.up(),
            contact_offset: component.contact_offset(),
            step_offset: CONTROLLER_STEP_OFFSET,
            constrained_climbing: matches!(component.shape(), ControllerShape::Capsule { .. }),
            filter: component.filter_data(),
        };
        let controller = match self.world.create_controller(desc) {
            Ok(controller) => controller,
            Err(err) => {
                self.record_failure(id, entity, ObjectKind::Controller, &err);
                return;
            }
        };
        let Some(actor) = self.world.controller_actor(controller) else {
            self.release_native(NativeObject::Controller(controller));
            return;
        };
        if let Some(component) = scene.get_mut::<CharacterControllerComponent>(id) {
            if let Err(err) = component.install_controller(controller, actor) {
                error!("{}: {}", entity, err);
                debug_assert!(false, "controller on {} already installed", entity);
                self.release_native(NativeObject::Controller(controller));
                return;
            }
            component.clear_geometry_changed();
        }
        self.live_controllers.insert(id);
        self.actor_owners.insert(actor, entity);
        self.creation_failures.remove(&id);
    }

    // ---- release ------------------------------------------------------

    fn release_native(&mut self, object: NativeObject) {
        let released = match object {
            NativeObject::Shape(shape) => self.world.release_shape(shape),
            NativeObject::Actor(actor) => self.world.release_actor(actor),
            NativeObject::Controller(controller) => self.world.release_controller(controller),
        };
        if let Err(err) = released {
            warn!("cannot release {:?}: {}", object, err);
        }
    }

    /// Release now, or at the next quiescent window when a step is in flight
    fn destroy(&mut self, object: NativeObject) {
        if self.world.is_running() {
            debug!("step in flight, deferring release of {:?}", object);
            self.commands.push(Command::Destroy(object));
        } else {
            self.release_native(object);
        }
    }

    fn forget(&mut self, id: ComponentId) {
        self.commands.cancel(id);
        self.creation_failures.remove(&id);
    }

    fn on_body_removed(&mut self, scene: &mut Scene, entity: Entity, id: ComponentId, mut body: BodyComponent) {
        self.forget(id);
        self.body_updates.remove(id);
        if let Some(actor) = body.take_actor() {
            self.actor_owners.remove(&actor);
            self.destroy(NativeObject::Actor(actor));
        }
        self.pending_forces.retain(|(target, _, _)| *target != entity);
        if body.body_type() == BodyType::Dynamic {
            self.vehicles.on_dynamic_body_removed(scene, entity);
        }
    }

    fn on_shape_removed(&mut self, scene: &Scene, entity: Entity, id: ComponentId, mut shape: CollisionShapeComponent) {
        self.forget(id);
        self.shape_updates.remove(id);
        self.waiting_for_render.remove(&id);
        if let Some(handle) = shape.take_shape() {
            self.shape_owners.remove(&handle);
            self.destroy(NativeObject::Shape(handle));
        }
        if let Some((_, body_id)) = scene.find_in_ancestors::<BodyComponent>(entity) {
            self.body_updates.schedule(body_id);
        }
    }

    fn on_controller_removed(&mut self, id: ComponentId, mut component: CharacterControllerComponent) {
        self.forget(id);
        self.controller_updates.remove(id);
        self.live_controllers.remove(&id);
        self.teleported.retain(|_, queued| *queued != id);
        self.moved_by_transform.remove(&id);
        self.masked.retain(|(_, queued)| *queued != id);
        if let Some(actor) = component.native_actor() {
            self.actor_owners.remove(&actor);
        }
        if let Some(controller) = component.take_controller() {
            self.destroy(NativeObject::Controller(controller));
        }
    }

    /// Release the shapes that were built from render data about to go away
    fn release_render_shapes<F>(&mut self, scene: &mut Scene, entity: Entity, depends: F)
    where
        F: Fn(&ShapeGeometry) -> bool,
    {
        for id in scene.find_all::<CollisionShapeComponent>(entity) {
            let Some(shape) = scene.get_mut::<CollisionShapeComponent>(id) else {
                continue;
            };
            if !depends(shape.geometry()) {
                continue;
            }
            if let Some(handle) = shape.take_shape() {
                self.shape_owners.remove(&handle);
                self.destroy(NativeObject::Shape(handle));
                debug!("released {} shape on {} with its render data", shape.geometry().kind(), entity);
            }
            self.commands.cancel(id);
            self.waiting_for_render.insert(id);
            if let Some((_, body_id)) = scene.find_in_ancestors::<BodyComponent>(entity) {
                self.body_updates.schedule(body_id);
            }
        }
    }

    fn retry_waiting_shapes(&mut self, scene: &Scene, entity: Entity) {
        let waiting: Vec<ComponentId> = self
            .waiting_for_render
            .iter()
            .copied()
            .filter(|id| scene.entity_of(*id) == Some(entity))
            .collect();
        for id in waiting {
            self.commands.push(Command::Create {
                kind: ObjectKind::Shape,
                id,
            });
        }
    }

    // ---- transform sync -----------------------------------------------

    fn sync_transforms(&mut self, scene: &mut Scene) {
        let mut changed = std::mem::take(&mut self.remembered_changes);
        changed.extend(scene.take_transform_changes());
        for entity in changed {
            let Some(world) = scene.world_transform(entity) else {
                continue;
            };

            let body = scene
                .find::<BodyComponent>(entity)
                .and_then(|id| scene.get::<BodyComponent>(id));
            if let Some(body) = body {
                if let (Some(actor), false) = (body.native_actor(), body.is_simulated()) {
                    if let Err(err) = self.world.set_actor_pose(actor, world.pose()) {
                        warn!("cannot move {}: {}", entity, err);
                    }
                }
            }

            if let Some(id) = scene.find::<CharacterControllerComponent>(entity) {
                let component = scene.get::<CharacterControllerComponent>(id);
                if let Some(component) = component.filter(|c| c.pending_teleport().is_none()) {
                    if let Some(controller) = component.native_controller() {
                        if self.world.controller_foot_position(controller) != Some(world.translation) {
                            match self.world.set_controller_foot_position(controller, world.translation) {
                                Ok(()) => {
                                    self.teleported.insert(controller, id);
                                    self.moved_by_transform.insert(id);
                                }
                                Err(err) => warn!("cannot teleport {}: {}", entity, err),
                            }
                        }
                    }
                }
            }

            if scene.parent(entity).is_some() && !scene.has::<BodyComponent>(entity) {
                for id in scene.find_all::<CollisionShapeComponent>(entity) {
                    let Some(handle) = scene.get::<CollisionShapeComponent>(id).and_then(|s| s.native_shape()) else {
                        continue;
                    };
                    let pose = self.shape_pose(scene, id);
                    if let Err(err) = self.world.set_shape_local_pose(handle, pose) {
                        warn!("cannot move shape on {}: {}", entity, err);
                    }
                }
            }
        }
    }

    // ---- step ---------------------------------------------------------

    /// Apply pre-step work and submit; `false` when the step did not start
    fn submit(&mut self, scene: &mut Scene, dt: f32) -> bool {
        for (entity, force, mode) in std::mem::take(&mut self.pending_forces) {
            let actor = scene
                .find::<BodyComponent>(entity)
                .and_then(|id| scene.get::<BodyComponent>(id))
                .filter(|body| body.is_simulated())
                .and_then(BodyComponent::native_actor);
            match actor {
                Some(actor) => {
                    if let Err(err) = self.world.add_force(actor, force, mode) {
                        warn!("cannot push {}: {}", entity, err);
                    }
                }
                None => trace!("dropping force for {} without a simulated body", entity),
            }
        }

        for (controller, id) in std::mem::take(&mut self.teleported) {
            match self.world.set_controller_filter(controller, FilterData::new(0, 0)) {
                Ok(()) => self.masked.push((controller, id)),
                Err(err) => warn!("cannot mask teleported controller: {}", err),
            }
        }

        self.vehicles.process_fixed(scene, &mut self.world, dt);

        match self.world.simulate(dt) {
            Ok(()) => {
                self.stats.submitted_steps += 1;
                true
            }
            Err(err) => {
                self.record_step_failure(err);
                self.restore_masked_filters(scene);
                false
            }
        }
    }

    // ---- controllers --------------------------------------------------

    fn move_character_controllers(&mut self, scene: &mut Scene, dt: f32) {
        let gravity = self.world.gravity();
        let ids: Vec<ComponentId> = self.live_controllers.iter().copied().collect();
        for id in ids {
            let Some(entity) = scene.entity_of(id) else {
                continue;
            };
            let Some(component) = scene.get_mut::<CharacterControllerComponent>(id) else {
                continue;
            };
            let Some(controller) = component.native_controller() else {
                continue;
            };

            // queued moves apply from the new position next tick
            if self.moved_by_transform.remove(&id) {
                continue;
            }

            if let Some(target) = component.take_teleport() {
                match self.world.set_controller_foot_position(controller, target) {
                    Ok(()) => {
                        self.teleported.insert(controller, id);
                        write_translation(scene, entity, target);
                    }
                    Err(err) => warn!("cannot teleport {}: {}", entity, err),
                }
                continue;
            }

            let (offset, velocity) = component.take_move_request();
            let displacement = match component.movement_mode() {
                MovementMode::Walking => {
                    let up = component.up();
                    let planar = offset + velocity * dt;
                    planar - up * planar.dot(up) + gravity * dt
                }
                MovementMode::Flying => offset + velocity * dt,
            };
            match self.world.move_controller(controller, displacement) {
                Ok(flags) => component.set_grounded(flags.contains(CollisionFlags::DOWN)),
                Err(err) => {
                    warn!("cannot move controller on {}: {}", entity, err);
                    continue;
                }
            }
            if let Some(foot) = self.world.controller_foot_position(controller) {
                write_translation(scene, entity, foot);
            }
        }
    }

    // ---- updates ------------------------------------------------------

    fn update_components(&mut self, scene: &mut Scene) {
        if self.world.is_running() {
            debug!("step in flight, component updates wait for the next frame");
            return;
        }

        for id in self.shape_updates.drain() {
            let Some(shape) = scene.get::<CollisionShapeComponent>(id) else {
                continue;
            };
            let command = match (shape.native_shape(), shape.geometry_changed()) {
                (None, true) if !self.waiting_for_render.contains(&id) => Command::Create {
                    kind: ObjectKind::Shape,
                    id,
                },
                (None, _) => continue,
                (Some(_), true) => Command::RebuildGeometry(id),
                (Some(_), false) => Command::PatchFilter(id),
            };
            self.commands.push(command);
        }
        for command in self.commands.take_shape_updates() {
            match command {
                Command::RebuildGeometry(id) => self.rebuild_shape(scene, id),
                Command::PatchFilter(id) => self.patch_shape(scene, id),
                _ => {}
            }
        }

        for id in self.body_updates.drain() {
            self.update_body(scene, id);
        }

        for id in self.controller_updates.drain() {
            self.update_controller(scene, id);
        }
    }

    fn patch_shape(&mut self, scene: &Scene, id: ComponentId) {
        let Some(shape) = scene.get::<CollisionShapeComponent>(id) else {
            return;
        };
        let Some(handle) = shape.native_shape() else {
            return;
        };
        let patch = ShapePatch {
            filter: shape.filter_data(),
            material: shape.material_name(),
            trigger: shape.is_trigger(),
            local_pose: self.shape_pose(scene, id),
        };
        if let Err(err) = self.world.patch_shape(handle, patch) {
            warn!("cannot update shape {}: {}", id, err);
        }
        if let Some((_, body_id)) = scene.entity_of(id).and_then(|e| scene.find_in_ancestors::<BodyComponent>(e)) {
            self.body_updates.schedule(body_id);
        }
    }

    /// Geometry is immutable natively, so the shape is released and created again
    fn rebuild_shape(&mut self, scene: &mut Scene, id: ComponentId) {
        let Some(shape) = scene.get_mut::<CollisionShapeComponent>(id) else {
            return;
        };
        if let Some(handle) = shape.take_shape() {
            self.shape_owners.remove(&handle);
            self.release_native(NativeObject::Shape(handle));
        }
        self.create_shape(scene, id);
        // mass must drop the old geometry even when the new one failed
        if let Some((_, body_id)) = scene.entity_of(id).and_then(|e| scene.find_in_ancestors::<BodyComponent>(e)) {
            self.body_updates.schedule(body_id);
        }
    }

    fn update_body(&mut self, scene: &mut Scene, id: ComponentId) {
        let Some(entity) = scene.entity_of(id) else {
            return;
        };
        let Some(body) = scene.get::<BodyComponent>(id) else {
            return;
        };
        let Some(actor) = body.native_actor() else {
            return;
        };
        let dynamic = body.body_type() == BodyType::Dynamic;
        let ccd = dynamic && body.is_ccd_enabled();
        if dynamic {
            let updated = self
                .world
                .set_kinematic(actor, body.is_kinematic())
                .and_then(|()| self.world.set_damping(actor, body.linear_damping(), body.angular_damping()));
            if let Err(err) = updated {
                warn!("cannot update body on {}: {}", entity, err);
            }
        }

        let shapes = body_shapes(scene, entity);
        for &shape_id in &shapes {
            let Some(shape) = scene.get_mut::<CollisionShapeComponent>(shape_id) else {
                continue;
            };
            if !shape.set_ccd(ccd) {
                continue;
            }
            if let Some(handle) = shape.native_shape() {
                if let Err(err) = self.world.set_shape_filter(handle, shape.filter_data()) {
                    warn!("{}", err);
                }
            }
        }

        // vehicles own the mass of their chassis
        if !dynamic || scene.has::<VehicleCarComponent>(entity) || scene.has::<VehicleTankComponent>(entity) {
            return;
        }
        let mut mass = 0.0;
        let mut inertia = Vec3::ZERO;
        for &shape_id in &shapes {
            let Some(shape) = scene.get::<CollisionShapeComponent>(shape_id) else {
                continue;
            };
            let Some(geometry) = shape.native_shape().and_then(|h| self.world.shape_geometry(h)) else {
                continue;
            };
            let shape_mass = shape.effective_mass(geometry.volume());
            if shape_mass > 0.0 {
                mass += shape_mass;
                inertia += geometry.inertia(shape_mass);
            }
        }
        if mass > 0.0 {
            if let Err(err) = self.world.set_mass_properties(actor, mass, inertia) {
                warn!("cannot set mass of {}: {}", entity, err);
            }
        }
    }

    fn update_controller(&mut self, scene: &mut Scene, id: ComponentId) {
        let Some(component) = scene.get_mut::<CharacterControllerComponent>(id) else {
            return;
        };
        let Some(controller) = component.native_controller() else {
            if component.geometry_changed() {
                self.commands.push(Command::Create {
                    kind: ObjectKind::Controller,
                    id,
                });
            }
            return;
        };
        if component.geometry_changed() {
            match self.world.resize_controller(controller, component.native_geometry()) {
                Ok(()) => component.clear_geometry_changed(),
                Err(err) => warn!("cannot resize controller {}: {}", id, err),
            }
        }
        let updated = self
            .world
            .set_controller_contact_offset(controller, component.contact_offset())
            .and_then(|()| self.world.set_controller_filter(controller, component.filter_data()))
            .and_then(|()| self.world.set_controller_up(controller, component.up()));
        if let Err(err) = updated {
            warn!("cannot update controller {}: {}", id, err);
        }
    }

    fn draw_debug_info(&mut self) {
        if !self.debug_draw_enabled || !self.simulation_enabled {
            return;
        }
        match self.world.render_buffer() {
            Ok(buffer) => self.debug_buffer = DebugDrawBuffer::from(buffer),
            Err(err) => debug!("debug draw skipped: {}", err),
        }
    }

    fn ensure_collision_singleton(scene: &mut Scene) {
        if let Some(collisions) = scene.singleton_mut::<CollisionSingleComponent>() {
            collisions.clear();
            return;
        }
        scene.set_singleton(CollisionSingleComponent::default());
    }

    fn deinit_components(&mut self, scene: &mut Scene) {
        let mut released = Vec::new();
        if let Some(storage) = scene.storage_mut::<CharacterControllerComponent>() {
            for (_, _, component) in storage.iter_mut() {
                component.set_update_link(None);
                if let Some(controller) = component.take_controller() {
                    released.push(NativeObject::Controller(controller));
                }
            }
        }
        if let Some(storage) = scene.storage_mut::<CollisionShapeComponent>() {
            for (_, _, shape) in storage.iter_mut() {
                shape.set_update_link(None);
                if let Some(handle) = shape.take_shape() {
                    released.push(NativeObject::Shape(handle));
                }
            }
        }
        if let Some(storage) = scene.storage_mut::<BodyComponent>() {
            for (_, _, body) in storage.iter_mut() {
                body.set_update_link(None);
                if let Some(actor) = body.take_actor() {
                    released.push(NativeObject::Actor(actor));
                }
            }
        }
        for object in released {
            self.release_native(object);
        }
    }
}

fn write_translation(scene: &mut Scene, entity: Entity, position: Vec3) {
    let Some(current) = scene.world_transform(entity) else {
        return;
    };
    if current.translation != position {
        let moved = Transform {
            translation: position,
            ..current
        };
        scene.write_simulated_transform(entity, moved);
    }
}

impl SceneSystem for PhysicsSystem {
    fn register_component(&mut self, scene: &mut Scene, entity: Entity, id: ComponentId, type_id: TypeId) {
        if type_id == TypeId::of::<BodyComponent>() {
            debug_assert!(scene.parent(entity).is_none(), "bodies are only valid on root entities");
            if let Some(body) = scene.get_mut::<BodyComponent>(id) {
                body.set_update_link(Some(UpdateLink::new(id, self.body_updates.clone())));
            }
            self.commands.push(Command::Create {
                kind: ObjectKind::Body,
                id,
            });
        } else if type_id == TypeId::of::<CollisionShapeComponent>() {
            if let Some(shape) = scene.get_mut::<CollisionShapeComponent>(id) {
                shape.set_update_link(Some(UpdateLink::new(id, self.shape_updates.clone())));
            }
            self.commands.push(Command::Create {
                kind: ObjectKind::Shape,
                id,
            });
        } else if type_id == TypeId::of::<CharacterControllerComponent>() {
            debug_assert!(
                scene.parent(entity).is_none(),
                "character controllers are only valid on root entities"
            );
            if let Some(component) = scene.get_mut::<CharacterControllerComponent>(id) {
                component.set_update_link(Some(UpdateLink::new(id, self.controller_updates.clone())));
            }
            self.commands.push(Command::Create {
                kind: ObjectKind::Controller,
                id,
            });
        } else if type_id == TypeId::of::<RenderGeometry>() || type_id == TypeId::of::<LandscapeComponent>() {
            self.retry_waiting_shapes(scene, entity);
        }
    }

    fn unregister_component(&mut self, scene: &mut Scene, entity: Entity, removed: RemovedComponent) {
        let id = removed.id();
        let removed = match removed.downcast::<BodyComponent>() {
            Ok(body) => return self.on_body_removed(scene, entity, id, body),
            Err(removed) => removed,
        };
        let removed = match removed.downcast::<CollisionShapeComponent>() {
            Ok(shape) => return self.on_shape_removed(scene, entity, id, shape),
            Err(removed) => removed,
        };
        let removed = match removed.downcast::<CharacterControllerComponent>() {
            Ok(component) => return self.on_controller_removed(id, component),
            Err(removed) => removed,
        };
        let removed = match removed.downcast::<VehicleCarComponent>() {
            Ok(car) => {
                self.vehicles.on_car_removed(&car);
                return;
            }
            Err(removed) => removed,
        };
        let removed = match removed.downcast::<VehicleTankComponent>() {
            Ok(tank) => {
                self.vehicles.on_tank_removed(&tank);
                return;
            }
            Err(removed) => removed,
        };
        if removed.is::<RenderGeometry>() {
            self.release_render_shapes(scene, entity, |g| {
                matches!(g, ShapeGeometry::Mesh | ShapeGeometry::ConvexHull)
            });
        } else if removed.is::<LandscapeComponent>() {
            self.release_render_shapes(scene, entity, |g| matches!(g, ShapeGeometry::HeightField));
        }
    }

    fn unregister_entity(&mut self, scene: &mut Scene, entity: Entity) {
        if let Some(collisions) = scene.singleton_mut::<CollisionSingleComponent>() {
            collisions.remove_entity(entity);
        }
        self.remembered_changes.remove(&entity);
        self.pending_forces.retain(|(target, _, _)| *target != entity);
    }

    fn process_fixed(&mut self, scene: &mut Scene, dt: f32) {
        self.stats.frames += 1;
        dispatch_events(scene, self);
        Self::ensure_collision_singleton(scene);
        self.complete_in_flight(scene);

        self.init_new_objects(scene);

        if !self.simulation_enabled {
            self.remembered_changes.extend(scene.take_transform_changes());
            self.update_components(scene);
            return;
        }

        self.sync_transforms(scene);
        if !self.submit(scene, dt) {
            self.finish_frame(scene, dt);
            return;
        }
        if self.fetch(scene, self.config.wait_for_fetch_finish) {
            self.finish_frame(scene, dt);
        } else {
            trace!("step not finished, post-step work deferred");
            self.stats.deferred_frames += 1;
            self.deferred_dt = Some(dt);
        }
    }

    fn prepare_for_remove(&mut self, scene: &mut Scene) {
        if self.world.is_running() {
            self.fetch(scene, true);
        }
        self.deferred_dt = None;
        for object in self.commands.take_destroys() {
            self.release_native(object);
        }
        self.commands.clear();
        self.body_updates.clear();
        self.shape_updates.clear();
        self.controller_updates.clear();
        self.pending_forces.clear();
        self.teleported.clear();
        self.moved_by_transform.clear();
        self.masked.clear();
        self.remembered_changes.clear();
        self.waiting_for_render.clear();
        self.creation_failures.clear();

        self.vehicles.release_all(scene);
        self.deinit_components(scene);
        self.actor_owners.clear();
        self.shape_owners.clear();
        self.live_controllers.clear();
        debug!("physics system prepared for removal");
    }

    fn name(&self) -> &str {
        "PhysicsSystem"
    }
}

impl Drop for PhysicsSystem {
    fn drop(&mut self) {
        if self.world.is_running() {
            if let Err(err) = self.world.fetch_results(true) {
                debug!("step in flight at drop failed: {}", err);
            }
        }
    }
}
