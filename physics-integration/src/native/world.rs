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
//! Native simulation world
//!
//! Stand-in for the rigid-body SDK the integration layer drives. It owns
//! every native object in handle arenas and exposes the SDK contract the
//! physics system relies on:
//!
//! - `simulate` computes a step into a hidden buffer and marks the world
//!   running; `fetch_results` publishes it (or reports the step failure);
//! - while a step is running, every structural or state mutation returns
//!   [`PhysicsError::StepInFlight`]; queries read the last fetched state;
//! - fetched steps report active actors, contact pairs and trigger entries.
//!
//! The solver itself is deliberately small: integrate, sweep CCD bodies,
//! resolve penetrations with sampled spheres, put resting bodies to sleep.

use crate::config::PhysicsConfig;
use crate::error::{PhysicsError, Result};
use crate::math::Pose;
use crate::native::query::{raycast_geometry, sweep_sphere_geometry, LocalHit, Ray, RaycastHit};
use crate::native::{
    pairs_collide, ActorHandle, BodyState, ControllerHandle, FilterData, HandleArena,
    Integrator, IntegratorKind, NativeGeometry, QueryFilter, ShapeHandle,
};
use glam::{Quat, Vec3};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const SLEEP_VELOCITY: f32 = 0.05;
const SLEEP_FRAMES: u32 = 30;
const CONTROLLER_ITERATIONS: usize = 4;

/// World creation parameters
#[derive(Debug, Clone)]
pub struct WorldDesc {
    /// Gravity
    pub gravity: Vec3,
    /// Worker threads used by the step and batched queries
    pub thread_count: u32,
    /// Scratch memory hint in bytes
    pub scratch_block_size: u32,
    /// Body integrator
    pub integrator: IntegratorKind,
    /// Initial timestep hint
    pub timestep: f32,
}

impl WorldDesc {
    /// Derive world parameters from the physics configuration
    pub fn from_config(config: &PhysicsConfig) -> Self {
        WorldDesc {
            gravity: config.gravity,
            thread_count: config.thread_count,
            scratch_block_size: config.simulation_block_size,
            integrator: config.integrator,
            timestep: config.fixed_timestep,
        }
    }
}

impl Default for WorldDesc {
    fn default() -> Self {
        WorldDesc::from_config(&PhysicsConfig::default())
    }
}

/// Surface material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeMaterial {
    /// Static friction coefficient
    pub static_friction: f32,
    /// Dynamic friction coefficient
    pub dynamic_friction: f32,
    /// Restitution in `[0, 1]`
    pub restitution: f32,
}

impl Default for NativeMaterial {
    fn default() -> Self {
        NativeMaterial {
            static_friction: 0.5,
            dynamic_friction: 0.5,
            restitution: 0.1,
        }
    }
}

/// Shape creation parameters
#[derive(Debug, Clone)]
pub struct ShapeDesc {
    /// Geometry
    pub geometry: NativeGeometry,
    /// Pose relative to the owning actor
    pub local_pose: Pose,
    /// Filter words
    pub filter: FilterData,
    /// Material name, unknown names use the default material
    pub material: String,
    /// Trigger shapes report overlaps instead of colliding
    pub trigger: bool,
}

impl ShapeDesc {
    /// Non-trigger shape at the actor origin
    pub fn new(geometry: NativeGeometry) -> Self {
        ShapeDesc {
            geometry,
            local_pose: Pose::IDENTITY,
            filter: FilterData::default(),
            material: String::new(),
            trigger: false,
        }
    }
}

/// Mutable state of a live shape, applied by [`NativeWorld::patch_shape`]
#[derive(Debug, Clone, Copy)]
pub struct ShapePatch<'a> {
    /// Filter words
    pub filter: FilterData,
    /// Material name
    pub material: &'a str,
    /// Trigger flag
    pub trigger: bool,
    /// Pose relative to the owning actor
    pub local_pose: Pose,
}

/// Actor body type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// Immovable
    Static,
    /// Solver-driven, or kinematic when flagged
    Dynamic,
}

/// Actor creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ActorDesc {
    /// Body type
    pub kind: ActorType,
    /// Initial world pose
    pub pose: Pose,
    /// Kinematic dynamic actors are moved by pose writes only
    pub kinematic: bool,
    /// Linear damping
    pub linear_damping: f32,
    /// Angular damping
    pub angular_damping: f32,
}

impl ActorDesc {
    /// Static actor at `pose`
    pub fn fixed(pose: Pose) -> Self {
        ActorDesc {
            kind: ActorType::Static,
            pose,
            kinematic: false,
            linear_damping: 0.0,
            angular_damping: 0.05,
        }
    }

    /// Dynamic actor at `pose`
    pub fn dynamic(pose: Pose) -> Self {
        ActorDesc {
            kind: ActorType::Dynamic,
            ..ActorDesc::fixed(pose)
        }
    }
}

/// How `add_force` interprets its vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    /// Mass-scaled, applied over the next step
    Force,
    /// Mass-scaled, applied immediately
    Impulse,
    /// Velocity delta applied immediately
    VelocityChange,
    /// Acceleration applied over the next step
    Acceleration,
}

/// One contact point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// World position
    pub position: Vec3,
    /// Normal pointing from the second shape towards the first
    pub normal: Vec3,
    /// Negative when penetrating
    pub separation: f32,
}

/// Touching shape pair reported by a step
#[derive(Debug, Clone, PartialEq)]
pub struct ContactReport {
    /// Actor pair
    pub actors: [ActorHandle; 2],
    /// Shape pair
    pub shapes: [ShapeHandle; 2],
    /// Contact points
    pub points: Vec<ContactPoint>,
}

/// A shape that started overlapping a trigger shape during a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReport {
    /// Actor owning the trigger
    pub trigger_actor: ActorHandle,
    /// Trigger shape
    pub trigger_shape: ShapeHandle,
    /// Actor that entered
    pub other_actor: ActorHandle,
    /// Shape that entered
    pub other_shape: ShapeHandle,
}

/// Controller move result flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionFlags(u8);

impl CollisionFlags {
    /// Touched something to the side
    pub const SIDES: CollisionFlags = CollisionFlags(1 << 0);
    /// Touched something above
    pub const UP: CollisionFlags = CollisionFlags(1 << 1);
    /// Touched something below
    pub const DOWN: CollisionFlags = CollisionFlags(1 << 2);

    /// No collision
    pub fn empty() -> Self {
        CollisionFlags(0)
    }

    /// Check whether every bit of `other` is set
    pub fn contains(&self, other: CollisionFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Check whether no bit is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, other: CollisionFlags) {
        self.0 |= other.0;
    }
}

/// Character controller volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerGeometry {
    /// Upright capsule; `height` is the cylinder length
    Capsule {
        /// Cap radius
        radius: f32,
        /// Cylinder length between the caps
        height: f32,
    },
    /// Upright box
    Box {
        /// Half extent along the up axis
        half_height: f32,
        /// Half extent along the forward axis
        half_forward_extent: f32,
        /// Half extent along the side axis
        half_side_extent: f32,
    },
}

impl ControllerGeometry {
    fn validate(&self) -> Result<()> {
        let ok = match *self {
            ControllerGeometry::Capsule { radius, height } => {
                radius > 0.0 && radius.is_finite() && height >= 0.0 && height.is_finite()
            }
            ControllerGeometry::Box {
                half_height,
                half_forward_extent,
                half_side_extent,
            } => {
                let e = Vec3::new(half_side_extent, half_forward_extent, half_height);
                e.is_finite() && e.min_element() > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::invalid_geometry(
                "controller",
                "extents must be positive",
            ))
        }
    }

    fn half_total_height(&self) -> f32 {
        match *self {
            ControllerGeometry::Capsule { radius, height } => radius + height * 0.5,
            ControllerGeometry::Box { half_height, .. } => half_height,
        }
    }

    fn shape_geometry(&self) -> NativeGeometry {
        match *self {
            ControllerGeometry::Capsule { radius, height } => NativeGeometry::Capsule {
                radius,
                half_height: height * 0.5,
            },
            ControllerGeometry::Box {
                half_height,
                half_forward_extent,
                half_side_extent,
            } => NativeGeometry::Box {
                half_extents: Vec3::new(half_side_extent, half_forward_extent, half_height),
            },
        }
    }

    /// Sweep sphere radius and sphere centre heights above the foot
    fn sweep_samples(&self, contact_offset: f32) -> (f32, Vec<f32>) {
        let (radius, bottom, top) = match *self {
            ControllerGeometry::Capsule { radius, height } => {
                (radius, contact_offset + radius, contact_offset + radius + height)
            }
            ControllerGeometry::Box {
                half_height,
                half_forward_extent,
                half_side_extent,
            } => {
                let r = half_forward_extent.min(half_side_extent).min(half_height);
                let bottom = contact_offset + r;
                (r, bottom, (contact_offset + 2.0 * half_height - r).max(bottom))
            }
        };
        let mut heights = vec![bottom];
        if top > bottom {
            heights.push((bottom + top) * 0.5);
            heights.push(top);
        }
        (radius, heights)
    }
}

/// Character controller creation parameters
#[derive(Debug, Clone)]
pub struct ControllerDesc {
    /// Volume
    pub geometry: ControllerGeometry,
    /// Initial foot position
    pub foot_position: Vec3,
    /// Unit up axis
    pub up: Vec3,
    /// Skin kept between the volume and obstacles
    pub contact_offset: f32,
    /// Largest step climbed without jumping
    pub step_offset: f32,
    /// Prevent climbing on top of steep capsules
    pub constrained_climbing: bool,
    /// Filter words of the controller shape
    pub filter: FilterData,
}

/// Counters of native calls, read by tests and the debug overlay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeStats {
    /// Shapes created
    pub shapes_created: u64,
    /// Shapes released
    pub shapes_released: u64,
    /// Actors created
    pub actors_created: u64,
    /// Actors released
    pub actors_released: u64,
    /// Controllers created
    pub controllers_created: u64,
    /// Controllers released
    pub controllers_released: u64,
    /// `simulate` calls that started a step
    pub simulate_calls: u64,
    /// `fetch_results` calls
    pub fetch_calls: u64,
    /// Batched raycast dispatches
    pub batched_dispatches: u64,
    /// Individual raycasts, batched or not
    pub raycast_queries: u64,
    /// `patch_shape` calls
    pub shape_patches: u64,
}

/// Debug visualization switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visualization {
    /// Shape outlines
    pub collision_shapes: bool,
    /// Linear velocity of dynamic bodies
    pub body_linear_velocity: bool,
    /// Angular velocity of dynamic bodies
    pub body_angular_velocity: bool,
    /// Contact points of the last step
    pub contact_points: bool,
}

/// Coloured line segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    /// Start
    pub start: Vec3,
    /// End
    pub end: Vec3,
    /// `0xRRGGBB`
    pub color: u32,
}

/// Coloured triangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugTriangle {
    /// Corners
    pub corners: [Vec3; 3],
    /// `0xRRGGBB`
    pub color: u32,
}

/// Coloured point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugPoint {
    /// Position
    pub position: Vec3,
    /// `0xRRGGBB`
    pub color: u32,
}

/// Debug geometry produced by the native world
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugRenderBuffer {
    /// Lines
    pub lines: Vec<DebugLine>,
    /// Triangles
    pub triangles: Vec<DebugTriangle>,
    /// Points
    pub points: Vec<DebugPoint>,
}

impl DebugRenderBuffer {
    /// Check whether the buffer holds nothing
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.triangles.is_empty() && self.points.is_empty()
    }
}

const COLOR_STATIC: u32 = 0x00ff00;
const COLOR_DYNAMIC: u32 = 0xffffff;
const COLOR_KINEMATIC: u32 = 0x0080ff;
const COLOR_TRIGGER: u32 = 0xffff00;
const COLOR_LINEAR_VELOCITY: u32 = 0xff0000;
const COLOR_ANGULAR_VELOCITY: u32 = 0xff00ff;
const COLOR_CONTACT: u32 = 0xff8000;

struct ShapeData {
    geometry: NativeGeometry,
    local_pose: Pose,
    filter: FilterData,
    material: String,
    trigger: bool,
    actor: Option<ActorHandle>,
}

struct ActorData {
    kind: ActorType,
    pose: Pose,
    shapes: Vec<ShapeHandle>,
    kinematic: bool,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    mass: f32,
    inertia: Vec3,
    pending_force: Vec3,
    pending_torque: Vec3,
    previous_acceleration: Option<Vec3>,
    sleeping: bool,
    sleep_frames: u32,
}

impl ActorData {
    fn is_simulated(&self) -> bool {
        self.kind == ActorType::Dynamic && !self.kinematic && !self.sleeping
    }

    fn wake(&mut self) {
        self.sleeping = false;
        self.sleep_frames = 0;
    }

    fn body_state(&self) -> BodyState {
        BodyState {
            position: self.pose.position,
            rotation: self.pose.rotation,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            inv_mass: if self.mass > 0.0 { 1.0 / self.mass } else { 0.0 },
            inv_inertia: Vec3::new(
                inverse_or_zero(self.inertia.x),
                inverse_or_zero(self.inertia.y),
                inverse_or_zero(self.inertia.z),
            ),
            force: self.pending_force,
            torque: self.pending_torque,
            linear_damping: self.linear_damping,
            angular_damping: self.angular_damping,
            previous_acceleration: self.previous_acceleration,
        }
    }
}

fn inverse_or_zero(v: f32) -> f32 {
    if v > 0.0 {
        1.0 / v
    } else {
        0.0
    }
}

struct ControllerData {
    geometry: ControllerGeometry,
    up: Vec3,
    foot: Vec3,
    contact_offset: f32,
    step_offset: f32,
    constrained_climbing: bool,
    actor: ActorHandle,
    shape: ShapeHandle,
}

struct SimulatedBody {
    actor: ActorHandle,
    state: BodyState,
    sleeping: bool,
    sleep_frames: u32,
}

struct StepOutput {
    bodies: Vec<SimulatedBody>,
    active: Vec<ActorHandle>,
    contacts: Vec<ContactReport>,
    triggers: Vec<TriggerReport>,
    overlaps: HashSet<(ShapeHandle, ShapeHandle)>,
}

struct PendingStep {
    output: StepOutput,
    polls_remaining: u32,
    failure: Option<String>,
}

/// Native simulation world
pub struct NativeWorld {
    gravity: Vec3,
    scratch_block_size: u32,
    integrator: Box<dyn Integrator>,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
    shapes: HandleArena<crate::native::Shape, ShapeData>,
    actors: HandleArena<crate::native::Actor, ActorData>,
    controllers: HandleArena<crate::native::Controller, ControllerData>,
    materials: HashMap<String, NativeMaterial>,
    pending: Option<PendingStep>,
    step_latency: u32,
    injected_failure: Option<String>,
    active: Vec<ActorHandle>,
    contacts: Vec<ContactReport>,
    triggers: Vec<TriggerReport>,
    overlaps: HashSet<(ShapeHandle, ShapeHandle)>,
    visualization: Visualization,
    stats: NativeStats,
}

impl NativeWorld {
    /// Create a world
    pub fn new(desc: &WorldDesc) -> Self {
        #[cfg(feature = "parallel")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(desc.thread_count.max(1) as usize)
            .build()
            .map_err(|e| debug!("using the global rayon pool: {}", e))
            .ok();

        let timestep = if desc.timestep > 0.0 && desc.timestep.is_finite() {
            desc.timestep
        } else {
            1.0 / 60.0
        };

        NativeWorld {
            gravity: desc.gravity,
            scratch_block_size: desc.scratch_block_size,
            integrator: desc.integrator.create(timestep),
            #[cfg(feature = "parallel")]
            pool,
            shapes: HandleArena::new(),
            actors: HandleArena::new(),
            controllers: HandleArena::new(),
            materials: HashMap::new(),
            pending: None,
            step_latency: 0,
            injected_failure: None,
            active: Vec::new(),
            contacts: Vec::new(),
            triggers: Vec::new(),
            overlaps: HashSet::new(),
            visualization: Visualization::default(),
            stats: NativeStats::default(),
        }
    }

    /// Gravity
    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Scratch memory size the world was created with
    pub fn scratch_block_size(&self) -> u32 {
        self.scratch_block_size
    }

    /// Name of the body integrator
    pub fn integrator_name(&self) -> &str {
        self.integrator.name()
    }

    /// Native call counters
    pub fn stats(&self) -> NativeStats {
        self.stats
    }

    /// Live shape count, controller shapes excluded
    pub fn shape_count(&self) -> usize {
        self.shapes.len() - self.controllers.len()
    }

    /// Live actor count, controller actors excluded
    pub fn actor_count(&self) -> usize {
        self.actors.len() - self.controllers.len()
    }

    /// Live controller count
    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Whether a step has been submitted and not yet fetched
    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_running() {
            Err(PhysicsError::StepInFlight)
        } else {
            Ok(())
        }
    }

    /// Number of non-blocking polls a submitted step stays unfinished for
    pub fn set_step_latency(&mut self, polls: u32) {
        self.step_latency = polls;
    }

    /// Make the next submitted step fail when fetched
    pub fn inject_step_failure(&mut self, reason: impl Into<String>) {
        self.injected_failure = Some(reason.into());
    }

    /// Register or replace a named material
    pub fn register_material(&mut self, name: impl Into<String>, material: NativeMaterial) {
        self.materials.insert(name.into(), material);
    }

    /// Material by name, falling back to the default material
    pub fn material(&self, name: &str) -> NativeMaterial {
        self.materials.get(name).copied().unwrap_or_default()
    }

    // ---- shapes -------------------------------------------------------

    /// Create a detached shape
    pub fn create_shape(&mut self, desc: ShapeDesc) -> Result<ShapeHandle> {
        self.ensure_idle()?;
        desc.geometry.validate()?;
        if !desc.local_pose.position.is_finite() || !desc.local_pose.rotation.is_finite() {
            return Err(PhysicsError::invalid_geometry(
                desc.geometry.kind(),
                "local pose is not finite",
            ));
        }
        let handle = self.shapes.insert(ShapeData {
            geometry: desc.geometry,
            local_pose: desc.local_pose,
            filter: desc.filter,
            material: desc.material,
            trigger: desc.trigger,
            actor: None,
        });
        self.stats.shapes_created += 1;
        Ok(handle)
    }

    /// Release a shape, detaching it first
    pub fn release_shape(&mut self, shape: ShapeHandle) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .shapes
            .remove(shape)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })?;
        if let Some(actor) = data.actor.and_then(|a| self.actors.get_mut(a)) {
            actor.shapes.retain(|s| *s != shape);
        }
        self.overlaps.retain(|(a, b)| *a != shape && *b != shape);
        self.stats.shapes_released += 1;
        Ok(())
    }

    /// Whether a shape handle is live
    pub fn contains_shape(&self, shape: ShapeHandle) -> bool {
        self.shapes.contains(shape)
    }

    /// Attach a detached shape to an actor
    pub fn attach_shape(&mut self, actor: ActorHandle, shape: ShapeHandle) -> Result<()> {
        self.ensure_idle()?;
        let actor_data = self
            .actors
            .get(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        let shape_data = self
            .shapes
            .get(shape)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })?;
        if shape_data.actor == Some(actor) {
            return Ok(());
        }
        if shape_data.actor.is_some() {
            return Err(PhysicsError::HandleAlreadyInstalled { kind: "shape" });
        }
        if actor_data.kind == ActorType::Dynamic
            && !actor_data.kinematic
            && !shape_data.geometry.supports_dynamic()
        {
            return Err(PhysicsError::invalid_geometry(
                shape_data.geometry.kind(),
                "not supported on non-kinematic dynamic actors",
            ));
        }

        if let Some(s) = self.shapes.get_mut(shape) {
            s.actor = Some(actor);
        }
        if let Some(a) = self.actors.get_mut(actor) {
            a.shapes.push(shape);
            a.wake();
        }
        Ok(())
    }

    /// Detach a shape from its actor, keeping it alive
    pub fn detach_shape(&mut self, shape: ShapeHandle) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .shapes
            .get_mut(shape)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })?;
        if let Some(actor) = data.actor.take().and_then(|a| self.actors.get_mut(a)) {
            actor.shapes.retain(|s| *s != shape);
            actor.wake();
        }
        Ok(())
    }

    /// Actor a shape is attached to
    pub fn shape_actor(&self, shape: ShapeHandle) -> Option<ActorHandle> {
        self.shapes.get(shape).and_then(|s| s.actor)
    }

    /// Shape geometry
    pub fn shape_geometry(&self, shape: ShapeHandle) -> Option<&NativeGeometry> {
        self.shapes.get(shape).map(|s| &s.geometry)
    }

    /// Shape filter words
    pub fn shape_filter(&self, shape: ShapeHandle) -> Option<FilterData> {
        self.shapes.get(shape).map(|s| s.filter)
    }

    /// Replace a shape's filter words
    pub fn set_shape_filter(&mut self, shape: ShapeHandle, filter: FilterData) -> Result<()> {
        self.ensure_idle()?;
        self.shapes
            .get_mut(shape)
            .map(|s| s.filter = filter)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })
    }

    /// Shape pose relative to its actor
    pub fn shape_local_pose(&self, shape: ShapeHandle) -> Option<Pose> {
        self.shapes.get(shape).map(|s| s.local_pose)
    }

    /// Set a shape's local pose; returns `false` when the pose was unchanged
    pub fn set_shape_local_pose(&mut self, shape: ShapeHandle, pose: Pose) -> Result<bool> {
        self.ensure_idle()?;
        let data = self
            .shapes
            .get_mut(shape)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })?;
        if data.local_pose.same_as(&pose) {
            return Ok(false);
        }
        data.local_pose = pose;
        if let Some(actor) = data.actor.and_then(|a| self.actors.get_mut(a)) {
            actor.wake();
        }
        Ok(true)
    }

    /// Replace filter, material, trigger flag and local pose of a shape at once
    pub fn patch_shape(&mut self, shape: ShapeHandle, patch: ShapePatch<'_>) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .shapes
            .get_mut(shape)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })?;
        data.filter = patch.filter;
        data.trigger = patch.trigger;
        if data.material != patch.material {
            data.material = patch.material.to_string();
        }
        let moved = !data.local_pose.same_as(&patch.local_pose);
        data.local_pose = patch.local_pose;
        if moved {
            if let Some(actor) = data.actor.and_then(|a| self.actors.get_mut(a)) {
                actor.wake();
            }
        }
        self.stats.shape_patches += 1;
        Ok(())
    }

    /// Shape material name
    pub fn shape_material(&self, shape: ShapeHandle) -> Option<&str> {
        self.shapes.get(shape).map(|s| s.material.as_str())
    }

    /// Replace a shape's material
    pub fn set_shape_material(&mut self, shape: ShapeHandle, material: &str) -> Result<()> {
        self.ensure_idle()?;
        self.shapes
            .get_mut(shape)
            .map(|s| s.material = material.to_string())
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })
    }

    /// Whether a shape is a trigger
    pub fn is_trigger(&self, shape: ShapeHandle) -> bool {
        self.shapes.get(shape).map_or(false, |s| s.trigger)
    }

    /// Switch a shape between trigger and solid
    pub fn set_shape_trigger(&mut self, shape: ShapeHandle, trigger: bool) -> Result<()> {
        self.ensure_idle()?;
        self.shapes
            .get_mut(shape)
            .map(|s| s.trigger = trigger)
            .ok_or(PhysicsError::StaleHandle { kind: "shape" })
    }

    /// World pose of an attached shape
    pub fn shape_world_pose(&self, shape: ShapeHandle) -> Option<Pose> {
        let data = self.shapes.get(shape)?;
        let actor = self.actors.get(data.actor?)?;
        Some(actor.pose.compose(&data.local_pose))
    }

    // ---- actors -------------------------------------------------------

    /// Create an actor without shapes
    pub fn create_actor(&mut self, desc: ActorDesc) -> Result<ActorHandle> {
        self.ensure_idle()?;
        if !desc.pose.position.is_finite() || !desc.pose.rotation.is_finite() {
            return Err(PhysicsError::StepFailed("actor pose is not finite".to_string()));
        }
        let handle = self.actors.insert(ActorData {
            kind: desc.kind,
            pose: desc.pose,
            shapes: Vec::new(),
            kinematic: desc.kinematic,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            linear_damping: desc.linear_damping,
            angular_damping: desc.angular_damping,
            mass: 1.0,
            inertia: Vec3::ONE,
            pending_force: Vec3::ZERO,
            pending_torque: Vec3::ZERO,
            previous_acceleration: None,
            sleeping: false,
            sleep_frames: 0,
        });
        self.stats.actors_created += 1;
        Ok(handle)
    }

    /// Release an actor; its shapes are detached, not released
    pub fn release_actor(&mut self, actor: ActorHandle) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .remove(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        for shape in data.shapes {
            if let Some(s) = self.shapes.get_mut(shape) {
                s.actor = None;
            }
        }
        self.active.retain(|a| *a != actor);
        self.stats.actors_released += 1;
        Ok(())
    }

    /// Whether an actor handle is live
    pub fn contains_actor(&self, actor: ActorHandle) -> bool {
        self.actors.contains(actor)
    }

    /// Actor body type
    pub fn actor_type(&self, actor: ActorHandle) -> Option<ActorType> {
        self.actors.get(actor).map(|a| a.kind)
    }

    /// Shapes attached to an actor
    pub fn actor_shapes(&self, actor: ActorHandle) -> &[ShapeHandle] {
        self.actors
            .get(actor)
            .map(|a| a.shapes.as_slice())
            .unwrap_or(&[])
    }

    /// Actor world pose
    pub fn actor_pose(&self, actor: ActorHandle) -> Option<Pose> {
        self.actors.get(actor).map(|a| a.pose)
    }

    /// Teleport an actor; returns `false` when the pose was unchanged
    ///
    /// Unchanged poses do not wake the actor.
    pub fn set_actor_pose(&mut self, actor: ActorHandle, pose: Pose) -> Result<bool> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        if data.pose.same_as(&pose) {
            return Ok(false);
        }
        data.pose = pose;
        data.wake();
        Ok(true)
    }

    /// Whether an actor is a kinematic dynamic actor
    pub fn is_kinematic(&self, actor: ActorHandle) -> bool {
        self.actors.get(actor).map_or(false, |a| a.kinematic)
    }

    /// Switch a dynamic actor between kinematic and simulated
    pub fn set_kinematic(&mut self, actor: ActorHandle, kinematic: bool) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        if data.kind == ActorType::Dynamic && data.kinematic != kinematic {
            data.kinematic = kinematic;
            data.previous_acceleration = None;
            if kinematic {
                data.linear_velocity = Vec3::ZERO;
                data.angular_velocity = Vec3::ZERO;
            }
            data.wake();
        }
        Ok(())
    }

    /// Linear velocity
    pub fn linear_velocity(&self, actor: ActorHandle) -> Option<Vec3> {
        self.actors.get(actor).map(|a| a.linear_velocity)
    }

    /// Angular velocity
    pub fn angular_velocity(&self, actor: ActorHandle) -> Option<Vec3> {
        self.actors.get(actor).map(|a| a.angular_velocity)
    }

    /// Set linear velocity
    pub fn set_linear_velocity(&mut self, actor: ActorHandle, velocity: Vec3) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        data.linear_velocity = velocity;
        data.wake();
        Ok(())
    }

    /// Set angular velocity
    pub fn set_angular_velocity(&mut self, actor: ActorHandle, velocity: Vec3) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        data.angular_velocity = velocity;
        data.wake();
        Ok(())
    }

    /// Set damping coefficients
    pub fn set_damping(&mut self, actor: ActorHandle, linear: f32, angular: f32) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        data.linear_damping = linear.max(0.0);
        data.angular_damping = angular.max(0.0);
        Ok(())
    }

    /// Actor mass
    pub fn mass(&self, actor: ActorHandle) -> Option<f32> {
        self.actors.get(actor).map(|a| a.mass)
    }

    /// Diagonal inertia
    pub fn inertia(&self, actor: ActorHandle) -> Option<Vec3> {
        self.actors.get(actor).map(|a| a.inertia)
    }

    /// Set mass and diagonal inertia
    pub fn set_mass_properties(&mut self, actor: ActorHandle, mass: f32, inertia: Vec3) -> Result<()> {
        self.ensure_idle()?;
        if !(mass > 0.0 && mass.is_finite()) || !inertia.is_finite() || inertia.min_element() < 0.0 {
            return Err(PhysicsError::StepFailed(format!(
                "invalid mass properties: mass {}, inertia {:?}",
                mass, inertia
            )));
        }
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        data.mass = mass;
        data.inertia = inertia;
        Ok(())
    }

    /// Apply a force or impulse to a dynamic actor
    pub fn add_force(&mut self, actor: ActorHandle, force: Vec3, mode: ForceMode) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        if data.kind != ActorType::Dynamic || data.kinematic {
            return Ok(());
        }
        match mode {
            ForceMode::Force => data.pending_force += force,
            ForceMode::Acceleration => data.pending_force += force * data.mass,
            ForceMode::Impulse => data.linear_velocity += force / data.mass,
            ForceMode::VelocityChange => data.linear_velocity += force,
        }
        data.wake();
        Ok(())
    }

    /// Apply a torque to a dynamic actor over the next step
    pub fn add_torque(&mut self, actor: ActorHandle, torque: Vec3) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .actors
            .get_mut(actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        if data.kind == ActorType::Dynamic && !data.kinematic {
            data.pending_torque += torque;
            data.wake();
        }
        Ok(())
    }

    /// Whether a dynamic actor is asleep
    pub fn is_sleeping(&self, actor: ActorHandle) -> bool {
        self.actors.get(actor).map_or(false, |a| a.sleeping)
    }

    /// Wake a sleeping actor
    pub fn wake_up(&mut self, actor: ActorHandle) -> Result<()> {
        self.ensure_idle()?;
        self.actors
            .get_mut(actor)
            .map(ActorData::wake)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })
    }

    // ---- stepping -----------------------------------------------------

    /// Start a step of `dt` seconds
    pub fn simulate(&mut self, dt: f32) -> Result<()> {
        self.ensure_idle()?;
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(PhysicsError::StepFailed(format!("invalid step length {}", dt)));
        }
        self.stats.simulate_calls += 1;
        if (self.integrator.timestep() - dt).abs() > f32::EPSILON {
            self.integrator.set_timestep(dt);
        }

        let mut bodies: Vec<SimulatedBody> = Vec::new();
        for (handle, actor) in self.actors.iter_mut() {
            if actor.is_simulated() {
                bodies.push(SimulatedBody {
                    actor: handle,
                    state: actor.body_state(),
                    sleeping: false,
                    sleep_frames: actor.sleep_frames,
                });
            }
            actor.pending_force = Vec3::ZERO;
            actor.pending_torque = Vec3::ZERO;
        }

        let previous: Vec<Pose> = bodies
            .iter()
            .map(|b| Pose::new(b.state.position, b.state.rotation))
            .collect();
        let mut states: Vec<BodyState> = bodies.iter().map(|b| b.state).collect();
        let integrator = &self.integrator;
        let gravity = self.gravity;

        #[cfg(feature = "parallel")]
        let integrated = match &self.pool {
            Some(pool) => pool.install(|| integrator.integrate(&mut states, gravity)),
            None => integrator.integrate(&mut states, gravity),
        };
        #[cfg(not(feature = "parallel"))]
        let integrated = integrator.integrate(&mut states, gravity);

        self.sweep_ccd_bodies(&bodies, &previous, &mut states);
        let index: HashMap<ActorHandle, usize> =
            bodies.iter().enumerate().map(|(i, b)| (b.actor, i)).collect();
        let (contacts, triggers, overlaps) = self.resolve_contacts(&index, &mut states);

        let mut active = Vec::new();
        for (i, body) in bodies.iter_mut().enumerate() {
            let state = &mut states[i];
            if state.linear_velocity.length() < SLEEP_VELOCITY
                && state.angular_velocity.length() < SLEEP_VELOCITY
            {
                body.sleep_frames += 1;
            } else {
                body.sleep_frames = 0;
            }
            if body.sleep_frames >= SLEEP_FRAMES {
                body.sleeping = true;
                state.linear_velocity = Vec3::ZERO;
                state.angular_velocity = Vec3::ZERO;
            }
            body.state = *state;
            if !previous[i].same_as(&Pose::new(state.position, state.rotation)) {
                active.push(body.actor);
            }
        }

        trace!(
            "step {}: {} bodies integrated, {} active, {} contacts",
            self.stats.simulate_calls,
            integrated,
            active.len(),
            contacts.len()
        );

        self.pending = Some(PendingStep {
            output: StepOutput {
                bodies,
                active,
                contacts,
                triggers,
                overlaps,
            },
            polls_remaining: self.step_latency,
            failure: self.injected_failure.take(),
        });
        Ok(())
    }

    /// Finish the running step
    ///
    /// With `block == false` an unfinished step returns `Ok(false)` and stays
    /// running. `Ok(true)` means the results are published. A failed step is
    /// discarded: poses keep their pre-step values and the error is
    /// returned. Returns `Ok(false)` when no step is running.
    pub fn fetch_results(&mut self, block: bool) -> Result<bool> {
        self.stats.fetch_calls += 1;
        let pending = match self.pending.as_mut() {
            Some(pending) => pending,
            None => return Ok(false),
        };
        if !block && pending.polls_remaining > 0 {
            pending.polls_remaining -= 1;
            return Ok(false);
        }

        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => return Ok(false),
        };
        if let Some(reason) = pending.failure {
            self.active.clear();
            self.contacts.clear();
            self.triggers.clear();
            return Err(PhysicsError::StepFailed(reason));
        }

        let output = pending.output;
        for body in output.bodies {
            if let Some(actor) = self.actors.get_mut(body.actor) {
                actor.pose = Pose::new(body.state.position, body.state.rotation);
                actor.linear_velocity = body.state.linear_velocity;
                actor.angular_velocity = body.state.angular_velocity;
                actor.previous_acceleration = body.state.previous_acceleration;
                actor.sleeping = body.sleeping;
                actor.sleep_frames = body.sleep_frames;
            }
        }
        self.active = output.active;
        self.contacts = output.contacts;
        self.triggers = output.triggers;
        self.overlaps = output.overlaps;
        Ok(true)
    }

    /// Actors whose pose changed in the last fetched step
    pub fn active_actors(&self) -> &[ActorHandle] {
        &self.active
    }

    /// Touching pairs of the last fetched step
    pub fn contact_reports(&self) -> &[ContactReport] {
        &self.contacts
    }

    /// Trigger entries of the last fetched step
    pub fn trigger_reports(&self) -> &[TriggerReport] {
        &self.triggers
    }

    fn pose_in_step(&self, actor: ActorHandle, index: &HashMap<ActorHandle, usize>, states: &[BodyState]) -> Option<Pose> {
        match index.get(&actor) {
            Some(i) => Some(Pose::new(states[*i].position, states[*i].rotation)),
            None => self.actors.get(actor).map(|a| a.pose),
        }
    }

    fn sweep_ccd_bodies(&self, bodies: &[SimulatedBody], previous: &[Pose], states: &mut [BodyState]) {
        for (i, body) in bodies.iter().enumerate() {
            let actor = match self.actors.get(body.actor) {
                Some(actor) => actor,
                None => continue,
            };
            let radius = actor
                .shapes
                .iter()
                .filter_map(|s| self.shapes.get(*s))
                .filter(|s| s.filter.ccd() && !s.trigger)
                .flat_map(|s| s.geometry.contact_samples())
                .map(|(_, r)| r)
                .fold(f32::INFINITY, f32::min);
            if !radius.is_finite() {
                continue;
            }
            let radius = radius.max(0.01);
            let delta = states[i].position - previous[i].position;
            let length = delta.length();
            if length <= radius {
                continue;
            }
            let filter = match actor.shapes.iter().find_map(|s| self.shapes.get(*s)) {
                Some(shape) => QueryFilter::collision(shape.filter).excluding(body.actor),
                None => continue,
            };
            let dir = delta / length;
            if let Some(hit) = self.sweep_sphere_static(previous[i].position, radius, dir, length, &filter) {
                states[i].position = previous[i].position + dir * hit.distance;
                let vn = states[i].linear_velocity.dot(hit.normal);
                if vn < 0.0 {
                    states[i].linear_velocity -= hit.normal * vn;
                }
            }
        }
    }

    fn sweep_sphere_static(&self, center: Vec3, radius: f32, dir: Vec3, max: f32, filter: &QueryFilter) -> Option<RaycastHit> {
        self.shapes
            .iter()
            .filter_map(|(handle, shape)| {
                let actor_handle = shape.actor?;
                let actor = self.actors.get(actor_handle)?;
                if actor.is_simulated() || !filter.accepts(actor_handle, &shape.filter, shape.trigger) {
                    return None;
                }
                let pose = actor.pose.compose(&shape.local_pose);
                let hit = sweep_sphere_geometry(
                    &shape.geometry,
                    pose.inverse_transform_point(center),
                    radius,
                    pose.rotation.inverse() * dir,
                    max,
                )?;
                Some(world_hit(actor_handle, handle, &pose, center, dir, hit))
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn resolve_contacts(
        &self,
        index: &HashMap<ActorHandle, usize>,
        states: &mut [BodyState],
    ) -> (Vec<ContactReport>, Vec<TriggerReport>, HashSet<(ShapeHandle, ShapeHandle)>) {
        let mut contacts = Vec::new();
        let mut triggers = Vec::new();
        let mut overlaps = HashSet::new();

        let movers: Vec<ActorHandle> = self
            .actors
            .iter()
            .filter(|(_, a)| a.kind == ActorType::Dynamic && !a.shapes.is_empty())
            .map(|(h, _)| h)
            .collect();

        for a_handle in movers {
            let a_simulated = index.contains_key(&a_handle);
            let a_shapes = self.actor_shapes(a_handle).to_vec();
            for (b_handle, b_actor) in self.actors.iter() {
                if b_handle == a_handle {
                    continue;
                }
                let b_simulated = index.contains_key(&b_handle);
                let b_mover = b_actor.kind == ActorType::Dynamic;
                // pairs of movers are sampled from the lower handle only
                if b_mover && b_handle < a_handle {
                    continue;
                }
                for sa in &a_shapes {
                    for sb in &b_actor.shapes {
                        let (shape_a, shape_b) = match (self.shapes.get(*sa), self.shapes.get(*sb)) {
                            (Some(x), Some(y)) => (x, y),
                            _ => continue,
                        };
                        if !pairs_collide(&shape_a.filter, &shape_b.filter) {
                            continue;
                        }
                        let either_trigger = shape_a.trigger || shape_b.trigger;
                        if !either_trigger && !a_simulated && !b_simulated {
                            continue;
                        }
                        let (pose_a, pose_b) = match (
                            self.pose_in_step(a_handle, index, states),
                            self.pose_in_step(b_handle, index, states),
                        ) {
                            (Some(pa), Some(pb)) => (pa.compose(&shape_a.local_pose), pb.compose(&shape_b.local_pose)),
                            _ => continue,
                        };

                        let points = sample_contacts(shape_a, &pose_a, shape_b, &pose_b);
                        if points.is_empty() {
                            continue;
                        }

                        if either_trigger {
                            let (trigger_actor, trigger_shape, other_actor, other_shape) = if shape_b.trigger {
                                (b_handle, *sb, a_handle, *sa)
                            } else {
                                (a_handle, *sa, b_handle, *sb)
                            };
                            let key = (trigger_shape, other_shape);
                            if !self.overlaps.contains(&key) {
                                triggers.push(TriggerReport {
                                    trigger_actor,
                                    trigger_shape,
                                    other_actor,
                                    other_shape,
                                });
                            }
                            overlaps.insert(key);
                            continue;
                        }

                        let material_a = self.material(&shape_a.material);
                        let material_b = self.material(&shape_b.material);
                        let friction = 0.5 * (material_a.dynamic_friction + material_b.dynamic_friction);
                        let restitution = 0.5 * (material_a.restitution + material_b.restitution);
                        resolve_pair(
                            &points,
                            index.get(&a_handle).copied(),
                            index.get(&b_handle).copied(),
                            states,
                            friction,
                            restitution,
                        );

                        contacts.push(ContactReport {
                            actors: [a_handle, b_handle],
                            shapes: [*sa, *sb],
                            points,
                        });
                    }
                }
            }
        }
        (contacts, triggers, overlaps)
    }

    // ---- queries ------------------------------------------------------

    fn raycast_hits(&self, ray: &Ray, filter: &QueryFilter) -> Vec<RaycastHit> {
        let mut hits: Vec<RaycastHit> = self
            .shapes
            .iter()
            .filter_map(|(handle, shape)| {
                let actor = shape.actor?;
                if !filter.accepts(actor, &shape.filter, shape.trigger) {
                    return None;
                }
                let pose = self.actors.get(actor)?.pose.compose(&shape.local_pose);
                let hit = raycast_geometry(
                    &shape.geometry,
                    pose.inverse_transform_point(ray.origin),
                    pose.rotation.inverse() * ray.direction,
                    ray.max_distance,
                )?;
                Some(world_hit(actor, handle, &pose, ray.origin, ray.direction, hit))
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    /// Raycast reporting every hit in ascending distance
    ///
    /// `callback` returns `false` to stop. Returns the number of hits
    /// delivered.
    pub fn raycast<F>(&mut self, ray: &Ray, filter: &QueryFilter, mut callback: F) -> usize
    where
        F: FnMut(&RaycastHit) -> bool,
    {
        self.stats.raycast_queries += 1;
        let mut delivered = 0;
        for hit in self.raycast_hits(ray, filter) {
            delivered += 1;
            if !callback(&hit) {
                break;
            }
        }
        delivered
    }

    /// Closest hit of one ray
    pub fn raycast_closest(&mut self, ray: &Ray, filter: &QueryFilter) -> Option<RaycastHit> {
        self.stats.raycast_queries += 1;
        self.raycast_hits(ray, filter).into_iter().next()
    }

    /// Resolve many rays in a single dispatch, closest hit per ray
    pub fn raycast_batch(&mut self, queries: &[(Ray, QueryFilter)]) -> Vec<Option<RaycastHit>> {
        self.stats.batched_dispatches += 1;
        self.stats.raycast_queries += queries.len() as u64;
        let world: &NativeWorld = self;

        #[cfg(feature = "parallel")]
        let run = || {
            queries
                .par_iter()
                .map(|(ray, filter)| world.raycast_hits(ray, filter).into_iter().next())
                .collect::<Vec<_>>()
        };
        #[cfg(not(feature = "parallel"))]
        let run = || {
            queries
                .iter()
                .map(|(ray, filter)| world.raycast_hits(ray, filter).into_iter().next())
                .collect::<Vec<_>>()
        };

        #[cfg(feature = "parallel")]
        let results = match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        #[cfg(not(feature = "parallel"))]
        let results = run();

        results
    }

    /// Sweep a sphere, closest hit
    pub fn sweep_sphere(&self, center: Vec3, radius: f32, dir: Vec3, max: f32, filter: &QueryFilter) -> Option<RaycastHit> {
        self.shapes
            .iter()
            .filter_map(|(handle, shape)| {
                let actor = shape.actor?;
                if !filter.accepts(actor, &shape.filter, shape.trigger) {
                    return None;
                }
                let pose = self.actors.get(actor)?.pose.compose(&shape.local_pose);
                let hit = sweep_sphere_geometry(
                    &shape.geometry,
                    pose.inverse_transform_point(center),
                    radius,
                    pose.rotation.inverse() * dir,
                    max,
                )?;
                Some(world_hit(actor, handle, &pose, center, dir, hit))
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    // ---- controllers --------------------------------------------------

    fn controller_actor_pose(geometry: &ControllerGeometry, up: Vec3, foot: Vec3, contact_offset: f32) -> Pose {
        Pose::new(
            foot + up * (contact_offset + geometry.half_total_height()),
            Quat::from_rotation_arc(Vec3::Z, up),
        )
    }

    /// Create a character controller with its kinematic actor and shape
    pub fn create_controller(&mut self, desc: ControllerDesc) -> Result<ControllerHandle> {
        self.ensure_idle()?;
        desc.geometry.validate()?;
        let up = crate::math::try_normalize(desc.up)
            .ok_or_else(|| PhysicsError::invalid_geometry("controller", "up axis must be non-zero"))?;
        if !desc.foot_position.is_finite() || !(desc.contact_offset > 0.0) {
            return Err(PhysicsError::invalid_geometry(
                "controller",
                "contact offset must be positive",
            ));
        }

        let pose = Self::controller_actor_pose(&desc.geometry, up, desc.foot_position, desc.contact_offset);
        let actor = self.actors.insert(ActorData {
            kind: ActorType::Dynamic,
            pose,
            shapes: Vec::new(),
            kinematic: true,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            mass: 1.0,
            inertia: Vec3::ONE,
            pending_force: Vec3::ZERO,
            pending_torque: Vec3::ZERO,
            previous_acceleration: None,
            sleeping: false,
            sleep_frames: 0,
        });
        let shape = self.shapes.insert(ShapeData {
            geometry: desc.geometry.shape_geometry(),
            local_pose: Pose::IDENTITY,
            filter: desc.filter,
            material: String::new(),
            trigger: false,
            actor: Some(actor),
        });
        if let Some(a) = self.actors.get_mut(actor) {
            a.shapes.push(shape);
        }

        let handle = self.controllers.insert(ControllerData {
            geometry: desc.geometry,
            up,
            foot: desc.foot_position,
            contact_offset: desc.contact_offset,
            step_offset: desc.step_offset,
            constrained_climbing: desc.constrained_climbing,
            actor,
            shape,
        });
        self.stats.controllers_created += 1;
        Ok(handle)
    }

    /// Release a controller together with its actor and shape
    pub fn release_controller(&mut self, controller: ControllerHandle) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .controllers
            .remove(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        self.shapes.remove(data.shape);
        self.actors.remove(data.actor);
        self.overlaps.retain(|(a, b)| *a != data.shape && *b != data.shape);
        self.stats.controllers_released += 1;
        Ok(())
    }

    /// Whether a controller handle is live
    pub fn contains_controller(&self, controller: ControllerHandle) -> bool {
        self.controllers.contains(controller)
    }

    /// Kinematic actor backing a controller
    pub fn controller_actor(&self, controller: ControllerHandle) -> Option<ActorHandle> {
        self.controllers.get(controller).map(|c| c.actor)
    }

    /// Shape backing a controller
    pub fn controller_shape(&self, controller: ControllerHandle) -> Option<ShapeHandle> {
        self.controllers.get(controller).map(|c| c.shape)
    }

    /// Controller foot position
    pub fn controller_foot_position(&self, controller: ControllerHandle) -> Option<Vec3> {
        self.controllers.get(controller).map(|c| c.foot)
    }

    /// Controller up axis, unit length
    pub fn controller_up(&self, controller: ControllerHandle) -> Option<Vec3> {
        self.controllers.get(controller).map(|c| c.up)
    }

    /// Controller step offset
    pub fn controller_step_offset(&self, controller: ControllerHandle) -> Option<f32> {
        self.controllers.get(controller).map(|c| c.step_offset)
    }

    /// Whether climbing is constrained
    pub fn controller_constrained_climbing(&self, controller: ControllerHandle) -> Option<bool> {
        self.controllers.get(controller).map(|c| c.constrained_climbing)
    }

    /// Controller contact offset
    pub fn controller_contact_offset(&self, controller: ControllerHandle) -> Option<f32> {
        self.controllers.get(controller).map(|c| c.contact_offset)
    }

    /// Controller volume
    pub fn controller_geometry(&self, controller: ControllerHandle) -> Option<ControllerGeometry> {
        self.controllers.get(controller).map(|c| c.geometry)
    }

    fn sync_controller_actor(&mut self, controller: ControllerHandle) {
        let (actor, pose) = match self.controllers.get(controller) {
            Some(c) => (c.actor, Self::controller_actor_pose(&c.geometry, c.up, c.foot, c.contact_offset)),
            None => return,
        };
        if let Some(a) = self.actors.get_mut(actor) {
            a.pose = pose;
        }
    }

    /// Place the controller's foot without collision
    pub fn set_controller_foot_position(&mut self, controller: ControllerHandle, foot: Vec3) -> Result<()> {
        self.ensure_idle()?;
        let data = self
            .controllers
            .get_mut(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        data.foot = foot;
        self.sync_controller_actor(controller);
        Ok(())
    }

    /// Resize a controller
    pub fn resize_controller(&mut self, controller: ControllerHandle, geometry: ControllerGeometry) -> Result<()> {
        self.ensure_idle()?;
        geometry.validate()?;
        let data = self
            .controllers
            .get_mut(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        data.geometry = geometry;
        let shape = data.shape;
        if let Some(s) = self.shapes.get_mut(shape) {
            s.geometry = geometry.shape_geometry();
        }
        self.sync_controller_actor(controller);
        Ok(())
    }

    /// Change the up axis used for grounding and the volume orientation
    pub fn set_controller_up(&mut self, controller: ControllerHandle, up: Vec3) -> Result<()> {
        self.ensure_idle()?;
        let up = crate::math::try_normalize(up)
            .ok_or_else(|| PhysicsError::invalid_geometry("controller", "up axis must be non-zero"))?;
        let data = self
            .controllers
            .get_mut(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        if data.up == up {
            return Ok(());
        }
        data.up = up;
        self.sync_controller_actor(controller);
        Ok(())
    }

    /// Set the controller skin width
    pub fn set_controller_contact_offset(&mut self, controller: ControllerHandle, offset: f32) -> Result<()> {
        self.ensure_idle()?;
        if !(offset > 0.0 && offset.is_finite()) {
            return Err(PhysicsError::invalid_geometry("controller", "contact offset must be positive"));
        }
        let data = self
            .controllers
            .get_mut(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        data.contact_offset = offset;
        self.sync_controller_actor(controller);
        Ok(())
    }

    /// Set the controller filter words
    pub fn set_controller_filter(&mut self, controller: ControllerHandle, filter: FilterData) -> Result<()> {
        let shape = self
            .controller_shape(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        self.set_shape_filter(shape, filter)
    }

    /// Move a controller by `displacement` with collide-and-slide
    pub fn move_controller(&mut self, controller: ControllerHandle, displacement: Vec3) -> Result<CollisionFlags> {
        self.ensure_idle()?;
        let data = self
            .controllers
            .get(controller)
            .ok_or(PhysicsError::StaleHandle { kind: "controller" })?;
        let filter_words = self.shape_filter(data.shape).unwrap_or_default();
        let filter = QueryFilter::collision(filter_words).excluding(data.actor);
        let up = data.up;
        let (sample_radius, heights) = data.geometry.sweep_samples(data.contact_offset);
        let sweep_radius = sample_radius + data.contact_offset;
        let mut foot = data.foot;
        let mut remaining = displacement;
        let mut flags = CollisionFlags::empty();

        for _ in 0..CONTROLLER_ITERATIONS {
            let length = remaining.length();
            if length < 1e-6 || !length.is_finite() {
                break;
            }
            let dir = remaining / length;

            let mut earliest: Option<RaycastHit> = None;
            for h in &heights {
                let center = foot + up * *h;
                if let Some(hit) = self.sweep_blocking(center, sweep_radius, dir, length, &filter) {
                    if earliest.map_or(true, |e| hit.distance < e.distance) {
                        earliest = Some(hit);
                    }
                }
            }

            match earliest {
                None => {
                    foot += remaining;
                    break;
                }
                Some(hit) => {
                    foot += dir * hit.distance;
                    let along_up = hit.normal.dot(up);
                    if along_up > 0.5 {
                        flags.insert(CollisionFlags::DOWN);
                    } else if along_up < -0.5 {
                        flags.insert(CollisionFlags::UP);
                    } else {
                        flags.insert(CollisionFlags::SIDES);
                    }
                    let left = remaining - dir * hit.distance;
                    remaining = left - hit.normal * left.dot(hit.normal);
                }
            }
        }

        if let Some(c) = self.controllers.get_mut(controller) {
            c.foot = foot;
        }
        self.sync_controller_actor(controller);
        Ok(flags)
    }

    /// Closest sweep hit that blocks motion along `dir`
    ///
    /// Initial overlaps whose normal does not oppose the motion are ignored so
    /// a resting volume can slide along the surface it stands on.
    fn sweep_blocking(&self, center: Vec3, radius: f32, dir: Vec3, max: f32, filter: &QueryFilter) -> Option<RaycastHit> {
        self.shapes
            .iter()
            .filter_map(|(handle, shape)| {
                let actor = shape.actor?;
                if !filter.accepts(actor, &shape.filter, shape.trigger) {
                    return None;
                }
                let pose = self.actors.get(actor)?.pose.compose(&shape.local_pose);
                let local_dir = pose.rotation.inverse() * dir;
                let hit = sweep_sphere_geometry(
                    &shape.geometry,
                    pose.inverse_transform_point(center),
                    radius,
                    local_dir,
                    max,
                )?;
                if hit.normal.dot(local_dir) > -1e-4 {
                    return None;
                }
                Some(world_hit(actor, handle, &pose, center, dir, hit))
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    // ---- debug visualization -------------------------------------------

    /// Visualization switches
    pub fn visualization(&self) -> Visualization {
        self.visualization
    }

    /// Replace the visualization switches
    pub fn set_visualization(&mut self, visualization: Visualization) {
        self.visualization = visualization;
    }

    /// Build debug geometry for the current state
    pub fn render_buffer(&self) -> Result<DebugRenderBuffer> {
        self.ensure_idle()?;
        let mut buffer = DebugRenderBuffer::default();
        let vis = self.visualization;

        for (_, actor) in self.actors.iter() {
            if vis.collision_shapes {
                for handle in &actor.shapes {
                    let shape = match self.shapes.get(*handle) {
                        Some(shape) => shape,
                        None => continue,
                    };
                    let color = if shape.trigger {
                        COLOR_TRIGGER
                    } else if actor.kind == ActorType::Static {
                        COLOR_STATIC
                    } else if actor.kinematic {
                        COLOR_KINEMATIC
                    } else {
                        COLOR_DYNAMIC
                    };
                    let pose = actor.pose.compose(&shape.local_pose);
                    for (a, b) in shape.geometry.wireframe() {
                        buffer.lines.push(DebugLine {
                            start: pose.transform_point(a),
                            end: pose.transform_point(b),
                            color,
                        });
                    }
                    if let NativeGeometry::TriangleMesh(data) = &shape.geometry {
                        for i in 0..data.triangle_count() {
                            let [a, b, c] = data.triangle(i);
                            buffer.triangles.push(DebugTriangle {
                                corners: [pose.transform_point(a), pose.transform_point(b), pose.transform_point(c)],
                                color,
                            });
                        }
                    }
                }
            }
            if actor.kind == ActorType::Dynamic && !actor.kinematic {
                if vis.body_linear_velocity {
                    buffer.lines.push(DebugLine {
                        start: actor.pose.position,
                        end: actor.pose.position + actor.linear_velocity,
                        color: COLOR_LINEAR_VELOCITY,
                    });
                }
                if vis.body_angular_velocity {
                    buffer.lines.push(DebugLine {
                        start: actor.pose.position,
                        end: actor.pose.position + actor.angular_velocity,
                        color: COLOR_ANGULAR_VELOCITY,
                    });
                }
            }
        }

        if vis.contact_points {
            for report in &self.contacts {
                for point in &report.points {
                    buffer.points.push(DebugPoint {
                        position: point.position,
                        color: COLOR_CONTACT,
                    });
                }
            }
        }
        Ok(buffer)
    }
}

fn world_hit(actor: ActorHandle, shape: ShapeHandle, pose: &Pose, origin: Vec3, dir: Vec3, hit: LocalHit) -> RaycastHit {
    RaycastHit {
        actor,
        shape,
        position: origin + dir * hit.distance,
        normal: pose.transform_vector(hit.normal),
        distance: hit.distance,
    }
}

/// Penetrating samples of shape `a` against shape `b`
fn sample_contacts(a: &ShapeData, pose_a: &Pose, b: &ShapeData, pose_b: &Pose) -> Vec<ContactPoint> {
    let mut points = Vec::new();
    for (local, radius) in a.geometry.contact_samples() {
        let world = pose_a.transform_point(local);
        let in_b = pose_b.inverse_transform_point(world);
        let separation = b.geometry.signed_distance(in_b) - radius;
        if separation < 0.0 {
            let normal = pose_b.transform_vector(b.geometry.normal_at(in_b));
            points.push(ContactPoint {
                position: world - normal * radius,
                normal,
                separation,
            });
        }
    }
    points
}

/// Push the pair apart along the deepest contact and remove approaching
/// normal velocity
fn resolve_pair(
    points: &[ContactPoint],
    a: Option<usize>,
    b: Option<usize>,
    states: &mut [BodyState],
    friction: f32,
    restitution: f32,
) {
    let deepest = match points
        .iter()
        .min_by(|p, q| p.separation.total_cmp(&q.separation))
    {
        Some(point) => *point,
        None => return,
    };
    let n = deepest.normal;
    let depth = -deepest.separation;

    let inv_a = a.map_or(0.0, |i| states[i].inv_mass);
    let inv_b = b.map_or(0.0, |i| states[i].inv_mass);
    let total = inv_a + inv_b;
    if total <= 0.0 {
        return;
    }
    if let Some(i) = a {
        states[i].position += n * depth * (inv_a / total);
    }
    if let Some(j) = b {
        states[j].position -= n * depth * (inv_b / total);
    }

    let va = a.map_or(Vec3::ZERO, |i| states[i].linear_velocity);
    let vb = b.map_or(Vec3::ZERO, |j| states[j].linear_velocity);
    let relative = va - vb;
    let vn = relative.dot(n);
    if vn >= 0.0 {
        return;
    }
    let normal_impulse = -(1.0 + restitution) * vn / total;
    let tangent = relative - n * vn;
    let tangent_speed = tangent.length();
    let friction_impulse = if tangent_speed > 1e-6 {
        -(tangent / tangent_speed) * (friction * normal_impulse).min(tangent_speed / total)
    } else {
        Vec3::ZERO
    };
    let impulse = n * normal_impulse + friction_impulse;
    if let Some(i) = a {
        states[i].linear_velocity += impulse * inv_a;
    }
    if let Some(j) = b {
        states[j].linear_velocity -= impulse * inv_b;
    }
}
