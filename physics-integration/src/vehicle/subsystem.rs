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
//! Vehicle subsystem
//!
//! Owned by the physics system. Builds rigs for car and tank components
//! once their body, chassis, wheels and shapes are all in place, steps
//! them every fixed frame with one batched suspension query, and freezes
//! them while simulation is disabled.

use crate::components::{body_shapes, BodyComponent, BodyType, CollisionShapeComponent, ShapeGeometry};
use crate::ecs::{Component, ComponentId, Entity, Scene};
use crate::error::{PhysicsError, Result};
use crate::native::{
    HandleArena, NativeGeometry, NativeWorld, QueryFilter, RaycastHit, ShapeHandle, Vehicle, VehicleHandle,
};
use crate::vehicle::components::{
    layers, Gear, SavedDriveState, VehicleCarComponent, VehicleChassisComponent, VehicleTankComponent,
    VehicleWheelComponent, DRIVABLE_SURFACE_FILTER, MAX_VEHICLES_COUNT, MAX_WHEELS_PER_VEHICLE,
    UNDRIVABLE_SURFACE_FILTER,
};
use crate::vehicle::query::{QuerySlots, SuspensionRay, VehicleSceneQuery};
use crate::vehicle::rig::{
    box_moment_of_inertia, DriveParams, RigDesc, RigKind, StepInput, TireFrictionPairs, VehicleRig, WheelDesc,
    WheelState,
};
use glam::Vec3;
use log::{debug, trace, warn};

/// Car and tank components share one build and step path
trait DriveComponent: Component {
    const KIND: RigKind;

    fn rig_handle(&self) -> Option<VehicleHandle>;
    fn set_rig_handle(&mut self, rig: Option<VehicleHandle>);
    fn saved(&self) -> Option<SavedDriveState>;
    fn set_saved(&mut self, saved: SavedDriveState);
    fn drive_params(&self) -> DriveParams;
    fn raw_channels(&self) -> [f32; 5];
    fn requested_gear(&self) -> Gear;
    fn on_stepped(&mut self, gear: Gear);
    fn clear_input(&mut self);
    fn dirty(&self) -> bool;
    fn clear_dirty(&mut self);
}

impl DriveComponent for VehicleCarComponent {
    const KIND: RigKind = RigKind::Car;

    fn rig_handle(&self) -> Option<VehicleHandle> {
        self.rig
    }

    fn set_rig_handle(&mut self, rig: Option<VehicleHandle>) {
        self.rig = rig;
    }

    fn saved(&self) -> Option<SavedDriveState> {
        self.saved
    }

    fn set_saved(&mut self, saved: SavedDriveState) {
        self.saved = Some(saved);
    }

    fn drive_params(&self) -> DriveParams {
        DriveParams::car(
            self.engine_peak_torque(),
            self.engine_max_omega(),
            self.gear_switch_time(),
            self.clutch_strength(),
        )
    }

    fn raw_channels(&self) -> [f32; 5] {
        let steer = self.analog_steer();
        [
            self.analog_acceleration(),
            self.analog_brake(),
            0.0,
            (-steer).max(0.0),
            steer.max(0.0),
        ]
    }

    fn requested_gear(&self) -> Gear {
        self.gear
    }

    fn on_stepped(&mut self, _gear: Gear) {}

    fn clear_input(&mut self) {
        self.reset_input();
    }

    fn dirty(&self) -> bool {
        self.is_dirty()
    }

    fn clear_dirty(&mut self) {
        self.take_dirty();
    }
}

impl DriveComponent for VehicleTankComponent {
    const KIND: RigKind = RigKind::Tank;

    fn rig_handle(&self) -> Option<VehicleHandle> {
        self.rig
    }

    fn set_rig_handle(&mut self, rig: Option<VehicleHandle>) {
        self.rig = rig;
    }

    fn saved(&self) -> Option<SavedDriveState> {
        self.saved
    }

    fn set_saved(&mut self, saved: SavedDriveState) {
        self.saved = Some(saved);
    }

    fn drive_params(&self) -> DriveParams {
        DriveParams::tank(self.engine_peak_torque(), self.engine_max_omega())
    }

    fn raw_channels(&self) -> [f32; 5] {
        self.raw_inputs()
    }

    fn requested_gear(&self) -> Gear {
        self.gear
    }

    // automatic gearbox: report the gear it picked
    fn on_stepped(&mut self, gear: Gear) {
        self.gear = gear;
    }

    fn clear_input(&mut self) {
        self.reset_input();
    }

    fn dirty(&self) -> bool {
        self.is_dirty()
    }

    fn clear_dirty(&mut self) {
        self.take_dirty();
    }
}

/// Vehicle subsystem counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleStats {
    /// Rigs built, rebuilds included
    pub rigs_built: u64,
    /// Rigs released
    pub rigs_released: u64,
    /// Vehicles stepped on the last fixed frame
    pub stepped_last_frame: usize,
}

struct SteppedVehicle {
    id: ComponentId,
    rig: VehicleHandle,
    raw: [f32; 5],
    gear: Gear,
}

/// Builds and steps vehicle rigs on top of the bodies and shapes of the physics system
pub struct PhysicsVehiclesSubsystem {
    rigs: HandleArena<Vehicle, VehicleRig>,
    slots: QuerySlots,
    query: VehicleSceneQuery,
    friction: TireFrictionPairs,
    stats: VehicleStats,
}

impl PhysicsVehiclesSubsystem {
    /// Empty subsystem with the default friction table
    pub fn new() -> Self {
        PhysicsVehiclesSubsystem {
            rigs: HandleArena::new(),
            slots: QuerySlots::new(MAX_VEHICLES_COUNT),
            query: VehicleSceneQuery::new(MAX_VEHICLES_COUNT * MAX_WHEELS_PER_VEHICLE),
            friction: TireFrictionPairs::new(),
            stats: VehicleStats::default(),
        }
    }

    /// Tag a ground shape so wheel rays stand on it
    pub fn setup_drivable_surface(shape: &mut CollisionShapeComponent) {
        shape.set_surface(DRIVABLE_SURFACE_FILTER);
        shape.set_type_mask(layers::GROUND);
        shape.set_type_mask_to_collide_with(layers::GROUND_COLLIDES_WITH);
    }

    /// Tag a ground shape so wheel rays pass through it
    pub fn setup_non_drivable_surface(shape: &mut CollisionShapeComponent) {
        shape.set_surface(UNDRIVABLE_SURFACE_FILTER);
        shape.set_type_mask(layers::GROUND);
        shape.set_type_mask_to_collide_with(layers::GROUND_COLLIDES_WITH);
    }

    /// Tire friction table
    pub fn friction_pairs(&self) -> &TireFrictionPairs {
        &self.friction
    }

    /// Mutable tire friction table
    pub fn friction_pairs_mut(&mut self) -> &mut TireFrictionPairs {
        &mut self.friction
    }

    /// Live rig
    pub fn rig(&self, handle: VehicleHandle) -> Option<&VehicleRig> {
        self.rigs.get(handle)
    }

    /// Number of live rigs
    pub fn rig_count(&self) -> usize {
        self.rigs.len()
    }

    /// Batched suspension dispatches issued so far
    pub fn dispatch_count(&self) -> u64 {
        self.query.dispatch_count()
    }

    /// Counters
    pub fn stats(&self) -> VehicleStats {
        self.stats
    }

    /// Build missing rigs, then step every non-kinematic vehicle
    ///
    /// The world must not be running a step.
    pub fn process_fixed(&mut self, scene: &mut Scene, world: &mut NativeWorld, dt: f32) {
        self.rebuild::<VehicleCarComponent>(scene, world);
        self.rebuild::<VehicleTankComponent>(scene, world);

        let mut stepped = Vec::new();
        self.collect_stepped::<VehicleCarComponent>(scene, world, &mut stepped);
        let cars = stepped.len();
        self.collect_stepped::<VehicleTankComponent>(scene, world, &mut stepped);

        let mut rays = Vec::new();
        let mut hits: Vec<Vec<Option<RaycastHit>>> = Vec::with_capacity(stepped.len());
        for (index, vehicle) in stepped.iter().enumerate() {
            let Some(rig) = self.rigs.get(vehicle.rig) else {
                hits.push(Vec::new());
                continue;
            };
            hits.push(vec![None; rig.wheels().len()]);
            let Some(pose) = world.actor_pose(rig.actor()) else {
                continue;
            };
            let filter = QueryFilter::surface_mask(DRIVABLE_SURFACE_FILTER).excluding(rig.actor());
            for (wheel, ray) in rig.suspension_rays(&pose).into_iter().enumerate() {
                if let Some(ray) = ray {
                    rays.push(SuspensionRay {
                        vehicle: index,
                        wheel,
                        ray,
                        filter,
                    });
                }
            }
        }
        for (ray, hit) in rays.iter().zip(self.query.cast(world, &rays)) {
            hits[ray.vehicle][ray.wheel] = hit;
        }

        let gravity = world.gravity();
        for (index, vehicle) in stepped.iter().enumerate() {
            let Some(rig) = self.rigs.get_mut(vehicle.rig) else {
                continue;
            };
            let input = StepInput {
                raw: vehicle.raw,
                requested_gear: vehicle.gear,
                dt,
                gravity,
                friction: &self.friction,
            };
            if let Err(err) = rig.step(world, &hits[index], input) {
                warn!("vehicle on {} failed to step: {}", rig.entity(), err);
                continue;
            }
            let gear = rig.gear();
            if index < cars {
                if let Some(c) = scene.get_mut::<VehicleCarComponent>(vehicle.id) {
                    c.on_stepped(gear);
                }
            } else if let Some(t) = scene.get_mut::<VehicleTankComponent>(vehicle.id) {
                t.on_stepped(gear);
            }
        }
        self.stats.stepped_last_frame = stepped.len();
        trace!("stepped {} vehicles with {} suspension rays", stepped.len(), rays.len());

        reset_inputs::<VehicleCarComponent>(scene);
        reset_inputs::<VehicleTankComponent>(scene);
    }

    /// Freeze vehicles when simulation stops, rebuild and resume when it starts
    pub fn on_simulation_enabled(&mut self, scene: &mut Scene, world: &mut NativeWorld, enabled: bool) {
        if enabled {
            let rebuilt = self.rebuild::<VehicleCarComponent>(scene, world);
            self.restore::<VehicleCarComponent>(scene, &rebuilt);
            let rebuilt = self.rebuild::<VehicleTankComponent>(scene, world);
            self.restore::<VehicleTankComponent>(scene, &rebuilt);
        } else {
            self.save::<VehicleCarComponent>(scene);
            self.save::<VehicleTankComponent>(scene);
        }
    }

    /// Release the rig of a detached car
    pub fn on_car_removed(&mut self, car: &VehicleCarComponent) -> bool {
        car.rig.map_or(false, |rig| self.release_rig(rig))
    }

    /// Release the rig of a detached tank
    pub fn on_tank_removed(&mut self, tank: &VehicleTankComponent) -> bool {
        tank.rig.map_or(false, |rig| self.release_rig(rig))
    }

    /// Release the rigs built on a body that is going away
    pub fn on_dynamic_body_removed(&mut self, scene: &mut Scene, entity: Entity) -> usize {
        let doomed: Vec<VehicleHandle> = self
            .rigs
            .iter()
            .filter(|(_, rig)| rig.entity() == entity)
            .map(|(handle, _)| handle)
            .collect();
        for &handle in &doomed {
            self.release_rig(handle);
        }
        for id in scene.find_all::<VehicleCarComponent>(entity) {
            if let Some(car) = scene.get_mut::<VehicleCarComponent>(id) {
                car.set_rig_handle(None);
            }
        }
        for id in scene.find_all::<VehicleTankComponent>(entity) {
            if let Some(tank) = scene.get_mut::<VehicleTankComponent>(id) {
                tank.set_rig_handle(None);
            }
        }
        doomed.len()
    }

    /// Release every rig
    pub fn release_all(&mut self, scene: &mut Scene) {
        for handle in self.rigs.handles() {
            self.release_rig(handle);
        }
        clear_rig_handles::<VehicleCarComponent>(scene);
        clear_rig_handles::<VehicleTankComponent>(scene);
    }

    fn release_rig(&mut self, handle: VehicleHandle) -> bool {
        match self.rigs.remove(handle) {
            Some(rig) => {
                self.slots.release(rig.slot());
                self.stats.rigs_released += 1;
                debug!("released vehicle rig of {}", rig.entity());
                true
            }
            None => false,
        }
    }

    fn rebuild<T: DriveComponent>(&mut self, scene: &mut Scene, world: &mut NativeWorld) -> Vec<ComponentId> {
        let mut rebuilt = Vec::new();
        for id in component_ids::<T>(scene) {
            let Some(entity) = scene.entity_of(id) else {
                continue;
            };
            let Some(vehicle) = scene.get::<T>(id) else {
                continue;
            };
            let current = vehicle.rig_handle().filter(|h| self.rigs.contains(*h));
            let dirty = vehicle.dirty() || parts_dirty(scene, entity);
            match current {
                Some(_) if !dirty => continue,
                Some(handle) => {
                    debug!("vehicle on {} changed, rebuilding its rig", entity);
                    self.release_rig(handle);
                }
                None => {}
            }
            let params = vehicle.drive_params();
            if let Some(v) = scene.get_mut::<T>(id) {
                v.set_rig_handle(None);
            }

            match self.try_create(scene, world, entity, T::KIND, params) {
                Ok(Some(handle)) => {
                    if let Some(v) = scene.get_mut::<T>(id) {
                        v.set_rig_handle(Some(handle));
                        v.clear_dirty();
                    }
                    clear_parts_dirty(scene, entity);
                    rebuilt.push(id);
                }
                Ok(None) => trace!("vehicle on {} is not ready for a rig", entity),
                Err(err) => warn!("vehicle on {} cannot be built: {}", entity, err),
            }
        }
        rebuilt
    }

    fn try_create(
        &mut self,
        scene: &mut Scene,
        world: &mut NativeWorld,
        entity: Entity,
        kind: RigKind,
        drive: DriveParams,
    ) -> Result<Option<VehicleHandle>> {
        let Some(body) = scene.find::<BodyComponent>(entity).and_then(|id| scene.get::<BodyComponent>(id)) else {
            return Ok(None);
        };
        let actor = match (body.body_type(), body.native_actor()) {
            (BodyType::Dynamic, Some(actor)) => actor,
            _ => return Ok(None),
        };
        let Some(chassis) = scene
            .find::<VehicleChassisComponent>(entity)
            .and_then(|id| scene.get::<VehicleChassisComponent>(id))
            .cloned()
        else {
            return Ok(None);
        };
        let wheel_ids = scene.find_all::<VehicleWheelComponent>(entity);
        if wheel_ids.is_empty() {
            return Ok(None);
        }
        if wheel_ids.len() > MAX_WHEELS_PER_VEHICLE {
            return Err(PhysicsError::CapacityExceeded {
                what: "wheel",
                capacity: MAX_WHEELS_PER_VEHICLE,
            });
        }

        let shape_ids = body_shapes(scene, entity);
        if shape_ids.len() != wheel_ids.len() + 1 {
            return Ok(None);
        }
        let mut chassis_shape = None;
        let mut wheel_shapes = Vec::new();
        for &id in &shape_ids {
            let Some(shape) = scene.get::<CollisionShapeComponent>(id) else {
                return Ok(None);
            };
            match shape.geometry() {
                ShapeGeometry::Box { .. } if chassis_shape.is_none() => chassis_shape = Some(id),
                ShapeGeometry::ConvexHull => wheel_shapes.push(id),
                _ => return Ok(None),
            }
        }
        let Some(chassis_shape) = chassis_shape else {
            return Ok(None);
        };
        if wheel_shapes.len() != wheel_ids.len() {
            return Ok(None);
        }
        let Some((chassis_handle, chassis_geometry)) = materialized(scene, world, chassis_shape) else {
            return Ok(None);
        };
        let mut wheel_handles = Vec::with_capacity(wheel_shapes.len());
        for &id in &wheel_shapes {
            match materialized(scene, world, id) {
                Some((handle, geometry)) => wheel_handles.push((id, handle, geometry)),
                None => return Ok(None),
            }
        }

        let chassis_component = scene.get::<CollisionShapeComponent>(chassis_shape);
        let mass = chassis.mass_override().unwrap_or_else(|| {
            chassis_component.map_or(1.0, |s| s.effective_mass(chassis_geometry.volume()))
        });
        let full_size = match chassis_geometry {
            NativeGeometry::Box { half_extents } => half_extents * 2.0,
            _ => Vec3::ONE,
        };
        let moi = chassis
            .moment_of_inertia_override()
            .unwrap_or_else(|| box_moment_of_inertia(full_size, mass));

        let wheels: Vec<WheelDesc> = wheel_ids
            .iter()
            .zip(&wheel_handles)
            .filter_map(|(&wid, (sid, _, geometry))| {
                let wheel = scene.get::<VehicleWheelComponent>(wid)?.clone();
                let shape_mass = scene
                    .get::<CollisionShapeComponent>(*sid)
                    .map(|s| s.effective_mass(geometry.volume()));
                Some(WheelDesc { wheel, mass: shape_mass })
            })
            .collect();

        let slot = self.slots.allocate()?;
        if let Err(err) = world.set_mass_properties(actor, mass, moi) {
            self.slots.release(slot);
            return Err(err);
        }

        tag_vehicle_shape(scene, world, chassis_shape, chassis_handle, layers::CHASSIS, layers::CHASSIS_COLLIDES_WITH);
        for &(sid, handle, _) in &wheel_handles {
            tag_vehicle_shape(scene, world, sid, handle, layers::WHEEL, layers::WHEEL_COLLIDES_WITH);
        }

        let rig = VehicleRig::build(RigDesc {
            kind,
            entity,
            actor,
            slot,
            chassis_mass: mass,
            chassis_moi: moi,
            center_of_mass_offset: chassis.center_of_mass_offset(),
            gravity: world.gravity(),
            drive,
            wheels,
        });
        let wheel_count = rig.wheels().len();
        let handle = self.rigs.insert(rig);
        self.stats.rigs_built += 1;
        debug!(
            "built {:?} rig for {}: {} wheels, chassis mass {}",
            kind, entity, wheel_count, mass
        );
        Ok(Some(handle))
    }

    fn collect_stepped<T: DriveComponent>(&self, scene: &Scene, world: &NativeWorld, out: &mut Vec<SteppedVehicle>) {
        let Some(storage) = scene.storage::<T>() else {
            return;
        };
        for (id, _, vehicle) in storage.iter() {
            let Some(handle) = vehicle.rig_handle() else {
                continue;
            };
            let Some(rig) = self.rigs.get(handle) else {
                continue;
            };
            if world.is_kinematic(rig.actor()) || !world.contains_actor(rig.actor()) {
                continue;
            }
            out.push(SteppedVehicle {
                id,
                rig: handle,
                raw: vehicle.raw_channels(),
                gear: vehicle.requested_gear(),
            });
        }
    }

    fn save<T: DriveComponent>(&self, scene: &mut Scene) {
        for id in component_ids::<T>(scene) {
            let Some(rig) = scene
                .get::<T>(id)
                .and_then(|v| v.rig_handle())
                .and_then(|h| self.rigs.get(h))
            else {
                continue;
            };
            let (drive, wheels) = rig.save();
            let entity = rig.entity();
            if let Some(v) = scene.get_mut::<T>(id) {
                v.set_saved(drive);
            }
            for (wid, state) in scene.find_all::<VehicleWheelComponent>(entity).into_iter().zip(wheels) {
                if let Some(wheel) = scene.get_mut::<VehicleWheelComponent>(wid) {
                    state.store(wheel);
                }
            }
            trace!("saved drivetrain of {}", entity);
        }
    }

    fn restore<T: DriveComponent>(&mut self, scene: &Scene, rebuilt: &[ComponentId]) {
        for &id in rebuilt {
            let Some(vehicle) = scene.get::<T>(id) else {
                continue;
            };
            let (Some(saved), Some(handle), Some(entity)) = (vehicle.saved(), vehicle.rig_handle(), scene.entity_of(id))
            else {
                continue;
            };
            let wheels: Vec<WheelState> = scene
                .find_all::<VehicleWheelComponent>(entity)
                .into_iter()
                .filter_map(|wid| scene.get::<VehicleWheelComponent>(wid))
                .map(WheelState::from_component)
                .collect();
            if let Some(rig) = self.rigs.get_mut(handle) {
                rig.restore(&saved, &wheels);
                trace!("restored drivetrain of {}", entity);
            }
        }
    }
}

impl Default for PhysicsVehiclesSubsystem {
    fn default() -> Self {
        PhysicsVehiclesSubsystem::new()
    }
}

fn component_ids<T: Component>(scene: &Scene) -> Vec<ComponentId> {
    scene.storage::<T>().map(|s| s.ids()).unwrap_or_default()
}

fn reset_inputs<T: DriveComponent>(scene: &mut Scene) {
    if let Some(storage) = scene.storage_mut::<T>() {
        for (_, _, vehicle) in storage.iter_mut() {
            vehicle.clear_input();
        }
    }
}

fn clear_rig_handles<T: DriveComponent>(scene: &mut Scene) {
    if let Some(storage) = scene.storage_mut::<T>() {
        for (_, _, vehicle) in storage.iter_mut() {
            vehicle.set_rig_handle(None);
        }
    }
}

fn parts_dirty(scene: &Scene, entity: Entity) -> bool {
    let chassis = scene
        .find::<VehicleChassisComponent>(entity)
        .and_then(|id| scene.get::<VehicleChassisComponent>(id))
        .map_or(false, VehicleChassisComponent::is_dirty);
    chassis
        || scene
            .find_all::<VehicleWheelComponent>(entity)
            .into_iter()
            .filter_map(|id| scene.get::<VehicleWheelComponent>(id))
            .any(VehicleWheelComponent::is_dirty)
}

fn clear_parts_dirty(scene: &mut Scene, entity: Entity) {
    if let Some(id) = scene.find::<VehicleChassisComponent>(entity) {
        if let Some(chassis) = scene.get_mut::<VehicleChassisComponent>(id) {
            chassis.take_dirty();
        }
    }
    for id in scene.find_all::<VehicleWheelComponent>(entity) {
        if let Some(wheel) = scene.get_mut::<VehicleWheelComponent>(id) {
            wheel.take_dirty();
        }
    }
}

fn materialized(
    scene: &Scene,
    world: &NativeWorld,
    id: ComponentId,
) -> Option<(ShapeHandle, NativeGeometry)> {
    let handle = scene.get::<CollisionShapeComponent>(id)?.native_shape()?;
    let geometry = world.shape_geometry(handle)?.clone();
    Some((handle, geometry))
}

fn tag_vehicle_shape(
    scene: &mut Scene,
    world: &mut NativeWorld,
    id: ComponentId,
    handle: ShapeHandle,
    type_mask: u32,
    collide_with: u32,
) {
    let Some(shape) = scene.get_mut::<CollisionShapeComponent>(id) else {
        return;
    };
    shape.set_surface(UNDRIVABLE_SURFACE_FILTER);
    shape.set_type_mask(type_mask);
    shape.set_type_mask_to_collide_with(collide_with);
    if let Err(err) = world.set_shape_filter(handle, shape.filter_data()) {
        warn!("cannot tag vehicle shape {}: {}", id, err);
    }
}
