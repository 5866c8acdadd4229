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
//! Native vehicle rigs
//!
//! A rig is the simulation-side copy of a vehicle: per-wheel suspension
//! data, sprung masses, drivetrain state and smoothed inputs. Rigs never
//! own native world objects. They push suspension and tire forces into the
//! chassis actor before each step.

use crate::ecs::Entity;
use crate::error::{PhysicsError, Result};
use crate::math::{try_normalize, Pose};
use crate::native::{ActorHandle, ForceMode, NativeWorld, Ray, RaycastHit};
use crate::vehicle::components::{Gear, SavedDriveState, VehicleWheelComponent};
use glam::{Mat3, Quat, Vec3};
use std::collections::HashMap;
use std::f32::consts::TAU;

/// Gearbox ratios, reverse first
pub const GEAR_RATIOS: [f32; 7] = [-4.0, 0.0, 4.0, 2.0, 1.5, 1.1, 1.0];

/// Differential ratio applied after the gearbox
pub const FINAL_RATIO: f32 = 4.0;

/// Per-channel rise rates of the analog input smoothing
pub const RISE_RATES: [f32; 5] = [6.0, 6.0, 6.0, 2.5, 2.5];

/// Per-channel fall rates of the analog input smoothing
pub const FALL_RATES: [f32; 5] = [10.0, 10.0, 10.0, 5.0, 5.0];

/// Steer scale against forward speed in m/s
pub const STEER_VS_FORWARD_SPEED: [(f32, f32); 4] = [(0.0, 0.75), (5.0, 0.75), (30.0, 0.125), (120.0, 0.1)];

/// Tire type of every wheel built by the subsystem
pub const NORMAL_TIRE: &str = "normal";

/// Wheel damping rate
pub const WHEEL_DAMPING_RATE: f32 = 2.0;

const WHEEL_MASS_FALLBACK: f32 = 20.0;
const LATERAL_RELAXATION: f32 = 0.5;
const AUTO_UPSHIFT_RATIO: f32 = 0.65;
const AUTO_DOWNSHIFT_RATIO: f32 = 0.15;

/// Box inertia estimate used for chassis shapes, `full_size` being the full box extents
pub fn box_moment_of_inertia(full_size: Vec3, mass: f32) -> Vec3 {
    let f = full_size;
    Vec3::new(
        (f.z * f.z + f.x * f.x) * mass / 12.0,
        (f.y * f.y + f.x * f.x) * mass / 12.0,
        (f.y * f.y + f.z * f.z) * mass / 12.0,
    )
}

/// Split `total` across wheels so the weights balance about the centre of mass
///
/// `coords` are wheel offsets from the centre of mass projected into the
/// ground plane. Solves the minimum-norm system `[1; x; y] m = [total, 0, 0]`,
/// dropping to one axis or an even split when the wheels are degenerate.
/// Results are clamped to be non-negative and rescaled to `total`.
pub fn compute_sprung_masses(coords: &[(f32, f32)], total: f32) -> Vec<f32> {
    let n = coords.len();
    if n == 0 {
        return Vec::new();
    }
    let even = vec![total / n as f32; n];
    if n == 1 {
        return even;
    }

    let count = n as f32;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for &(x, y) in coords {
        sx += x;
        sy += y;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
    }

    let normal = Mat3::from_cols(
        Vec3::new(count, sx, sy),
        Vec3::new(sx, sxx, sxy),
        Vec3::new(sy, sxy, syy),
    );
    let mut masses: Vec<f32> = if normal.determinant().abs() > 1e-6 {
        let l = normal.inverse() * Vec3::new(total, 0.0, 0.0);
        coords.iter().map(|&(x, y)| l.x + l.y * x + l.z * y).collect()
    } else {
        // collinear wheels: balance along the axis with the larger spread
        let spread_x = sxx - sx * sx / count;
        let spread_y = syy - sy * sy / count;
        let use_y = spread_y >= spread_x;
        let (s, ss) = if use_y { (sy, syy) } else { (sx, sxx) };
        let pick = |c: &(f32, f32)| if use_y { c.1 } else { c.0 };
        let det = count * ss - s * s;
        if det.abs() > 1e-6 {
            let l0 = total * ss / det;
            let l1 = -total * s / det;
            coords.iter().map(|c| l0 + l1 * pick(c)).collect()
        } else {
            even.clone()
        }
    };

    for m in masses.iter_mut() {
        if !m.is_finite() || *m < 0.0 {
            *m = 0.0;
        }
    }
    let sum: f32 = masses.iter().sum();
    if sum <= f32::EPSILON {
        return even;
    }
    masses.iter().map(|m| m * total / sum).collect()
}

/// Steer scale for a forward speed, clamped to the table ends
pub fn steer_scale(speed: f32) -> f32 {
    let speed = speed.abs();
    let table = &STEER_VS_FORWARD_SPEED;
    if speed <= table[0].0 {
        return table[0].1;
    }
    for pair in table.windows(2) {
        let (s0, v0) = pair[0];
        let (s1, v1) = pair[1];
        if speed <= s1 {
            let t = (speed - s0) / (s1 - s0);
            return v0 + (v1 - v0) * t;
        }
    }
    table[table.len() - 1].1
}

/// Move smoothed inputs toward the raw inputs at the rise and fall rates
pub fn smooth_inputs(current: &mut [f32; 5], raw: [f32; 5], dt: f32) {
    for (i, value) in current.iter_mut().enumerate() {
        let target = raw[i];
        let rising = target.abs() >= value.abs();
        let rate = if rising { RISE_RATES[i] } else { FALL_RATES[i] };
        let step = rate * dt;
        *value += (target - *value).clamp(-step, step);
    }
}

/// Friction multipliers per tire type and surface material
#[derive(Debug, Clone)]
pub struct TireFrictionPairs {
    default_friction: f32,
    pairs: HashMap<(String, String), f32>,
}

impl TireFrictionPairs {
    /// Table with only the default pair
    pub fn new() -> Self {
        TireFrictionPairs {
            default_friction: 1.0,
            pairs: HashMap::new(),
        }
    }

    /// Set the friction of one tire/surface pair
    pub fn set(&mut self, tire: impl Into<String>, surface: impl Into<String>, friction: f32) {
        self.pairs.insert((tire.into(), surface.into()), friction.max(0.0));
    }

    /// Friction of a tire on a surface material, the default when unlisted
    pub fn friction(&self, tire: &str, surface: &str) -> f32 {
        self.pairs
            .get(&(tire.to_owned(), surface.to_owned()))
            .copied()
            .unwrap_or(self.default_friction)
    }
}

impl Default for TireFrictionPairs {
    fn default() -> Self {
        TireFrictionPairs::new()
    }
}

/// Which drivetrain a rig runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigKind {
    /// Every wheel driven, front wheels steer
    Car,
    /// Per-side thrust, no steering
    Tank,
}

impl RigKind {
    /// Default (compression, droop, spring, damper)
    fn suspension_defaults(self) -> (f32, f32, f32, f32) {
        match self {
            RigKind::Car => (0.3, 0.1, 35000.0, 4500.0),
            RigKind::Tank => (0.3, 0.1, 10000.0, 5000.0),
        }
    }

    fn engine_damping(self) -> EngineDamping {
        match self {
            RigKind::Car => EngineDamping {
                full_throttle: 0.15,
                zero_throttle_engaged: 2.0,
                zero_throttle_disengaged: 0.35,
            },
            RigKind::Tank => EngineDamping {
                full_throttle: 3.0,
                zero_throttle_engaged: 2.0,
                zero_throttle_disengaged: 1.0,
            },
        }
    }
}

/// Engine damping rates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineDamping {
    /// Rate with the throttle open
    pub full_throttle: f32,
    /// Engine braking rate with the clutch engaged
    pub zero_throttle_engaged: f32,
    /// Rate with the throttle closed in neutral
    pub zero_throttle_disengaged: f32,
}

/// Engine and gearbox parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveParams {
    /// Peak engine torque
    pub peak_torque: f32,
    /// Engine speed limit in rad/s
    pub max_omega: f32,
    /// Seconds spent in neutral while changing gear
    pub switch_time: f32,
    /// Clutch coupling rate
    pub clutch_strength: f32,
    /// Engine damping rates
    pub damping: EngineDamping,
    /// Pick gears from engine speed
    pub auto_gears: bool,
}

impl DriveParams {
    /// Car drivetrain
    pub fn car(peak_torque: f32, max_omega: f32, switch_time: f32, clutch_strength: f32) -> Self {
        DriveParams {
            peak_torque,
            max_omega,
            switch_time,
            clutch_strength,
            damping: RigKind::Car.engine_damping(),
            auto_gears: false,
        }
    }

    /// Tank drivetrain
    pub fn tank(peak_torque: f32, max_omega: f32) -> Self {
        DriveParams {
            peak_torque,
            max_omega,
            switch_time: 0.5,
            clutch_strength: 10.0,
            damping: RigKind::Tank.engine_damping(),
            auto_gears: true,
        }
    }
}

/// Per-wheel suspension data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionData {
    /// Travel above rest
    pub max_compression: f32,
    /// Travel below rest
    pub max_droop: f32,
    /// Spring rate
    pub spring_strength: f32,
    /// Damper rate
    pub damper_rate: f32,
    /// Chassis mass carried by this wheel
    pub sprung_mass: f32,
}

/// Wheel runtime state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelState {
    /// Suspension jounce, positive when compressed
    pub jounce: f32,
    /// Rotation speed in rad/s
    pub rotation_speed: f32,
    /// Slip-corrected rotation speed
    pub corrected_rotation_speed: f32,
    /// Rotation angle in `[0, 2π)`
    pub rotation_angle: f32,
    /// No ground under the wheel on the last step
    pub in_air: bool,
}

impl WheelState {
    /// State stored in a wheel component
    pub fn from_component(wheel: &VehicleWheelComponent) -> Self {
        WheelState {
            jounce: wheel.jounce,
            rotation_speed: wheel.rotation_speed,
            corrected_rotation_speed: wheel.corrected_rotation_speed,
            rotation_angle: wheel.rotation_angle,
            in_air: false,
        }
    }

    /// Copy into a wheel component
    pub fn store(&self, wheel: &mut VehicleWheelComponent) {
        wheel.jounce = self.jounce;
        wheel.rotation_speed = self.rotation_speed;
        wheel.corrected_rotation_speed = self.corrected_rotation_speed;
        wheel.rotation_angle = self.rotation_angle;
    }
}

/// Simulated wheel
#[derive(Debug, Clone)]
pub struct WheelSim {
    /// Centre in chassis space
    pub offset: Vec3,
    /// Radius
    pub radius: f32,
    /// Mass of the wheel shape
    pub mass: f32,
    /// Rotational inertia
    pub moi: f32,
    /// Damping rate of the free-spinning wheel
    pub damping_rate: f32,
    /// Steer limit in radians
    pub max_steer_angle: f32,
    /// Brake torque limit
    pub max_brake_torque: f32,
    /// Suspension data
    pub suspension: SuspensionData,
    /// Left side of the chassis
    pub left: bool,
    /// Runtime state
    pub state: WheelState,
}

/// Wheel input to [`VehicleRig::build`]
#[derive(Debug, Clone)]
pub struct WheelDesc {
    /// Wheel component
    pub wheel: VehicleWheelComponent,
    /// Mass of the matching wheel shape, `None` to use a fallback
    pub mass: Option<f32>,
}

/// Everything a rig is built from
#[derive(Debug, Clone)]
pub struct RigDesc {
    /// Drivetrain kind
    pub kind: RigKind,
    /// Vehicle entity
    pub entity: Entity,
    /// Chassis actor
    pub actor: ActorHandle,
    /// Batched query slot
    pub slot: usize,
    /// Chassis mass
    pub chassis_mass: f32,
    /// Chassis diagonal inertia
    pub chassis_moi: Vec3,
    /// Centre of mass in chassis space
    pub center_of_mass_offset: Vec3,
    /// World gravity at build time
    pub gravity: Vec3,
    /// Drivetrain
    pub drive: DriveParams,
    /// Wheels in component order
    pub wheels: Vec<WheelDesc>,
}

/// Per-step inputs for [`VehicleRig::step`]
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Raw analog channels
    pub raw: [f32; 5],
    /// Gear the driver asks for
    pub requested_gear: Gear,
    /// Step length
    pub dt: f32,
    /// World gravity
    pub gravity: Vec3,
    /// Tire friction table
    pub friction: &'a TireFrictionPairs,
}

/// Simulation copy of one vehicle
#[derive(Debug, Clone)]
pub struct VehicleRig {
    kind: RigKind,
    entity: Entity,
    actor: ActorHandle,
    slot: usize,
    wheels: Vec<WheelSim>,
    chassis_mass: f32,
    chassis_moi: Vec3,
    center_of_mass_offset: Vec3,
    suspension_dir: Vec3,
    drive: DriveParams,
    gear: Gear,
    target_gear: Gear,
    switch_timer: f32,
    engine_speed: f32,
    analog: [f32; 5],
}

fn ground_basis(up: Vec3) -> (Vec3, Vec3) {
    let seed = if up.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    let a = (seed - up * seed.dot(up)).normalize();
    (a, up.cross(a))
}

impl VehicleRig {
    /// Compute suspension, sprung masses and drivetrain from `desc`
    pub fn build(desc: RigDesc) -> VehicleRig {
        let suspension_dir = try_normalize(desc.gravity).unwrap_or(Vec3::NEG_Z);
        let (basis_a, basis_b) = ground_basis(-suspension_dir);
        let coords: Vec<(f32, f32)> = desc
            .wheels
            .iter()
            .map(|w| {
                let p = w.wheel.position() - desc.center_of_mass_offset;
                (p.dot(basis_a), p.dot(basis_b))
            })
            .collect();
        let sprung = compute_sprung_masses(&coords, desc.chassis_mass);
        let (compression, droop, spring, damper) = desc.kind.suspension_defaults();

        let wheels = desc
            .wheels
            .iter()
            .zip(sprung)
            .map(|(w, sprung_mass)| {
                let c = &w.wheel;
                let mass = w.mass.filter(|m| *m > 0.0).unwrap_or(WHEEL_MASS_FALLBACK);
                WheelSim {
                    offset: c.position(),
                    radius: c.radius(),
                    mass,
                    moi: 0.5 * c.radius() * c.radius() * mass,
                    damping_rate: WHEEL_DAMPING_RATE,
                    max_steer_angle: c.max_steer_angle(),
                    max_brake_torque: c.max_brake_torque(),
                    suspension: SuspensionData {
                        max_compression: c.max_compression().unwrap_or(compression),
                        max_droop: c.max_droop().unwrap_or(droop),
                        spring_strength: c.spring_strength().unwrap_or(spring),
                        damper_rate: c.damper_rate().unwrap_or(damper),
                        sprung_mass,
                    },
                    left: c.position().x < 0.0,
                    state: WheelState::default(),
                }
            })
            .collect();

        VehicleRig {
            kind: desc.kind,
            entity: desc.entity,
            actor: desc.actor,
            slot: desc.slot,
            wheels,
            chassis_mass: desc.chassis_mass,
            chassis_moi: desc.chassis_moi,
            center_of_mass_offset: desc.center_of_mass_offset,
            suspension_dir,
            drive: desc.drive,
            gear: Gear::First,
            target_gear: Gear::First,
            switch_timer: 0.0,
            engine_speed: 0.0,
            analog: [0.0; 5],
        }
    }

    /// Drivetrain kind
    pub fn kind(&self) -> RigKind {
        self.kind
    }

    /// Vehicle entity
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Chassis actor
    pub fn actor(&self) -> ActorHandle {
        self.actor
    }

    /// Batched query slot
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Simulated wheels
    pub fn wheels(&self) -> &[WheelSim] {
        &self.wheels
    }

    /// Chassis mass
    pub fn chassis_mass(&self) -> f32 {
        self.chassis_mass
    }

    /// Chassis inertia
    pub fn chassis_moi(&self) -> Vec3 {
        self.chassis_moi
    }

    /// Current gear
    pub fn gear(&self) -> Gear {
        self.gear
    }

    /// Engine speed in rad/s
    pub fn engine_speed(&self) -> f32 {
        self.engine_speed
    }

    /// Smoothed analog channels
    pub fn analog_inputs(&self) -> [f32; 5] {
        self.analog
    }

    /// Whether every wheel lost the ground on the last step
    pub fn is_in_air(&self) -> bool {
        self.wheels.iter().all(|w| w.state.in_air)
    }

    /// One ray per wheel from the top of its travel down past the tire
    pub fn suspension_rays(&self, pose: &Pose) -> Vec<Option<Ray>> {
        let dir = pose.rotation * self.suspension_dir;
        self.wheels
            .iter()
            .map(|w| {
                let s = &w.suspension;
                let top = pose.transform_point(w.offset) - dir * s.max_compression;
                Ray::new(top, dir, s.max_compression + s.max_droop + w.radius)
            })
            .collect()
    }

    /// Drivetrain and wheel state for a pause
    pub fn save(&self) -> (SavedDriveState, Vec<WheelState>) {
        let drive = SavedDriveState {
            engine_speed: self.engine_speed,
            analog_inputs: self.analog,
            gear: self.gear,
        };
        (drive, self.wheels.iter().map(|w| w.state).collect())
    }

    /// Put back state captured by [`VehicleRig::save`]
    ///
    /// Extra or missing wheel entries are ignored.
    pub fn restore(&mut self, drive: &SavedDriveState, wheels: &[WheelState]) {
        self.engine_speed = drive.engine_speed;
        self.analog = drive.analog_inputs;
        self.gear = drive.gear;
        self.target_gear = drive.gear;
        self.switch_timer = 0.0;
        for (sim, state) in self.wheels.iter_mut().zip(wheels) {
            sim.state = *state;
        }
    }

    fn update_gearbox(&mut self, requested: Gear, dt: f32) {
        if self.switch_timer > 0.0 {
            self.switch_timer -= dt;
            if self.switch_timer <= 0.0 {
                self.switch_timer = 0.0;
                self.gear = self.target_gear;
            }
            return;
        }
        let target = if self.drive.auto_gears {
            self.auto_gear()
        } else {
            requested
        };
        if target != self.gear {
            self.target_gear = target;
            if self.drive.switch_time > 0.0 {
                self.switch_timer = self.drive.switch_time;
            } else {
                self.gear = target;
            }
        }
    }

    fn auto_gear(&self) -> Gear {
        let ratio = self.engine_speed / self.drive.max_omega.max(f32::EPSILON);
        let index = self.gear.index();
        if self.gear >= Gear::First && self.gear < Gear::TOP && ratio > AUTO_UPSHIFT_RATIO {
            Gear::from_index(index + 1).unwrap_or(self.gear)
        } else if self.gear > Gear::First && ratio < AUTO_DOWNSHIFT_RATIO {
            Gear::from_index(index - 1).unwrap_or(self.gear)
        } else {
            self.gear
        }
    }

    fn total_ratio(&self) -> f32 {
        if self.switch_timer > 0.0 {
            return 0.0;
        }
        GEAR_RATIOS[self.gear.index()] * FINAL_RATIO
    }

    fn update_engine(&mut self, accel: f32, ratio: f32, dt: f32) {
        let max = self.drive.max_omega;
        if ratio != 0.0 {
            let wheel_omega = self.wheels.iter().map(|w| w.state.rotation_speed).sum::<f32>()
                / self.wheels.len().max(1) as f32;
            let coupled = (wheel_omega * ratio).abs();
            let rate = (self.drive.clutch_strength * dt).min(1.0);
            self.engine_speed += (coupled - self.engine_speed) * rate;
        } else {
            let damping = if accel > 0.0 {
                self.drive.damping.full_throttle
            } else {
                self.drive.damping.zero_throttle_disengaged
            };
            let rate = (damping * dt).min(1.0);
            self.engine_speed += (accel * max - self.engine_speed) * rate;
        }
        self.engine_speed = self.engine_speed.clamp(0.0, max);
    }

    /// Push one step of suspension, drive, brake and tire forces into the chassis
    ///
    /// `hits` holds the closest drivable hit for each wheel ray, in wheel order.
    pub fn step(&mut self, world: &mut NativeWorld, hits: &[Option<RaycastHit>], input: StepInput<'_>) -> Result<()> {
        let dt = input.dt;
        if dt <= 0.0 {
            return Ok(());
        }
        let pose = world
            .actor_pose(self.actor)
            .ok_or(PhysicsError::StaleHandle { kind: "actor" })?;
        let linear = world.linear_velocity(self.actor).unwrap_or(Vec3::ZERO);
        let angular = world.angular_velocity(self.actor).unwrap_or(Vec3::ZERO);
        let gravity = input.gravity.length();
        let down = pose.rotation * self.suspension_dir;
        let up = -down;
        let forward = pose.rotation * Vec3::Y;
        let center_of_mass = pose.transform_point(self.center_of_mass_offset);

        smooth_inputs(&mut self.analog, input.raw, dt);
        let a = self.analog;
        let accel = a[0];
        let all_in_air = hits.iter().all(Option::is_none);
        let forward_speed = linear.dot(forward);
        let steer = match self.kind {
            RigKind::Car if all_in_air => a[4] - a[3],
            RigKind::Car => (a[4] - a[3]) * steer_scale(forward_speed),
            RigKind::Tank => 0.0,
        };

        self.update_gearbox(input.requested_gear, dt);
        let ratio = self.total_ratio();
        self.update_engine(accel, ratio, dt);
        let engine_torque = if ratio != 0.0 {
            self.drive.peak_torque * accel * (1.0 - self.engine_speed / self.drive.max_omega.max(f32::EPSILON)).max(0.0)
        } else {
            0.0
        };
        let engine_braking = if ratio != 0.0 && accel <= 0.0 {
            self.engine_speed * self.drive.damping.zero_throttle_engaged * ratio.abs()
        } else {
            0.0
        };

        let wheel_count = self.wheels.len().max(1) as f32;
        let left_count = self.wheels.iter().filter(|w| w.left).count().max(1) as f32;
        let right_count = self.wheels.iter().filter(|w| !w.left).count().max(1) as f32;

        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            let s = wheel.suspension;
            let hit = match hits.get(i).copied().flatten() {
                Some(hit) => hit,
                None => {
                    let st = &mut wheel.state;
                    st.in_air = true;
                    st.jounce = -s.max_droop;
                    st.rotation_speed /= 1.0 + wheel.damping_rate * dt;
                    st.corrected_rotation_speed = st.rotation_speed;
                    st.rotation_angle = (st.rotation_angle + st.rotation_speed * dt).rem_euclid(TAU);
                    continue;
                }
            };

            let jounce = (s.max_compression + wheel.radius - hit.distance).clamp(-s.max_droop, s.max_compression);
            let jounce_speed = if wheel.state.in_air {
                0.0
            } else {
                (jounce - wheel.state.jounce) / dt
            };
            let load = (s.sprung_mass * gravity + s.spring_strength * jounce + s.damper_rate * jounce_speed).max(0.0);

            let point = pose.transform_point(wheel.offset);
            let arm = point - center_of_mass;
            let velocity = linear + angular.cross(arm);

            let steer_angle = steer * wheel.max_steer_angle;
            let heading = Quat::from_axis_angle(up, -steer_angle) * forward;
            let normal = hit.normal;
            let along = try_normalize(heading - normal * heading.dot(normal)).unwrap_or(heading);
            let lateral = along.cross(normal);
            let v_long = velocity.dot(along);
            let v_lat = velocity.dot(lateral);

            let surface = world.shape_material(hit.shape).unwrap_or("");
            let limit = input.friction.friction(NORMAL_TIRE, surface) * load;

            let (drive_torque, brake_input) = match self.kind {
                RigKind::Car => (engine_torque * ratio / wheel_count, a[1]),
                RigKind::Tank => {
                    let (thrust, brake, count) = if wheel.left {
                        (a[3], a[1], left_count)
                    } else {
                        (a[4], a[2], right_count)
                    };
                    (engine_torque * ratio * thrust / count, brake)
                }
            };
            let brake_torque = brake_input * wheel.max_brake_torque + engine_braking / wheel_count;
            let stopping = v_long.abs() * s.sprung_mass / dt;
            let brake_force = -v_long.signum() * (brake_torque / wheel.radius).min(stopping);
            let longitudinal = (drive_torque / wheel.radius + brake_force).clamp(-limit, limit);
            let side = (-v_lat * s.sprung_mass / dt * LATERAL_RELAXATION).clamp(-limit, limit);

            let force = up * load + along * longitudinal + lateral * side;
            world.add_force(self.actor, force, ForceMode::Force)?;
            world.add_torque(self.actor, arm.cross(force))?;

            let st = &mut wheel.state;
            st.in_air = false;
            st.jounce = jounce;
            st.rotation_speed = v_long / wheel.radius;
            st.corrected_rotation_speed = st.rotation_speed;
            st.rotation_angle = (st.rotation_angle + st.rotation_speed * dt).rem_euclid(TAU);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{Actor, HandleArena};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_symmetric_wheels_share_mass_evenly() {
        let coords = [(-1.0, 1.5), (1.0, 1.5), (-1.0, -1.5), (1.0, -1.5)];
        let masses = compute_sprung_masses(&coords, 1500.0);
        assert!(masses.iter().all(|m| approx(*m, 375.0)));
    }

    #[test]
    fn test_offset_centre_of_mass_balances_moments() {
        let coords = [(0.0, 2.0), (0.0, -1.0)];
        let masses = compute_sprung_masses(&coords, 900.0);
        assert!(approx(masses[0], 300.0));
        assert!(approx(masses[1], 600.0));
        let moment: f32 = masses.iter().zip(&coords).map(|(m, c)| m * c.1).sum();
        assert!(moment.abs() < 1e-2);
    }

    #[test]
    fn test_degenerate_wheels_split_evenly() {
        assert_eq!(compute_sprung_masses(&[(0.0, 0.0), (0.0, 0.0)], 10.0), vec![5.0, 5.0]);
        assert_eq!(compute_sprung_masses(&[(3.0, 3.0)], 10.0), vec![10.0]);
        assert!(compute_sprung_masses(&[], 10.0).is_empty());
    }

    #[test]
    fn test_box_inertia_formula() {
        let moi = box_moment_of_inertia(Vec3::new(2.0, 4.0, 1.0), 12.0);
        assert_eq!(moi, Vec3::new(5.0, 20.0, 17.0));
    }

    #[test]
    fn test_steer_table_interpolates_and_clamps() {
        assert!(approx(steer_scale(0.0), 0.75));
        assert!(approx(steer_scale(-5.0), 0.75));
        assert!(approx(steer_scale(17.5), 0.4375));
        assert!(approx(steer_scale(500.0), 0.1));
    }

    #[test]
    fn test_input_smoothing_rates() {
        let mut current = [0.0; 5];
        smooth_inputs(&mut current, [1.0, 1.0, 0.0, 1.0, 0.0], 0.1);
        assert!(approx(current[0], 0.6));
        assert!(approx(current[3], 0.25));
        smooth_inputs(&mut current, [0.0; 5], 0.05);
        assert!(approx(current[0], 0.1));
        assert!(approx(current[3], 0.0));
    }

    #[test]
    fn test_friction_pairs_fall_back_to_default() {
        let mut pairs = TireFrictionPairs::new();
        pairs.set(NORMAL_TIRE, "ice", 0.1);
        assert_eq!(pairs.friction(NORMAL_TIRE, "ice"), 0.1);
        assert_eq!(pairs.friction(NORMAL_TIRE, "asphalt"), 1.0);
    }

    fn car_desc(wheels: Vec<WheelDesc>) -> RigDesc {
        let mut actors: HandleArena<Actor, ()> = HandleArena::new();
        RigDesc {
            kind: RigKind::Car,
            entity: Entity::new(1, 0),
            actor: actors.insert(()),
            slot: 0,
            chassis_mass: 1000.0,
            chassis_moi: Vec3::ONE,
            center_of_mass_offset: Vec3::ZERO,
            gravity: Vec3::new(0.0, 0.0, -9.81),
            drive: DriveParams::car(500.0, 600.0, 0.5, 10.0),
            wheels,
        }
    }

    #[test]
    fn test_build_applies_defaults_and_overrides() {
        let mut stiff = VehicleWheelComponent::new(Vec3::new(1.0, 1.0, 0.0), 0.5, 0.3);
        stiff.set_spring_strength(Some(50000.0));
        let wheels = vec![
            WheelDesc {
                wheel: VehicleWheelComponent::new(Vec3::new(-1.0, 1.0, 0.0), 0.5, 0.3),
                mass: Some(20.0),
            },
            WheelDesc { wheel: stiff, mass: None },
        ];
        let rig = VehicleRig::build(car_desc(wheels));
        let w = rig.wheels();
        assert_eq!(w[0].suspension.spring_strength, 35000.0);
        assert_eq!(w[1].suspension.spring_strength, 50000.0);
        assert!(approx(w[0].moi, 0.5 * 0.25 * 20.0));
        assert!(w[0].left && !w[1].left);
        assert!(approx(w[0].suspension.sprung_mass + w[1].suspension.sprung_mass, 1000.0));
        assert_eq!(rig.gear(), Gear::First);
        assert_eq!(rig.engine_speed(), 0.0);
    }

    #[test]
    fn test_suspension_rays_follow_gravity() {
        let wheels = vec![WheelDesc {
            wheel: VehicleWheelComponent::new(Vec3::new(0.0, 1.0, 0.0), 0.5, 0.3),
            mass: None,
        }];
        let rig = VehicleRig::build(car_desc(wheels));
        let rays = rig.suspension_rays(&Pose::from_position(Vec3::new(0.0, 0.0, 2.0)));
        let ray = rays[0].unwrap();
        assert!((ray.origin - Vec3::new(0.0, 1.0, 2.3)).length() < 1e-5);
        assert!((ray.direction - Vec3::NEG_Z).length() < 1e-5);
        assert!(approx(ray.max_distance, 0.9));
    }

    #[test]
    fn test_save_restore_round_trip() {
        let wheels = vec![WheelDesc {
            wheel: VehicleWheelComponent::new(Vec3::ZERO, 0.5, 0.3),
            mass: None,
        }];
        let mut rig = VehicleRig::build(car_desc(wheels));
        let drive = SavedDriveState {
            engine_speed: 120.0,
            analog_inputs: [0.5, 0.0, 0.0, 0.0, 0.2],
            gear: Gear::Third,
        };
        let state = WheelState {
            jounce: 0.1,
            rotation_speed: 3.0,
            corrected_rotation_speed: 3.0,
            rotation_angle: 1.0,
            in_air: false,
        };
        rig.restore(&drive, &[state]);
        let (saved, wheels) = rig.save();
        assert_eq!(saved, drive);
        assert_eq!(wheels, vec![state]);
    }
}
