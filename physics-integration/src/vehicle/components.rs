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
//! Vehicle data components
//!
//! These components only describe a vehicle. The vehicles subsystem reads
//! them to build a native rig and writes drivetrain state back into them
//! when simulation is paused. Any parameter change marks the component
//! dirty, which makes the subsystem rebuild the whole rig.

use crate::ecs::Component;
use crate::native::VehicleHandle;
use glam::Vec3;

/// Collision type bits used by vehicles and the ground they drive on
pub mod layers {
    /// Drivable ground
    pub const GROUND: u32 = 1 << 0;
    /// Vehicle wheel
    pub const WHEEL: u32 = 1 << 1;
    /// Vehicle chassis
    pub const CHASSIS: u32 = 1 << 2;
    /// Anything else vehicles bump into
    pub const OBSTACLE: u32 = 1 << 3;

    /// Ground never collides with wheels; suspension raycasts carry them
    pub const GROUND_COLLIDES_WITH: u32 = CHASSIS | OBSTACLE;
    /// Types a wheel collides with
    pub const WHEEL_COLLIDES_WITH: u32 = WHEEL | CHASSIS | OBSTACLE;
    /// Types a chassis collides with
    pub const CHASSIS_COLLIDES_WITH: u32 = GROUND | WHEEL | CHASSIS | OBSTACLE;
}

/// Surface tag of shapes wheel raycasts stand on
pub const DRIVABLE_SURFACE_FILTER: u32 = 0xffff_0000;

/// Surface tag of shapes wheel raycasts ignore
pub const UNDRIVABLE_SURFACE_FILTER: u32 = 0x0000_ffff;

/// Most vehicles simulated at once
pub const MAX_VEHICLES_COUNT: usize = 100;

/// Most wheels on one vehicle
pub const MAX_WHEELS_PER_VEHICLE: usize = 20;

/// Drivetrain gear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Gear {
    /// Reverse
    Reverse,
    /// Neutral
    Neutral,
    /// First
    #[default]
    First,
    /// Second
    Second,
    /// Third
    Third,
    /// Fourth
    Fourth,
    /// Fifth
    Fifth,
}

impl Gear {
    /// Gearbox index, reverse first
    pub fn index(self) -> usize {
        self as usize
    }

    /// Gear for a gearbox index
    pub fn from_index(index: usize) -> Option<Gear> {
        const GEARS: [Gear; 7] = [
            Gear::Reverse,
            Gear::Neutral,
            Gear::First,
            Gear::Second,
            Gear::Third,
            Gear::Fourth,
            Gear::Fifth,
        ];
        GEARS.get(index).copied()
    }

    /// Highest forward gear
    pub const TOP: Gear = Gear::Fifth;
}

/// One wheel of a vehicle, attached to the vehicle's root entity
///
/// The n-th wheel component pairs with the n-th convex-hull shape of the
/// vehicle body.
#[derive(Debug, Clone)]
pub struct VehicleWheelComponent {
    radius: f32,
    width: f32,
    position: Vec3,
    max_steer_angle: f32,
    max_brake_torque: f32,
    max_compression: Option<f32>,
    max_droop: Option<f32>,
    spring_strength: Option<f32>,
    damper_rate: Option<f32>,
    dirty: bool,

    /// Suspension jounce saved while simulation is paused
    pub jounce: f32,
    /// Wheel rotation speed saved while simulation is paused
    pub rotation_speed: f32,
    /// Slip-corrected rotation speed saved while simulation is paused
    pub corrected_rotation_speed: f32,
    /// Wheel rotation angle saved while simulation is paused
    pub rotation_angle: f32,
}

impl Component for VehicleWheelComponent {}

impl VehicleWheelComponent {
    /// Wheel centred at `position` in chassis space
    pub fn new(position: Vec3, radius: f32, width: f32) -> Self {
        VehicleWheelComponent {
            radius,
            width,
            position,
            max_steer_angle: 0.0,
            max_brake_torque: 1500.0,
            max_compression: None,
            max_droop: None,
            spring_strength: None,
            damper_rate: None,
            dirty: true,
            jounce: 0.0,
            rotation_speed: 0.0,
            corrected_rotation_speed: 0.0,
            rotation_angle: 0.0,
        }
    }

    /// Steerable copy
    pub fn with_steer(mut self, max_steer_angle: f32) -> Self {
        self.max_steer_angle = max_steer_angle;
        self
    }

    /// Radius
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Set the radius
    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
        self.dirty = true;
    }

    /// Width
    pub fn width(&self) -> f32 {
        self.width
    }

    /// Set the width
    pub fn set_width(&mut self, width: f32) {
        self.width = width;
        self.dirty = true;
    }

    /// Centre in chassis space at zero jounce
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Move the wheel centre
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    /// Largest steer angle in radians, zero for fixed wheels
    pub fn max_steer_angle(&self) -> f32 {
        self.max_steer_angle
    }

    /// Set the steer limit
    pub fn set_max_steer_angle(&mut self, angle: f32) {
        self.max_steer_angle = angle;
        self.dirty = true;
    }

    /// Brake torque at full brake
    pub fn max_brake_torque(&self) -> f32 {
        self.max_brake_torque
    }

    /// Set the brake torque
    pub fn set_max_brake_torque(&mut self, torque: f32) {
        self.max_brake_torque = torque;
        self.dirty = true;
    }

    /// Compression override
    pub fn max_compression(&self) -> Option<f32> {
        self.max_compression
    }

    /// Override the suspension compression
    pub fn set_max_compression(&mut self, value: Option<f32>) {
        self.max_compression = value;
        self.dirty = true;
    }

    /// Droop override
    pub fn max_droop(&self) -> Option<f32> {
        self.max_droop
    }

    /// Override the suspension droop
    pub fn set_max_droop(&mut self, value: Option<f32>) {
        self.max_droop = value;
        self.dirty = true;
    }

    /// Spring override
    pub fn spring_strength(&self) -> Option<f32> {
        self.spring_strength
    }

    /// Override the spring strength
    pub fn set_spring_strength(&mut self, value: Option<f32>) {
        self.spring_strength = value;
        self.dirty = true;
    }

    /// Damper override
    pub fn damper_rate(&self) -> Option<f32> {
        self.damper_rate
    }

    /// Override the damper rate
    pub fn set_damper_rate(&mut self, value: Option<f32>) {
        self.damper_rate = value;
        self.dirty = true;
    }

    /// Suspension travel: compression plus droop, if both are overridden
    pub fn suspension_travel(&self) -> Option<f32> {
        Some(self.max_compression? + self.max_droop?)
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Chassis description, attached to the vehicle's root entity
#[derive(Debug, Clone, Default)]
pub struct VehicleChassisComponent {
    center_of_mass_offset: Vec3,
    mass_override: Option<f32>,
    moment_of_inertia_override: Option<Vec3>,
    dirty: bool,
}

impl Component for VehicleChassisComponent {}

impl VehicleChassisComponent {
    /// Chassis with the centre of mass at `offset`
    pub fn new(offset: Vec3) -> Self {
        VehicleChassisComponent {
            center_of_mass_offset: offset,
            mass_override: None,
            moment_of_inertia_override: None,
            dirty: true,
        }
    }

    /// Centre of mass in chassis space
    pub fn center_of_mass_offset(&self) -> Vec3 {
        self.center_of_mass_offset
    }

    /// Move the centre of mass
    pub fn set_center_of_mass_offset(&mut self, offset: Vec3) {
        self.center_of_mass_offset = offset;
        self.dirty = true;
    }

    /// Mass used instead of the chassis shape mass
    pub fn mass_override(&self) -> Option<f32> {
        self.mass_override
    }

    /// Override the chassis mass
    pub fn set_mass_override(&mut self, mass: Option<f32>) {
        self.mass_override = mass;
        self.dirty = true;
    }

    /// Inertia used instead of the box estimate
    pub fn moment_of_inertia_override(&self) -> Option<Vec3> {
        self.moment_of_inertia_override
    }

    /// Override the chassis inertia
    pub fn set_moment_of_inertia_override(&mut self, inertia: Option<Vec3>) {
        self.moment_of_inertia_override = inertia;
        self.dirty = true;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Drivetrain state copied out of a rig while simulation is paused
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SavedDriveState {
    /// Engine rotation speed
    pub engine_speed: f32,
    /// Smoothed analog inputs
    pub analog_inputs: [f32; 5],
    /// Gear
    pub gear: Gear,
}

/// Wheeled car with every wheel driven
#[derive(Debug, Clone)]
pub struct VehicleCarComponent {
    /// Gear requested for the next step
    pub gear: Gear,
    analog_acceleration: f32,
    analog_brake: f32,
    analog_steer: f32,
    engine_peak_torque: f32,
    engine_max_omega: f32,
    gear_switch_time: f32,
    clutch_strength: f32,
    dirty: bool,
    pub(crate) rig: Option<VehicleHandle>,
    pub(crate) saved: Option<SavedDriveState>,
}

impl Component for VehicleCarComponent {}

impl Default for VehicleCarComponent {
    fn default() -> Self {
        VehicleCarComponent {
            gear: Gear::First,
            analog_acceleration: 0.0,
            analog_brake: 0.0,
            analog_steer: 0.0,
            engine_peak_torque: 500.0,
            engine_max_omega: 600.0,
            gear_switch_time: 0.5,
            clutch_strength: 10.0,
            dirty: true,
            rig: None,
            saved: None,
        }
    }
}

impl VehicleCarComponent {
    /// Car with the default drivetrain
    pub fn new() -> Self {
        VehicleCarComponent::default()
    }

    /// Native rig, `None` until built
    pub fn rig(&self) -> Option<VehicleHandle> {
        self.rig
    }

    /// Drivetrain state saved on the last pause
    pub fn saved_state(&self) -> Option<SavedDriveState> {
        self.saved
    }

    /// Throttle in `[0, 1]` for the next step
    pub fn set_analog_acceleration(&mut self, value: f32) {
        self.analog_acceleration = value.clamp(0.0, 1.0);
    }

    /// Brake in `[0, 1]` for the next step
    pub fn set_analog_brake(&mut self, value: f32) {
        self.analog_brake = value.clamp(0.0, 1.0);
    }

    /// Steer in `[-1, 1]` for the next step, positive to the right
    pub fn set_analog_steer(&mut self, value: f32) {
        self.analog_steer = value.clamp(-1.0, 1.0);
    }

    /// Raw throttle
    pub fn analog_acceleration(&self) -> f32 {
        self.analog_acceleration
    }

    /// Raw brake
    pub fn analog_brake(&self) -> f32 {
        self.analog_brake
    }

    /// Raw steer
    pub fn analog_steer(&self) -> f32 {
        self.analog_steer
    }

    /// Clear the raw inputs
    pub fn reset_input(&mut self) {
        self.analog_acceleration = 0.0;
        self.analog_brake = 0.0;
        self.analog_steer = 0.0;
    }

    /// Engine peak torque
    pub fn engine_peak_torque(&self) -> f32 {
        self.engine_peak_torque
    }

    /// Set the engine peak torque
    pub fn set_engine_peak_torque(&mut self, torque: f32) {
        self.engine_peak_torque = torque;
        self.dirty = true;
    }

    /// Engine speed limit in rad/s
    pub fn engine_max_omega(&self) -> f32 {
        self.engine_max_omega
    }

    /// Set the engine speed limit
    pub fn set_engine_max_omega(&mut self, omega: f32) {
        self.engine_max_omega = omega;
        self.dirty = true;
    }

    /// Seconds a gear change takes
    pub fn gear_switch_time(&self) -> f32 {
        self.gear_switch_time
    }

    /// Set the gear change time
    pub fn set_gear_switch_time(&mut self, seconds: f32) {
        self.gear_switch_time = seconds;
        self.dirty = true;
    }

    /// Clutch strength
    pub fn clutch_strength(&self) -> f32 {
        self.clutch_strength
    }

    /// Set the clutch strength
    pub fn set_clutch_strength(&mut self, strength: f32) {
        self.clutch_strength = strength;
        self.dirty = true;
    }

    /// Force a rebuild of the rig
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Tracked vehicle steered by per-side thrust
#[derive(Debug, Clone)]
pub struct VehicleTankComponent {
    /// Gear requested for the next step
    pub gear: Gear,
    analog_acceleration: f32,
    analog_left_brake: f32,
    analog_right_brake: f32,
    analog_left_thrust: f32,
    analog_right_thrust: f32,
    engine_peak_torque: f32,
    engine_max_omega: f32,
    dirty: bool,
    pub(crate) rig: Option<VehicleHandle>,
    pub(crate) saved: Option<SavedDriveState>,
}

impl Component for VehicleTankComponent {}

impl Default for VehicleTankComponent {
    fn default() -> Self {
        VehicleTankComponent {
            gear: Gear::First,
            analog_acceleration: 0.0,
            analog_left_brake: 0.0,
            analog_right_brake: 0.0,
            analog_left_thrust: 0.0,
            analog_right_thrust: 0.0,
            engine_peak_torque: 500.0,
            engine_max_omega: 600.0,
            dirty: true,
            rig: None,
            saved: None,
        }
    }
}

impl VehicleTankComponent {
    /// Tank with the default drivetrain
    pub fn new() -> Self {
        VehicleTankComponent::default()
    }

    /// Native rig, `None` until built
    pub fn rig(&self) -> Option<VehicleHandle> {
        self.rig
    }

    /// Drivetrain state saved on the last pause
    pub fn saved_state(&self) -> Option<SavedDriveState> {
        self.saved
    }

    /// Throttle in `[0, 1]`
    pub fn set_analog_acceleration(&mut self, value: f32) {
        self.analog_acceleration = value.clamp(0.0, 1.0);
    }

    /// Left and right brakes in `[0, 1]`
    pub fn set_analog_brakes(&mut self, left: f32, right: f32) {
        self.analog_left_brake = left.clamp(0.0, 1.0);
        self.analog_right_brake = right.clamp(0.0, 1.0);
    }

    /// Left and right thrust in `[-1, 1]`
    pub fn set_analog_thrust(&mut self, left: f32, right: f32) {
        self.analog_left_thrust = left.clamp(-1.0, 1.0);
        self.analog_right_thrust = right.clamp(-1.0, 1.0);
    }

    /// Raw inputs: accel, left brake, right brake, left thrust, right thrust
    pub fn raw_inputs(&self) -> [f32; 5] {
        [
            self.analog_acceleration,
            self.analog_left_brake,
            self.analog_right_brake,
            self.analog_left_thrust,
            self.analog_right_thrust,
        ]
    }

    /// Clear the raw inputs
    pub fn reset_input(&mut self) {
        self.analog_acceleration = 0.0;
        self.analog_left_brake = 0.0;
        self.analog_right_brake = 0.0;
        self.analog_left_thrust = 0.0;
        self.analog_right_thrust = 0.0;
    }

    /// Engine peak torque
    pub fn engine_peak_torque(&self) -> f32 {
        self.engine_peak_torque
    }

    /// Set the engine peak torque
    pub fn set_engine_peak_torque(&mut self, torque: f32) {
        self.engine_peak_torque = torque;
        self.dirty = true;
    }

    /// Engine speed limit in rad/s
    pub fn engine_max_omega(&self) -> f32 {
        self.engine_max_omega
    }

    /// Set the engine speed limit
    pub fn set_engine_max_omega(&mut self, omega: f32) {
        self.engine_max_omega = omega;
        self.dirty = true;
    }

    /// Force a rebuild of the rig
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gear_indices() {
        assert_eq!(Gear::Reverse.index(), 0);
        assert_eq!(Gear::First.index(), 2);
        assert_eq!(Gear::from_index(6), Some(Gear::TOP));
        assert_eq!(Gear::from_index(7), None);
    }

    #[test]
    fn test_wheel_setters_mark_dirty() {
        let mut wheel = VehicleWheelComponent::new(Vec3::ZERO, 0.4, 0.2);
        assert!(wheel.take_dirty());
        assert!(!wheel.is_dirty());
        wheel.set_spring_strength(Some(20000.0));
        assert!(wheel.take_dirty());
        assert_eq!(wheel.suspension_travel(), None);
        wheel.set_max_compression(Some(0.2));
        wheel.set_max_droop(Some(0.1));
        assert!((wheel.suspension_travel().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_car_inputs_are_clamped_and_reset() {
        let mut car = VehicleCarComponent::new();
        car.set_analog_acceleration(3.0);
        car.set_analog_steer(-2.0);
        assert_eq!(car.analog_acceleration(), 1.0);
        assert_eq!(car.analog_steer(), -1.0);
        car.reset_input();
        assert_eq!(car.analog_acceleration(), 0.0);
        assert!(car.take_dirty());
    }

    #[test]
    fn test_surface_filters_partition_the_word() {
        assert_eq!(DRIVABLE_SURFACE_FILTER & UNDRIVABLE_SURFACE_FILTER, 0);
        assert_eq!(DRIVABLE_SURFACE_FILTER | UNDRIVABLE_SURFACE_FILTER, u32::MAX);
        assert_eq!(layers::WHEEL & layers::GROUND_COLLIDES_WITH, 0);
    }
}
