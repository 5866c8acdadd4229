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
//! Wheeled and tracked vehicles
//!
//! Vehicles are entities with a dynamic body, a chassis, wheels and a car or
//! tank component. The [`PhysicsVehiclesSubsystem`] turns them into rigs that
//! drive the body through suspension and tire forces.

pub mod components;
pub mod query;
pub mod rig;
pub mod subsystem;

pub use components::{
    layers, Gear, SavedDriveState, VehicleCarComponent, VehicleChassisComponent, VehicleTankComponent,
    VehicleWheelComponent, DRIVABLE_SURFACE_FILTER, MAX_VEHICLES_COUNT, MAX_WHEELS_PER_VEHICLE,
    UNDRIVABLE_SURFACE_FILTER,
};
pub use query::{BufferGuard, BufferPool, PoolStats, QuerySlots, SuspensionRay, VehicleSceneQuery};
pub use rig::{
    box_moment_of_inertia, compute_sprung_masses, smooth_inputs, steer_scale, DriveParams, EngineDamping, RigKind,
    SuspensionData, TireFrictionPairs, VehicleRig, WheelSim, WheelState, NORMAL_TIRE,
};
pub use subsystem::{PhysicsVehiclesSubsystem, VehicleStats};
