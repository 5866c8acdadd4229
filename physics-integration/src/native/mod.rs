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
//! Native simulation layer
//!
//! Generational handles, filter words, collision geometry, scene queries and
//! the [`NativeWorld`] that owns every native object.

pub mod filter;
pub mod geometry;
pub mod handle;
pub mod integrator;
pub mod query;
pub mod world;

pub use filter::{pairs_collide, FilterData, QueryFilter, QueryMode, CCD_FLAG};
pub use geometry::{closest_point_on_triangle, HeightFieldData, NativeGeometry, TriangleData};
pub use handle::{
    Actor, ActorHandle, Controller, ControllerHandle, Handle, HandleArena, Shape, ShapeHandle,
    Vehicle, VehicleHandle,
};
pub use integrator::{
    BodyState, Integrator, IntegratorKind, SemiImplicitEulerIntegrator, VelocityVerletIntegrator,
};
pub use query::{Ray, RaycastHit};
pub use world::{
    ActorDesc, ActorType, CollisionFlags, ContactPoint, ContactReport, ControllerDesc,
    ControllerGeometry, DebugLine, DebugPoint, DebugRenderBuffer, DebugTriangle, ForceMode,
    NativeMaterial, NativeStats, NativeWorld, ShapeDesc, ShapePatch, TriggerReport, Visualization,
    WorldDesc,
};
