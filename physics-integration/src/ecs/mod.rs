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
//! Scene framework
//!
//! Entities with parent links and transforms, typed component storage, scene
//! singletons, and the event protocol systems use to learn about attached
//! and detached components.

mod component;
mod entity;
mod render;
mod scene;
mod scheduler;
mod system;

pub use component::{Component, ComponentId, ComponentStorage};
pub use entity::{Entity, EntityId};
pub use render::{LandscapeComponent, PolygonGroup, RenderGeometry};
pub use scene::{RemovedComponent, Scene, SceneEvent};
pub use scheduler::{run_frame, FixedTimestep};
pub use system::{dispatch_events, SceneSystem};
