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
//! Scene system trait
//!
//! A scene system is notified of structural changes (entities and
//! components coming and going) and is advanced once per fixed step.

use crate::ecs::{ComponentId, Entity, RemovedComponent, Scene, SceneEvent};
use std::any::TypeId;

/// Trait for systems driven by a [`Scene`]
pub trait SceneSystem {
    /// An entity was created
    fn register_entity(&mut self, _scene: &mut Scene, _entity: Entity) {}

    /// An entity was destroyed; its components have already been unregistered
    fn unregister_entity(&mut self, _scene: &mut Scene, _entity: Entity) {}

    /// A component was attached to `entity`
    fn register_component(
        &mut self,
        _scene: &mut Scene,
        _entity: Entity,
        _id: ComponentId,
        _type_id: TypeId,
    ) {
    }

    /// A component was detached from `entity`
    fn unregister_component(&mut self, _scene: &mut Scene, _entity: Entity, _removed: RemovedComponent) {}

    /// Advance the system by one fixed step
    fn process_fixed(&mut self, scene: &mut Scene, dt: f32);

    /// Release everything the system holds before the scene goes away
    fn prepare_for_remove(&mut self, _scene: &mut Scene) {}

    /// Get the name of this system for debugging
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Deliver queued scene events to `system`
///
/// Events raised by the callbacks themselves are delivered in the same call.
/// Returns the number of events delivered.
pub fn dispatch_events(scene: &mut Scene, system: &mut dyn SceneSystem) -> usize {
    let mut delivered = 0;
    loop {
        let events = scene.take_events();
        if events.is_empty() {
            return delivered;
        }
        delivered += events.len();
        for event in events {
            match event {
                SceneEvent::EntityAdded(entity) => system.register_entity(scene, entity),
                SceneEvent::EntityRemoved(entity) => system.unregister_entity(scene, entity),
                SceneEvent::ComponentAdded {
                    entity,
                    id,
                    type_id,
                } => system.register_component(scene, entity, id, type_id),
                SceneEvent::ComponentRemoved { entity, removed } => {
                    system.unregister_component(scene, entity, removed)
                }
            }
        }
    }
}
